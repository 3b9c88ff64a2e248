use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Crawl the Compass course catalog into per-term JSON datasets.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Log output format
    #[arg(long, value_enum, default_value_t = default_tracing_format())]
    pub tracing: TracingFormat,

    /// Config file (defaults to `compass.toml` when present)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Term code to crawl; repeat for several. Overrides configured terms.
    #[arg(long = "term", value_name = "CODE")]
    pub terms: Vec<String>,

    /// Crawl the newest N terms from the term listing when no term is given; 0 crawls all
    #[arg(long, value_name = "N", default_value_t = 1)]
    pub latest: usize,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable output for terminals
    Pretty,
    /// One JSON object per event
    Json,
}

fn default_tracing_format() -> TracingFormat {
    if cfg!(debug_assertions) {
        TracingFormat::Pretty
    } else {
        TracingFormat::Json
    }
}
