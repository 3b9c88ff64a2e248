use clap::Parser;
use compass::app::App;
use compass::cli::Args;
use compass::config::Config;
use compass::logging::setup_logging;
use std::process::ExitCode;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Logging needs the config, so a config error can only go to stderr.
    let config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e:#}");
            return ExitCode::FAILURE;
        }
    };
    setup_logging(&config, args.tracing);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        base_url = config.base_url.as_str(),
        data_dir = %config.data_dir.display(),
        "starting compass crawler"
    );

    let app = match App::new(config).await {
        Ok(app) => app,
        Err(e) => {
            error!(error = ?e, "Failed to initialize application");
            return ExitCode::FAILURE;
        }
    };

    let terms = match app.resolve_terms(&args.terms, args.latest).await {
        Ok(terms) => terms,
        Err(e) => {
            error!(error = ?e, "Failed to determine terms to crawl");
            return ExitCode::FAILURE;
        }
    };
    info!(terms = ?terms, "Terms selected");

    let summary = app.run(&terms).await;
    if !summary.failed.is_empty() {
        error!(failed = ?summary.failed, "Some terms could not be crawled");
    }
    summary.exit_code()
}
