use crate::cache::DedupCache;
use crate::compass::{CompassApi, RetryingClient};
use crate::config::Config;
use crate::persist::{CacheFlusher, JsonStore, Persistence};
use crate::scraper::{CrawlReport, CrawlScheduler};
use crate::utils::fmt_duration;
use anyhow::Context;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Main application struct containing all necessary components
pub struct App {
    config: Config,
    api: Arc<CompassApi>,
    flusher: Arc<CacheFlusher>,
    scheduler: CrawlScheduler,
}

/// How a run over several terms went.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub reports: Vec<CrawlReport>,
    pub failed: Vec<String>,
    pub interrupted: bool,
}

impl RunSummary {
    pub fn exit_code(&self) -> ExitCode {
        if self.reports.is_empty() {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        }
    }
}

impl App {
    /// Create a new App with the faculty cache loaded from the data directory.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let store: Arc<dyn Persistence> = Arc::new(JsonStore::new(&config.data_dir));
        Self::with_store(config, store).await
    }

    pub async fn with_store(config: Config, store: Arc<dyn Persistence>) -> anyhow::Result<Self> {
        let client = RetryingClient::new(
            config.retry_policy(),
            config.request_timeout,
            config.requests_per_second,
        )?;
        let api = Arc::new(
            CompassApi::new(&config.base_url, client, config.page_size)
                .context("Failed to create Compass API client")?,
        );

        // A missing or unreadable cache only costs extra lookups.
        let snapshot = match store.load_cache_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = ?e, "Failed to load faculty cache, starting empty");
                Default::default()
            }
        };
        let cache = Arc::new(DedupCache::from_entries(snapshot));
        info!(entries = cache.len(), "Faculty cache loaded");

        let flusher = Arc::new(CacheFlusher::new(cache, store.clone()));
        let scheduler = CrawlScheduler::new(
            api.clone(),
            store,
            flusher.clone(),
            config.crawl_options(),
        );

        Ok(Self {
            config,
            api,
            flusher,
            scheduler,
        })
    }

    pub fn scheduler(&self) -> &CrawlScheduler {
        &self.scheduler
    }

    pub fn flusher(&self) -> &Arc<CacheFlusher> {
        &self.flusher
    }

    /// Terms to crawl: `explicit` codes, else configured ones, else the newest
    /// `latest` listed terms. `latest == 0` selects every listed term.
    pub async fn resolve_terms(
        &self,
        explicit: &[String],
        latest: usize,
    ) -> anyhow::Result<Vec<String>> {
        if !explicit.is_empty() {
            return Ok(explicit.to_vec());
        }
        if !self.config.terms.is_empty() {
            return Ok(self.config.terms.clone());
        }

        let terms = self
            .api
            .terms()
            .await
            .context("Failed to fetch term listing")?;
        let selected: Vec<String> = terms
            .into_iter()
            .take(if latest == 0 { usize::MAX } else { latest })
            .map(|term| {
                info!(
                    term = term.code.as_str(),
                    description = term.description.as_str(),
                    "Selected term"
                );
                term.code
            })
            .collect();
        anyhow::ensure!(!selected.is_empty(), "Compass listed no terms");
        Ok(selected)
    }

    /// Crawl `terms` one after another until done or interrupted by Ctrl-C.
    ///
    /// The faculty cache is flushed periodically while crawling and once more
    /// before returning.
    pub async fn run(&self, terms: &[String]) -> RunSummary {
        let shutdown = CancellationToken::new();
        let flush_task = self.spawn_cache_flush(shutdown.clone());

        let mut summary = RunSummary::default();
        let interrupted = tokio::select! {
            _ = self.crawl_terms(terms, &mut summary) => false,
            _ = tokio::signal::ctrl_c() => true,
        };
        if interrupted {
            warn!("Interrupted, flushing faculty cache before exit");
            summary.interrupted = true;
        }

        shutdown.cancel();
        if let Err(e) = flush_task.await {
            warn!(error = ?e, "Cache flush task ended abnormally");
        }
        match self.flusher.flush().await {
            Ok(_) => info!(entries = self.flusher.cache().len(), "Faculty cache saved"),
            Err(e) => error!(error = ?e, "Failed to save faculty cache"),
        }

        summary
    }

    async fn crawl_terms(&self, terms: &[String], summary: &mut RunSummary) {
        let start = Instant::now();
        for term in terms {
            match self.scheduler.run_term(term).await {
                Ok(report) => summary.reports.push(report),
                Err(e) => {
                    error!(term = term.as_str(), error = ?e, "Term failed");
                    summary.failed.push(term.clone());
                }
            }
        }
        info!(
            succeeded = summary.reports.len(),
            failed = summary.failed.len(),
            duration = fmt_duration(start.elapsed()),
            "Crawl finished"
        );
    }

    /// Spawn a background task that flushes the faculty cache every `cache_flush_interval`.
    fn spawn_cache_flush(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let flusher = self.flusher.clone();
        let interval = self.config.cache_flush_interval.max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // skip the immediate first tick
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = flusher.flush().await {
                            warn!(error = ?e, "Failed to flush faculty cache");
                        }
                    }
                }
            }
        })
    }
}
