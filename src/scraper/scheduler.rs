use crate::cache::DedupCache;
use crate::compass::{CompassApi, CompassError, Course, Department, FacultyProfile, TermSession};
use crate::persist::{CacheFlusher, Persistence};
use crate::scraper::dataset::{CrawlReport, TermDataset};
use crate::scraper::department::{DepartmentCrawl, DepartmentOutput};
use crate::scraper::{CrawlOptions, DepartmentState};
use crate::utils::fmt_duration;
use anyhow::Context;
use futures::{StreamExt, stream};
use rand::seq::SliceRandom;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, error, info, warn};

/// Department attempts slower than this are reported.
const SLOW_DEPARTMENT: Duration = Duration::from_secs(60);

/// Crawls a term department by department with bounded concurrency.
///
/// Departments are shuffled, then at most `concurrency` of them run at once.
/// Each department is retried as a whole; one that keeps failing is abandoned
/// without affecting the rest of the term. Finished departments are merged one
/// at a time as they complete, so the dataset itself is never shared between
/// tasks.
pub struct CrawlScheduler {
    api: Arc<CompassApi>,
    faculty: Arc<DedupCache<FacultyProfile>>,
    store: Arc<dyn Persistence>,
    flusher: Arc<CacheFlusher>,
    options: CrawlOptions,
}

impl CrawlScheduler {
    pub fn new(
        api: Arc<CompassApi>,
        store: Arc<dyn Persistence>,
        flusher: Arc<CacheFlusher>,
        options: CrawlOptions,
    ) -> Self {
        Self {
            api,
            faculty: flusher.cache().clone(),
            store,
            flusher,
            options,
        }
    }

    /// Crawl every department of `term` into one dataset.
    ///
    /// Fails only if the term session or the department listing cannot be
    /// obtained. Abandoned departments are simply missing from the result.
    pub async fn crawl_term(&self, term: &str) -> Result<TermDataset, CompassError> {
        self.crawl(term).await.map(|(dataset, _)| dataset)
    }

    /// Crawl `term` and store its dataset.
    pub async fn run_term(&self, term: &str) -> anyhow::Result<CrawlReport> {
        let (dataset, report) = self
            .crawl(term)
            .await
            .with_context(|| format!("Failed to crawl term {term}"))?;
        self.store
            .write_term_dataset(&dataset)
            .await
            .with_context(|| format!("Failed to store dataset for term {term}"))?;
        Ok(report)
    }

    async fn crawl(&self, term: &str) -> Result<(TermDataset, CrawlReport), CompassError> {
        let start = Instant::now();
        let session = self.api.acquire_session(term).await?;

        let mut departments = self.api.departments(&session).await?;
        if departments.is_empty() {
            warn!(term, "Term lists no departments");
        }
        departments.shuffle(&mut rand::rng());

        info!(
            term,
            departments = departments.len(),
            concurrency = self.options.concurrency,
            "Crawling term"
        );

        let crawl = DepartmentCrawl::new(&self.api, &session, &self.faculty, &self.options);
        let mut dataset = TermDataset::new(term);
        let mut report = CrawlReport {
            term: term.to_owned(),
            departments: departments.len(),
            ..Default::default()
        };

        let mut outcomes = stream::iter(departments.iter())
            .map(|dept| self.crawl_department(&crawl, &session, dept))
            .buffer_unordered(self.options.concurrency.max(1));

        // Files are written beside the merge loop; departments in flight keep
        // being polled meanwhile.
        let (merged_tx, mut merged_rx) = mpsc::unbounded_channel::<MergedDepartment>();
        let merging = async move {
            while let Some((dept, output)) = outcomes.next().await {
                match output {
                    Some(output) => {
                        let merged = MergedDepartment {
                            code: output.code.clone(),
                            courses: output.courses.clone(),
                        };
                        dataset.merge_department(&output.code, output.courses);
                        report.merged += 1;
                        if merged_tx.send(merged).is_err() {
                            warn!(dept = dept.code.as_str(), "Department writer stopped early");
                        }
                    }
                    None => report.abandoned.push(dept.code.clone()),
                }
            }
            (dataset, report)
        };
        let writing = async {
            while let Some(merged) = merged_rx.recv().await {
                self.persist_department(term, merged).await;
            }
        };
        let ((dataset, mut report), ()) = tokio::join!(merging, writing);

        report.courses = dataset.course_count();
        report.sections = dataset.section_count();
        report.elapsed = start.elapsed();

        if report.is_complete() {
            info!(
                term,
                departments = report.merged,
                courses = report.courses,
                sections = report.sections,
                duration = fmt_duration(report.elapsed),
                "Term crawl complete"
            );
        } else {
            report.abandoned.sort();
            warn!(
                term,
                merged = report.merged,
                abandoned = ?report.abandoned,
                courses = report.courses,
                sections = report.sections,
                duration = fmt_duration(report.elapsed),
                "Term crawl finished with abandoned departments"
            );
        }

        Ok((dataset, report))
    }

    /// Run one department to completion or abandonment.
    async fn crawl_department<'d>(
        &self,
        crawl: &DepartmentCrawl<'_>,
        session: &TermSession,
        dept: &'d Department,
    ) -> (&'d Department, Option<DepartmentOutput>) {
        let code = dept.code.as_str();
        let budget = self.options.department_retries.max(1);
        debug!(dept = code, state = %DepartmentState::Pending, "Department queued");

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let start = Instant::now();
            let result = crawl.run(dept).await;
            let duration = start.elapsed();

            if duration > SLOW_DEPARTMENT {
                warn!(
                    dept = code,
                    attempt,
                    duration = fmt_duration(duration),
                    "Slow department crawl (likely rate limiting or retries)"
                );
            }

            let e = match result {
                Ok(output) => {
                    info!(
                        dept = code,
                        state = %DepartmentState::Merged,
                        attempt,
                        courses = output.courses.len(),
                        sections = output.sections,
                        faculty = output.faculty_resolved,
                        faculty_dropped = output.faculty_dropped,
                        duration = fmt_duration(duration),
                        "Department crawled"
                    );
                    return (dept, Some(output));
                }
                Err(e) => e,
            };

            if attempt >= budget {
                error!(
                    dept = code,
                    state = %DepartmentState::Abandoned,
                    attempts = attempt,
                    duration = fmt_duration(duration),
                    error = ?e,
                    "Department failed permanently, abandoning"
                );
                return (dept, None);
            }

            // A refused attempt retries on a fresh handshake, even if the
            // paginator already renewed once inside it.
            if let CompassError::InvalidSession(_) = e.root() {
                let generation = session.generation().await;
                if let Err(renew_err) = self.api.renew_session(session, generation).await {
                    warn!(
                        dept = code,
                        error = ?renew_err,
                        "Failed to renew session after department failure"
                    );
                }
            }

            let delay = self.options.retry.delay(attempt);
            warn!(
                dept = code,
                state = %DepartmentState::Failed { attempt },
                remaining = budget - attempt,
                delay = fmt_duration(delay),
                error = ?e,
                "Department failed, will retry"
            );
            time::sleep(delay).await;
        }
    }

    /// Store a merged department, then flush the faculty cache.
    async fn persist_department(&self, term: &str, merged: MergedDepartment) {
        if let Err(e) = self
            .store
            .write_department(term, &merged.code, &merged.courses)
            .await
        {
            error!(dept = merged.code.as_str(), error = ?e, "Failed to store department");
        }

        if let Err(e) = self.flusher.flush().await {
            warn!(error = ?e, "Failed to flush faculty cache");
        }
    }
}

/// A merged department on its way to disk.
struct MergedDepartment {
    code: String,
    courses: BTreeMap<String, Course>,
}
