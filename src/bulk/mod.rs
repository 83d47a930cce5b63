//! Bounded-concurrency bulk execution.
//!
//! Runs many queries through the shared escalation controller at once,
//! capped by a semaphore so the engine never floods the target. Failures
//! are isolated per item; with `continue_on_error` off, a failure stops
//! items that have not started yet while in-flight items run to
//! completion.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::escalation::Outcome;
use crate::escalation::controller::EscalationController;
use crate::query::{SearchQuery, SearchReport};

/// Invoked after each item completes with `(completed, total)`.
pub type ProgressCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct BulkConfig {
    /// Queries allowed in flight at once.
    pub max_concurrent: usize,
    /// When false, one failed item aborts everything still pending.
    pub continue_on_error: bool,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            continue_on_error: true,
        }
    }
}

/// Aggregate result. `reports` is index-aligned with the input queries;
/// items that never started hold `None` and carry an entry in `errors`.
#[derive(Debug)]
pub struct BulkResult {
    pub reports: Vec<Option<SearchReport>>,
    pub errors: Vec<(usize, String)>,
}

impl BulkResult {
    pub fn successes(&self) -> usize {
        self.reports
            .iter()
            .flatten()
            .filter(|report| report.is_success())
            .count()
    }

    pub fn failures(&self) -> usize {
        self.errors.len()
    }
}

/// Fans queries out over the controller.
pub struct BulkCoordinator {
    controller: Arc<EscalationController>,
    config: BulkConfig,
    progress: Option<ProgressCallback>,
}

impl BulkCoordinator {
    pub fn new(controller: Arc<EscalationController>, config: BulkConfig) -> Self {
        Self {
            controller,
            config,
            progress: None,
        }
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Run all queries. `cancel` stops in-flight items too; the internal
    /// abort signal raised by a failure (with `continue_on_error` off)
    /// only stops items that have not acquired a permit yet.
    pub async fn run(&self, queries: Vec<SearchQuery>, cancel: &CancellationToken) -> BulkResult {
        let total = queries.len();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));
        let abort_pending = CancellationToken::new();
        let completed = Arc::new(AtomicUsize::new(0));

        let mut tasks: JoinSet<(usize, Result<SearchReport, String>)> = JoinSet::new();

        for (index, query) in queries.into_iter().enumerate() {
            let controller = self.controller.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            let abort_pending = abort_pending.clone();
            let continue_on_error = self.config.continue_on_error;
            let completed = completed.clone();
            let progress = self.progress.clone();

            tasks.spawn(async move {
                let permit = tokio::select! {
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return (index, Err("semaphore closed".to_string())),
                    },
                    _ = cancel.cancelled() => {
                        return (index, Err("cancelled".to_string()));
                    }
                    _ = abort_pending.cancelled() => {
                        return (index, Err("aborted after earlier failure".to_string()));
                    }
                };
                let _permit = permit;

                // Re-check after waiting: a failure may have landed while
                // this item was queued.
                if abort_pending.is_cancelled() {
                    return (index, Err("aborted after earlier failure".to_string()));
                }

                let report = controller.run(&query, &cancel).await;

                let failed = matches!(report.outcome, Outcome::Error | Outcome::Exhausted);
                if failed && !continue_on_error {
                    abort_pending.cancel();
                }

                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(progress) = progress {
                    progress(done, total);
                }

                (index, Ok(report))
            });
        }

        let mut reports: Vec<Option<SearchReport>> = (0..total).map(|_| None).collect();
        let mut errors = Vec::new();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(report))) => {
                    if matches!(report.outcome, Outcome::Error | Outcome::Exhausted) {
                        let detail = report
                            .error
                            .clone()
                            .unwrap_or_else(|| format!("{:?}", report.outcome));
                        errors.push((index, detail));
                    }
                    reports[index] = Some(report);
                }
                Ok((index, Err(reason))) => {
                    errors.push((index, reason));
                }
                Err(join_err) => {
                    log::error!("bulk task panicked: {join_err}");
                }
            }
        }

        errors.sort_by_key(|(index, _)| *index);
        BulkResult { reports, errors }
    }
}
