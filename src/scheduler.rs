//! Batch scheduling
//!
//! Drives one scheduling pass: slices the remaining queue into batches,
//! rotates the egress identity before each batch, dispatches the batch to a
//! bounded worker pool and commits the session after every batch (and after
//! a cancellation, so an interrupt never loses collected results).
//!
//! Workers never touch the session. They send `CaptureOutcome`s back over a
//! channel and this scheduler, the sole owner of the session for the pass,
//! applies them between batches. A batch is never dispatched until the
//! previous one has fully committed, which keeps egress rotation aligned
//! with a known-clean boundary.

use std::collections::HashSet;
use std::sync::Arc;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{info, warn};

use crate::{
    normalize, CaptureOutcome, Capturer, Config, EgressRotator, ErrorSinks, Metrics, RotatorError,
    Session, SessionStore,
};

/// How a scheduling pass ended, short of a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Every batch dispatched and committed.
    Completed,
    /// Interrupted by the operator; partial state is persisted.
    Cancelled,
}

/// Everything a scheduling pass needs that is shared between the initial
/// pass and retry passes.
pub struct PassContext {
    pub config: Config,
    pub capturer: Arc<dyn Capturer>,
    pub rotator: Option<Arc<EgressRotator>>,
    pub store: Arc<SessionStore>,
    pub metrics: Arc<Metrics>,
    pub sinks: Arc<ErrorSinks>,
    pub shutdown: broadcast::Sender<()>,
}

pub struct BatchScheduler {
    ctx: Arc<PassContext>,
    session_key: String,
    retry_pass: bool,
}

impl BatchScheduler {
    pub fn new(ctx: Arc<PassContext>, session_key: String, retry_pass: bool) -> Self {
        Self {
            ctx,
            session_key,
            retry_pass,
        }
    }

    /// Run the pass to completion, cancellation or fatal egress failure.
    ///
    /// On egress exhaustion the session (including the untouched remainder)
    /// is committed before the error is returned; the caller terminates the
    /// process.
    pub async fn run(&self, session: &mut Session) -> Result<PassOutcome, RotatorError> {
        if session.remaining_domains.is_empty() {
            return Ok(PassOutcome::Completed);
        }

        let mut cancel = self.ctx.shutdown.subscribe();
        let bars = PassBars::new(session, self.retry_pass);

        let capacity = session.remaining_domains.len().max(1);
        let (request_tx, request_rx) = mpsc::channel::<String>(capacity);
        let (result_tx, mut result_rx) = mpsc::channel::<CaptureOutcome>(capacity);
        let shared_rx = Arc::new(Mutex::new(request_rx));

        let worker_count = self.ctx.config.workers.max(1);
        let mut workers = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let rx = shared_rx.clone();
            let tx = result_tx.clone();
            let capturer = self.ctx.capturer.clone();
            let timeout = self.ctx.config.capture_timeout;
            workers.push(tokio::spawn(async move {
                loop {
                    let target = { rx.lock().await.recv().await };
                    let Some(target) = target else { break };
                    let candidates = normalize(&target);
                    let outcome = capturer.capture(&target, &candidates, timeout).await;
                    if tx.send(outcome).await.is_err() {
                        break;
                    }
                }
            }));
        }
        drop(result_tx);

        let batch_size = self
            .ctx
            .config
            .batch_size
            .filter(|n| *n > 0)
            .unwrap_or(usize::MAX);

        while !session.remaining_domains.is_empty() {
            let take = batch_size.min(session.remaining_domains.len());
            let batch: Vec<String> = session.remaining_domains[..take].to_vec();

            if let Some(rotator) = &self.ctx.rotator {
                if let Err(e) = rotator.rotate().await {
                    // Fatal for the run: everything not yet attempted stays
                    // in the remaining queue and is committed before exit.
                    self.commit(session);
                    rotator.release().await;
                    bars.abandon();
                    return Err(e);
                }
            }

            for target in &batch {
                if request_tx.send(target.clone()).await.is_err() {
                    break;
                }
            }

            bars.start_batch(batch.len());
            let mut batch_processed: HashSet<String> = HashSet::new();
            let mut cancelled = false;
            let mut pool_died = false;

            while batch_processed.len() < batch.len() {
                tokio::select! {
                    maybe = result_rx.recv() => {
                        let Some(outcome) = maybe else {
                            pool_died = true;
                            break;
                        };
                        batch_processed.insert(outcome.target.clone());
                        self.ctx.metrics.record_capture(outcome.duration, outcome.success);
                        bars.record(outcome.success);
                        if outcome.success {
                            session.record_success(&outcome.target, outcome.metadata.unwrap_or_default());
                        } else {
                            session.record_failure(&outcome.target);
                        }
                    }
                    _ = cancel.recv() => {
                        cancelled = true;
                        break;
                    }
                }
            }

            session
                .remaining_domains
                .retain(|target| !batch_processed.contains(target));
            self.commit(session);
            self.ctx
                .metrics
                .record_batch_committed(session.remaining_domains.len());

            if pool_died {
                if let Some(rotator) = &self.ctx.rotator {
                    rotator.release().await;
                }
                bars.abandon();
                return Err(RotatorError::CaptureFailed(
                    "worker pool terminated unexpectedly".to_string(),
                ));
            }

            if cancelled {
                info!(
                    "Interrupted; session saved with {} target(s) remaining",
                    session.remaining_domains.len()
                );
                for worker in &workers {
                    worker.abort();
                }
                if let Some(rotator) = &self.ctx.rotator {
                    rotator.release().await;
                }
                bars.abandon();
                return Ok(PassOutcome::Cancelled);
            }
        }

        drop(request_tx);
        if let Some(rotator) = &self.ctx.rotator {
            rotator.release().await;
        }
        bars.finish();
        Ok(PassOutcome::Completed)
    }

    /// Persist the session. Best-effort: a failed save is reported on the
    /// operational sink and the run continues with in-memory state.
    fn commit(&self, session: &mut Session) {
        if let Err(e) = self.ctx.store.save(&self.session_key, session) {
            warn!("Failed to save session '{}': {e}", self.session_key);
            self.ctx
                .sinks
                .ops_error(&format!("Failed to save session '{}': {e}", self.session_key));
        }
    }
}

/// The three per-pass progress bars: targets processed, screenshots taken,
/// requests completed within the current batch.
struct PassBars {
    _multi: MultiProgress,
    domains: ProgressBar,
    screenshots: ProgressBar,
    requests: ProgressBar,
}

impl PassBars {
    fn new(session: &Session, retry_pass: bool) -> Self {
        let style = ProgressStyle::with_template("{msg:28} {bar:40} {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        let total = session.total_targets() as u64;
        let suffix = if retry_pass { " (retry)" } else { "" };

        let multi = MultiProgress::new();
        let domains = multi.add(
            ProgressBar::new(total)
                .with_style(style.clone())
                .with_message(format!("Domains{suffix} / total")),
        );
        let screenshots = multi.add(
            ProgressBar::new(total)
                .with_style(style.clone())
                .with_message(format!("Screenshots{suffix} / total")),
        );
        let requests = multi.add(
            ProgressBar::new(0)
                .with_style(style)
                .with_message("Requests / batch"),
        );

        domains.set_position(session.processed_domains.len() as u64);
        screenshots.set_position(session.screenshots_done as u64);

        Self {
            _multi: multi,
            domains,
            screenshots,
            requests,
        }
    }

    fn start_batch(&self, size: usize) {
        self.requests.reset();
        self.requests.set_length(size as u64);
    }

    fn record(&self, success: bool) {
        self.domains.inc(1);
        self.requests.inc(1);
        if success {
            self.screenshots.inc(1);
        }
    }

    fn finish(&self) {
        self.domains.finish();
        self.screenshots.finish();
        self.requests.finish_and_clear();
    }

    fn abandon(&self) {
        self.domains.abandon();
        self.screenshots.abandon();
        self.requests.abandon();
    }
}
