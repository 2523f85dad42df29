//! Retry coordination
//!
//! A second, independent scheduling loop over the parent session's failed
//! set. Each retry pass runs under its own durable session (keyed off the
//! parent's key) so a crash mid-retry resumes the retry, not the initial
//! pass. After a completed pass the results are written back into the
//! parent session (its failed set is replaced wholesale) and the operator
//! is offered another pass while targets keep failing.

use std::sync::Arc;

use tracing::info;

use crate::{
    BatchScheduler, Confirmer, PassContext, PassOutcome, RotatorError, Session, SessionStore,
};

pub struct RetryCoordinator {
    ctx: Arc<PassContext>,
    parent_key: String,
    confirmer: Arc<dyn Confirmer>,
}

impl RetryCoordinator {
    pub fn new(ctx: Arc<PassContext>, parent_key: String, confirmer: Arc<dyn Confirmer>) -> Self {
        Self {
            ctx,
            parent_key,
            confirmer,
        }
    }

    /// Run retry passes until the failed set is empty or the operator
    /// declines to continue. The parent session is updated (and committed)
    /// after every completed pass.
    pub async fn run(&self, parent: &mut Session) -> Result<PassOutcome, RotatorError> {
        let retry_key = SessionStore::retry_key(&self.parent_key);

        loop {
            let mut retry_session = match self.ctx.store.load(&retry_key) {
                Some(existing) => {
                    if existing.remaining_domains.is_empty() && existing.failed_domains.is_empty() {
                        info!("All domains have been successfully processed after retry.");
                        self.ctx.store.delete(&retry_key);
                        return Ok(PassOutcome::Completed);
                    } else if existing.remaining_domains.is_empty() {
                        // A full pass went by and these targets still fail:
                        // start a fresh pass over exactly that set.
                        info!(
                            "{} domain(s) still failed. Retrying.",
                            existing.failed_domains.len()
                        );
                        Session::new(existing.failed_domains.iter().cloned().collect())
                    } else if existing.processed_domains.is_empty()
                        && existing.screenshots_done == 0
                    {
                        // Seeded but never started; nothing to ask about.
                        existing
                    } else {
                        info!(
                            "Found a retry session with {} domain(s) to process ({}/{} processed, {} screenshots done).",
                            existing.remaining_domains.len(),
                            existing.processed_domains.len(),
                            existing.total_targets(),
                            existing.screenshots_done
                        );
                        if self.confirmer.confirm("Continue the previous retry session?") {
                            existing
                        } else {
                            self.ctx.store.delete(&retry_key);
                            return Ok(PassOutcome::Completed);
                        }
                    }
                }
                None => {
                    if parent.failed_domains.is_empty() {
                        info!("No failed domains to retry.");
                        return Ok(PassOutcome::Completed);
                    }
                    info!(
                        "{} domain(s) previously failed. Retrying.",
                        parent.failed_domains.len()
                    );
                    Session::new(parent.failed_domains.iter().cloned().collect())
                }
            };

            let scheduler = BatchScheduler::new(self.ctx.clone(), retry_key.clone(), true);
            match scheduler.run(&mut retry_session).await? {
                PassOutcome::Cancelled => return Ok(PassOutcome::Cancelled),
                PassOutcome::Completed => {}
            }

            parent.absorb_retry_results(&retry_session);
            self.commit_parent(parent);

            if parent.failed_domains.is_empty() {
                info!("All domains were successfully processed after retry.");
                self.ctx.store.delete(&retry_key);
                return Ok(PassOutcome::Completed);
            }

            info!(
                "{} domain(s) still failed after retry.",
                parent.failed_domains.len()
            );
            if !self
                .confirmer
                .confirm("Retry the remaining failed domains again?")
            {
                self.ctx.store.delete(&retry_key);
                return Ok(PassOutcome::Completed);
            }
            // Loop around: the committed retry session has an empty
            // remaining queue and a non-empty failed set, which restarts
            // the pass over exactly the still-failing targets.
        }
    }

    fn commit_parent(&self, parent: &mut Session) {
        if let Err(e) = self.ctx.store.save(&self.parent_key, parent) {
            self.ctx.sinks.ops_error(&format!(
                "Failed to save session '{}': {e}",
                self.parent_key
            ));
        }
    }
}
