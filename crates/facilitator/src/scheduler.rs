//! Stage deadline scheduling.
//!
//! Each session owns zero-or-one armed deadline timer. Firing posts an
//! event into the session worker's queue rather than acting directly:
//! the worker re-validates phase and stage index when the event arrives,
//! which makes cancellation race-safe against a timer that already fired
//! but whose event has not been processed yet.

use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::debug;

/// Scheduler errors.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// `arm` was called while a deadline was already armed; callers must
    /// cancel first.
    #[error("a deadline is already armed for stage {0}")]
    AlreadyArmed(usize),
}

struct ArmedDeadline {
    stage: usize,
    handle: JoinHandle<()>,
}

/// Owns the single deadline timer for one session.
pub struct StageScheduler {
    armed: Option<ArmedDeadline>,
}

impl StageScheduler {
    pub fn new() -> Self {
        Self { armed: None }
    }

    /// Arm a one-shot deadline for `stage`. After `horizon`, `on_fire` is
    /// posted to `tx`. Fails if a deadline is already armed.
    pub fn arm<E: Send + 'static>(
        &mut self,
        stage: usize,
        horizon: Duration,
        tx: &UnboundedSender<E>,
        on_fire: E,
    ) -> Result<(), SchedulerError> {
        if let Some(armed) = &self.armed {
            return Err(SchedulerError::AlreadyArmed(armed.stage));
        }
        let tx = tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(horizon).await;
            // The worker may already be gone; a dead queue is fine.
            let _ = tx.send(on_fire);
        });
        debug!(stage, horizon_secs = horizon.as_secs(), "Stage deadline armed");
        self.armed = Some(ArmedDeadline { stage, handle });
        Ok(())
    }

    /// Cancel the armed deadline, if any. Idempotent.
    pub fn cancel(&mut self) {
        if let Some(armed) = self.armed.take() {
            armed.handle.abort();
            debug!(stage = armed.stage, "Stage deadline cancelled");
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Stage the armed deadline belongs to, if any.
    pub fn armed_stage(&self) -> Option<usize> {
        self.armed.as_ref().map(|a| a.stage)
    }
}

impl Default for StageScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for StageScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Post `event` to `tx` after `delay`.
///
/// Used for the fixed pipeline delays (post-coverage summary, post-hint
/// grace, next-prompt gap). These are fire-and-forget: consumers validate
/// state when the event arrives.
pub fn defer<E: Send + 'static>(delay: Duration, tx: &UnboundedSender<E>, event: E) {
    let tx = tx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = tx.send(event);
    });
}
