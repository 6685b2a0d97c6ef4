//! Restart-with-backoff supervision for long-running tasks.
//!
//! The messaging primitives never retry on their own. A worker that should
//! survive broker hiccups wraps its consume loop in a [`Supervisor`], which
//! restarts the task on failure, backs off between attempts, and gives up
//! once too many failures land inside the restart window.

use crate::Result;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct RestartPolicy {
    /// Failures tolerated within `restart_window` before giving up.
    pub max_restarts: u32,
    pub restart_window: Duration,
    /// Delay before the n-th restart; the last entry repeats.
    pub backoff: Vec<Duration>,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 3,
            restart_window: Duration::from_secs(600),
            backoff: vec![
                Duration::from_secs(1),
                Duration::from_secs(5),
                Duration::from_secs(10),
            ],
        }
    }
}

impl RestartPolicy {
    fn backoff_for(&self, restart: u32) -> Duration {
        match self.backoff.len() {
            0 => Duration::ZERO,
            len => self.backoff[(restart as usize).min(len - 1)],
        }
    }
}

pub struct Supervisor {
    name: String,
    policy: RestartPolicy,
    restart_count: AtomicU32,
    restart_times: Mutex<Vec<Instant>>,
    cancel: CancellationToken,
}

impl Supervisor {
    pub fn new(name: impl Into<String>, policy: RestartPolicy) -> Self {
        Self {
            name: name.into(),
            policy,
            restart_count: AtomicU32::new(0),
            restart_times: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Runs `task_factory()` until it returns `Ok`, the supervisor is stopped,
    /// or the restart budget is exhausted, in which case the last error is
    /// returned.
    pub async fn supervise<F, Fut>(&self, mut task_factory: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        loop {
            info!(name = %self.name, "starting supervised task");

            let result = tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!(name = %self.name, "supervised task cancelled");
                    return Ok(());
                }
                result = task_factory() => result,
            };

            let err = match result {
                Ok(()) => {
                    info!(name = %self.name, "supervised task completed");
                    return Ok(());
                }
                Err(err) => err,
            };
            warn!(name = %self.name, error = %err, "supervised task failed");

            if !self.record_restart().await {
                error!(
                    name = %self.name,
                    max_restarts = self.policy.max_restarts,
                    "too many restarts, giving up"
                );
                return Err(err);
            }

            let backoff = self.policy.backoff_for(self.restart_count() - 1);
            warn!(
                name = %self.name,
                backoff_ms = backoff.as_millis() as u64,
                "waiting before restart"
            );
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }

    // Records a failure; false once the window already holds `max_restarts`.
    async fn record_restart(&self) -> bool {
        let mut times = self.restart_times.lock().await;
        let now = Instant::now();
        times.retain(|&t| now.duration_since(t) < self.policy.restart_window);

        if times.len() >= self.policy.max_restarts as usize {
            return false;
        }
        times.push(now);

        let count = self.restart_count.fetch_add(1, Ordering::AcqRel) + 1;
        warn!(name = %self.name, restart_count = count, "recording restart attempt");
        true
    }

    pub fn restart_count(&self) -> u32 {
        self.restart_count.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Token cancelled by [`stop`](Self::stop); hand it to the supervised task
    /// so it can wind down on its own.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}
