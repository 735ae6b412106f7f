//! Fixed-interval polling for asynchronous tasks.

use std::future::Future;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ProviderError, ProviderResult};

/// Outcome of one status check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus<T> {
    /// Not finished yet, check again after the interval.
    Pending,
    Ready(T),
    /// Terminal failure with the provider's message.
    Failed(String),
}

/// Polls a status check at a fixed interval until it reaches a terminal
/// state or the token fires. There is no overall deadline; callers that need
/// one cancel the token.
#[derive(Debug, Clone, Copy)]
pub struct Poller {
    interval: Duration,
}

impl Default for Poller {
    fn default() -> Self {
        Self::new(Self::DEFAULT_INTERVAL)
    }
}

impl Poller {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(3);

    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run `check` once per interval, the first time one interval from now.
    ///
    /// The timer lives inside this future, so it is released on every exit
    /// path: ready, failed, errored or cancelled.
    pub async fn run<T, F, Fut>(&self, abort: &CancellationToken, mut check: F) -> ProviderResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<PollStatus<T>>>,
    {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut attempt = 0u32;
        loop {
            tokio::select! {
                biased;
                _ = abort.cancelled() => return Err(ProviderError::Cancelled),
                _ = ticker.tick() => {}
            }
            attempt += 1;

            let status = tokio::select! {
                biased;
                _ = abort.cancelled() => return Err(ProviderError::Cancelled),
                status = check() => status?,
            };

            match status {
                PollStatus::Pending => debug!(attempt, "Task still pending"),
                PollStatus::Ready(value) => return Ok(value),
                PollStatus::Failed(message) => return Err(ProviderError::reported(message)),
            }
        }
    }
}
