//! Waiting helpers
//!
//! Polls a condition until it holds or a deadline passes.

use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::debug;

/// Default time a guest may take to come back after a reboot
pub const REBOOT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Default delay between two checks
pub const DEFAULT_TICK: Duration = Duration::from_secs(5);

/// Waiting policy: how long, and how often to check
#[derive(Clone, Copy, Debug)]
pub struct Waiting {
    pub timeout: Duration,
    pub tick: Duration,
}

impl Default for Waiting {
    fn default() -> Self {
        Self::new(REBOOT_TIMEOUT)
    }
}

impl Waiting {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            tick: DEFAULT_TICK,
        }
    }

    pub fn from_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Poll `check` until it returns `true`, or give up once the timeout
    /// elapses. Returns whether the condition was met.
    pub async fn wait<F, Fut>(&self, mut check: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let start = Instant::now();

        loop {
            if check().await {
                return true;
            }

            if start.elapsed() >= self.timeout {
                debug!("Gave up waiting after {}s", self.timeout.as_secs());
                return false;
            }

            sleep(self.tick).await;
        }
    }
}
