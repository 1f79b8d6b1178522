use std::time::Duration;

use crate::RetryPolicy;

/// Configures HTTP timeout, retry and polling behavior.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientOptions {
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Backoff for single failed calls.
    pub retry_policy: RetryPolicy,
    /// Fixed wait between polls of a running operation, in milliseconds.
    pub poll_interval_ms: u64,
    /// Default deadline for [`crate::Operation::get`]; `None` waits forever.
    pub poll_timeout_ms: Option<u64>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            retry_policy: RetryPolicy::default(),
            poll_interval_ms: 1_000,
            poll_timeout_ms: None,
        }
    }
}

impl ClientOptions {
    pub(crate) fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub(crate) fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub(crate) fn poll_timeout(&self) -> Option<Duration> {
        self.poll_timeout_ms.map(Duration::from_millis)
    }
}
