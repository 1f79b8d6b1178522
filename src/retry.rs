//! Backoff schedule and retry eligibility for single HTTP calls.
//!
//! These only govern recovery from a failed call. How often a running
//! operation is re-checked is a separate, fixed interval owned by
//! [`crate::Operation`].

use std::{fmt, time::Duration};

use reqwest::{Method, StatusCode};

use crate::{AnalyticsError, Result};

/// Immutable exponential backoff schedule.
///
/// The delay before retry `n` (0-based) is
/// `min(max_delay, initial_delay * multiplier^n)`. No jitter is applied.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Creates a validated policy.
    ///
    /// `max_attempts` counts every call, including the first one.
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
    ) -> Result<Self> {
        if max_attempts == 0 {
            return Err(AnalyticsError::Config(
                "max_attempts must be greater than zero".to_owned(),
            ));
        }
        if initial_delay.is_zero() {
            return Err(AnalyticsError::Config(
                "initial_delay must be greater than zero".to_owned(),
            ));
        }
        if max_delay < initial_delay {
            return Err(AnalyticsError::Config(format!(
                "max_delay {max_delay:?} is shorter than initial_delay {initial_delay:?}"
            )));
        }
        if !multiplier.is_finite() || multiplier <= 1.0 {
            return Err(AnalyticsError::Config(format!(
                "multiplier must be a finite value above 1.0, got {multiplier}"
            )));
        }
        Ok(Self {
            max_attempts,
            initial_delay,
            max_delay,
            multiplier,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Delay to wait before retry number `retry` (0-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = i32::try_from(retry).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exp);
        let cap = self.max_delay.as_secs_f64();
        if !secs.is_finite() || secs >= cap {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }
}

/// Decides whether a failed call may be retried.
///
/// Implementations must be pure: the same inputs always give the same
/// answer. Closures `Fn(&Method, StatusCode, &str) -> bool` implement it.
pub trait RetryDecision: Send + Sync {
    fn allow(&self, method: &Method, status: StatusCode, uri: &str) -> bool;
}

impl<F> RetryDecision for F
where
    F: Fn(&Method, StatusCode, &str) -> bool + Send + Sync,
{
    fn allow(&self, method: &Method, status: StatusCode, uri: &str) -> bool {
        self(method, status, uri)
    }
}

/// Table-driven decision: retry when both method and status are listed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusRetryDecision {
    methods: Vec<Method>,
    statuses: Vec<StatusCode>,
}

impl StatusRetryDecision {
    pub fn new(
        methods: impl IntoIterator<Item = Method>,
        statuses: impl IntoIterator<Item = StatusCode>,
    ) -> Self {
        Self {
            methods: methods.into_iter().collect(),
            statuses: statuses.into_iter().collect(),
        }
    }
}

impl Default for StatusRetryDecision {
    /// `GET` only, on 500, 502, 503, 504 and 507.
    fn default() -> Self {
        Self::new(
            [Method::GET],
            [
                StatusCode::INTERNAL_SERVER_ERROR,
                StatusCode::BAD_GATEWAY,
                StatusCode::SERVICE_UNAVAILABLE,
                StatusCode::GATEWAY_TIMEOUT,
                StatusCode::INSUFFICIENT_STORAGE,
            ],
        )
    }
}

impl RetryDecision for StatusRetryDecision {
    fn allow(&self, method: &Method, status: StatusCode, _uri: &str) -> bool {
        self.methods.contains(method) && self.statuses.contains(&status)
    }
}

impl fmt::Display for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} attempts, {:?}..{:?} x{}",
            self.max_attempts, self.initial_delay, self.max_delay, self.multiplier
        )
    }
}
