use std::{fmt, time::Duration};

use reqwest::{Method, StatusCode};

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Why a request failed before any HTTP status was received.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransportErrorKind {
    /// The request or the response body timed out.
    Timeout,
    /// The connection could not be established.
    Connect,
    /// Anything else (request building, body read, redirect loop).
    Other,
}

impl TransportErrorKind {
    /// Status handed to the retry decision in place of a real one.
    ///
    /// Timeouts behave like `504`, refused connections like `503`. Other
    /// failures have no equivalent and are never retried.
    pub fn synthetic_status(self) -> Option<StatusCode> {
        match self {
            Self::Timeout => Some(StatusCode::GATEWAY_TIMEOUT),
            Self::Connect => Some(StatusCode::SERVICE_UNAVAILABLE),
            Self::Other => None,
        }
    }
}

/// Domain classification of an operation that finished unsuccessfully.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FailureKind {
    /// The operation completed without producing a result (HTTP 204).
    NoData,
    /// A status document reported `ERROR`.
    Rejected,
    /// Operation-specific condition.
    Other(String),
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoData => f.write_str("no data"),
            Self::Rejected => f.write_str("rejected"),
            Self::Other(kind) => f.write_str(kind),
        }
    }
}

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum AnalyticsError {
    /// Request failed before an HTTP status was received.
    #[error("transport error on {method} {uri}: {source}")]
    Transport {
        method: Method,
        uri: String,
        kind: TransportErrorKind,
        #[source]
        source: BoxError,
    },
    /// Non-success HTTP status code with raw response body.
    #[error("http error {status} on {method} {uri}: {body}")]
    Http {
        method: Method,
        uri: String,
        status: StatusCode,
        body: String,
    },
    /// A retryable failure kept happening until the attempt budget ran out.
    #[error("{method} {uri} gave up after {attempts} attempts: {last}")]
    RetryExhausted {
        method: Method,
        uri: String,
        attempts: u32,
        #[source]
        last: Box<AnalyticsError>,
    },
    /// The remote operation finished but reported a domain failure.
    #[error("operation at {uri} failed ({kind}): {detail}")]
    TerminalFailure {
        uri: String,
        kind: FailureKind,
        detail: String,
    },
    /// The caller's deadline elapsed while the operation was still running.
    #[error("operation at {uri} still running after {elapsed:?}")]
    PollTimeout { uri: String, elapsed: Duration },
    /// Failure wrapped with the context of the operation that hit it.
    #[error("{context}: {source}")]
    Operation {
        context: String,
        #[source]
        source: Box<AnalyticsError>,
    },
    /// Response body did not match the expected shape.
    #[error("decode error: {0}")]
    Decode(String),
    /// Invalid client or retry configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// The operation handle already failed and cannot be driven again.
    #[error("operation at {uri} already failed")]
    Spent { uri: String },
}

impl AnalyticsError {
    /// HTTP status of the underlying failure, looking through wrappers.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::RetryExhausted { last, .. } => last.status(),
            Self::Operation { source, .. } => source.status(),
            _ => None,
        }
    }

    /// Whether a retry budget was exhausted somewhere in the chain.
    pub fn is_retry_exhausted(&self) -> bool {
        match self {
            Self::RetryExhausted { .. } => true,
            Self::Operation { source, .. } => source.is_retry_exhausted(),
            _ => false,
        }
    }

    /// Failure kind if this is (or wraps) a terminal operation failure.
    pub fn failure_kind(&self) -> Option<&FailureKind> {
        match self {
            Self::TerminalFailure { kind, .. } => Some(kind),
            Self::Operation { source, .. } => source.failure_kind(),
            _ => None,
        }
    }

    pub(crate) fn transport(method: Method, uri: &str, err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_connect() {
            TransportErrorKind::Connect
        } else {
            TransportErrorKind::Other
        };
        Self::Transport {
            method,
            uri: uri.to_owned(),
            kind,
            source: Box::new(err),
        }
    }

    /// Status the retry decision sees for this failure, real or synthetic.
    pub(crate) fn retry_status(&self) -> Option<StatusCode> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Transport { kind, .. } => kind.synthetic_status(),
            _ => None,
        }
    }
}
