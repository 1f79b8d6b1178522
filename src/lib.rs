//! `analytics-rest` is a blocking runtime for an analytics platform REST API.
//!
//! It provides the three pieces higher-level resource calls are built on:
//! - [`RetryingExecutor`]: runs a call, retrying failures a [`RetryDecision`]
//!   accepts on the backoff schedule of a [`RetryPolicy`]
//! - [`Operation`]: waits for a long-running operation by polling it through
//!   a [`PollHandler`]
//! - [`PageCursor`]: iterates a paginated listing, fetching pages on demand
//!
//! [`AnalyticsClient`] ties them to a `reqwest` transport.

mod client;
mod error;
mod executor;
mod operation;
mod options;
mod page;
mod poll;
mod retry;
mod transport;
mod wire;

pub use client::AnalyticsClient;
pub use error::{AnalyticsError, FailureKind, TransportErrorKind};
pub use executor::RetryingExecutor;
pub use operation::Operation;
pub use options::ClientOptions;
pub use page::{Page, PageCursor, PageRequest, DEFAULT_ITEMS_KEY};
pub use poll::{PollHandler, PollOutcome, StepContext};
pub use retry::{RetryDecision, RetryPolicy, StatusRetryDecision};
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};

pub use reqwest::{Method, StatusCode};

pub type Result<T> = std::result::Result<T, AnalyticsError>;
