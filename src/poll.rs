//! Completion semantics for long-running remote operations.
//!
//! A [`PollHandler`] reads one poll response at a time and answers with a
//! [`PollOutcome`]: keep polling (possibly somewhere else), done, or finished
//! with a domain failure. [`crate::Operation`] drives it.

use std::fmt;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use crate::{
    wire::{PollLink, StatusDocument, TaskStatus},
    AnalyticsError, FailureKind, HttpResponse, Result, RetryingExecutor,
};

/// What a poll response means for the operation.
#[derive(Debug)]
pub enum PollOutcome {
    /// Still running; poll this target next (same or a later chain stage).
    Pending(String),
    /// Finished successfully with this response.
    Done(HttpResponse),
    /// Finished without a usable result. Never polled again.
    TerminalFailure { kind: FailureKind, detail: String },
}

/// What a step sees besides the response itself.
#[derive(Clone, Copy)]
pub struct StepContext<'a> {
    executor: &'a RetryingExecutor,
    target: &'a str,
}

impl<'a> StepContext<'a> {
    pub(crate) fn new(executor: &'a RetryingExecutor, target: &'a str) -> Self {
        Self { executor, target }
    }

    /// Executor for issuing the next stage's request in a chain.
    pub fn executor(&self) -> &'a RetryingExecutor {
        self.executor
    }

    /// Target the response was fetched from.
    pub fn target(&self) -> &'a str {
        self.target
    }
}

type StepFn = Box<dyn Fn(StepContext<'_>, HttpResponse) -> Result<PollOutcome> + Send>;
type ExtractFn<T> = Box<dyn FnOnce(HttpResponse) -> Result<T> + Send>;
type TranslateFn = Box<dyn Fn(AnalyticsError) -> AnalyticsError + Send>;

/// Per-operation strategy: where to poll, when it is done, how to read the
/// result and how to word failures.
pub struct PollHandler<T> {
    target: String,
    step: StepFn,
    extract: ExtractFn<T>,
    translate: TranslateFn,
}

impl<T> fmt::Debug for PollHandler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollHandler")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl<T> PollHandler<T> {
    /// Builds a handler from its step and extraction functions.
    ///
    /// Errors are passed through untranslated until [`Self::with_translate`]
    /// or [`Self::with_error_context`] says otherwise.
    pub fn new<S, E>(target: impl Into<String>, step: S, extract: E) -> Self
    where
        S: Fn(StepContext<'_>, HttpResponse) -> Result<PollOutcome> + Send + 'static,
        E: FnOnce(HttpResponse) -> Result<T> + Send + 'static,
    {
        Self {
            target: target.into(),
            step: Box::new(step),
            extract: Box::new(extract),
            translate: Box::new(passthrough),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Replaces how the final response is turned into a result.
    pub fn with_extract<U, E>(self, extract: E) -> PollHandler<U>
    where
        E: FnOnce(HttpResponse) -> Result<U> + Send + 'static,
    {
        PollHandler {
            target: self.target,
            step: self.step,
            extract: Box::new(extract),
            translate: self.translate,
        }
    }

    pub fn with_translate<F>(mut self, translate: F) -> Self
    where
        F: Fn(AnalyticsError) -> AnalyticsError + Send + 'static,
    {
        self.translate = Box::new(translate);
        self
    }

    /// Wraps transport failures as [`AnalyticsError::Operation`] with `context`.
    pub fn with_error_context(self, context: impl Into<String>) -> Self {
        self.with_translate(wrap_with_context(context.into()))
    }

    pub(crate) fn step(&self, ctx: StepContext<'_>, response: HttpResponse) -> Result<PollOutcome> {
        (self.step)(ctx, response)
    }

    pub(crate) fn translate(&self, err: AnalyticsError) -> AnalyticsError {
        (self.translate)(err)
    }

    pub(crate) fn extract(self, response: HttpResponse) -> Result<T> {
        (self.extract)(response)
    }
}

impl<T: DeserializeOwned + 'static> PollHandler<T> {
    /// Handler for the plain HTTP convention.
    ///
    /// - `202` is pending; a `{"uri": ...}` body moves polling there.
    /// - `204` is a [`FailureKind::NoData`] terminal failure.
    /// - any other 2xx is done, its body decoded as JSON into `T`.
    pub fn accepted(target: impl Into<String>) -> Self {
        Self::new(target, accepted_step, |response| response.json())
    }
}

impl PollHandler<Vec<String>> {
    /// Handler for status-document operations.
    ///
    /// `RUNNING` keeps polling the same target, `OK` finishes with the
    /// document's messages and `ERROR` fails as [`FailureKind::Rejected`]
    /// with the messages joined into the detail. A `202` is pending (moving
    /// to a `{"uri": ...}` body if present) and a `204` is
    /// [`FailureKind::NoData`], as with [`PollHandler::accepted`].
    ///
    /// The result is the message list. For a typed payload, chain
    /// [`PollHandler::with_extract`] and decode the final response there.
    pub fn status_document(target: impl Into<String>) -> Self {
        Self::new(target, status_document_step, |response| {
            response
                .json::<StatusDocument>()
                .map(|document| document.message_texts())
        })
    }
}

fn accepted_step(ctx: StepContext<'_>, response: HttpResponse) -> Result<PollOutcome> {
    Ok(match response.status {
        StatusCode::ACCEPTED => PollOutcome::Pending(next_target(ctx.target(), &response)),
        StatusCode::NO_CONTENT => no_data(),
        _ => PollOutcome::Done(response),
    })
}

fn no_data() -> PollOutcome {
    PollOutcome::TerminalFailure {
        kind: FailureKind::NoData,
        detail: "operation finished without producing data".to_owned(),
    }
}

fn status_document_step(ctx: StepContext<'_>, response: HttpResponse) -> Result<PollOutcome> {
    match response.status {
        StatusCode::ACCEPTED => {
            return Ok(PollOutcome::Pending(next_target(ctx.target(), &response)))
        }
        StatusCode::NO_CONTENT => return Ok(no_data()),
        _ => {}
    }
    let document: StatusDocument = response.json()?;
    Ok(match document.status {
        TaskStatus::Running => PollOutcome::Pending(ctx.target().to_owned()),
        TaskStatus::Ok => PollOutcome::Done(response),
        TaskStatus::Error => PollOutcome::TerminalFailure {
            kind: FailureKind::Rejected,
            detail: document.message_texts().join("; "),
        },
    })
}

fn passthrough(err: AnalyticsError) -> AnalyticsError {
    err
}

fn wrap_with_context(context: String) -> impl Fn(AnalyticsError) -> AnalyticsError + Send + 'static {
    move |err| AnalyticsError::Operation {
        context: context.clone(),
        source: Box::new(err),
    }
}

/// Next poll target named by a 202 body, falling back to the current one.
fn next_target(current: &str, response: &HttpResponse) -> String {
    serde_json::from_slice::<PollLink>(&response.body)
        .ok()
        .and_then(|link| link.uri)
        .filter(|uri| !uri.is_empty())
        .unwrap_or_else(|| current.to_owned())
}
