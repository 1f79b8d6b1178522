use std::{
    fmt, mem, thread,
    time::{Duration, Instant},
};

use crate::{
    poll::StepContext, AnalyticsError, HttpResponse, PollHandler, PollOutcome, Result,
    RetryingExecutor,
};

enum State {
    Pending,
    Done(HttpResponse),
    Failed,
}

/// Blocking handle to a remote operation that has not finished yet.
///
/// The handle owns its poll target and advances it as the handler returns
/// [`PollOutcome::Pending`]. It is consumed by [`Operation::get`]; nothing
/// runs in the background.
pub struct Operation<T> {
    executor: RetryingExecutor,
    handler: PollHandler<T>,
    target: String,
    poll_interval: Duration,
    timeout: Option<Duration>,
    state: State,
}

impl<T> fmt::Debug for Operation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("target", &self.target)
            .field("poll_interval", &self.poll_interval)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl<T> Operation<T> {
    pub fn new(executor: RetryingExecutor, handler: PollHandler<T>, poll_interval: Duration) -> Self {
        Self {
            target: handler.target().to_owned(),
            executor,
            handler,
            poll_interval,
            timeout: None,
            state: State::Pending,
        }
    }

    /// Default deadline used when [`Operation::get`] is given none.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Target the next poll will hit.
    pub fn poll_uri(&self) -> &str {
        &self.target
    }

    /// Polls once without sleeping and reports whether the operation is done.
    ///
    /// A finished response is kept for the following [`Operation::get`]. If
    /// this returns an error the handle is spent.
    pub fn is_done(&mut self) -> Result<bool> {
        match &self.state {
            State::Done(_) => return Ok(true),
            State::Failed => return Err(self.spent()),
            State::Pending => {}
        }
        match self.poll_once() {
            Ok(Some(response)) => {
                self.state = State::Done(response);
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(err) => {
                self.state = State::Failed;
                Err(err)
            }
        }
    }

    /// Blocks until the operation finishes, fails or `timeout` elapses.
    ///
    /// The deadline is checked between polls only: a request or sleep that
    /// has started is never interrupted, and the remote operation is left
    /// running on timeout.
    pub fn get(mut self, timeout: Option<Duration>) -> Result<T> {
        let timeout = timeout.or(self.timeout);
        let started = Instant::now();

        let response = match mem::replace(&mut self.state, State::Pending) {
            State::Done(response) => response,
            State::Failed => return Err(self.spent()),
            State::Pending => loop {
                if let Some(response) = self.poll_once()? {
                    break response;
                }

                let elapsed = started.elapsed();
                let wait = match timeout {
                    Some(limit) if elapsed >= limit => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(target_uri = %self.target, ?elapsed, "operation poll timed out");
                        return Err(AnalyticsError::PollTimeout {
                            uri: self.target,
                            elapsed,
                        });
                    }
                    Some(limit) => self.poll_interval.min(limit - elapsed),
                    None => self.poll_interval,
                };
                thread::sleep(wait);
            },
        };

        self.handler.extract(response)
    }

    /// Blocks without a deadline unless one was set with [`Operation::with_timeout`].
    pub fn wait(self) -> Result<T> {
        self.get(None)
    }

    /// One round-trip: `Some` when done, `None` while still pending.
    fn poll_once(&mut self) -> Result<Option<HttpResponse>> {
        let response = self
            .executor
            .get(&self.target)
            .map_err(|err| self.handler.translate(err))?;

        #[cfg(feature = "tracing")]
        tracing::debug!(target_uri = %self.target, status = %response.status, "polled operation");

        self.advance(response)
    }

    /// Settles the handle from a reply that already finished the operation,
    /// such as a synchronous answer to the starting request.
    ///
    /// The handler reads `response` as if it came from a poll: a done answer
    /// is kept for [`Operation::get`] without another round-trip.
    pub(crate) fn settle(mut self, response: HttpResponse) -> Result<Self> {
        if let Some(response) = self.advance(response)? {
            self.state = State::Done(response);
        }
        Ok(self)
    }

    fn advance(&mut self, response: HttpResponse) -> Result<Option<HttpResponse>> {
        let ctx = StepContext::new(&self.executor, &self.target);
        let outcome = self
            .handler
            .step(ctx, response)
            .map_err(|err| self.handler.translate(err))?;

        match outcome {
            PollOutcome::Pending(next) => {
                if next != self.target {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(from = %self.target, to = %next, "operation moved to next poll target");
                    self.target = next;
                }
                Ok(None)
            }
            PollOutcome::Done(response) => Ok(Some(response)),
            PollOutcome::TerminalFailure { kind, detail } => Err(AnalyticsError::TerminalFailure {
                uri: self.target.clone(),
                kind,
                detail,
            }),
        }
    }

    fn spent(&self) -> AnalyticsError {
        AnalyticsError::Spent {
            uri: self.target.clone(),
        }
    }
}
