use std::{fmt, sync::Arc, thread};

use reqwest::Method;

use crate::{
    AnalyticsError, HttpRequest, HttpResponse, Result, RetryDecision, RetryPolicy,
    StatusRetryDecision, Transport,
};

/// Runs HTTP calls through a transport, retrying eligible failures.
///
/// Cloning is cheap; clones share the transport and decision. The attempt
/// counter lives on the stack of each call, so one executor can serve many
/// threads at once.
#[derive(Clone)]
pub struct RetryingExecutor {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    decision: Arc<dyn RetryDecision>,
}

impl fmt::Debug for RetryingExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryingExecutor")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RetryingExecutor {
    /// Creates an executor with the default `GET`-on-5xx decision.
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            policy,
            decision: Arc::new(StatusRetryDecision::default()),
        }
    }

    pub fn with_decision(mut self, decision: Arc<dyn RetryDecision>) -> Self {
        self.decision = decision;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn get(&self, uri: &str) -> Result<HttpResponse> {
        self.execute(&HttpRequest::get(uri))
    }

    /// Executes `request`, returning the first 2xx response.
    ///
    /// Failures the decision rejects are returned unchanged after a single
    /// call. Failures it accepts are retried with backoff until the policy's
    /// attempt budget is spent, at which point
    /// [`AnalyticsError::RetryExhausted`] wraps the last one.
    pub fn execute(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 0u32;
        loop {
            let err = match self.attempt_once(request) {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };

            if !self.should_retry(&request.method, &request.uri, &err) {
                return Err(err);
            }

            if attempt + 1 >= max_attempts {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    method = %request.method,
                    uri = %request.uri,
                    attempts = max_attempts,
                    "retry budget exhausted: {err}"
                );
                return Err(AnalyticsError::RetryExhausted {
                    method: request.method.clone(),
                    uri: request.uri.clone(),
                    attempts: max_attempts,
                    last: Box::new(err),
                });
            }

            let delay = self.policy.delay_for(attempt);
            #[cfg(feature = "tracing")]
            tracing::debug!(
                method = %request.method,
                uri = %request.uri,
                attempt,
                ?delay,
                "retrying after failure: {err}"
            );
            thread::sleep(delay);
            attempt += 1;
        }
    }

    fn attempt_once(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let response = self.transport.execute(request)?;
        if response.status.is_success() {
            return Ok(response);
        }
        Err(AnalyticsError::Http {
            method: request.method.clone(),
            uri: request.uri.clone(),
            status: response.status,
            body: response.text(),
        })
    }

    fn should_retry(&self, method: &Method, uri: &str, err: &AnalyticsError) -> bool {
        err.retry_status()
            .is_some_and(|status| self.decision.allow(method, status, uri))
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use reqwest::StatusCode;

    use super::*;
    use crate::{
        transport::scripted::{Reply, ScriptedTransport},
        TransportErrorKind,
    };

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            max_attempts,
            Duration::from_millis(1),
            Duration::from_millis(4),
            2.0,
        )
        .expect("valid policy")
    }

    fn executor(transport: &ScriptedTransport, max_attempts: u32) -> RetryingExecutor {
        RetryingExecutor::new(Arc::new(transport.clone()), fast_policy(max_attempts))
    }

    #[test]
    fn succeeds_after_transient_unavailability() {
        let transport = ScriptedTransport::new([
            Reply::Status(503, "busy"),
            Reply::Status(503, "busy"),
            Reply::Status(200, r#"{"ok":true}"#),
        ]);

        let response = executor(&transport, 3)
            .get("/gdc/md/project")
            .expect("third call must succeed");

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(transport.calls(), 3);
    }

    #[test]
    fn first_retry_waits_the_initial_delay() {
        let transport = ScriptedTransport::new([
            Reply::Status(503, "busy"),
            Reply::Status(503, "busy"),
            Reply::Status(200, "{}"),
        ]);
        let policy = RetryPolicy::new(3, Duration::from_millis(10), Duration::from_secs(10), 20.0)
            .expect("valid policy");
        let executor = RetryingExecutor::new(Arc::new(transport.clone()), policy);

        let started = Instant::now();
        executor.get("/gdc/md/project").expect("third call must succeed");
        let elapsed = started.elapsed();

        // 10 ms then 200 ms; starting one step later would sleep 200 ms then 4 s.
        assert!(elapsed >= Duration::from_millis(210), "slept only {elapsed:?}");
        assert!(elapsed < Duration::from_secs(2), "slept {elapsed:?}");
        assert_eq!(transport.calls(), 3);
    }

    #[test]
    fn not_found_fails_without_retry() {
        let transport = ScriptedTransport::new([Reply::Status(404, "missing")]);

        let err = executor(&transport, 6)
            .get("/gdc/md/project/obj/1")
            .expect_err("404 must fail");

        match err {
            AnalyticsError::Http { status, body, .. } => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert_eq!(body, "missing");
            }
            other => panic!("expected http error, got {other:?}"),
        }
        assert_eq!(transport.calls(), 1);
    }

    #[test]
    fn never_exceeds_max_attempts() {
        let transport = ScriptedTransport::new((0..10).map(|_| Reply::Status(500, "boom")));

        let err = executor(&transport, 4)
            .get("/gdc/md/project")
            .expect_err("must give up");

        match err {
            AnalyticsError::RetryExhausted { attempts, last, .. } => {
                assert_eq!(attempts, 4);
                assert_eq!(last.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
            }
            other => panic!("expected retry exhaustion, got {other:?}"),
        }
        assert_eq!(transport.calls(), 4);
    }

    #[test]
    fn post_is_not_retried_by_default() {
        let transport = ScriptedTransport::new([Reply::Status(503, "busy")]);
        let request = HttpRequest::json(Method::POST, "/gdc/exporter/executor", &[1, 2])
            .expect("encodable body");

        let err = executor(&transport, 5)
            .execute(&request)
            .expect_err("must fail");

        assert_eq!(err.status(), Some(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!err.is_retry_exhausted());
        assert_eq!(transport.calls(), 1);
    }

    #[test]
    fn connect_failures_are_retried_as_unavailable() {
        let transport = ScriptedTransport::new([
            Reply::Fail(TransportErrorKind::Connect),
            Reply::Status(200, "{}"),
        ]);

        executor(&transport, 3)
            .get("/gdc")
            .expect("must recover from refused connection");
        assert_eq!(transport.calls(), 2);
    }

    #[test]
    fn unclassified_transport_failures_surface_immediately() {
        let transport = ScriptedTransport::new([Reply::Fail(TransportErrorKind::Other)]);

        let err = executor(&transport, 3).get("/gdc").expect_err("must fail");

        assert!(matches!(
            err,
            AnalyticsError::Transport {
                kind: TransportErrorKind::Other,
                ..
            }
        ));
        assert_eq!(transport.calls(), 1);
    }

    #[test]
    fn custom_decision_drives_retries() {
        let transport = ScriptedTransport::new([
            Reply::Status(429, "slow down"),
            Reply::Status(201, "{}"),
        ]);
        let decision = |method: &Method, status: StatusCode, _: &str| {
            *method == Method::POST && status == StatusCode::TOO_MANY_REQUESTS
        };
        let executor = executor(&transport, 2).with_decision(Arc::new(decision));

        let response = executor
            .execute(&HttpRequest::new(Method::POST, "/gdc/md/project/etl/pull"))
            .expect("must retry the throttled POST");

        assert_eq!(response.status, StatusCode::CREATED);
        let methods: Vec<Method> = transport
            .requests()
            .into_iter()
            .map(|request| request.method)
            .collect();
        assert_eq!(methods, vec![Method::POST, Method::POST]);
    }
}
