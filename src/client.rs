use std::{fmt, sync::Arc};

use reqwest::{Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    page::DEFAULT_ITEMS_KEY, wire::PollLink, ClientOptions, HttpRequest, HttpResponse, Operation,
    PageCursor, PageRequest, PollHandler, Result, RetryDecision, RetryingExecutor,
    ReqwestTransport, StatusRetryDecision, Transport,
};

#[derive(Clone)]
enum Backend {
    Reqwest(ReqwestTransport),
    Custom(Arc<dyn Transport>),
}

impl Backend {
    fn transport(&self, options: &ClientOptions) -> Arc<dyn Transport> {
        match self {
            Self::Reqwest(http) => Arc::new(http.clone().with_timeout(options.timeout())),
            Self::Custom(transport) => Arc::clone(transport),
        }
    }
}

/// Blocking client for the analytics platform REST API.
///
/// Every call goes through one [`RetryingExecutor`]. Long-running calls come
/// back as [`Operation`] handles and list calls as [`PageCursor`]s, both of
/// which reuse that executor.
#[derive(Clone)]
pub struct AnalyticsClient {
    backend: Backend,
    decision: Arc<dyn RetryDecision>,
    options: ClientOptions,
    executor: RetryingExecutor,
}

impl fmt::Debug for AnalyticsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("AnalyticsClient");
        match &self.backend {
            Backend::Reqwest(http) => debug.field("endpoint", &http.endpoint().as_str()),
            Backend::Custom(_) => debug.field("endpoint", &"<custom transport>"),
        };
        debug
            .field("authorization", &"<redacted>")
            .field("options", &self.options)
            .finish()
    }
}

impl AnalyticsClient {
    /// Creates a client with a raw authorization header value.
    pub fn new(endpoint: impl AsRef<str>, authorization: impl AsRef<str>) -> Result<Self> {
        Self::new_raw_auth(endpoint, authorization)
    }

    /// Creates a client with a full raw authorization value.
    ///
    /// Example: `"Bearer <token>"` or any custom scheme.
    pub fn new_raw_auth(endpoint: impl AsRef<str>, authorization: impl AsRef<str>) -> Result<Self> {
        let options = ClientOptions::default();
        let http = ReqwestTransport::new(endpoint.as_ref(), authorization.as_ref(), options.timeout())?;
        Ok(Self::build(Backend::Reqwest(http), options))
    }

    /// Creates a client from a bearer token.
    ///
    /// If the token is missing the `Bearer ` prefix, it is added automatically.
    pub fn new_bearer(endpoint: impl AsRef<str>, token: impl AsRef<str>) -> Result<Self> {
        let authorization = normalize_bearer_authorization(token.as_ref());
        Self::new_raw_auth(endpoint, authorization)
    }

    /// Creates a client over an already authenticated transport.
    pub fn from_transport(transport: Arc<dyn Transport>) -> Self {
        Self::build(Backend::Custom(transport), ClientOptions::default())
    }

    /// Creates a client from environment variables.
    ///
    /// Reads:
    /// - `ANALYTICS_ENDPOINT`: base URL that relative URIs resolve against
    /// - `ANALYTICS_TOKEN`: access token (Bearer prefix optional)
    pub fn from_env() -> Result<Self> {
        let endpoint = required_env("ANALYTICS_ENDPOINT")?;
        let token = required_env("ANALYTICS_TOKEN")?;
        Self::new_bearer(endpoint, token)
    }

    fn build(backend: Backend, options: ClientOptions) -> Self {
        let decision: Arc<dyn RetryDecision> = Arc::new(StatusRetryDecision::default());
        let executor = RetryingExecutor::new(backend.transport(&options), options.retry_policy)
            .with_decision(Arc::clone(&decision));
        Self {
            backend,
            decision,
            options,
            executor,
        }
    }

    fn rebuild_executor(&mut self) {
        self.executor = RetryingExecutor::new(
            self.backend.transport(&self.options),
            self.options.retry_policy,
        )
        .with_decision(Arc::clone(&self.decision));
    }

    /// Applies client options such as timeout, retry and polling behavior.
    pub fn with_options(mut self, opts: ClientOptions) -> Self {
        self.options = opts;
        self.rebuild_executor();
        self
    }

    /// Replaces which failed calls may be retried.
    pub fn with_retry_decision(mut self, decision: Arc<dyn RetryDecision>) -> Self {
        self.decision = decision;
        self.rebuild_executor();
        self
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn executor(&self) -> &RetryingExecutor {
        &self.executor
    }

    /// Executes a raw request with retries.
    pub fn execute(&self, request: &HttpRequest) -> Result<HttpResponse> {
        self.executor.execute(request)
    }

    pub fn get_json<T: DeserializeOwned>(&self, uri: &str) -> Result<T> {
        self.executor.get(uri)?.json()
    }

    pub fn post_json<B, T>(&self, uri: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = HttpRequest::json(Method::POST, uri, body)?;
        self.executor.execute(&request)?.json()
    }

    pub fn put_json<B, T>(&self, uri: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = HttpRequest::json(Method::PUT, uri, body)?;
        self.executor.execute(&request)?.json()
    }

    pub fn delete(&self, uri: &str) -> Result<()> {
        self.executor
            .execute(&HttpRequest::new(Method::DELETE, uri))
            .map(|_| ())
    }

    /// Starts a long-running operation and returns a handle to wait on.
    ///
    /// A `201` or `202` reply starts polling. The poll target is taken from
    /// the `Location` header, else from a `{"uri": ...}` body, else the
    /// request URI itself. `make_handler` receives that target.
    ///
    /// Any other 2xx reply is read by the handler as a poll response, so a
    /// server answering synchronously yields a handle that is already done.
    pub fn submit<T, F>(&self, request: &HttpRequest, make_handler: F) -> Result<Operation<T>>
    where
        F: FnOnce(String) -> PollHandler<T>,
    {
        let response = self.executor.execute(request)?;
        let target = poll_target(&request.uri, &response);

        if !matches!(response.status, StatusCode::CREATED | StatusCode::ACCEPTED) {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                method = %request.method,
                uri = %request.uri,
                status = %response.status,
                "operation answered synchronously"
            );
            return self.operation(make_handler(target)).settle(response);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            method = %request.method,
            uri = %request.uri,
            poll = %target,
            "operation accepted"
        );

        Ok(self.operation(make_handler(target)))
    }

    /// Wraps a handler for an operation whose poll URI is already known.
    pub fn operation<T>(&self, handler: PollHandler<T>) -> Operation<T> {
        let operation = Operation::new(self.executor.clone(), handler, self.options.poll_interval());
        match self.options.poll_timeout() {
            Some(timeout) => operation.with_timeout(timeout),
            None => operation,
        }
    }

    /// Fetches the first page of a listing and returns a cursor over all items.
    pub fn list<T>(&self, uri: &str, page: Option<PageRequest>) -> Result<PageCursor<T>>
    where
        T: DeserializeOwned + 'static,
    {
        self.list_with_key(uri, page, DEFAULT_ITEMS_KEY)
    }

    /// Like [`Self::list`] for endpoints naming the item array `items_key`.
    pub fn list_with_key<T>(
        &self,
        uri: &str,
        page: Option<PageRequest>,
        items_key: &str,
    ) -> Result<PageCursor<T>>
    where
        T: DeserializeOwned + 'static,
    {
        let first = match page {
            Some(page) => page.apply(uri),
            None => uri.to_owned(),
        };
        PageCursor::start(self.executor.clone(), &first, items_key)
    }

    /// Collects every item of a listing.
    pub fn list_all<T>(&self, uri: &str) -> Result<Vec<T>>
    where
        T: DeserializeOwned + 'static,
    {
        self.list(uri, None)?.collect()
    }
}

fn poll_target(request_uri: &str, response: &HttpResponse) -> String {
    if let Some(location) = response.location() {
        return location.to_owned();
    }
    serde_json::from_slice::<PollLink>(&response.body)
        .ok()
        .and_then(|link| link.uri)
        .filter(|uri| !uri.is_empty())
        .unwrap_or_else(|| request_uri.to_owned())
}

fn required_env(name: &str) -> Result<String> {
    let value = std::env::var(name)
        .map_err(|_| crate::AnalyticsError::Config(format!("missing {name} environment variable")))?;
    if value.trim().is_empty() {
        return Err(crate::AnalyticsError::Config(format!(
            "{name} is set but empty"
        )));
    }
    Ok(value)
}

fn normalize_bearer_authorization(token: &str) -> String {
    let trimmed = token.trim();
    let prefix = trimmed.get(..7);
    if prefix.is_some_and(|value| value.eq_ignore_ascii_case("bearer ")) {
        trimmed.to_owned()
    } else {
        format!("Bearer {trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use reqwest::{header, Method, StatusCode};
    use serde::Deserialize;

    use super::{normalize_bearer_authorization, poll_target, AnalyticsClient};
    use crate::{
        transport::scripted::{Reply, ScriptedTransport},
        ClientOptions, FailureKind, HttpRequest, HttpResponse, PollHandler,
    };

    #[test]
    fn normalize_bearer_adds_prefix_when_missing() {
        assert_eq!(
            normalize_bearer_authorization("abc123"),
            "Bearer abc123".to_owned()
        );
    }

    #[test]
    fn normalize_bearer_keeps_existing_prefix() {
        assert_eq!(
            normalize_bearer_authorization("bEaReR abc123"),
            "bEaReR abc123".to_owned()
        );
    }

    #[test]
    fn debug_redacts_authorization_value() {
        let client = AnalyticsClient::new_raw_auth("https://analytics.example.com", "secret-token")
            .expect("client must build");
        let debug = format!("{client:?}");
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("secret-token"));
    }

    #[test]
    fn options_flow_into_executor() {
        let mut options = ClientOptions::default();
        options.retry_policy = crate::RetryPolicy::new(
            2,
            std::time::Duration::from_millis(5),
            std::time::Duration::from_millis(5),
            1.5,
        )
        .expect("valid policy");
        let client = AnalyticsClient::new_bearer("https://analytics.example.com", "t")
            .expect("client must build")
            .with_options(options);

        assert_eq!(client.executor().policy().max_attempts(), 2);
    }

    #[test]
    fn poll_target_prefers_location_then_body() {
        let mut response = HttpResponse::new(StatusCode::ACCEPTED, r#"{"uri":"/gdc/from-body"}"#);
        assert_eq!(poll_target("/gdc/submit", &response), "/gdc/from-body");

        response.headers.insert(
            header::LOCATION,
            header::HeaderValue::from_static("/gdc/from-header"),
        );
        assert_eq!(poll_target("/gdc/submit", &response), "/gdc/from-header");

        let empty = HttpResponse::new(StatusCode::ACCEPTED, "");
        assert_eq!(poll_target("/gdc/submit", &empty), "/gdc/submit");
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Export {
        result: u32,
    }

    fn export_request() -> HttpRequest {
        HttpRequest::json(Method::POST, "/gdc/exporter/executor", &serde_json::json!({"report": 7}))
            .expect("encodable body")
    }

    #[test]
    fn synchronous_submit_reply_is_the_result() {
        let transport = ScriptedTransport::new([
            Reply::Status(200, r#"{"result":1}"#),
            Reply::Status(405, "method not allowed"),
        ]);
        let client = AnalyticsClient::from_transport(Arc::new(transport.clone()));

        let export = client
            .submit(&export_request(), PollHandler::<Export>::accepted)
            .expect("submit must succeed")
            .get(None)
            .expect("result must come from the submit reply");

        assert_eq!(export, Export { result: 1 });
        let methods: Vec<Method> = transport.requests().into_iter().map(|r| r.method).collect();
        assert_eq!(methods, vec![Method::POST]);
    }

    #[test]
    fn synchronous_no_content_submit_reply_is_no_data() {
        let transport = ScriptedTransport::new([Reply::Status(204, "")]);
        let client = AnalyticsClient::from_transport(Arc::new(transport.clone()));

        let err = client
            .submit(&export_request(), PollHandler::<Export>::accepted)
            .expect_err("no data must fail at submit");

        assert_eq!(err.failure_kind(), Some(&FailureKind::NoData));
        assert_eq!(transport.calls(), 1);
    }

    #[test]
    fn accepted_submit_reply_starts_polling() {
        let transport = ScriptedTransport::new([
            Reply::Status(202, r#"{"uri":"/gdc/exporter/result/3"}"#),
            Reply::Status(200, r#"{"result":3}"#),
        ]);
        let client = AnalyticsClient::from_transport(Arc::new(transport.clone()));

        let operation = client
            .submit(&export_request(), PollHandler::<Export>::accepted)
            .expect("submit must succeed");
        assert_eq!(operation.poll_uri(), "/gdc/exporter/result/3");
        assert_eq!(operation.get(None).expect("must finish"), Export { result: 3 });
        assert_eq!(transport.calls(), 2);
    }
}
