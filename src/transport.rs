use std::{fmt, time::Duration};

use reqwest::{
    blocking,
    header::{self, HeaderMap, HeaderValue},
    Method, StatusCode, Url,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::{AnalyticsError, Result, TransportErrorKind};

/// A single HTTP call, kept around so it can be re-sent on retry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    /// Absolute URL or a path relative to the transport's endpoint.
    pub uri: String,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            body: None,
        }
    }

    pub fn get(uri: impl Into<String>) -> Self {
        Self::new(Method::GET, uri)
    }

    /// Builds a request carrying `body` serialized as JSON.
    pub fn json<B: Serialize + ?Sized>(
        method: Method,
        uri: impl Into<String>,
        body: &B,
    ) -> Result<Self> {
        let body = serde_json::to_vec(body)
            .map_err(|err| AnalyticsError::Decode(format!("cannot encode request body: {err}")))?;
        Ok(Self {
            method,
            uri: uri.into(),
            body: Some(body),
        })
    }
}

/// Raw response as received from the transport.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decodes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|err| {
            AnalyticsError::Decode(format!(
                "invalid response JSON: {err}; body: {}",
                self.text()
            ))
        })
    }

    /// `Location` header, if present and valid UTF-8.
    pub fn location(&self) -> Option<&str> {
        self.headers
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok())
    }
}

/// Executes raw HTTP calls against an already-authenticated endpoint.
///
/// A transport reports every status it receives as `Ok`; deciding which
/// statuses count as failures is up to [`crate::RetryingExecutor`]. It only
/// fails when no status was received at all.
pub trait Transport: Send + Sync {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse>;
}

/// [`Transport`] backed by a blocking `reqwest` client.
#[derive(Clone)]
pub struct ReqwestTransport {
    http: blocking::Client,
    endpoint: Url,
    timeout: Duration,
}

impl fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReqwestTransport")
            .field("endpoint", &self.endpoint.as_str())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ReqwestTransport {
    /// Creates a transport sending `authorization` with every request.
    pub fn new(endpoint: &str, authorization: &str, timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|err| AnalyticsError::Config(format!("invalid endpoint '{endpoint}': {err}")))?;

        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(authorization)
            .map_err(|_| AnalyticsError::Config("authorization is not a valid header value".to_owned()))?;
        auth.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, auth);
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

        let http = blocking::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|err| AnalyticsError::Config(format!("cannot build HTTP client: {err}")))?;

        Ok(Self {
            http,
            endpoint,
            timeout,
        })
    }

    /// Same connection pool with a different per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Resolves relative poll and page URIs against the endpoint.
    fn resolve(&self, method: &Method, uri: &str) -> Result<Url> {
        self.endpoint
            .join(uri)
            .map_err(|err| AnalyticsError::Transport {
                method: method.clone(),
                uri: uri.to_owned(),
                kind: TransportErrorKind::Other,
                source: Box::new(err),
            })
    }
}

impl Transport for ReqwestTransport {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let url = self.resolve(&request.method, &request.uri)?;

        let mut builder = self
            .http
            .request(request.method.clone(), url)
            .timeout(self.timeout);
        if let Some(body) = &request.body {
            builder = builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(body.clone());
        }

        let response = builder
            .send()
            .map_err(|err| AnalyticsError::transport(request.method.clone(), &request.uri, err))?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .map_err(|err| AnalyticsError::transport(request.method.clone(), &request.uri, err))?;

        Ok(HttpResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_uris_resolve_against_endpoint() {
        let transport =
            ReqwestTransport::new("https://analytics.example.com/", "Bearer t", Duration::from_secs(1))
                .expect("transport must build");
        let url = transport
            .resolve(&Method::GET, "/gdc/md/project/tasks/7/status")
            .expect("must resolve");
        assert_eq!(
            url.as_str(),
            "https://analytics.example.com/gdc/md/project/tasks/7/status"
        );

        let absolute = transport
            .resolve(&Method::GET, "https://other.example.com/poll?id=1")
            .expect("must resolve");
        assert_eq!(absolute.as_str(), "https://other.example.com/poll?id=1");
    }

    #[test]
    fn debug_omits_authorization() {
        let transport =
            ReqwestTransport::new("https://analytics.example.com", "Bearer secret-token", Duration::from_secs(1))
                .expect("transport must build");
        let debug = format!("{transport:?}");
        assert!(!debug.contains("secret-token"));
    }

    #[test]
    fn invalid_endpoint_is_a_config_error() {
        let err = ReqwestTransport::new("not a url", "Bearer t", Duration::from_secs(1))
            .expect_err("must reject endpoint");
        assert!(matches!(err, AnalyticsError::Config(_)));
    }

    #[test]
    fn response_json_reports_body_on_failure() {
        let response = HttpResponse::new(StatusCode::OK, "not-json");
        let err = response.json::<serde_json::Value>().expect_err("must fail");
        assert!(err.to_string().contains("not-json"));
    }
}
