//! HTTP client abstraction for testability.
//!
//! Everything the core sends goes through [`HttpClient::send`]. The real
//! implementation, [`ReqwestClient`], never follows redirects: the fetch engine
//! must see raw 3xx codes to tell an expired session from a moved resource.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::Jar;
use reqwest::header::{HeaderName, CONTENT_TYPE, LOCATION};
use reqwest::redirect::Policy;
use reqwest::{Proxy, Url};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::session::SessionContext;

/// Default timeout for a single request in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Request method. The service only needs these two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// A fully described request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub cookies: BTreeMap<String, String>,
    /// JSON body. The login exchange sends one even on GET.
    pub json: Option<serde_json::Value>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            cookies: BTreeMap::new(),
            json: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_cookies(mut self, cookies: &BTreeMap<String, String>) -> Self {
        self.cookies.extend(cookies.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn with_json(mut self, body: serde_json::Value) -> Self {
        self.json = Some(body);
        self
    }
}

/// The parts of a response the core looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub location: Option<String>,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// `Location` header, with an empty value treated as absent.
    pub fn redirect_target(&self) -> Option<&str> {
        self.location.as_deref().filter(|l| !l.is_empty())
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Transport-level failures. These are transient from the engine's point of view.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("failed to read response body: {0}")]
    Body(String),

    #[error("request failed: {0}")]
    Request(String),

    /// The client itself could not be built (bad proxy URL, TLS backend).
    #[error("failed to create HTTP client: {0}")]
    Client(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else if e.is_connect() {
            Self::Connect(e.to_string())
        } else if e.is_body() || e.is_decode() {
            Self::Body(e.to_string())
        } else {
            Self::Request(e.to_string())
        }
    }
}

/// Trait for HTTP client operations.
///
/// This abstraction allows for dependency injection and easier testing
/// by enabling mock HTTP clients in tests.
pub trait HttpClient: Send + Sync {
    /// Performs a request without following redirects.
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

impl<C: HttpClient + ?Sized> HttpClient for &C {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        (**self).send(request)
    }
}

/// Real HTTP client implementation using blocking reqwest.
pub struct ReqwestClient {
    client: reqwest::blocking::Client,
    jar: Arc<Jar>,
}

impl ReqwestClient {
    /// Creates a new ReqwestClient with default configuration and no proxies.
    pub fn new() -> Result<Self, TransportError> {
        Self::build(&BTreeMap::new(), Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Creates a client routed through the session's proxies.
    pub fn for_session(session: &SessionContext, timeout: Duration) -> Result<Self, TransportError> {
        Self::build(&session.proxies, timeout)
    }

    fn build(proxies: &BTreeMap<String, String>, timeout: Duration) -> Result<Self, TransportError> {
        let jar = Arc::new(Jar::default());
        let mut builder = reqwest::blocking::Client::builder()
            .redirect(Policy::none())
            .cookie_provider(Arc::clone(&jar))
            .timeout(timeout);

        for (scheme, url) in proxies {
            let proxy = match scheme.as_str() {
                "http" => Proxy::http(url),
                "https" => Proxy::https(url),
                "all" => Proxy::all(url),
                other => {
                    return Err(TransportError::Client(format!(
                        "unsupported proxy scheme '{}'",
                        other
                    )))
                }
            }
            .map_err(|e| TransportError::Client(format!("invalid proxy '{}': {}", url, e)))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;

        Ok(Self { client, jar })
    }
}

impl HttpClient for ReqwestClient {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let url = Url::parse(&request.url)
            .map_err(|e| TransportError::Request(format!("invalid URL {}: {}", request.url, e)))?;

        // The jar also keeps whatever the server sets, like a browser session.
        for (name, value) in &request.cookies {
            self.jar
                .add_cookie_str(&format!("{}={}; Path=/", name, value), &url);
        }

        let mut builder = match request.method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.json {
            builder = builder.json(body);
        }

        let response = builder.send()?;

        let status = response.status().as_u16();
        let header = |name: HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let location = header(LOCATION);
        let content_type = header(CONTENT_TYPE);

        let body = response
            .bytes()
            .map(|b| b.to_vec())
            .map_err(|e| TransportError::Body(e.to_string()))?;

        Ok(HttpResponse {
            status,
            location,
            content_type,
            body,
        })
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Mock HTTP client replaying scripted responses and recording requests.
    #[derive(Default)]
    pub struct ScriptedClient {
        responses: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedClient {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn respond(self, response: HttpResponse) -> Self {
            self.responses.lock().unwrap().push_back(Ok(response));
            self
        }

        pub fn fail(self, error: TransportError) -> Self {
            self.responses.lock().unwrap().push_back(Err(error));
            self
        }

        pub fn requests(&self) -> Vec<HttpRequest> {
            self.requests.lock().unwrap().clone()
        }

        pub fn call_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        pub fn calls_to(&self, url_prefix: &str) -> usize {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.url.starts_with(url_prefix))
                .count()
        }
    }

    impl HttpClient for ScriptedClient {
        fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            self.requests.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Connect("script exhausted".to_string())))
        }
    }

    #[test]
    fn test_scripted_client_replays_in_order() {
        let mock = ScriptedClient::new()
            .respond(HttpResponse::new(302).with_location("/login"))
            .respond(HttpResponse::new(200).with_body(vec![1, 2, 3]));

        let request = HttpRequest::new(Method::Get, "http://example.com/a");
        assert_eq!(mock.send(&request).unwrap().status, 302);
        assert_eq!(mock.send(&request).unwrap().body, vec![1, 2, 3]);
        assert!(mock.send(&request).is_err());
        assert_eq!(mock.call_count(), 3);
    }

    #[test]
    fn test_redirect_target_ignores_empty_location() {
        assert_eq!(HttpResponse::new(302).with_location("").redirect_target(), None);
        assert_eq!(
            HttpResponse::new(302).with_location("/login").redirect_target(),
            Some("/login")
        );
        assert_eq!(HttpResponse::new(302).redirect_target(), None);
    }

    #[test]
    fn test_response_json() {
        #[derive(serde::Deserialize)]
        struct Token {
            token: String,
        }

        let response = HttpResponse::new(200).with_body(br#"{"token":"abc"}"#.to_vec());
        let parsed: Token = response.json().unwrap();
        assert_eq!(parsed.token, "abc");
    }

    #[test]
    fn test_request_builder() {
        let mut cookies = BTreeMap::new();
        cookies.insert("a".to_string(), "1".to_string());
        let request = HttpRequest::new(Method::Post, "http://example.com")
            .with_header("Accept", "application/json")
            .with_cookies(&cookies)
            .with_json(serde_json::json!({"languageId": 1}));

        assert_eq!(request.headers.get("Accept").unwrap(), "application/json");
        assert_eq!(request.cookies.get("a").unwrap(), "1");
        assert!(request.json.is_some());
    }

    #[test]
    fn test_unsupported_proxy_scheme_is_rejected() {
        let mut proxies = BTreeMap::new();
        proxies.insert("gopher".to_string(), "http://127.0.0.1:1".to_string());
        let result = ReqwestClient::build(&proxies, Duration::from_secs(1));
        assert!(matches!(result, Err(TransportError::Client(_))));
    }
}
