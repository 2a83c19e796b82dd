//! Transport: the seam between the engine and the wire.
//!
//! The engine never opens sockets itself. Every logical request goes through a
//! [`Transport`], which owns connection pooling, TLS, and per-request timeouts.
//! A transport-level error (refused connection, timeout) is returned as a
//! [`TransportError`] and classified as a failure by the [`Client`], it never
//! reaches the virtual user loop as a fault.
//!
//! Two transports ship with the crate:
//!
//! - [`HttpTransport`] (feature `http`): a thin reqwest wrapper that joins a base
//!   URL with the request path.
//! - [`FnTransport`]: adapts an async closure, handy for in-process targets and
//!   for tests.
//!
//! [`Client`]: crate::client::Client
#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "http")]
pub use self::http::HttpTransport;

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use ::http::{Method, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

/// One request as the engine hands it to a transport.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    pub method: Method,
    /// Path relative to the transport's target, e.g. `/api/items/42`.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Sets a JSON body. Serialization failures surface as an [`ActionError`]
    /// from the calling action.
    ///
    /// [`ActionError`]: crate::ActionError
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, serde_json::Error> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    pub fn json_value(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Case-insensitive header lookup.
    pub fn header_value(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

/// What a transport returns for a completed exchange.
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub status: StatusCode,
    pub body: String,
    /// Time spent on the wire as measured by the transport.
    pub elapsed: Duration,
}

impl Response {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request timed out")]
    Timeout,
    #[error("{0}")]
    Other(String),
}

/// Sends requests to the system under test.
///
/// Implementations must be cheap to share: one transport is used by every
/// virtual user of a run.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: Request) -> Result<Response, TransportError>;
}

/// A [`Transport`] backed by an async closure.
///
/// ```rust
/// use stampede::{StatusCode, transport::{FnTransport, Request, Response, TransportError}};
///
/// let transport = FnTransport::new(|req: Request| async move {
///     Ok::<_, TransportError>(Response::new(StatusCode::OK, format!("echo {}", req.path)))
/// });
/// # let _ = transport;
/// ```
pub struct FnTransport<F> {
    f: F,
}

impl<F> FnTransport<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Transport for FnTransport<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response, TransportError>> + Send + 'static,
{
    async fn send(&self, request: Request) -> Result<Response, TransportError> {
        (self.f)(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builder_collects_parts() {
        let req = Request::get("/api/items")
            .query("page", "1")
            .header("X-Trace", "abc")
            .json_value(serde_json::json!({"a": 1}));

        assert_eq!(req.method, Method::GET);
        assert_eq!(req.query, vec![("page".to_string(), "1".to_string())]);
        assert_eq!(req.header_value("x-trace"), Some("abc"));
        assert!(req.body.is_some());
    }

    #[tokio::test]
    async fn fn_transport_forwards_requests() {
        let transport = FnTransport::new(|req: Request| async move {
            Ok::<_, TransportError>(Response::new(StatusCode::ACCEPTED, req.path))
        });

        let res = transport.send(Request::post("/x")).await.unwrap();
        assert_eq!(res.status, StatusCode::ACCEPTED);
        assert_eq!(res.body, "/x");
    }
}
