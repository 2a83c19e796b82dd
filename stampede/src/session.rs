use std::collections::BTreeMap;

use crate::transport::Request;

/// Per-user mutable state attached to every outgoing request.
///
/// A session usually gets its credentials from the class start hook (for
/// example a login call storing a bearer token). It is owned by exactly one
/// virtual user and dropped when that user stops.
#[derive(Clone, Debug, Default)]
pub struct Session {
    token: Option<String>,
    cookies: BTreeMap<String, String>,
    headers: BTreeMap<String, String>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    pub fn set_token(&mut self, token: impl Into<String>) {
        self.token = Some(token.into());
    }

    pub fn clear_token(&mut self) {
        self.token = None;
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn set_cookie(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.cookies.insert(name.into(), value.into());
    }

    /// A header sent with every request of this session.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name.into(), value.into());
    }

    /// Adds session credentials to `request`. Headers the request already
    /// carries win over session defaults.
    pub fn apply(&self, mut request: Request) -> Request {
        for (name, value) in &self.headers {
            if request.header_value(name).is_none() {
                request.headers.push((name.clone(), value.clone()));
            }
        }
        if let Some(token) = &self.token {
            if request.header_value("authorization").is_none() {
                request
                    .headers
                    .push(("Authorization".to_string(), format!("Bearer {token}")));
            }
        }
        if !self.cookies.is_empty() && request.header_value("cookie").is_none() {
            let cookie = self
                .cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; ");
            request.headers.push(("Cookie".to_string(), cookie));
        }
        request
    }
}
