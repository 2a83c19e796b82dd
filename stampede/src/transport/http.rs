use std::time::Instant;

use async_trait::async_trait;

use super::{Request, Response, Transport, TransportError};

/// reqwest-backed transport.
///
/// Per-request timeouts, TLS and pooling are whatever the supplied
/// [`reqwest::Client`] is configured with. NEVER build a client per request;
/// one transport is shared by every virtual user.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

fn classify(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: Request) -> Result<Response, TransportError> {
        let mut builder = self
            .client
            .request(request.method, self.url_for(&request.path));
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let start = Instant::now();
        let res = builder.send().await.map_err(classify)?;
        let status = res.status();
        let body = res.text().await.map_err(classify)?;

        Ok(Response {
            status,
            body,
            elapsed: start.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_base_url_and_path() {
        let t = HttpTransport::new("http://localhost:3001/");
        assert_eq!(t.base_url(), "http://localhost:3001");
        assert_eq!(t.url_for("/health"), "http://localhost:3001/health");
        assert_eq!(t.url_for("health"), "http://localhost:3001/health");
        assert_eq!(t.url_for("https://other/x"), "https://other/x");
    }
}
