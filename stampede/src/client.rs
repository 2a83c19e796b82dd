//! Request execution and classification.
//!
//! Every call goes through [`Client::execute`]: dispatch through the
//! [`Transport`], time it, classify it with a [`Classifier`], record exactly one
//! [`RequestOutcome`] under the caller's logical name, and hand the result back
//! as an [`Exchange`].
use std::{
    fmt,
    ops::Range,
    sync::Arc,
    time::{Instant, SystemTime},
};

use http::StatusCode;
use serde::de::DeserializeOwned;

use crate::{
    metric::{Outcome, RequestOutcome},
    session::Session,
    stats::Stats,
    transport::{Request, Response, Transport},
};

/// Characters of a response body quoted in a failure reason.
pub const FAILURE_BODY_PREFIX: usize = 200;

/// Upper bound on any failure reason, whatever produced it.
pub const MAX_REASON_LEN: usize = 512;

type Predicate = dyn Fn(&Response) -> Result<(), String> + Send + Sync;

/// Decides whether a response counts as a success.
#[derive(Clone)]
pub enum Classifier {
    /// Success when the status code falls in the range.
    StatusRange(Range<u16>),
    /// Success only on this exact status code.
    Status(StatusCode),
    /// Custom predicate; `Err(reason)` marks a failure with that reason.
    Custom(Arc<Predicate>),
}

impl Classifier {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Response) -> Result<(), String> + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    pub fn classify(&self, response: &Response) -> Outcome {
        let ok = match self {
            Classifier::StatusRange(range) => range.contains(&response.status.as_u16()),
            Classifier::Status(code) => response.status == *code,
            Classifier::Custom(f) => {
                return match f(response) {
                    Ok(()) => Outcome::Success,
                    Err(reason) => Outcome::Failure(bounded(reason)),
                };
            }
        };
        if ok {
            Outcome::Success
        } else {
            Outcome::Failure(status_reason(response))
        }
    }
}

impl Default for Classifier {
    /// Statuses 200..400 count as success.
    fn default() -> Self {
        Classifier::StatusRange(200..400)
    }
}

impl fmt::Debug for Classifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classifier::StatusRange(r) => f.debug_tuple("StatusRange").field(r).finish(),
            Classifier::Status(s) => f.debug_tuple("Status").field(s).finish(),
            Classifier::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// `Status {code}: {body prefix}`, enough to diagnose without keeping the body.
pub fn status_reason(response: &Response) -> String {
    format!(
        "Status {}: {}",
        response.status.as_u16(),
        truncate(&response.body, FAILURE_BODY_PREFIX)
    )
}

fn bounded(reason: String) -> String {
    if reason.chars().count() <= MAX_REASON_LEN {
        reason
    } else {
        truncate(&reason, MAX_REASON_LEN).to_string()
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Result of one request as seen by the action that sent it.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub outcome: Outcome,
    /// `None` when the transport failed before a response arrived.
    pub response: Option<Response>,
}

impl Exchange {
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.response.as_ref().map(|r| r.status)
    }

    /// Decodes the response body. `Ok(None)` when there is no response.
    pub fn json<T: DeserializeOwned>(&self) -> Result<Option<T>, serde_json::Error> {
        self.response.as_ref().map(Response::json).transpose()
    }
}

/// Request executor shared by every virtual user of a run.
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    stats: Stats,
}

impl Client {
    pub fn new(transport: Arc<dyn Transport>, stats: Stats) -> Self {
        Self { transport, stats }
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Sends `request` and records its outcome under `name`.
    ///
    /// Transport errors are classified as failures. This never fails and
    /// always records exactly one outcome.
    pub async fn execute(&self, name: &str, request: Request, classifier: &Classifier) -> Exchange {
        let started_at = SystemTime::now();
        let start = Instant::now();
        let result = self.transport.send(request).await;
        let measured = start.elapsed();

        let (exchange, metric) = match result {
            Ok(response) => {
                let outcome = classifier.classify(&response);
                let duration = if response.elapsed.is_zero() {
                    measured
                } else {
                    response.elapsed
                };
                let metric = RequestOutcome {
                    name: name.to_string(),
                    started_at,
                    duration,
                    outcome: outcome.clone(),
                    status: Some(response.status.as_u16()),
                    bytes: response.body.len(),
                };
                (
                    Exchange {
                        outcome,
                        response: Some(response),
                    },
                    metric,
                )
            }
            Err(err) => {
                let outcome = Outcome::Failure(bounded(format!("transport: {err}")));
                let metric = RequestOutcome {
                    name: name.to_string(),
                    started_at,
                    duration: measured,
                    outcome: outcome.clone(),
                    status: None,
                    bytes: 0,
                };
                (
                    Exchange {
                        outcome,
                        response: None,
                    },
                    metric,
                )
            }
        };

        if let Outcome::Failure(reason) = &exchange.outcome {
            tracing::debug!(endpoint = name, %reason, "request failed");
        }
        self.stats.record(&metric);
        exchange
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client").field("stats", &self.stats).finish()
    }
}

/// A request being prepared by an action, see [`UserContext::request`].
///
/// [`UserContext::request`]: crate::UserContext::request
#[must_use = "a pending request does nothing until `send` is awaited"]
pub struct PendingRequest<'a> {
    client: &'a Client,
    session: &'a Session,
    name: String,
    request: Request,
    classifier: Classifier,
}

impl<'a> PendingRequest<'a> {
    pub(crate) fn new(
        client: &'a Client,
        session: &'a Session,
        name: String,
        request: Request,
    ) -> Self {
        Self {
            client,
            session,
            name,
            request,
            classifier: Classifier::default(),
        }
    }

    /// Success only on `status`.
    pub fn expect_status(mut self, status: StatusCode) -> Self {
        self.classifier = Classifier::Status(status);
        self
    }

    pub fn expect(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub async fn send(self) -> Exchange {
        let request = self.session.apply(self.request);
        self.client
            .execute(&self.name, request, &self.classifier)
            .await
    }
}
