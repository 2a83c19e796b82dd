use std::{
    fmt::Debug,
    time::{Duration, SystemTime},
};

use serde::{Deserialize, Serialize};

/// A single sample produced by a virtual user.
///
/// Metrics are transient: they are handed to an [`Aggregate`] as soon as they
/// are produced and never retained individually.
///
/// [`Aggregate`]: crate::Aggregate
pub trait Metric
where
    Self: Serialize + Send + Sync + Debug + Clone,
{
    /// Logical name the sample is aggregated under.
    fn name(&self) -> &str;
}

/// Pass/fail classification of one request.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub enum Outcome {
    Success,
    Failure(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            Outcome::Success => None,
            Outcome::Failure(reason) => Some(reason),
        }
    }
}

/// The built-in metric: one classified request.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct RequestOutcome {
    /// Logical name, never the resolved path.
    pub name: String,
    pub started_at: SystemTime,
    pub duration: Duration,
    pub outcome: Outcome,
    pub status: Option<u16>,
    pub bytes: usize,
}

impl RequestOutcome {
    pub fn success(name: impl Into<String>, duration: Duration) -> Self {
        Self::new(name, duration, Outcome::Success)
    }

    pub fn failure(name: impl Into<String>, duration: Duration, reason: impl Into<String>) -> Self {
        Self::new(name, duration, Outcome::Failure(reason.into()))
    }

    fn new(name: impl Into<String>, duration: Duration, outcome: Outcome) -> Self {
        Self {
            name: name.into(),
            started_at: SystemTime::now(),
            duration,
            outcome,
            status: None,
            bytes: 0,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_bytes(mut self, bytes: usize) -> Self {
        self.bytes = bytes;
        self
    }
}

impl Metric for RequestOutcome {
    fn name(&self) -> &str {
        &self.name
    }
}
