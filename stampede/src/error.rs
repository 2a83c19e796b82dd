use thiserror::Error;

use crate::transport::TransportError;

pub type Result<T, E = StampedeError> = std::result::Result<T, E>;

/// Errors raised while configuring or reporting on a load test.
///
/// Nothing a virtual user does at runtime produces one of these: request
/// failures become outcomes and action faults are recorded against the action.
#[derive(Debug, Error)]
pub enum StampedeError {
    #[error("no user classes registered")]
    NoUserClasses,

    #[error("{kind} `{name}` has weight 0, weights must be positive")]
    InvalidWeight { kind: &'static str, name: String },

    #[error("user class `{class}` has pacing min {min:?} greater than max {max:?}")]
    InvalidPacing {
        class: String,
        min: std::time::Duration,
        max: std::time::Duration,
    },

    #[error("user class `{class}` has no actions left after applying the tag filter")]
    EmptyActionSet { class: String },

    #[error("invalid stage #{index}: {reason}")]
    InvalidStage { index: usize, reason: String },

    #[error("invalid run configuration: {0}")]
    InvalidConfig(String),

    #[error("reporter failed: {0}")]
    Report(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Faults raised from inside an action body or hook.
///
/// The runner records these as a failure under the action name; they never
/// stop the virtual user.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("{0}")]
    Message(String),
}

impl ActionError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}
