use thiserror::Error;

use crate::types::StepStatus;

/// Failures raised by page automation primitives.
///
/// Every variant is something a primitive *throws*; the action registry
/// decides from [`DriverError::is_retryable`] whether another attempt is
/// worth making.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DriverError {
    /// The index no longer names a live element in the current snapshot.
    #[error("stale index {index}: {reason}")]
    StaleIndex { index: usize, reason: String },

    #[error("page '{0}' is restricted and cannot be scripted")]
    RestrictedPage(String),

    #[error("invalid url '{0}'")]
    InvalidUrl(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("page script failed: {0}")]
    Script(String),

    #[error("text '{text}' (occurrence {occurrence}) not found on page")]
    TextNotFound { text: String, occurrence: usize },

    #[error("option '{0}' not found")]
    OptionNotFound(String),

    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("{operation} timed out after {millis}ms")]
    Timeout { operation: String, millis: u64 },

    #[error("browser host error: {0}")]
    Host(String),

    #[error("tab connection is closed")]
    Closed,

    #[error("cancelled")]
    Cancelled,
}

impl DriverError {
    pub fn stale(index: usize, reason: impl Into<String>) -> Self {
        DriverError::StaleIndex {
            index,
            reason: reason.into(),
        }
    }

    /// Whether another attempt at the same primitive could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            DriverError::InvalidParams(_)
                | DriverError::InvalidUrl(_)
                | DriverError::RestrictedPage(_)
                | DriverError::Closed
                | DriverError::Cancelled
        )
    }
}

/// Failures at the completion-service boundary.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("completion request failed: {0}")]
    Transport(String),

    #[error("completion service returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("completion response had no content: {0}")]
    EmptyResponse(String),

    #[error("completion stream was cancelled")]
    Cancelled,

    #[error("missing credentials: {0}")]
    MissingCredentials(String),
}

impl From<reqwest::Error> for CompletionError {
    fn from(err: reqwest::Error) -> Self {
        CompletionError::Transport(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

/// Errors that escape the agent core to its caller or to the orchestrator.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("a task is already running on this orchestrator")]
    TaskActive,

    #[error("goal must not be empty")]
    EmptyGoal,

    #[error("planning failed: {0}")]
    Planning(String),

    #[error("unknown step type '{0}'")]
    UnknownStepType(String),

    #[error("stopped by user")]
    Stopped,

    #[error("invalid step transition {from:?} -> {to:?}")]
    InvalidTransition { from: StepStatus, to: StepStatus },

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Completion(#[from] CompletionError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
