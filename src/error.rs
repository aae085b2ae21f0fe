// src/error.rs - Error taxonomy for the hit counter
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure reported by a counter store backend.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreFailure {
    #[error("counter store unavailable: {message}")]
    Unavailable { message: String },

    #[error("counter store access denied: {message}")]
    PermissionDenied { message: String },
}

/// Failure reported by a downstream invoker.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvocationFailure {
    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("downstream returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("downstream timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("downstream returned an invalid payload: {message}")]
    InvalidPayload { message: String },
}

/// Main hit counter error type
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum HitCounterError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Provisioning failed while {stage}: {reason}")]
    Provisioning { stage: String, reason: String },

    #[error("Malformed request: {reason}")]
    MalformedRequest { reason: String },

    #[error("Failed to record hit for '{key}'")]
    CounterWrite {
        key: String,
        #[source]
        source: StoreFailure,
    },

    #[error("Downstream '{target}' invocation failed")]
    DownstreamInvocation {
        target: String,
        #[source]
        source: InvocationFailure,
    },
}

/// Result type alias for hit counter operations
pub type Result<T> = std::result::Result<T, HitCounterError>;

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl HitCounterError {
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        HitCounterError::Configuration {
            message: message.into(),
        }
    }

    pub fn malformed<S: Into<String>>(reason: S) -> Self {
        HitCounterError::MalformedRequest {
            reason: reason.into(),
        }
    }

    /// Get the HTTP status code that should be returned for this error
    pub fn http_status_code(&self) -> u16 {
        match self {
            HitCounterError::MalformedRequest { .. } => 400,
            HitCounterError::CounterWrite { .. } => 503,
            HitCounterError::DownstreamInvocation {
                source: InvocationFailure::Timeout { .. },
                ..
            } => 504,
            HitCounterError::DownstreamInvocation { .. } => 502,
            HitCounterError::Configuration { .. } | HitCounterError::Provisioning { .. } => 500,
        }
    }

    /// Whether the caller may retry. Retrying a request that reached the
    /// store counts it again.
    pub fn is_retryable(&self) -> bool {
        match self {
            HitCounterError::CounterWrite { .. } | HitCounterError::DownstreamInvocation { .. } => {
                true
            }
            HitCounterError::Provisioning { .. } => true,
            HitCounterError::Configuration { .. } | HitCounterError::MalformedRequest { .. } => {
                false
            }
        }
    }

    /// Whether a store increment was committed before this error was raised.
    pub fn hit_recorded(&self) -> bool {
        matches!(self, HitCounterError::DownstreamInvocation { .. })
    }

    /// Get the log level for this error
    pub fn log_level(&self) -> LogLevel {
        match self {
            HitCounterError::Configuration { .. }
            | HitCounterError::Provisioning { .. }
            | HitCounterError::CounterWrite { .. } => LogLevel::Error,
            HitCounterError::DownstreamInvocation { .. } => LogLevel::Warn,
            HitCounterError::MalformedRequest { .. } => LogLevel::Debug,
        }
    }

    /// Convert to a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            HitCounterError::MalformedRequest { reason } => format!("Bad request: {}", reason),
            HitCounterError::CounterWrite { .. } => "Hit counter temporarily unavailable".to_string(),
            HitCounterError::DownstreamInvocation {
                source: InvocationFailure::Timeout { .. },
                ..
            } => "Downstream service timed out".to_string(),
            HitCounterError::DownstreamInvocation { .. } => "Downstream service failed".to_string(),
            _ => "An error occurred while processing your request".to_string(),
        }
    }

    /// Emit this error through `tracing` at its configured level.
    pub fn log(&self) {
        let detail = match std::error::Error::source(self) {
            Some(source) => format!("{}: {}", self, source),
            None => self.to_string(),
        };

        match self.log_level() {
            LogLevel::Error => tracing::error!("{}", detail),
            LogLevel::Warn => tracing::warn!("{}", detail),
            LogLevel::Info => tracing::info!("{}", detail),
            LogLevel::Debug => tracing::debug!("{}", detail),
        }
    }
}
