//! Structured errors for the gateway façade.
//!
//! Every error carries a stable code so the web layer can render
//! `{status, code, message}` without matching on text.

use serde::Serialize;

use nomad_core::ConfigError;

/// Errors surfaced by [`crate::Gateway`] operations.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Fetch, cache or settings failure.
    #[error(transparent)]
    Core(#[from] nomad_core::Error),

    /// Configuration could not be loaded or failed validation.
    #[error("CONFIG_ERROR: {0}")]
    Config(#[from] ConfigError),

    /// A cache work queue is full or no longer drained.
    #[error("QUEUE_FULL: {0}")]
    QueueFull(String),

    /// Additional page caching was requested while disabled in settings.
    #[error("AUXILIARY_DISABLED: additional page caching is disabled")]
    AuxiliaryDisabled,

    /// A blocking cache task panicked or was cancelled.
    #[error("TASK_FAILED: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// The tracing subscriber could not be installed.
    #[error("TELEMETRY_ERROR: {0}")]
    Telemetry(String),
}

impl GatewayError {
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Core(err) => err.code(),
            GatewayError::Config(_) => "CONFIG_ERROR",
            GatewayError::QueueFull(_) => "QUEUE_FULL",
            GatewayError::AuxiliaryDisabled => "AUXILIARY_DISABLED",
            GatewayError::Task(_) => "TASK_FAILED",
            GatewayError::Telemetry(_) => "TELEMETRY_ERROR",
        }
    }
}

/// JSON error body handed to the web layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub status: &'static str,
    pub code: &'static str,
    pub message: String,
}

impl From<&GatewayError> for ErrorBody {
    fn from(err: &GatewayError) -> Self {
        ErrorBody { status: "error", code: err.code(), message: err.to_string() }
    }
}
