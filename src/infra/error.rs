use thiserror::Error;

use crate::config::LoadError;

/// Failures while starting or stopping the service.
#[derive(Debug, Error)]
pub enum InfraError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] LoadError),
    #[error("listener i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("tracing subscriber could not be installed: {0}")]
    Telemetry(String),
    #[error("event dispatcher unavailable: {0}")]
    Dispatcher(String),
}

impl InfraError {
    pub fn telemetry(message: impl Into<String>) -> Self {
        Self::Telemetry(message.into())
    }

    pub fn dispatcher(message: impl Into<String>) -> Self {
        Self::Dispatcher(message.into())
    }
}
