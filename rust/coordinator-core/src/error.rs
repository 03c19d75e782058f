// rust/coordinator-core/src/error.rs

use thiserror::Error;

use crate::coordinator::frame::FrameError;

#[derive(Error, Debug)]
pub enum CoordinatorError {

    #[error("I/O error on {endpoint}: {message}")]
    Io {
        endpoint: String,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Protocol error: {message}")]
    Protocol {
        message: String,
    },

    #[error("Coordinator rejected {request} request from '{client}'")]
    Rejected {
        request: String,
        client: String,
    },

    #[error("Timed out after {attempts} attempts waiting on {request}")]
    PollExhausted {
        request: String,
        attempts: u32,
    },

    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;

// Convenience constructors
impl CoordinatorError {

    pub fn io(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Io {
            endpoint: endpoint.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn io_with_source(
        endpoint: impl Into<String>,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::Io {
            endpoint: endpoint.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn rejected(request: impl Into<String>, client: impl Into<String>) -> Self {
        Self::Rejected {
            request: request.into(),
            client: client.into(),
        }
    }

    pub fn poll_exhausted(request: impl Into<String>, attempts: u32) -> Self {
        Self::PollExhausted {
            request: request.into(),
            attempts,
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Returns true if a fresh connection attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::Frame(FrameError::Io(_)))
    }
}
