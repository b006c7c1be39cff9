//! Error types for the registration agent
//!
//! Only configuration-class problems surface as errors. Everything that goes
//! wrong while a refresh cycle is running (resolution, transport, protocol
//! rejections) is reported through the event channels instead.

use thiserror::Error;

/// Result type for registration agent operations
pub type RegistrationResult<T> = Result<T, RegistrationError>;

/// Errors returned synchronously by the registration agent
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// Invalid or incomplete configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// `start` was called on an agent that is still running
    #[error("Registration agent is already running, stop it first")]
    AlreadyRunning,

    /// An operation needs a running agent
    #[error("Registration agent is not running")]
    NotRunning,

    /// A URI could not be parsed
    #[error("Invalid SIP URI: {uri}")]
    InvalidUri { uri: String },

    /// A method outside the known SIP method set was supplied
    #[error("Unsupported SIP method: {method}")]
    UnsupportedMethod { method: String },

    /// A challenge could not be answered
    #[error("Authentication error: {message}")]
    Authentication { message: String },

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl RegistrationError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an invalid URI error
    pub fn invalid_uri(uri: impl Into<String>) -> Self {
        Self::InvalidUri { uri: uri.into() }
    }

    /// Create an unsupported method error
    pub fn unsupported_method(method: impl Into<String>) -> Self {
        Self::UnsupportedMethod {
            method: method.into(),
        }
    }

    /// Create an authentication error
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this error is a configuration problem the caller must fix
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. }
                | Self::AlreadyRunning
                | Self::InvalidUri { .. }
                | Self::UnsupportedMethod { .. }
        )
    }
}
