//! Transport collaborator interface
//!
//! The agent does not own sockets or transactions. It hands each REGISTER to a
//! [`RegistrarTransport`], which runs the non-INVITE client transaction and
//! reports back through [`TransactionCallbacks`]: exactly one callback per
//! send, or none if the transaction was cancelled.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::message::{RegisterRequest, RegisterResponse};

/// Transaction-level failure reported by the transport
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// No final response before the transaction timer fired
    #[error("transaction timed out")]
    Timeout,

    /// Socket level error
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Destination could not be reached
    #[error("destination {destination} unreachable")]
    Unreachable { destination: SocketAddr },

    #[error("transport error: {message}")]
    Other { message: String },
}

impl TransportError {
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }
}

/// Outcome sink for one transmitted request
///
/// Callbacks may be invoked from any task or thread.
pub trait TransactionCallbacks: Send + Sync {
    /// A final response arrived for the request
    fn on_final_response(&self, response: RegisterResponse);

    /// The transaction failed without a final response
    fn on_transaction_failure(&self, error: TransportError);
}

/// Sends REGISTER requests and resolves registrar hosts
///
/// # Examples
///
/// ```rust
/// use std::net::SocketAddr;
/// use std::sync::Arc;
/// use async_trait::async_trait;
/// use rvoip_registration_core::{RegisterRequest, RegisterResponse, StatusCode};
/// use rvoip_registration_core::transport::{RegistrarTransport, TransactionCallbacks};
///
/// struct AlwaysOk;
///
/// #[async_trait]
/// impl RegistrarTransport for AlwaysOk {
///     async fn resolve(&self, _host: &str) -> Option<SocketAddr> {
///         Some("127.0.0.1:5060".parse().unwrap())
///     }
///
///     fn send_request(
///         &self,
///         request: RegisterRequest,
///         _destination: SocketAddr,
///         callbacks: Arc<dyn TransactionCallbacks>,
///     ) {
///         callbacks.on_final_response(RegisterResponse::for_request(&request, StatusCode::OK, "OK"));
///     }
/// }
/// ```
#[async_trait]
pub trait RegistrarTransport: Send + Sync {
    /// Resolve a registrar host to a concrete endpoint
    async fn resolve(&self, host: &str) -> Option<SocketAddr>;

    /// Start a client transaction for `request`
    ///
    /// Must not block. The outcome is delivered through `callbacks`.
    fn send_request(
        &self,
        request: RegisterRequest,
        destination: SocketAddr,
        callbacks: Arc<dyn TransactionCallbacks>,
    );
}
