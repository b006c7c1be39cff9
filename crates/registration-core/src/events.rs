//! Registration events
//!
//! Outcomes are published two ways from one dispatch point:
//!
//! - [`RegistrationEventHandler`] implementations, invoked one after another in
//!   the order they were added, on the refresh cycle's own task. A handler that
//!   must not hold up the registration path should hand the event off to its
//!   own task.
//! - A broadcast stream from [`EventDispatcher::subscribe`] for consumers that
//!   prefer a channel.
//!
//! # Examples
//!
//! ```rust
//! use async_trait::async_trait;
//! use rvoip_registration_core::{RegisterResponse, SipUri};
//! use rvoip_registration_core::events::RegistrationEventHandler;
//!
//! struct LogFailures;
//!
//! #[async_trait]
//! impl RegistrationEventHandler for LogFailures {
//!     async fn on_registration_failed(
//!         &self,
//!         identity: &SipUri,
//!         _response: Option<&RegisterResponse>,
//!         reason: &str,
//!     ) {
//!         eprintln!("{} failed: {}", identity, reason);
//!     }
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::message::{RegisterResponse, SipUri};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Outcome of a registration cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationEvent {
    /// The registrar accepted the binding
    Succeeded {
        identity: SipUri,
        response: RegisterResponse,
    },

    /// The binding was removed with an Expires: 0 request
    Removed {
        identity: SipUri,
        response: RegisterResponse,
    },

    /// The cycle failed; the agent retries on its failure interval
    TemporaryFailure {
        identity: SipUri,
        response: Option<RegisterResponse>,
        reason: String,
    },

    /// The registrar refused the account or its credentials
    Failed {
        identity: SipUri,
        response: Option<RegisterResponse>,
        reason: String,
    },
}

impl RegistrationEvent {
    pub fn identity(&self) -> &SipUri {
        match self {
            RegistrationEvent::Succeeded { identity, .. }
            | RegistrationEvent::Removed { identity, .. }
            | RegistrationEvent::TemporaryFailure { identity, .. }
            | RegistrationEvent::Failed { identity, .. } => identity,
        }
    }

    pub fn response(&self) -> Option<&RegisterResponse> {
        match self {
            RegistrationEvent::Succeeded { response, .. } | RegistrationEvent::Removed { response, .. } => {
                Some(response)
            }
            RegistrationEvent::TemporaryFailure { response, .. } | RegistrationEvent::Failed { response, .. } => {
                response.as_ref()
            }
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            RegistrationEvent::TemporaryFailure { reason, .. } | RegistrationEvent::Failed { reason, .. } => {
                Some(reason)
            }
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            RegistrationEvent::TemporaryFailure { .. } | RegistrationEvent::Failed { .. }
        )
    }
}

/// Receives registration outcomes
///
/// Every method has an empty default so implementors only override what they
/// care about.
#[async_trait]
pub trait RegistrationEventHandler: Send + Sync {
    async fn on_registration_succeeded(&self, _identity: &SipUri, _response: &RegisterResponse) {}

    async fn on_registration_removed(&self, _identity: &SipUri, _response: &RegisterResponse) {}

    async fn on_registration_temporary_failure(
        &self,
        _identity: &SipUri,
        _response: Option<&RegisterResponse>,
        _reason: &str,
    ) {
    }

    async fn on_registration_failed(
        &self,
        _identity: &SipUri,
        _response: Option<&RegisterResponse>,
        _reason: &str,
    ) {
    }
}

/// Fan-out point for registration events
pub struct EventDispatcher {
    handlers: RwLock<Vec<Arc<dyn RegistrationEventHandler>>>,
    event_tx: broadcast::Sender<RegistrationEvent>,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("handlers", &self.handlers.read().len())
            .field("subscribers", &self.event_tx.receiver_count())
            .finish()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            handlers: RwLock::new(Vec::new()),
            event_tx,
        }
    }

    pub fn add_handler(&self, handler: Arc<dyn RegistrationEventHandler>) {
        self.handlers.write().push(handler);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistrationEvent> {
        self.event_tx.subscribe()
    }

    /// Deliver `event` to every handler in order, then to the broadcast stream
    pub async fn dispatch(&self, event: RegistrationEvent) {
        let handlers = self.handlers.read().clone();
        for handler in handlers {
            match &event {
                RegistrationEvent::Succeeded { identity, response } => {
                    handler.on_registration_succeeded(identity, response).await
                }
                RegistrationEvent::Removed { identity, response } => {
                    handler.on_registration_removed(identity, response).await
                }
                RegistrationEvent::TemporaryFailure {
                    identity,
                    response,
                    reason,
                } => {
                    handler
                        .on_registration_temporary_failure(identity, response.as_ref(), reason)
                        .await
                }
                RegistrationEvent::Failed {
                    identity,
                    response,
                    reason,
                } => {
                    handler
                        .on_registration_failed(identity, response.as_ref(), reason)
                        .await
                }
            }
        }

        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }
}
