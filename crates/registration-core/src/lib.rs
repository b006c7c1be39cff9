//! # Registration Core - SIP REGISTER User Agent
//!
//! This crate keeps one SIP account registered with its registrar:
//! - refreshes the binding before it expires
//! - answers 401/407 digest challenges
//! - renegotiates the expiry after 423 Interval Too Brief
//! - classifies failures as temporary (retry later) or permanent (stop)
//! - releases the binding with an Expires: 0 request on stop
//!
//! Sockets, transactions and name resolution are left to a
//! [`RegistrarTransport`] supplied by the caller.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rvoip_registration_core::{RegistrationAgentBuilder, RegistrationConfig};
//! # use rvoip_registration_core::transport::RegistrarTransport;
//!
//! # async fn run(transport: Arc<dyn RegistrarTransport>) -> Result<(), Box<dyn std::error::Error>> {
//! let config = RegistrationConfig::new(
//!     "sip:alice@example.com",
//!     "sip:alice@192.168.1.100:5060",
//!     "registrar.example.com",
//! )
//! .with_credentials("alice", "secret123")
//! .with_expires(3600);
//!
//! let agent = RegistrationAgentBuilder::new(config)
//!     .transport(transport)
//!     .refresh_time(|expiry| expiry * 9 / 10)
//!     .build()?;
//!
//! agent.start()?;
//! // ...
//! agent.stop(true);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`expiry`]: pure expiry policy (clamping, accepted expiry, 423 backoff)
//! - [`request`]: builds REGISTER requests from the session record
//! - `attempt`: drives one cycle of sends, challenges and retries
//! - [`state`]: lifecycle transitions and notifications
//! - `scheduler`: the refresh timer and cycle guard
//! - [`agent`]: the public handle tying these together

pub mod agent;
pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod expiry;
pub mod message;
pub mod request;
pub mod state;
pub mod transport;

mod attempt;
mod scheduler;
mod session;

pub use agent::{RegistrationAgent, RegistrationAgentBuilder};
pub use auth::{Authenticator, Credentials, DigestAuthenticator};
pub use config::RegistrationConfig;
pub use error::{RegistrationError, RegistrationResult};
pub use events::{RegistrationEvent, RegistrationEventHandler};
pub use message::{Contact, Header, Method, NameAddr, RegisterRequest, RegisterResponse, SipUri, StatusCode};
pub use request::RequestAdjuster;
pub use scheduler::{MIN_REFRESH_DELAY, RefreshTimeFn};
pub use state::{CycleOutcome, RegistrationState};
pub use transport::{RegistrarTransport, TransactionCallbacks, TransportError};
