//! Registration agent configuration
//!
//! [`RegistrationConfig`] holds everything needed to keep one account
//! registered: identity, contact, registrar, credentials and the refresh and
//! retry tunables. It deserializes from any serde format; omitted tunables take
//! their defaults.
//!
//! # Examples
//!
//! ```rust
//! use rvoip_registration_core::RegistrationConfig;
//!
//! let config = RegistrationConfig::new(
//!     "sip:alice@example.com",
//!     "sip:alice@192.168.1.100:5060",
//!     "registrar.example.com",
//! )
//! .with_credentials("alice", "secret123")
//! .with_expires(1800);
//!
//! assert_eq!(config.expires, 1800);
//! assert_eq!(config.max_register_attempts, 3);
//! assert!(config.validate().is_ok());
//! ```

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::error::{RegistrationError, RegistrationResult};
use crate::expiry::DEFAULT_REGISTER_EXPIRY;
use crate::message::{Header, Method, SipUri};

/// Default per-cycle wait ceiling in seconds
pub const DEFAULT_MAX_REGISTRATION_ATTEMPT_TIMEOUT: u32 = 60;

/// Default delay before retrying a failed cycle, in seconds
pub const DEFAULT_REGISTER_FAILURE_RETRY_INTERVAL: u32 = 300;

/// Default cap on requests sent per cycle
pub const DEFAULT_MAX_REGISTER_ATTEMPTS: u32 = 3;

/// Configuration for one account's registration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationConfig {
    /// Address of record being registered (e.g. "sip:alice@example.com")
    pub identity: String,

    /// Where this user agent can be reached (e.g. "sip:alice@192.168.1.100:5060")
    pub contact: String,

    /// Registrar host name or address, resolved through the transport
    pub registrar_host: String,

    /// Send every request here instead of resolving the registrar
    #[serde(default)]
    pub outbound_proxy: Option<SocketAddr>,

    /// Authentication username; the identity's user part when absent
    #[serde(default)]
    pub username: Option<String>,

    /// Authentication secret
    #[serde(default)]
    pub password: Option<String>,

    /// Realm used when a challenge does not name one
    #[serde(default)]
    pub realm: Option<String>,

    /// Requested binding lifetime in seconds
    #[serde(default = "default_expires")]
    pub expires: u32,

    /// How long one refresh cycle may wait for its outcome, in seconds
    #[serde(default = "default_attempt_timeout")]
    pub max_registration_attempt_timeout: u32,

    /// Delay before the next cycle after a failed one, in seconds
    #[serde(default = "default_failure_retry_interval")]
    pub register_failure_retry_interval: u32,

    /// Requests allowed per cycle, across initial, authenticated and 423 retries
    #[serde(default = "default_max_attempts")]
    pub max_register_attempts: u32,

    /// Stop refreshing after a 403/404 or rejected credentials
    #[serde(default = "default_true")]
    pub exit_on_unequivocal_failure: bool,

    /// Put the identity's user part into the Contact URI
    #[serde(default)]
    pub send_username_in_contact_header: bool,

    /// User-Agent header value
    #[serde(default)]
    pub user_agent: Option<String>,

    /// Display name for To and From
    #[serde(default)]
    pub display_name: Option<String>,

    /// Headers appended to every REGISTER
    #[serde(default)]
    pub custom_headers: Vec<Header>,

    /// Replacement for the advertised Allow list
    #[serde(default)]
    pub allowed_methods: Option<Vec<Method>>,
}

fn default_expires() -> u32 {
    DEFAULT_REGISTER_EXPIRY
}

fn default_attempt_timeout() -> u32 {
    DEFAULT_MAX_REGISTRATION_ATTEMPT_TIMEOUT
}

fn default_failure_retry_interval() -> u32 {
    DEFAULT_REGISTER_FAILURE_RETRY_INTERVAL
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_REGISTER_ATTEMPTS
}

fn default_true() -> bool {
    true
}

impl RegistrationConfig {
    /// Create a configuration with default tunables and no credentials
    pub fn new(
        identity: impl Into<String>,
        contact: impl Into<String>,
        registrar_host: impl Into<String>,
    ) -> Self {
        Self {
            identity: identity.into(),
            contact: contact.into(),
            registrar_host: registrar_host.into(),
            outbound_proxy: None,
            username: None,
            password: None,
            realm: None,
            expires: DEFAULT_REGISTER_EXPIRY,
            max_registration_attempt_timeout: DEFAULT_MAX_REGISTRATION_ATTEMPT_TIMEOUT,
            register_failure_retry_interval: DEFAULT_REGISTER_FAILURE_RETRY_INTERVAL,
            max_register_attempts: DEFAULT_MAX_REGISTER_ATTEMPTS,
            exit_on_unequivocal_failure: true,
            send_username_in_contact_header: false,
            user_agent: None,
            display_name: None,
            custom_headers: Vec::new(),
            allowed_methods: None,
        }
    }

    /// Set authentication credentials
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = Some(realm.into());
        self
    }

    /// Set the requested expiry; out-of-range values fall back to the default when the agent is built
    pub fn with_expires(mut self, expires: u32) -> Self {
        self.expires = expires;
        self
    }

    pub fn with_outbound_proxy(mut self, proxy: SocketAddr) -> Self {
        self.outbound_proxy = Some(proxy);
        self
    }

    pub fn with_attempt_timeout(mut self, seconds: u32) -> Self {
        self.max_registration_attempt_timeout = seconds;
        self
    }

    pub fn with_failure_retry_interval(mut self, seconds: u32) -> Self {
        self.register_failure_retry_interval = seconds;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_register_attempts = attempts;
        self
    }

    pub fn with_exit_on_unequivocal_failure(mut self, exit: bool) -> Self {
        self.exit_on_unequivocal_failure = exit;
        self
    }

    pub fn with_username_in_contact(mut self, enabled: bool) -> Self {
        self.send_username_in_contact_header = enabled;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn with_custom_header(mut self, header: Header) -> Self {
        self.custom_headers.push(header);
        self
    }

    pub fn with_allowed_methods(mut self, methods: Vec<Method>) -> Self {
        self.allowed_methods = Some(methods);
        self
    }

    /// Parsed address of record
    pub fn identity_uri(&self) -> RegistrationResult<SipUri> {
        self.identity.parse()
    }

    /// Parsed contact address
    pub fn contact_uri(&self) -> RegistrationResult<SipUri> {
        self.contact.parse()
    }

    /// Check the configuration for errors the agent cannot recover from
    pub fn validate(&self) -> RegistrationResult<()> {
        let identity = self.identity_uri()?;
        if identity.user.is_none() {
            return Err(RegistrationError::config(format!(
                "identity {} has no user part",
                self.identity
            )));
        }
        self.contact_uri()?;

        if self.registrar_host.trim().is_empty() {
            return Err(RegistrationError::config("registrar host is empty"));
        }
        if self.max_register_attempts == 0 {
            return Err(RegistrationError::config("max_register_attempts must be at least 1"));
        }
        if self.max_registration_attempt_timeout == 0 {
            return Err(RegistrationError::config(
                "max_registration_attempt_timeout must be at least 1 second",
            ));
        }
        if self.register_failure_retry_interval == 0 {
            return Err(RegistrationError::config(
                "register_failure_retry_interval must be at least 1 second",
            ));
        }
        Ok(())
    }
}
