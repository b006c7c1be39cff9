//! Mutable registration session record
//!
//! One [`Session`] exists per agent. It is only touched through the agent's
//! mutex, and every mutation made during a refresh cycle happens while that
//! cycle holds the cycle guard.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::auth::Credentials;
use crate::config::RegistrationConfig;
use crate::error::{RegistrationError, RegistrationResult};
use crate::expiry;
use crate::message::{Header, Method, SipUri};
use crate::state::RegistrationState;

#[derive(Debug)]
pub(crate) struct Session {
    // Fixed for the session's lifetime
    pub(crate) identity: SipUri,
    pub(crate) contact: SipUri,
    pub(crate) registrar_host: String,
    pub(crate) username: Option<String>,
    pub(crate) password: Option<String>,
    pub(crate) realm: Option<String>,
    pub(crate) display_name: Option<String>,
    pub(crate) user_agent: Option<String>,
    pub(crate) custom_headers: Vec<Header>,
    pub(crate) send_username_in_contact: bool,
    pub(crate) call_id: String,

    pub(crate) sequence_number: u32,
    pub(crate) requested_expiry: u32,
    pub(crate) original_expiry: u32,
    /// Set when the caller changed `requested_expiry` and no request has carried it yet
    pub(crate) expiry_pending: bool,
    pub(crate) attempts_this_cycle: u32,
    pub(crate) is_registered: bool,
    pub(crate) last_attempt_at: Option<DateTime<Utc>>,
    pub(crate) is_stopping: bool,
    pub(crate) allowed_methods: Option<Vec<Method>>,
    pub(crate) state: RegistrationState,
}

impl Session {
    pub(crate) fn new(config: &RegistrationConfig) -> RegistrationResult<Self> {
        config.validate()?;
        let expiry = expiry::clamp(config.expires);

        Ok(Self {
            identity: config.identity_uri()?,
            contact: config.contact_uri()?,
            registrar_host: config.registrar_host.trim().to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            realm: config.realm.clone(),
            display_name: config.display_name.clone(),
            user_agent: config.user_agent.clone(),
            custom_headers: config.custom_headers.clone(),
            send_username_in_contact: config.send_username_in_contact_header,
            call_id: Uuid::new_v4().to_string(),
            sequence_number: 0,
            requested_expiry: expiry,
            original_expiry: expiry,
            expiry_pending: false,
            attempts_this_cycle: 0,
            is_registered: false,
            last_attempt_at: None,
            is_stopping: false,
            allowed_methods: config.allowed_methods.clone(),
            state: RegistrationState::Unregistered,
        })
    }

    /// Contact URI to advertise
    pub(crate) fn contact_uri(&self) -> SipUri {
        if self.send_username_in_contact {
            if let Some(user) = &self.identity.user {
                return self.contact.clone().with_user(user.clone());
            }
        }
        self.contact.clone()
    }

    /// Credentials for answering a challenge, if a secret is configured
    pub(crate) fn credentials(&self) -> Option<Credentials> {
        let password = self.password.clone()?;
        let username = self.username.clone().or_else(|| self.identity.user.clone())?;
        Some(Credentials {
            username,
            password,
            realm: self.realm.clone(),
        })
    }

    /// Replace the Allow list after checking every method is known
    pub(crate) fn set_allowed_methods<S: AsRef<str>>(&mut self, methods: &[S]) -> RegistrationResult<()> {
        let parsed = methods
            .iter()
            .map(|m| m.as_ref().parse::<Method>())
            .collect::<Result<Vec<_>, RegistrationError>>()?;
        self.allowed_methods = Some(parsed);
        Ok(())
    }

    /// Advance the sequence counter to at least `cseq`, never reusing a value
    pub(crate) fn claim_sequence_number(&mut self, cseq: u32) -> u32 {
        let next = cseq.max(self.sequence_number.saturating_add(1));
        self.sequence_number = next;
        next
    }

    /// Record an expiry chosen by the caller; returns whether it changed
    pub(crate) fn request_expiry(&mut self, seconds: u32) -> bool {
        if self.requested_expiry == seconds {
            return false;
        }
        self.requested_expiry = seconds;
        self.expiry_pending = true;
        true
    }

    /// Expiry for the next refresh request, marking any pending change as sent
    pub(crate) fn take_refresh_expiry(&mut self) -> u32 {
        self.expiry_pending = false;
        self.requested_expiry
    }

    /// Restore the configured expiry and clear the stop flag
    pub(crate) fn reset_for_start(&mut self) {
        self.requested_expiry = self.original_expiry;
        self.expiry_pending = false;
        self.is_stopping = false;
    }
}
