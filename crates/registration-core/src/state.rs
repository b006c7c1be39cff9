//! Registration lifecycle state
//!
//! [`RegistrationStateMachine`] is the only place that moves the session
//! between lifecycle states. Each transition updates the session record,
//! releases the lock and then notifies subscribers, so handlers are free to
//! call back into the agent's accessors.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::events::{EventDispatcher, RegistrationEvent};
use crate::message::RegisterResponse;
use crate::session::Session;

/// Lifecycle state of the registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationState {
    /// No binding is held
    ///
    /// Initial state, and the state after the binding was removed with an
    /// Expires: 0 request.
    Unregistered,

    /// A refresh cycle is in progress
    Attempting,

    /// The registrar accepted the binding
    ///
    /// The agent refreshes it ahead of expiry.
    Registered,

    /// The last cycle failed in a way worth retrying
    ///
    /// The next cycle starts after the failure retry interval.
    TemporarilyFailed,

    /// The registrar refused the account or its credentials
    ///
    /// Refreshing stops here when the agent is configured to exit on
    /// unequivocal failures.
    PermanentlyFailed,
}

impl fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegistrationState::Unregistered => "unregistered",
            RegistrationState::Attempting => "attempting",
            RegistrationState::Registered => "registered",
            RegistrationState::TemporarilyFailed => "temporarily-failed",
            RegistrationState::PermanentlyFailed => "permanently-failed",
        };
        f.write_str(name)
    }
}

/// How a refresh cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Registered,
    Removed,
    TemporaryFailure,
    Failed,
    /// The agent was stopped while the cycle was waiting
    Cancelled,
}

pub(crate) struct RegistrationStateMachine {
    session: Arc<Mutex<Session>>,
    events: EventDispatcher,
}

impl RegistrationStateMachine {
    pub(crate) fn new(session: Arc<Mutex<Session>>) -> Self {
        Self {
            session,
            events: EventDispatcher::new(),
        }
    }

    pub(crate) fn events(&self) -> &EventDispatcher {
        &self.events
    }

    /// Enter a new cycle: reset the per-cycle counter and stamp the start time
    pub(crate) fn begin_cycle(&self) {
        let mut session = self.session.lock();
        session.attempts_this_cycle = 0;
        session.last_attempt_at = Some(Utc::now());
        session.state = RegistrationState::Attempting;
    }

    /// The registrar accepted the binding for `accepted` seconds
    pub(crate) async fn registered(&self, response: RegisterResponse, accepted: u32) -> CycleOutcome {
        let identity = {
            let mut session = self.session.lock();
            session.is_registered = true;
            if session.expiry_pending {
                debug!(
                    accepted,
                    requested = session.requested_expiry,
                    "keeping newly requested expiry over the one just accepted"
                );
            } else {
                session.requested_expiry = accepted;
            }
            session.state = RegistrationState::Registered;
            session.identity.clone()
        };

        info!(aor = %identity, expiry = accepted, "registration succeeded");
        self.events
            .dispatch(RegistrationEvent::Succeeded { identity, response })
            .await;
        CycleOutcome::Registered
    }

    /// The binding was released by an Expires: 0 request
    pub(crate) async fn removed(&self, response: RegisterResponse) -> CycleOutcome {
        let identity = {
            let mut session = self.session.lock();
            session.is_registered = false;
            session.state = RegistrationState::Unregistered;
            session.identity.clone()
        };

        info!(aor = %identity, "registration removed");
        self.events
            .dispatch(RegistrationEvent::Removed { identity, response })
            .await;
        CycleOutcome::Removed
    }

    /// The cycle failed but the next one may succeed
    pub(crate) async fn temporary_failure(
        &self,
        response: Option<RegisterResponse>,
        reason: impl Into<String>,
    ) -> CycleOutcome {
        let reason = reason.into();
        let identity = {
            let mut session = self.session.lock();
            session.is_registered = false;
            session.state = RegistrationState::TemporarilyFailed;
            session.identity.clone()
        };

        warn!(aor = %identity, reason = %reason, "registration temporarily failed");
        self.events
            .dispatch(RegistrationEvent::TemporaryFailure {
                identity,
                response,
                reason,
            })
            .await;
        CycleOutcome::TemporaryFailure
    }

    /// The registrar gave a definitive refusal
    ///
    /// With `stop` set the session is marked stopping and no further cycles
    /// are scheduled.
    pub(crate) async fn failed(
        &self,
        response: Option<RegisterResponse>,
        reason: impl Into<String>,
        stop: bool,
    ) -> CycleOutcome {
        let reason = reason.into();
        let identity = {
            let mut session = self.session.lock();
            session.is_registered = false;
            session.state = RegistrationState::PermanentlyFailed;
            if stop {
                session.is_stopping = true;
            }
            session.identity.clone()
        };

        warn!(aor = %identity, reason = %reason, stop, "registration failed");
        self.events
            .dispatch(RegistrationEvent::Failed {
                identity,
                response,
                reason,
            })
            .await;
        CycleOutcome::Failed
    }
}
