//! The registration agent
//!
//! [`RegistrationAgent`] keeps one account registered with its registrar. It
//! refreshes the binding ahead of expiry, answers authentication challenges,
//! renegotiates intervals the registrar finds too brief and retries failed
//! cycles on a fixed interval. Outcomes are reported through
//! [`RegistrationEventHandler`]s and the [`subscribe`](RegistrationAgent::subscribe)
//! stream; the public methods only fail for configuration problems.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rvoip_registration_core::{RegistrationAgentBuilder, RegistrationConfig, RegistrationEvent};
//! # use rvoip_registration_core::transport::RegistrarTransport;
//! # async fn example(transport: Arc<dyn RegistrarTransport>) -> Result<(), Box<dyn std::error::Error>> {
//!
//! let config = RegistrationConfig::new(
//!     "sip:alice@example.com",
//!     "sip:alice@192.168.1.100:5060",
//!     "registrar.example.com",
//! )
//! .with_credentials("alice", "secret123");
//!
//! let agent = RegistrationAgentBuilder::new(config)
//!     .transport(transport)
//!     .build()?;
//!
//! let mut events = agent.subscribe();
//! agent.start()?;
//!
//! if let Ok(RegistrationEvent::Succeeded { .. }) = events.recv().await {
//!     println!("registered for {} seconds", agent.requested_expiry());
//! }
//!
//! agent.stop(true);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::attempt::{AttemptCoordinator, CycleMode};
use crate::auth::{Authenticator, DigestAuthenticator};
use crate::config::RegistrationConfig;
use crate::error::{RegistrationError, RegistrationResult};
use crate::events::{RegistrationEvent, RegistrationEventHandler};
use crate::expiry;
use crate::message::{RegisterRequest, SipUri};
use crate::request::{RegistrationRequestBuilder, RequestAdjuster};
use crate::scheduler::{self, Firing, RefreshTimeFn, SchedulerHandle};
use crate::session::Session;
use crate::state::{CycleOutcome, RegistrationState};
use crate::transport::RegistrarTransport;

/// State shared between the agent handle, the scheduler and running cycles
pub(crate) struct AgentShared {
    pub(crate) session: Arc<Mutex<Session>>,
    pub(crate) coordinator: AttemptCoordinator,
    /// Held for the whole of a cycle
    pub(crate) cycle_guard: tokio::sync::Mutex<()>,
    pub(crate) refresh_time: Option<RefreshTimeFn>,
    pub(crate) retry_interval: Duration,
    scheduler: Mutex<Option<SchedulerHandle>>,
    /// Detached Expires: 0 cycle spawned by the last stop
    pub(crate) removal: Mutex<Option<JoinHandle<()>>>,
}

/// Builder for [`RegistrationAgent`]
pub struct RegistrationAgentBuilder {
    config: RegistrationConfig,
    transport: Option<Arc<dyn RegistrarTransport>>,
    authenticator: Option<Arc<dyn Authenticator>>,
    adjuster: Option<RequestAdjuster>,
    refresh_time: Option<RefreshTimeFn>,
}

impl RegistrationAgentBuilder {
    pub fn new(config: RegistrationConfig) -> Self {
        Self {
            config,
            transport: None,
            authenticator: None,
            adjuster: None,
            refresh_time: None,
        }
    }

    /// Transport used to resolve the registrar and send requests (required)
    pub fn transport(mut self, transport: Arc<dyn RegistrarTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replace the default digest authenticator
    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Rewrite every freshly built request before it is sent
    pub fn adjust_request<F>(mut self, adjust: F) -> Self
    where
        F: Fn(RegisterRequest) -> RegisterRequest + Send + Sync + 'static,
    {
        self.adjuster = Some(Arc::new(adjust));
        self
    }

    /// Choose the delay before each refresh from the accepted expiry
    ///
    /// Without a hook the agent refreshes `REGISTRATION_HEAD_TIME` seconds
    /// before the binding expires. Delays shorter than
    /// [`MIN_REFRESH_DELAY`](crate::MIN_REFRESH_DELAY) are raised to it.
    pub fn refresh_time<F>(mut self, refresh_time: F) -> Self
    where
        F: Fn(u32) -> u32 + Send + Sync + 'static,
    {
        self.refresh_time = Some(Arc::new(refresh_time));
        self
    }

    pub fn build(self) -> RegistrationResult<RegistrationAgent> {
        let transport = self
            .transport
            .ok_or_else(|| RegistrationError::config("a registrar transport is required"))?;
        let authenticator: Arc<dyn Authenticator> = match self.authenticator {
            Some(authenticator) => authenticator,
            None => Arc::new(DigestAuthenticator::new()),
        };

        let session = Arc::new(Mutex::new(Session::new(&self.config)?));
        let coordinator = AttemptCoordinator::new(
            &self.config,
            session.clone(),
            transport,
            authenticator,
            RegistrationRequestBuilder::new(self.adjuster),
        );

        Ok(RegistrationAgent {
            inner: Arc::new(AgentShared {
                session,
                coordinator,
                cycle_guard: tokio::sync::Mutex::new(()),
                refresh_time: self.refresh_time,
                retry_interval: Duration::from_secs(u64::from(self.config.register_failure_retry_interval)),
                scheduler: Mutex::new(None),
                removal: Mutex::new(None),
            }),
        })
    }
}

/// Keeps one account registered
///
/// Cloning is cheap; clones control the same registration.
#[derive(Clone)]
pub struct RegistrationAgent {
    inner: Arc<AgentShared>,
}

impl std::fmt::Debug for RegistrationAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let session = self.inner.session.lock();
        f.debug_struct("RegistrationAgent")
            .field("identity", &session.identity)
            .field("state", &session.state)
            .field("requested_expiry", &session.requested_expiry)
            .field("sequence_number", &session.sequence_number)
            .finish()
    }
}

impl RegistrationAgent {
    /// Start refreshing the registration
    ///
    /// The first cycle starts immediately, after any removal left by a
    /// previous [`stop`](Self::stop) has finished. Must be called from within a Tokio
    /// runtime. Fails with [`RegistrationError::AlreadyRunning`] until the
    /// agent has been stopped.
    pub fn start(&self) -> RegistrationResult<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| RegistrationError::internal("start must be called from within a Tokio runtime"))?;

        let mut slot = self.inner.scheduler.lock();
        if slot.as_ref().is_some_and(SchedulerHandle::is_active) {
            return Err(RegistrationError::AlreadyRunning);
        }

        let (identity, requested) = {
            let mut session = self.inner.session.lock();
            session.reset_for_start();
            (session.identity.clone(), session.requested_expiry)
        };
        let period = expiry::initial_refresh_period(requested);
        info!(aor = %identity, expiry = requested, "starting registration agent");

        *slot = Some(scheduler::spawn_scheduler(
            &runtime,
            self.inner.clone(),
            Duration::from_secs(u64::from(period)),
        ));
        Ok(())
    }

    /// Stop refreshing
    ///
    /// Releases any cycle that is waiting on the registrar. With
    /// `send_removal` set and a binding held, one detached Expires: 0 request
    /// is sent to release it; this call does not wait for its outcome.
    /// Calling `stop` again has no further effect.
    pub fn stop(&self, send_removal: bool) {
        let handle = self.inner.scheduler.lock().take();
        let (identity, registered) = {
            let mut session = self.inner.session.lock();
            session.is_stopping = true;
            (session.identity.clone(), session.is_registered)
        };

        let Some(handle) = handle else {
            debug!(aor = %identity, "registration agent already stopped");
            return;
        };
        handle.cancel.cancel();
        info!(aor = %identity, send_removal, registered, "stopping registration agent");

        if send_removal && registered {
            self.spawn_removal();
        }
    }

    fn spawn_removal(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no Tokio runtime available, skipping registration removal");
            return;
        };

        let shared = self.inner.clone();
        let removal = runtime.spawn(async move {
            let _guard = shared.cycle_guard.lock().await;
            let cancel = CancellationToken::new();
            let outcome = scheduler::run_guarded_cycle(&shared, CycleMode::Remove, &cancel).await;
            debug!(?outcome, "registration removal finished");
        });
        *self.inner.removal.lock() = Some(removal);
    }

    /// Request a new expiry and refresh right away
    ///
    /// Out-of-range values fall back to the default expiry. Returns the value
    /// that will be requested. The refresh only happens if the value changed
    /// and the agent is running. A cycle already in flight finishes first;
    /// the new value is kept and sent as soon as it does.
    pub fn set_expiry(&self, seconds: u32) -> u32 {
        let clamped = expiry::clamp(seconds);
        let changed = self.inner.session.lock().request_expiry(clamped);

        if changed {
            debug!(expiry = clamped, "requested expiry changed, refreshing now");
            if let Some(handle) = self.inner.scheduler.lock().as_ref().filter(|h| h.is_active()) {
                handle.timer.fire_now();
            }
        }
        clamped
    }

    /// Replace the advertised Allow list
    ///
    /// Fails with [`RegistrationError::UnsupportedMethod`] and leaves the
    /// current list in place if any method is unknown.
    pub fn set_allowed_methods<S: AsRef<str>>(&self, methods: &[S]) -> RegistrationResult<()> {
        self.inner.session.lock().set_allowed_methods(methods)
    }

    /// Run a refresh cycle now instead of waiting for the timer
    ///
    /// Returns `Ok(None)` when a cycle was already in progress.
    pub async fn refresh_now(&self) -> RegistrationResult<Option<CycleOutcome>> {
        let (timer, cancel) = {
            let slot = self.inner.scheduler.lock();
            match slot.as_ref().filter(|h| h.is_active()) {
                Some(handle) => (handle.timer.clone(), handle.cancel.clone()),
                None => return Err(RegistrationError::NotRunning),
            }
        };
        Ok(scheduler::run_refresh_cycle(&self.inner, &timer, &cancel, Firing::Refresh).await)
    }

    /// Register a handler for registration events
    pub fn add_event_handler(&self, handler: Arc<dyn RegistrationEventHandler>) {
        self.inner.coordinator.state().events().add_handler(handler);
    }

    /// Subscribe to registration events
    pub fn subscribe(&self) -> broadcast::Receiver<RegistrationEvent> {
        self.inner.coordinator.state().events().subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .scheduler
            .lock()
            .as_ref()
            .is_some_and(SchedulerHandle::is_active)
    }

    pub fn is_registered(&self) -> bool {
        self.inner.session.lock().is_registered
    }

    pub fn is_stopping(&self) -> bool {
        self.inner.session.lock().is_stopping
    }

    pub fn state(&self) -> RegistrationState {
        self.inner.session.lock().state
    }

    pub fn identity(&self) -> SipUri {
        self.inner.session.lock().identity.clone()
    }

    pub fn call_id(&self) -> String {
        self.inner.session.lock().call_id.clone()
    }

    /// Last sequence number used
    pub fn sequence_number(&self) -> u32 {
        self.inner.session.lock().sequence_number
    }

    /// Expiry currently requested or accepted, in seconds
    pub fn requested_expiry(&self) -> u32 {
        self.inner.session.lock().requested_expiry
    }

    /// Expiry restored on every start, in seconds
    pub fn original_expiry(&self) -> u32 {
        self.inner.session.lock().original_expiry
    }

    pub fn attempts_this_cycle(&self) -> u32 {
        self.inner.session.lock().attempts_this_cycle
    }

    pub fn last_attempt_at(&self) -> Option<DateTime<Utc>> {
        self.inner.session.lock().last_attempt_at
    }
}
