//! One registration cycle
//!
//! A cycle sends the REGISTER, waits for its outcome and reacts to it. It may
//! answer an authentication challenge or renegotiate a rejected interval before
//! it ends, but every request it transmits counts against the same
//! `max_register_attempts` budget.
//!
//! Transport callbacks arrive on arbitrary tasks. They are bridged into the
//! cycle through a channel owned by that cycle, and every transmitted request
//! carries a round token. The cycle only accepts the outcome whose token
//! matches the request it is currently waiting on; anything else, including
//! callbacks that arrive after the cycle ended, is dropped.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::auth::{self, Authenticator};
use crate::config::RegistrationConfig;
use crate::expiry;
use crate::message::{ChallengeKind, RegisterRequest, RegisterResponse, StatusCode};
use crate::request::RegistrationRequestBuilder;
use crate::session::Session;
use crate::state::{CycleOutcome, RegistrationStateMachine};
use crate::transport::{RegistrarTransport, TransactionCallbacks, TransportError};

/// Identifies one transmitted request and its outcome
pub(crate) type RoundToken = u64;

#[derive(Debug)]
struct RoundOutcome {
    token: RoundToken,
    result: Result<RegisterResponse, TransportError>,
}

/// Callbacks handed to the transport for a single send
struct RoundCallbacks {
    token: RoundToken,
    tx: mpsc::UnboundedSender<RoundOutcome>,
}

impl RoundCallbacks {
    fn deliver(&self, result: Result<RegisterResponse, TransportError>) {
        if self
            .tx
            .send(RoundOutcome {
                token: self.token,
                result,
            })
            .is_err()
        {
            debug!(token = self.token, "cycle already finished, dropping late transaction outcome");
        }
    }
}

impl TransactionCallbacks for RoundCallbacks {
    fn on_final_response(&self, response: RegisterResponse) {
        self.deliver(Ok(response));
    }

    fn on_transaction_failure(&self, error: TransportError) {
        self.deliver(Err(error));
    }
}

/// What a cycle registers for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CycleMode {
    /// Register or refresh with the session's requested expiry
    Refresh,
    /// Release the binding with Expires: 0
    Remove,
}

/// Result of driving the exchange, before it is applied to the state machine
#[derive(Debug)]
enum Verdict {
    Registered {
        response: RegisterResponse,
        accepted: u32,
    },
    Removed {
        response: RegisterResponse,
    },
    Temporary {
        response: Option<RegisterResponse>,
        reason: String,
    },
    Failed {
        response: Option<RegisterResponse>,
        reason: String,
        stop: bool,
    },
}

/// What to transmit next within the cycle
enum Step {
    Initial,
    Answer {
        challenged: RegisterRequest,
        kind: ChallengeKind,
        challenge: String,
        response: RegisterResponse,
    },
}

pub(crate) struct AttemptCoordinator {
    session: Arc<Mutex<Session>>,
    state: RegistrationStateMachine,
    transport: Arc<dyn RegistrarTransport>,
    authenticator: Arc<dyn Authenticator>,
    request_builder: RegistrationRequestBuilder,
    outbound_proxy: Option<SocketAddr>,
    max_attempts: u32,
    attempt_timeout: Duration,
    exit_on_unequivocal_failure: bool,
    next_token: AtomicU64,
}

impl AttemptCoordinator {
    pub(crate) fn new(
        config: &RegistrationConfig,
        session: Arc<Mutex<Session>>,
        transport: Arc<dyn RegistrarTransport>,
        authenticator: Arc<dyn Authenticator>,
        request_builder: RegistrationRequestBuilder,
    ) -> Self {
        Self {
            state: RegistrationStateMachine::new(session.clone()),
            session,
            transport,
            authenticator,
            request_builder,
            outbound_proxy: config.outbound_proxy,
            max_attempts: config.max_register_attempts,
            attempt_timeout: Duration::from_secs(u64::from(config.max_registration_attempt_timeout)),
            exit_on_unequivocal_failure: config.exit_on_unequivocal_failure,
            next_token: AtomicU64::new(1),
        }
    }

    pub(crate) fn state(&self) -> &RegistrationStateMachine {
        &self.state
    }

    /// Run one cycle to completion, timeout or cancellation
    ///
    /// The caller must hold the cycle guard. Cancellation ends the cycle
    /// without a notification.
    pub(crate) async fn run_cycle(&self, mode: CycleMode, cancel: &CancellationToken) -> CycleOutcome {
        let deadline = Instant::now() + self.attempt_timeout;

        let verdict = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("registration cycle cancelled");
                return CycleOutcome::Cancelled;
            }
            _ = sleep_until(deadline) => Verdict::Temporary {
                response: None,
                reason: format!(
                    "no final response within {} seconds",
                    self.attempt_timeout.as_secs()
                ),
            },
            verdict = self.exchange(mode) => verdict,
        };

        self.apply(verdict).await
    }

    async fn apply(&self, verdict: Verdict) -> CycleOutcome {
        match verdict {
            Verdict::Registered { response, accepted } => self.state.registered(response, accepted).await,
            Verdict::Removed { response } => self.state.removed(response).await,
            Verdict::Temporary { response, reason } => self.state.temporary_failure(response, reason).await,
            Verdict::Failed { response, reason, stop } => self.state.failed(response, reason, stop).await,
        }
    }

    /// Send requests until the registrar gives a response that ends the cycle
    async fn exchange(&self, mode: CycleMode) -> Verdict {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut step = Step::Initial;
        let mut last_response: Option<RegisterResponse> = None;

        loop {
            let attempts = self.session.lock().attempts_this_cycle;
            if attempts >= self.max_attempts {
                return Verdict::Temporary {
                    response: last_response,
                    reason: format!("gave up after {} register attempts", attempts),
                };
            }

            let Some(destination) = self.destination().await else {
                let host = self.session.lock().registrar_host.clone();
                return Verdict::Failed {
                    response: None,
                    reason: format!("could not resolve registrar {}", host),
                    stop: false,
                };
            };

            let (request, authenticated) = match step {
                Step::Initial => (self.build_request(mode), false),
                Step::Answer {
                    challenged,
                    kind,
                    challenge,
                    response,
                } => match self.answer_challenge(&challenged, kind, &challenge) {
                    Ok(request) => (request, true),
                    Err(reason) => {
                        return Verdict::Temporary {
                            response: Some(response),
                            reason,
                        };
                    }
                },
            };

            let token = self.next_token.fetch_add(1, Ordering::Relaxed);
            {
                let mut session = self.session.lock();
                session.attempts_this_cycle += 1;
            }
            debug!(
                aor = %request.to.uri,
                cseq = request.cseq,
                expiry = request.expires,
                %destination,
                authenticated,
                "sending REGISTER"
            );
            self.transport.send_request(
                request.clone(),
                destination,
                Arc::new(RoundCallbacks { token, tx: tx.clone() }),
            );

            let response = match wait_for_round(&mut rx, token).await {
                Some(Ok(response)) => response,
                Some(Err(error)) => {
                    return Verdict::Temporary {
                        response: None,
                        reason: format!("transaction failed: {}", error),
                    };
                }
                None => {
                    return Verdict::Temporary {
                        response: None,
                        reason: "transaction outcome channel closed".to_string(),
                    };
                }
            };

            debug!(
                cseq = response.cseq,
                status = response.status.as_u16(),
                reason = %response.reason,
                "REGISTER response"
            );

            last_response = Some(response.clone());
            match self.interpret(mode, request, response, authenticated) {
                Ok(next) => step = next,
                Err(verdict) => return verdict,
            }
        }
    }

    /// Apply the status-code policy to a response
    ///
    /// `Ok` carries the next request to send within this cycle, `Err` the
    /// verdict that ends it.
    fn interpret(
        &self,
        mode: CycleMode,
        sent: RegisterRequest,
        response: RegisterResponse,
        authenticated: bool,
    ) -> Result<Step, Verdict> {
        let status = response.status;
        let status_line = format!("{} {}", status, response.reason);

        if status.is_auth_challenge() {
            let Some((kind, challenge)) = response.challenge() else {
                return Err(Verdict::Temporary {
                    reason: format!("{}: server asked for authentication but sent no challenge", status_line),
                    response: Some(response),
                });
            };

            if authenticated && !auth::is_stale(challenge) {
                return Err(Verdict::Failed {
                    reason: format!("{}: credentials rejected", status_line),
                    response: Some(response),
                    stop: self.exit_on_unequivocal_failure,
                });
            }
            if self.session.lock().credentials().is_none() {
                return Err(Verdict::Failed {
                    reason: format!("{}: no credentials configured", status_line),
                    response: Some(response),
                    stop: self.exit_on_unequivocal_failure,
                });
            }

            let challenge = challenge.to_string();
            return Ok(Step::Answer {
                challenged: sent,
                kind,
                challenge,
                response,
            });
        }

        if status.is_success() {
            if sent.expires == 0 {
                return Err(Verdict::Removed { response });
            }
            let accepted = expiry::accepted_expiry(&sent, &response, sent.expires);
            return Err(Verdict::Registered { response, accepted });
        }

        let unequivocal = status == StatusCode::FORBIDDEN
            || status == StatusCode::NOT_FOUND
            || (authenticated && status == StatusCode::PAYMENT_REQUIRED);
        if unequivocal {
            return Err(Verdict::Failed {
                reason: status_line,
                response: Some(response),
                stop: self.exit_on_unequivocal_failure,
            });
        }

        if status == StatusCode::INTERVAL_TOO_BRIEF && mode == CycleMode::Refresh && sent.expires != 0 {
            let mut session = self.session.lock();
            if session.expiry_pending {
                debug!(
                    requested = session.requested_expiry,
                    "interval too brief, retrying with newly requested expiry"
                );
                return Ok(Step::Initial);
            }
            let next = expiry::backoff_after_interval_too_brief(sent.expires, response.min_expires);
            debug!(
                from = sent.expires,
                to = next,
                min_expires = ?response.min_expires,
                "interval too brief, raising requested expiry"
            );
            session.requested_expiry = next;
            return Ok(Step::Initial);
        }

        Err(Verdict::Temporary {
            reason: status_line,
            response: Some(response),
        })
    }

    fn build_request(&self, mode: CycleMode) -> RegisterRequest {
        let request = {
            let mut session = self.session.lock();
            let expiry = match mode {
                CycleMode::Refresh => session.take_refresh_expiry(),
                CycleMode::Remove => 0,
            };
            self.request_builder.build(&mut session, expiry)
        };
        self.request_builder.adjust(request)
    }

    /// Duplicate the challenged request with credentials and claim its sequence number
    fn answer_challenge(
        &self,
        challenged: &RegisterRequest,
        kind: ChallengeKind,
        challenge: &str,
    ) -> Result<RegisterRequest, String> {
        let credentials = self
            .session
            .lock()
            .credentials()
            .ok_or_else(|| "no credentials configured".to_string())?;

        let mut request = self
            .authenticator
            .authenticate(challenged, kind, challenge, &credentials)
            .map_err(|e| {
                warn!(error = %e, "could not answer authentication challenge");
                e.to_string()
            })?;

        request.cseq = self.session.lock().claim_sequence_number(request.cseq);
        Ok(request)
    }

    async fn destination(&self) -> Option<SocketAddr> {
        if let Some(proxy) = self.outbound_proxy {
            return Some(proxy);
        }
        let host = self.session.lock().registrar_host.clone();
        let resolved = self.transport.resolve(&host).await;
        if resolved.is_none() {
            warn!(host = %host, "registrar host did not resolve");
        }
        resolved
    }
}

/// Wait for the outcome tagged with `token`, dropping any other
async fn wait_for_round(
    rx: &mut mpsc::UnboundedReceiver<RoundOutcome>,
    token: RoundToken,
) -> Option<Result<RegisterResponse, TransportError>> {
    while let Some(outcome) = rx.recv().await {
        if outcome.token == token {
            return Some(outcome.result);
        }
        debug!(
            expected = token,
            received = outcome.token,
            "discarding outcome of a superseded request"
        );
    }
    None
}
