//! Shared helpers for registration agent integration tests
//!
//! [`MockTransport`] answers each transmitted REGISTER from a queue of
//! scripted replies and records what was sent and where.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use rvoip_registration_core::{
    Contact, RegisterRequest, RegisterResponse, RegistrarTransport, RegistrationAgent,
    RegistrationAgentBuilder, RegistrationConfig, RegistrationEvent, StatusCode, TransactionCallbacks,
    TransportError,
};

pub const REGISTRAR_ADDR: &str = "192.0.2.10:5060";

pub type Responder = Arc<dyn Fn(&RegisterRequest) -> RegisterResponse + Send + Sync>;

/// What the mock does with one transmitted request
#[derive(Clone)]
pub enum Reply {
    /// Answer immediately
    Respond(Responder),
    /// Report a transaction failure immediately
    Fail(TransportError),
    /// Never answer
    Silent,
    /// Answer after the given delay
    Delayed(Duration, Responder),
}

pub fn ok() -> Reply {
    Reply::Respond(Arc::new(|request: &RegisterRequest| {
        RegisterResponse::for_request(request, StatusCode::OK, "OK").with_expires(request.expires)
    }))
}

/// 200 OK granting `expires` on the sent contact
pub fn ok_granting(expires: u32) -> Reply {
    Reply::Respond(Arc::new(move |request: &RegisterRequest| {
        let contact = Contact::new(request.contacts[0].uri.clone()).with_expires(expires);
        RegisterResponse::for_request(request, StatusCode::OK, "OK").with_contact(contact)
    }))
}

pub fn status(code: u16, reason: &'static str) -> Reply {
    Reply::Respond(Arc::new(move |request: &RegisterRequest| {
        RegisterResponse::for_request(request, StatusCode(code), reason)
    }))
}

pub fn unauthorized(nonce: &'static str, stale: bool) -> Reply {
    Reply::Respond(Arc::new(move |request: &RegisterRequest| {
        let mut challenge = format!(
            "Digest realm=\"example.com\", nonce=\"{}\", qop=\"auth\", algorithm=MD5",
            nonce
        );
        if stale {
            challenge.push_str(", stale=true");
        }
        RegisterResponse::for_request(request, StatusCode::UNAUTHORIZED, "Unauthorized")
            .with_www_authenticate(challenge)
    }))
}

pub fn proxy_challenge(nonce: &'static str) -> Reply {
    Reply::Respond(Arc::new(move |request: &RegisterRequest| {
        RegisterResponse::for_request(
            request,
            StatusCode::PROXY_AUTHENTICATION_REQUIRED,
            "Proxy Authentication Required",
        )
        .with_proxy_authenticate(format!("Digest realm=\"proxy.example.com\", nonce=\"{}\"", nonce))
    }))
}

pub fn interval_too_brief(min_expires: Option<u64>) -> Reply {
    Reply::Respond(Arc::new(move |request: &RegisterRequest| {
        let response = RegisterResponse::for_request(request, StatusCode::INTERVAL_TOO_BRIEF, "Interval Too Brief");
        match min_expires {
            Some(min) => response.with_min_expires(min),
            None => response,
        }
    }))
}

pub fn delayed(delay: Duration, reply: Reply) -> Reply {
    match reply {
        Reply::Respond(responder) => Reply::Delayed(delay, responder),
        other => other,
    }
}

/// Scripted registrar transport
pub struct MockTransport {
    script: Mutex<VecDeque<Reply>>,
    fallback: Mutex<Reply>,
    resolves: Mutex<bool>,
    sent: Mutex<Vec<(RegisterRequest, SocketAddr)>>,
    resolved_hosts: Mutex<Vec<String>>,
    held: Mutex<Vec<Arc<dyn TransactionCallbacks>>>,
}

impl MockTransport {
    /// A transport that answers everything with 200 OK
    pub fn new() -> Arc<Self> {
        Self::with_fallback(ok())
    }

    /// A transport that answers with `fallback` once the script runs out
    pub fn with_fallback(fallback: Reply) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            resolves: Mutex::new(true),
            sent: Mutex::new(Vec::new()),
            resolved_hosts: Mutex::new(Vec::new()),
            held: Mutex::new(Vec::new()),
        })
    }

    pub fn script(&self, replies: impl IntoIterator<Item = Reply>) {
        self.script.lock().extend(replies);
    }

    pub fn set_fallback(&self, reply: Reply) {
        *self.fallback.lock() = reply;
    }

    pub fn set_resolves(&self, resolves: bool) {
        *self.resolves.lock() = resolves;
    }

    pub fn sent(&self) -> Vec<RegisterRequest> {
        self.sent.lock().iter().map(|(request, _)| request.clone()).collect()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn destinations(&self) -> Vec<SocketAddr> {
        self.sent.lock().iter().map(|(_, destination)| *destination).collect()
    }

    pub fn resolved_hosts(&self) -> Vec<String> {
        self.resolved_hosts.lock().clone()
    }

    fn next_reply(&self) -> Reply {
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.lock().clone())
    }
}

#[async_trait]
impl RegistrarTransport for MockTransport {
    async fn resolve(&self, host: &str) -> Option<SocketAddr> {
        self.resolved_hosts.lock().push(host.to_string());
        if *self.resolves.lock() {
            Some(REGISTRAR_ADDR.parse().unwrap())
        } else {
            None
        }
    }

    fn send_request(
        &self,
        request: RegisterRequest,
        destination: SocketAddr,
        callbacks: Arc<dyn TransactionCallbacks>,
    ) {
        self.sent.lock().push((request.clone(), destination));

        match self.next_reply() {
            Reply::Respond(responder) => callbacks.on_final_response(responder(&request)),
            Reply::Fail(error) => callbacks.on_transaction_failure(error),
            Reply::Silent => self.held.lock().push(callbacks),
            Reply::Delayed(delay, responder) => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    callbacks.on_final_response(responder(&request));
                });
            }
        }
    }
}

pub fn config() -> RegistrationConfig {
    RegistrationConfig::new(
        "sip:alice@example.com",
        "sip:alice@192.0.2.100:5060",
        "registrar.example.com",
    )
}

pub fn config_with_credentials() -> RegistrationConfig {
    config().with_credentials("alice", "secret123")
}

pub fn agent(config: RegistrationConfig, transport: &Arc<MockTransport>) -> RegistrationAgent {
    RegistrationAgentBuilder::new(config)
        .transport(transport.clone())
        .build()
        .unwrap()
}

/// Wait for the next event, failing the test if none arrives within a simulated day
pub async fn next_event(events: &mut broadcast::Receiver<RegistrationEvent>) -> RegistrationEvent {
    tokio::time::timeout(Duration::from_secs(24 * 3600), events.recv())
        .await
        .expect("timed out waiting for a registration event")
        .expect("event stream closed")
}

/// Let simulated time pass so spawned tasks can run
pub async fn settle(seconds: u64) {
    tokio::time::sleep(Duration::from_secs(seconds)).await;
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
