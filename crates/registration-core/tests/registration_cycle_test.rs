//! Response handling within a registration cycle: challenges, interval
//! renegotiation, failure classification and timeouts

mod common;

use std::time::Duration;

use pretty_assertions::assert_eq;
use rvoip_registration_core::{RegistrationEvent, RegistrationState, StatusCode, TransportError};
use tokio::time::Instant;

use common::*;

#[tokio::test(start_paused = true)]
async fn test_digest_challenge_is_answered_with_next_cseq() {
    init_tracing();
    let transport = MockTransport::new();
    transport.script([unauthorized("n1", false)]);
    let agent = agent(config_with_credentials(), &transport);
    let mut events = agent.subscribe();

    agent.start().unwrap();
    assert!(matches!(next_event(&mut events).await, RegistrationEvent::Succeeded { .. }));

    let sent = transport.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent[0].credentials.is_none());

    let credentials = sent[1].credentials.as_ref().unwrap();
    assert_eq!(credentials.name, "Authorization");
    assert!(credentials.value.starts_with("Digest username=\"alice\""));
    assert!(credentials.value.contains("nonce=\"n1\""));
    assert!(credentials.value.contains("qop=auth"));

    assert_eq!(sent[1].cseq, sent[0].cseq + 1);
    assert_eq!(sent[1].call_id, sent[0].call_id);
    assert_eq!(agent.sequence_number(), sent[1].cseq);
    assert_eq!(agent.attempts_this_cycle(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_proxy_challenge_uses_proxy_authorization() {
    let transport = MockTransport::new();
    transport.script([proxy_challenge("p1")]);
    let agent = agent(config_with_credentials(), &transport);
    let mut events = agent.subscribe();

    agent.start().unwrap();
    assert!(matches!(next_event(&mut events).await, RegistrationEvent::Succeeded { .. }));

    let sent = transport.sent();
    let credentials = sent[1].credentials.as_ref().unwrap();
    assert_eq!(credentials.name, "Proxy-Authorization");
    assert!(credentials.value.contains("realm=\"proxy.example.com\""));
}

#[tokio::test(start_paused = true)]
async fn test_stale_nonces_stop_at_attempt_cap() {
    let transport = MockTransport::with_fallback(unauthorized("stale", true));
    let agent = agent(config_with_credentials().with_max_attempts(3), &transport);
    let mut events = agent.subscribe();

    agent.start().unwrap();
    let event = next_event(&mut events).await;

    match &event {
        RegistrationEvent::TemporaryFailure { reason, response, .. } => {
            assert!(reason.contains("3 register attempts"), "unexpected reason: {}", reason);
            assert_eq!(response.as_ref().map(|r| r.status), Some(StatusCode::UNAUTHORIZED));
        }
        other => panic!("expected temporary failure, got {:?}", other),
    }

    let cseqs: Vec<u32> = transport.sent().iter().map(|r| r.cseq).collect();
    assert_eq!(cseqs, vec![1, 2, 3]);
    assert!(!agent.is_registered());
    assert!(!agent.is_stopping());
}

#[tokio::test(start_paused = true)]
async fn test_rejected_credentials_are_permanent() {
    let transport = MockTransport::new();
    transport.script([unauthorized("n1", false), unauthorized("n2", false)]);
    let agent = agent(config_with_credentials(), &transport);
    let mut events = agent.subscribe();

    agent.start().unwrap();
    let event = next_event(&mut events).await;
    assert!(matches!(event, RegistrationEvent::Failed { .. }));
    assert!(event.reason().unwrap().contains("credentials rejected"));
    assert!(agent.is_stopping());
    assert_eq!(agent.state(), RegistrationState::PermanentlyFailed);

    settle(1).await;
    assert!(!agent.is_running());

    settle(7200).await;
    assert_eq!(transport.sent_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_challenge_without_credentials_is_permanent() {
    let transport = MockTransport::new();
    transport.script([unauthorized("n1", false)]);
    let agent = agent(config(), &transport);
    let mut events = agent.subscribe();

    agent.start().unwrap();
    let event = next_event(&mut events).await;
    assert!(matches!(event, RegistrationEvent::Failed { .. }));
    assert!(event.reason().unwrap().contains("no credentials configured"));
    assert_eq!(transport.sent_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_challenge_status_without_header_is_temporary() {
    let transport = MockTransport::new();
    transport.script([status(401, "Unauthorized")]);
    let agent = agent(config_with_credentials(), &transport);
    let mut events = agent.subscribe();

    agent.start().unwrap();
    let event = next_event(&mut events).await;
    assert!(matches!(event, RegistrationEvent::TemporaryFailure { .. }));
    assert!(event.reason().unwrap().contains("sent no challenge"));
    assert!(agent.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_interval_too_brief_adopts_min_expires() {
    let transport = MockTransport::new();
    transport.script([interval_too_brief(Some(1800))]);
    let agent = agent(config(), &transport);
    let mut events = agent.subscribe();

    agent.start().unwrap();
    assert!(matches!(next_event(&mut events).await, RegistrationEvent::Succeeded { .. }));

    let expiries: Vec<u32> = transport.sent().iter().map(|r| r.expires).collect();
    assert_eq!(expiries, vec![600, 1800]);
    assert_eq!(agent.requested_expiry(), 1800);
    assert_eq!(agent.attempts_this_cycle(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_interval_too_brief_without_minimum_doubles_to_ceiling() {
    let transport = MockTransport::new();
    transport.script([interval_too_brief(None), interval_too_brief(None)]);
    let agent = agent(config().with_expires(3600), &transport);
    let mut events = agent.subscribe();

    agent.start().unwrap();
    assert!(matches!(next_event(&mut events).await, RegistrationEvent::Succeeded { .. }));

    let expiries: Vec<u32> = transport.sent().iter().map(|r| r.expires).collect();
    assert_eq!(expiries, vec![3600, 7200, 7200]);
    assert_eq!(agent.requested_expiry(), 7200);
}

#[tokio::test(start_paused = true)]
async fn test_oversized_min_expires_is_capped() {
    let transport = MockTransport::new();
    transport.script([interval_too_brief(Some(u64::from(u32::MAX) + 10))]);
    let agent = agent(config(), &transport);
    let mut events = agent.subscribe();

    agent.start().unwrap();
    assert!(matches!(next_event(&mut events).await, RegistrationEvent::Succeeded { .. }));
    assert_eq!(transport.sent()[1].expires, 7200);
}

#[tokio::test(start_paused = true)]
async fn test_interval_too_brief_shares_attempt_cap() {
    let transport = MockTransport::with_fallback(interval_too_brief(None));
    let agent = agent(config(), &transport);
    let mut events = agent.subscribe();

    agent.start().unwrap();
    let event = next_event(&mut events).await;
    assert!(matches!(event, RegistrationEvent::TemporaryFailure { .. }));
    assert_eq!(transport.sent_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_forbidden_stops_scheduling() {
    let transport = MockTransport::with_fallback(status(403, "Forbidden"));
    let agent = agent(config(), &transport);
    let mut events = agent.subscribe();

    agent.start().unwrap();
    let event = next_event(&mut events).await;
    match &event {
        RegistrationEvent::Failed { reason, response, .. } => {
            assert_eq!(reason, "403 Forbidden");
            assert_eq!(response.as_ref().map(|r| r.status), Some(StatusCode::FORBIDDEN));
        }
        other => panic!("expected permanent failure, got {:?}", other),
    }
    assert!(agent.is_stopping());

    settle(1).await;
    assert!(!agent.is_running());

    settle(7200).await;
    assert_eq!(transport.sent_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_not_found_keeps_retrying_when_exit_disabled() {
    let transport = MockTransport::with_fallback(status(404, "Not Found"));
    let agent = agent(config().with_exit_on_unequivocal_failure(false), &transport);
    let mut events = agent.subscribe();

    agent.start().unwrap();
    assert!(matches!(next_event(&mut events).await, RegistrationEvent::Failed { .. }));
    assert!(!agent.is_stopping());

    settle(299).await;
    assert_eq!(transport.sent_count(), 1);
    settle(2).await;
    assert_eq!(transport.sent_count(), 2);
    assert!(agent.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_payment_required_is_permanent_only_after_authenticating() {
    let transport = MockTransport::new();
    transport.script([status(402, "Payment Required")]);
    let agent = agent(config_with_credentials(), &transport);
    let mut events = agent.subscribe();
    agent.start().unwrap();
    assert!(matches!(next_event(&mut events).await, RegistrationEvent::TemporaryFailure { .. }));
    agent.stop(false);

    let transport = MockTransport::new();
    transport.script([unauthorized("n1", false), status(402, "Payment Required")]);
    let agent = common::agent(config_with_credentials(), &transport);
    let mut events = agent.subscribe();
    agent.start().unwrap();
    let event = next_event(&mut events).await;
    assert!(matches!(event, RegistrationEvent::Failed { .. }));
    assert_eq!(event.reason(), Some("402 Payment Required"));
}

#[tokio::test(start_paused = true)]
async fn test_server_error_retries_after_failure_interval() {
    let transport = MockTransport::new();
    transport.script([status(503, "Service Unavailable")]);
    let agent = agent(config().with_failure_retry_interval(120), &transport);
    let mut events = agent.subscribe();

    agent.start().unwrap();
    let event = next_event(&mut events).await;
    assert_eq!(event.reason(), Some("503 Service Unavailable"));
    assert_eq!(agent.state(), RegistrationState::TemporarilyFailed);

    settle(119).await;
    assert_eq!(transport.sent_count(), 1);
    assert!(matches!(next_event(&mut events).await, RegistrationEvent::Succeeded { .. }));
    assert_eq!(transport.sent_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_silent_registrar_times_out() {
    let transport = MockTransport::new();
    transport.script([Reply::Silent]);
    let agent = agent(config(), &transport);
    let mut events = agent.subscribe();

    let started = Instant::now();
    agent.start().unwrap();
    let event = next_event(&mut events).await;
    assert!(matches!(event, RegistrationEvent::TemporaryFailure { response: None, .. }));
    assert_eq!(event.reason(), Some("no final response within 60 seconds"));
    assert_eq!(started.elapsed(), Duration::from_secs(60));

    assert!(matches!(next_event(&mut events).await, RegistrationEvent::Succeeded { .. }));
    assert_eq!(started.elapsed(), Duration::from_secs(360));
}

#[tokio::test(start_paused = true)]
async fn test_late_response_after_timeout_is_discarded() {
    let transport = MockTransport::with_fallback(status(503, "Service Unavailable"));
    transport.script([delayed(Duration::from_secs(90), ok())]);
    let agent = agent(config(), &transport);
    let mut events = agent.subscribe();

    agent.start().unwrap();
    assert!(matches!(next_event(&mut events).await, RegistrationEvent::TemporaryFailure { .. }));

    settle(60).await;
    assert!(!agent.is_registered());
    assert_eq!(agent.state(), RegistrationState::TemporarilyFailed);
    assert!(events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_transport_failure_is_temporary() {
    let transport = MockTransport::new();
    transport.script([Reply::Fail(TransportError::io("connection refused"))]);
    let agent = agent(config(), &transport);
    let mut events = agent.subscribe();

    agent.start().unwrap();
    let event = next_event(&mut events).await;
    assert!(matches!(event, RegistrationEvent::TemporaryFailure { .. }));
    assert!(event.reason().unwrap().contains("connection refused"));

    assert!(matches!(next_event(&mut events).await, RegistrationEvent::Succeeded { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_unresolved_registrar_fails_without_stopping() {
    let transport = MockTransport::new();
    transport.set_resolves(false);
    let agent = agent(config(), &transport);
    let mut events = agent.subscribe();

    agent.start().unwrap();
    let event = next_event(&mut events).await;
    assert!(matches!(event, RegistrationEvent::Failed { response: None, .. }));
    assert!(event.reason().unwrap().contains("registrar.example.com"));
    assert_eq!(transport.sent_count(), 0);
    assert!(!agent.is_stopping());
    assert_eq!(agent.sequence_number(), 0);

    transport.set_resolves(true);
    assert!(matches!(next_event(&mut events).await, RegistrationEvent::Succeeded { .. }));
    assert!(agent.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_outbound_proxy_bypasses_resolution() {
    let transport = MockTransport::new();
    let proxy = "198.51.100.7:5070".parse().unwrap();
    let agent = agent(config().with_outbound_proxy(proxy), &transport);
    let mut events = agent.subscribe();

    agent.start().unwrap();
    assert!(matches!(next_event(&mut events).await, RegistrationEvent::Succeeded { .. }));
    assert_eq!(transport.destinations(), vec![proxy]);
    assert!(transport.resolved_hosts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_sequence_numbers_increase_across_cycles() {
    let transport = MockTransport::new();
    transport.script([unauthorized("n1", false), ok(), unauthorized("n2", false)]);
    let agent = agent(config_with_credentials(), &transport);
    let mut events = agent.subscribe();

    agent.start().unwrap();
    assert!(matches!(next_event(&mut events).await, RegistrationEvent::Succeeded { .. }));
    assert!(matches!(next_event(&mut events).await, RegistrationEvent::Succeeded { .. }));

    let sent = transport.sent();
    let cseqs: Vec<u32> = sent.iter().map(|r| r.cseq).collect();
    assert_eq!(cseqs, vec![1, 2, 3, 4]);
    assert!(sent.iter().all(|r| r.call_id == agent.call_id()));
    assert!(sent[2].credentials.is_none());
    assert!(sent[3].credentials.as_ref().unwrap().value.contains("nonce=\"n2\""));
}
