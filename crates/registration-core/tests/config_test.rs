use pretty_assertions::assert_eq;
use rvoip_registration_core::config::{
    DEFAULT_MAX_REGISTER_ATTEMPTS, DEFAULT_MAX_REGISTRATION_ATTEMPT_TIMEOUT, DEFAULT_REGISTER_FAILURE_RETRY_INTERVAL,
};
use rvoip_registration_core::expiry::DEFAULT_REGISTER_EXPIRY;
use rvoip_registration_core::{Header, Method, RegistrationConfig};

#[test]
fn test_partial_document_takes_defaults() {
    let config: RegistrationConfig = serde_json::from_str(
        r#"{
            "identity": "sip:alice@example.com",
            "contact": "sip:alice@192.0.2.100:5060",
            "registrar_host": "registrar.example.com"
        }"#,
    )
    .unwrap();

    assert_eq!(config.expires, DEFAULT_REGISTER_EXPIRY);
    assert_eq!(config.max_registration_attempt_timeout, DEFAULT_MAX_REGISTRATION_ATTEMPT_TIMEOUT);
    assert_eq!(config.register_failure_retry_interval, DEFAULT_REGISTER_FAILURE_RETRY_INTERVAL);
    assert_eq!(config.max_register_attempts, DEFAULT_MAX_REGISTER_ATTEMPTS);
    assert!(config.exit_on_unequivocal_failure);
    assert!(!config.send_username_in_contact_header);
    assert!(config.outbound_proxy.is_none());
    assert!(config.custom_headers.is_empty());
    assert!(config.validate().is_ok());
}

#[test]
fn test_full_document() {
    let config: RegistrationConfig = serde_json::from_str(
        r#"{
            "identity": "sip:alice@example.com",
            "contact": "sip:192.0.2.100:5060",
            "registrar_host": "registrar.example.com",
            "outbound_proxy": "198.51.100.7:5070",
            "username": "alice-auth",
            "password": "secret",
            "expires": 1800,
            "max_register_attempts": 5,
            "exit_on_unequivocal_failure": false,
            "send_username_in_contact_header": true,
            "user_agent": "rvoip/0.1",
            "custom_headers": [{ "name": "X-Tenant", "value": "blue" }],
            "allowed_methods": ["INVITE", "BYE", "MESSAGE"]
        }"#,
    )
    .unwrap();

    assert_eq!(config.expires, 1800);
    assert_eq!(config.max_register_attempts, 5);
    assert_eq!(config.outbound_proxy, Some("198.51.100.7:5070".parse().unwrap()));
    assert_eq!(config.custom_headers, vec![Header::new("X-Tenant", "blue")]);
    assert_eq!(
        config.allowed_methods,
        Some(vec![Method::Invite, Method::Bye, Method::Message])
    );
    assert!(!config.exit_on_unequivocal_failure);

    let json = serde_json::to_string(&config).unwrap();
    let again: RegistrationConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(again.identity, config.identity);
    assert_eq!(again.allowed_methods, config.allowed_methods);
}

#[test]
fn test_unknown_method_is_rejected() {
    let result = serde_json::from_str::<RegistrationConfig>(
        r#"{
            "identity": "sip:alice@example.com",
            "contact": "sip:192.0.2.100",
            "registrar_host": "example.com",
            "allowed_methods": ["FETCH"]
        }"#,
    );
    assert!(result.is_err());
}
