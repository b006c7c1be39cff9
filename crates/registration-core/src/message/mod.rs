//! REGISTER message model
//!
//! These are the shapes exchanged with the transport and message-construction
//! collaborators. Wire serialization and parsing belong to those collaborators;
//! the agent only reads and writes the fields modelled here.

pub mod uri;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{RegistrationError, RegistrationResult};

pub use uri::{Scheme, SipUri};

/// SIP request methods known to this user agent
///
/// Used to validate an overridden `Allow` list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Invite,
    Ack,
    Bye,
    Cancel,
    Options,
    Register,
    Prack,
    Subscribe,
    Notify,
    Publish,
    Info,
    Refer,
    Message,
    Update,
}

impl Method {
    /// Every method in the known set
    pub const ALL: [Method; 14] = [
        Method::Invite,
        Method::Ack,
        Method::Bye,
        Method::Cancel,
        Method::Options,
        Method::Register,
        Method::Prack,
        Method::Subscribe,
        Method::Notify,
        Method::Publish,
        Method::Info,
        Method::Refer,
        Method::Message,
        Method::Update,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Invite => "INVITE",
            Method::Ack => "ACK",
            Method::Bye => "BYE",
            Method::Cancel => "CANCEL",
            Method::Options => "OPTIONS",
            Method::Register => "REGISTER",
            Method::Prack => "PRACK",
            Method::Subscribe => "SUBSCRIBE",
            Method::Notify => "NOTIFY",
            Method::Publish => "PUBLISH",
            Method::Info => "INFO",
            Method::Refer => "REFER",
            Method::Message => "MESSAGE",
            Method::Update => "UPDATE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = RegistrationError;

    fn from_str(s: &str) -> RegistrationResult<Self> {
        let s = s.trim();
        Method::ALL
            .iter()
            .copied()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| RegistrationError::unsupported_method(s))
    }
}

/// SIP response status code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StatusCode(pub u16);

impl StatusCode {
    pub const OK: StatusCode = StatusCode(200);
    pub const UNAUTHORIZED: StatusCode = StatusCode(401);
    pub const PAYMENT_REQUIRED: StatusCode = StatusCode(402);
    pub const FORBIDDEN: StatusCode = StatusCode(403);
    pub const NOT_FOUND: StatusCode = StatusCode(404);
    pub const PROXY_AUTHENTICATION_REQUIRED: StatusCode = StatusCode(407);
    pub const REQUEST_TIMEOUT: StatusCode = StatusCode(408);
    pub const INTERVAL_TOO_BRIEF: StatusCode = StatusCode(423);
    pub const SERVER_INTERNAL_ERROR: StatusCode = StatusCode(500);
    pub const SERVICE_UNAVAILABLE: StatusCode = StatusCode(503);

    pub fn as_u16(&self) -> u16 {
        self.0
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.0)
    }

    /// 401 or 407
    pub fn is_auth_challenge(&self) -> bool {
        *self == Self::UNAUTHORIZED || *self == Self::PROXY_AUTHENTICATION_REQUIRED
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A generic `Name: value` header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.value)
    }
}

impl FromStr for Header {
    type Err = RegistrationError;

    fn from_str(s: &str) -> RegistrationResult<Self> {
        let (name, value) = s
            .split_once(':')
            .ok_or_else(|| RegistrationError::config(format!("custom header '{}' has no ':'", s)))?;
        let name = name.trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(RegistrationError::config(format!("invalid custom header name in '{}'", s)));
        }
        Ok(Header::new(name, value.trim()))
    }
}

/// `name-addr` as used in To and From
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameAddr {
    pub display_name: Option<String>,
    pub uri: SipUri,
    pub tag: Option<String>,
}

impl NameAddr {
    pub fn new(uri: SipUri) -> Self {
        Self {
            display_name: None,
            uri,
            tag: None,
        }
    }
}

impl fmt::Display for NameAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.display_name {
            write!(f, "\"{}\" ", name)?;
        }
        write!(f, "<{}>", self.uri)?;
        if let Some(tag) = &self.tag {
            write!(f, ";tag={}", tag)?;
        }
        Ok(())
    }
}

/// One Contact header entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub uri: SipUri,
    pub expires: Option<u32>,
}

impl Contact {
    pub fn new(uri: SipUri) -> Self {
        Self { uri, expires: None }
    }

    pub fn with_expires(mut self, expires: u32) -> Self {
        self.expires = Some(expires);
        self
    }
}

impl fmt::Display for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.uri)?;
        if let Some(expires) = self.expires {
            write!(f, ";expires={}", expires)?;
        }
        Ok(())
    }
}

/// Which header carried an authentication challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeKind {
    /// `WWW-Authenticate` from a registrar (401)
    Www,
    /// `Proxy-Authenticate` from a proxy (407)
    Proxy,
}

impl ChallengeKind {
    /// Header that answers this kind of challenge
    pub fn credentials_header(&self) -> &'static str {
        match self {
            ChallengeKind::Www => "Authorization",
            ChallengeKind::Proxy => "Proxy-Authorization",
        }
    }
}

/// An outbound REGISTER request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterRequest {
    /// Request-URI
    pub uri: SipUri,
    pub from: NameAddr,
    pub to: NameAddr,
    pub call_id: String,
    pub cseq: u32,
    pub contacts: Vec<Contact>,
    /// Value of the `Expires` header
    pub expires: u32,
    pub user_agent: Option<String>,
    pub allow: Option<Vec<Method>>,
    /// `Authorization` or `Proxy-Authorization` once a challenge was answered
    pub credentials: Option<Header>,
    /// Extra headers appended verbatim
    pub headers: Vec<Header>,
}

impl RegisterRequest {
    /// Look up a header by name (case-insensitive) among the modelled and extra headers
    pub fn header(&self, name: &str) -> Option<String> {
        if let Some(credentials) = &self.credentials {
            if credentials.name.eq_ignore_ascii_case(name) {
                return Some(credentials.value.clone());
            }
        }
        match name.to_ascii_lowercase().as_str() {
            "expires" => Some(self.expires.to_string()),
            "call-id" => Some(self.call_id.clone()),
            "user-agent" => self.user_agent.clone(),
            "allow" => self.allow.as_ref().map(|methods| {
                methods
                    .iter()
                    .map(Method::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            }),
            _ => self
                .headers
                .iter()
                .find(|h| h.name.eq_ignore_ascii_case(name))
                .map(|h| h.value.clone()),
        }
    }
}

/// A final response to a REGISTER
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterResponse {
    pub status: StatusCode,
    pub reason: String,
    pub cseq: u32,
    pub contacts: Vec<Contact>,
    /// Top-level `Expires` header
    pub expires: Option<u32>,
    /// `Min-Expires` header, kept wide so an oversized value can be capped
    pub min_expires: Option<u64>,
    pub www_authenticate: Option<String>,
    pub proxy_authenticate: Option<String>,
}

impl RegisterResponse {
    pub fn new(status: StatusCode, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
            cseq: 0,
            contacts: Vec::new(),
            expires: None,
            min_expires: None,
            www_authenticate: None,
            proxy_authenticate: None,
        }
    }

    /// Response to `request` carrying its CSeq
    pub fn for_request(request: &RegisterRequest, status: StatusCode, reason: impl Into<String>) -> Self {
        Self {
            cseq: request.cseq,
            ..Self::new(status, reason)
        }
    }

    pub fn with_contact(mut self, contact: Contact) -> Self {
        self.contacts.push(contact);
        self
    }

    pub fn with_expires(mut self, expires: u32) -> Self {
        self.expires = Some(expires);
        self
    }

    pub fn with_min_expires(mut self, min_expires: u64) -> Self {
        self.min_expires = Some(min_expires);
        self
    }

    pub fn with_www_authenticate(mut self, challenge: impl Into<String>) -> Self {
        self.www_authenticate = Some(challenge.into());
        self
    }

    pub fn with_proxy_authenticate(mut self, challenge: impl Into<String>) -> Self {
        self.proxy_authenticate = Some(challenge.into());
        self
    }

    /// The challenge carried by this response, preferring the header that matches the status
    pub fn challenge(&self) -> Option<(ChallengeKind, &str)> {
        let www = self.www_authenticate.as_deref().map(|c| (ChallengeKind::Www, c));
        let proxy = self.proxy_authenticate.as_deref().map(|c| (ChallengeKind::Proxy, c));
        if self.status == StatusCode::PROXY_AUTHENTICATION_REQUIRED {
            proxy.or(www)
        } else {
            www.or(proxy)
        }
    }
}
