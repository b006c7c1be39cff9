//! SIP URI type and its nom parser
//!
//! Only the subset a registering user agent needs is modelled: scheme,
//! userinfo, host, port and URI parameters. URI headers (`?h=v`) are rejected.

use std::fmt;
use std::str::FromStr;

use nom::{
    IResult,
    branch::alt,
    bytes::complete::{tag_no_case, take_while1},
    character::complete::{char, digit1},
    combinator::{all_consuming, map_res, opt, recognize, value},
    multi::many0,
    sequence::{delimited, pair, preceded, terminated, tuple},
};
use serde::{Deserialize, Serialize};

use crate::error::{RegistrationError, RegistrationResult};

/// URI scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scheme {
    /// `sip:`
    Sip,
    /// `sips:`
    Sips,
}

impl Scheme {
    /// Port used when the URI does not carry one
    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Sip => 5060,
            Scheme::Sips => 5061,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Sip => write!(f, "sip"),
            Scheme::Sips => write!(f, "sips"),
        }
    }
}

/// A parsed `sip:` / `sips:` URI
///
/// # Examples
///
/// ```rust
/// use rvoip_registration_core::SipUri;
///
/// let aor: SipUri = "sip:alice@example.com".parse().unwrap();
/// assert_eq!(aor.user.as_deref(), Some("alice"));
/// assert_eq!(aor.without_user().to_string(), "sip:example.com");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SipUri {
    pub scheme: Scheme,
    pub user: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    pub params: Vec<(String, Option<String>)>,
}

impl SipUri {
    /// Create a `sip:` URI for a bare host
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            scheme: Scheme::Sip,
            user: None,
            host: host.into(),
            port: None,
            params: Vec::new(),
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: Option<String>) -> Self {
        self.params.push((name.into(), value));
        self
    }

    /// Copy of this URI with the user part removed
    ///
    /// A REGISTER targets the domain of the address of record, not the user.
    pub fn without_user(&self) -> Self {
        Self {
            user: None,
            ..self.clone()
        }
    }

    /// Port, falling back to the scheme default
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.scheme.default_port())
    }

    /// Value of a URI parameter, `Some("")` for a flag parameter
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_deref().unwrap_or(""))
    }

    /// Whether two URIs name the same contact address
    ///
    /// Parameters are ignored, host comparison is case-insensitive and a
    /// missing port equals the scheme default.
    pub fn same_address(&self, other: &SipUri) -> bool {
        self.scheme == other.scheme
            && self.user == other.user
            && self.host.eq_ignore_ascii_case(&other.host)
            && self.effective_port() == other.effective_port()
    }
}

impl fmt::Display for SipUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.scheme)?;
        if let Some(user) = &self.user {
            write!(f, "{}@", user)?;
        }
        write!(f, "{}", self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        for (name, value) in &self.params {
            match value {
                Some(value) => write!(f, ";{}={}", name, value)?,
                None => write!(f, ";{}", name)?,
            }
        }
        Ok(())
    }
}

impl FromStr for SipUri {
    type Err = RegistrationError;

    fn from_str(s: &str) -> RegistrationResult<Self> {
        let trimmed = s.trim();
        let inner = trimmed
            .strip_prefix('<')
            .and_then(|rest| rest.strip_suffix('>'))
            .unwrap_or(trimmed);

        all_consuming(sip_uri)(inner)
            .map(|(_, uri)| uri)
            .map_err(|_| RegistrationError::invalid_uri(s))
    }
}

impl TryFrom<String> for SipUri {
    type Error = RegistrationError;

    fn try_from(value: String) -> RegistrationResult<Self> {
        value.parse()
    }
}

impl From<SipUri> for String {
    fn from(uri: SipUri) -> Self {
        uri.to_string()
    }
}

fn is_user_char(c: char) -> bool {
    !matches!(c, '@' | ';' | '?' | '<' | '>') && !c.is_whitespace()
}

fn is_host_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')
}

fn is_param_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(c, '-' | '_' | '.' | '!' | '~' | '*' | '\'' | '(' | ')' | '[' | ']' | '/' | ':' | '&' | '+' | '$' | '%')
}

fn scheme(input: &str) -> IResult<&str, Scheme> {
    alt((
        value(Scheme::Sips, tag_no_case("sips:")),
        value(Scheme::Sip, tag_no_case("sip:")),
    ))(input)
}

// userinfo = user [ ":" password ] "@"
fn userinfo(input: &str) -> IResult<&str, &str> {
    terminated(take_while1(is_user_char), char('@'))(input)
}

// host = hostname / IPv4address / IPv6reference
fn host(input: &str) -> IResult<&str, &str> {
    alt((
        recognize(delimited(
            char('['),
            take_while1(|c: char| c.is_ascii_hexdigit() || c == ':' || c == '.'),
            char(']'),
        )),
        take_while1(is_host_char),
    ))(input)
}

fn port(input: &str) -> IResult<&str, u16> {
    preceded(char(':'), map_res(digit1, |digits: &str| digits.parse::<u16>()))(input)
}

fn uri_param(input: &str) -> IResult<&str, (String, Option<String>)> {
    let (rest, (name, value)) = preceded(
        char(';'),
        pair(
            take_while1(is_param_char),
            opt(preceded(char('='), take_while1(is_param_char))),
        ),
    )(input)?;
    Ok((rest, (name.to_string(), value.map(str::to_string))))
}

fn sip_uri(input: &str) -> IResult<&str, SipUri> {
    let (rest, (scheme, user, host, port, params)) =
        tuple((scheme, opt(userinfo), host, opt(port), many0(uri_param)))(input)?;
    Ok((
        rest,
        SipUri {
            scheme,
            user: user.map(str::to_string),
            host: host.to_string(),
            port,
            params,
        },
    ))
}
