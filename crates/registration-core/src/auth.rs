//! Digest authentication for REGISTER challenges
//!
//! The agent answers a 401/407 by asking an [`Authenticator`] to duplicate the
//! challenged request with credentials attached. [`DigestAuthenticator`] is the
//! default RFC 2617 implementation (MD5 and MD5-sess, `qop=auth`).

use std::str::FromStr;

use nom::{
    IResult,
    branch::alt,
    bytes::complete::{take_while, take_while1},
    character::complete::{char, multispace0, multispace1},
    combinator::{all_consuming, map},
    multi::separated_list0,
    sequence::{delimited, pair, separated_pair, terminated, tuple},
};
use tracing::debug;

use crate::error::{RegistrationError, RegistrationResult};
use crate::message::{ChallengeKind, Header, Method, RegisterRequest};

/// Username, secret and optional realm used to answer challenges
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    /// Used when a challenge does not name a realm
    pub realm: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("realm", &self.realm)
            .finish()
    }
}

/// Duplicate-and-authenticate collaborator
///
/// Implementations return a copy of `original` carrying credentials for the
/// challenge, with a CSeq one higher than the original.
pub trait Authenticator: Send + Sync {
    fn authenticate(
        &self,
        original: &RegisterRequest,
        kind: ChallengeKind,
        challenge: &str,
        credentials: &Credentials,
    ) -> RegistrationResult<RegisterRequest>;
}

/// Digest hash algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Md5,
    Md5Sess,
}

impl FromStr for DigestAlgorithm {
    type Err = RegistrationError;

    fn from_str(s: &str) -> RegistrationResult<Self> {
        if s.eq_ignore_ascii_case("MD5") {
            Ok(DigestAlgorithm::Md5)
        } else if s.eq_ignore_ascii_case("MD5-sess") {
            Ok(DigestAlgorithm::Md5Sess)
        } else {
            Err(RegistrationError::authentication(format!(
                "unsupported digest algorithm {}",
                s
            )))
        }
    }
}

impl DigestAlgorithm {
    fn as_str(&self) -> &'static str {
        match self {
            DigestAlgorithm::Md5 => "MD5",
            DigestAlgorithm::Md5Sess => "MD5-sess",
        }
    }
}

/// A parsed `Digest` challenge from WWW-Authenticate or Proxy-Authenticate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: Option<String>,
    pub nonce: String,
    pub opaque: Option<String>,
    pub algorithm: DigestAlgorithm,
    pub qop: Vec<String>,
    /// The previous nonce expired; the credentials themselves were fine
    pub stale: bool,
}

impl DigestChallenge {
    fn offers_qop_auth(&self) -> bool {
        self.qop.iter().any(|q| q.eq_ignore_ascii_case("auth"))
    }
}

impl FromStr for DigestChallenge {
    type Err = RegistrationError;

    fn from_str(s: &str) -> RegistrationResult<Self> {
        let (_, (scheme, params)) = all_consuming(challenge)(s.trim())
            .map_err(|_| RegistrationError::authentication(format!("malformed challenge: {}", s)))?;

        if !scheme.eq_ignore_ascii_case("Digest") {
            return Err(RegistrationError::authentication(format!(
                "unsupported authentication scheme {}",
                scheme
            )));
        }

        let param = |name: &str| {
            params
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.clone())
        };

        let nonce = param("nonce")
            .ok_or_else(|| RegistrationError::authentication("challenge has no nonce"))?;
        let algorithm = match param("algorithm") {
            Some(algorithm) => algorithm.parse()?,
            None => DigestAlgorithm::Md5,
        };
        let qop = param("qop")
            .map(|qop| {
                qop.split(',')
                    .map(|q| q.trim().to_string())
                    .filter(|q| !q.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        let stale = param("stale")
            .map(|stale| stale.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Ok(DigestChallenge {
            realm: param("realm"),
            nonce,
            opaque: param("opaque"),
            algorithm,
            qop,
            stale,
        })
    }
}

/// Whether a challenge only signals an expired nonce
pub fn is_stale(challenge: &str) -> bool {
    challenge
        .parse::<DigestChallenge>()
        .map(|c| c.stale)
        .unwrap_or(false)
}

/// RFC 2617 digest authenticator
#[derive(Debug, Clone, Default)]
pub struct DigestAuthenticator;

impl DigestAuthenticator {
    pub fn new() -> Self {
        Self
    }
}

impl Authenticator for DigestAuthenticator {
    fn authenticate(
        &self,
        original: &RegisterRequest,
        kind: ChallengeKind,
        challenge: &str,
        credentials: &Credentials,
    ) -> RegistrationResult<RegisterRequest> {
        let challenge: DigestChallenge = challenge.parse()?;
        let realm = challenge
            .realm
            .clone()
            .or_else(|| credentials.realm.clone())
            .ok_or_else(|| RegistrationError::authentication("challenge has no realm and none is configured"))?;

        let uri = original.uri.to_string();
        let cnonce = format!("{:016x}", rand::random::<u64>());
        let nc = challenge.offers_qop_auth().then_some("00000001");

        let response = digest_response(&DigestInput {
            algorithm: challenge.algorithm,
            username: &credentials.username,
            realm: &realm,
            password: &credentials.password,
            method: Method::Register.as_str(),
            uri: &uri,
            nonce: &challenge.nonce,
            cnonce: &cnonce,
            nc,
        });

        let mut value = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\", algorithm={}",
            credentials.username,
            realm,
            challenge.nonce,
            uri,
            response,
            challenge.algorithm.as_str()
        );
        if let Some(nc) = nc {
            value.push_str(&format!(", qop=auth, nc={}, cnonce=\"{}\"", nc, cnonce));
        } else if challenge.algorithm == DigestAlgorithm::Md5Sess {
            value.push_str(&format!(", cnonce=\"{}\"", cnonce));
        }
        if let Some(opaque) = &challenge.opaque {
            value.push_str(&format!(", opaque=\"{}\"", opaque));
        }

        debug!(realm = %realm, username = %credentials.username, "answering {} challenge", kind.credentials_header());

        let mut request = original.clone();
        request.cseq = original.cseq.saturating_add(1);
        request.credentials = Some(Header::new(kind.credentials_header(), value));
        Ok(request)
    }
}

struct DigestInput<'a> {
    algorithm: DigestAlgorithm,
    username: &'a str,
    realm: &'a str,
    password: &'a str,
    method: &'a str,
    uri: &'a str,
    nonce: &'a str,
    cnonce: &'a str,
    /// Present when answering with `qop=auth`
    nc: Option<&'a str>,
}

fn md5_hex(data: &str) -> String {
    format!("{:x}", md5::compute(data))
}

fn digest_response(input: &DigestInput<'_>) -> String {
    let mut ha1 = md5_hex(&format!("{}:{}:{}", input.username, input.realm, input.password));
    if input.algorithm == DigestAlgorithm::Md5Sess {
        ha1 = md5_hex(&format!("{}:{}:{}", ha1, input.nonce, input.cnonce));
    }
    let ha2 = md5_hex(&format!("{}:{}", input.method, input.uri));

    match input.nc {
        Some(nc) => md5_hex(&format!(
            "{}:{}:{}:{}:auth:{}",
            ha1, input.nonce, nc, input.cnonce, ha2
        )),
        None => md5_hex(&format!("{}:{}:{}", ha1, input.nonce, ha2)),
    }
}

fn token(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '!' | '%' | '*' | '+' | '`' | '\'' | '~'))(input)
}

fn quoted(input: &str) -> IResult<&str, &str> {
    delimited(char('"'), take_while(|c: char| c != '"'), char('"'))(input)
}

fn auth_param(input: &str) -> IResult<&str, (&str, String)> {
    separated_pair(
        token,
        tuple((multispace0, char('='), multispace0)),
        map(alt((quoted, token)), str::to_string),
    )(input)
}

// challenge = auth-scheme LWS auth-param *(COMMA auth-param)
fn challenge(input: &str) -> IResult<&str, (&str, Vec<(&str, String)>)> {
    pair(
        terminated(token, multispace1),
        separated_list0(tuple((multispace0, char(','), multispace0)), auth_param),
    )(input)
}
