//! Expiry negotiation
//!
//! Pure functions deciding which `Expires` value to request and which value
//! the registrar granted. The agent keeps a single negotiated value; these
//! functions only compute its next value.

use crate::message::{RegisterRequest, RegisterResponse};

/// Seconds before expiry at which a refresh starts
pub const REGISTRATION_HEAD_TIME: u32 = 5;

/// Smallest expiry the agent will request
pub const REGISTER_MINIMUM_EXPIRY: u32 = 60;

/// Expiry used when a configured value is out of range
pub const DEFAULT_REGISTER_EXPIRY: u32 = 600;

/// Largest expiry the agent will request or accept
pub const MAX_EXPIRY: u32 = 7200;

/// Bring a requested expiry into `[REGISTER_MINIMUM_EXPIRY, MAX_EXPIRY]`
///
/// Out-of-range values are replaced by [`DEFAULT_REGISTER_EXPIRY`] rather than
/// saturated.
///
/// ```rust
/// use rvoip_registration_core::expiry::{clamp, DEFAULT_REGISTER_EXPIRY};
///
/// assert_eq!(clamp(3600), 3600);
/// assert_eq!(clamp(5), DEFAULT_REGISTER_EXPIRY);
/// assert_eq!(clamp(clamp(86_400)), clamp(86_400));
/// ```
pub fn clamp(expiry: u32) -> u32 {
    if (REGISTER_MINIMUM_EXPIRY..=MAX_EXPIRY).contains(&expiry) {
        expiry
    } else {
        DEFAULT_REGISTER_EXPIRY
    }
}

/// Expiry stated by the registrar for the binding we sent, if any
///
/// A contact entry in the response whose address matches one of the sent
/// contacts wins; otherwise the top-level `Expires` header is used.
pub fn server_expiry(sent: &RegisterRequest, response: &RegisterResponse) -> Option<u32> {
    response
        .contacts
        .iter()
        .filter(|granted| sent.contacts.iter().any(|c| c.uri.same_address(&granted.uri)))
        .find_map(|granted| granted.expires)
        .or(response.expires)
}

/// Expiry granted by a 2xx response
///
/// Falls back to `current` when the registrar did not state one. The result is
/// bounded to `[REGISTER_MINIMUM_EXPIRY, MAX_EXPIRY]`.
pub fn accepted_expiry(sent: &RegisterRequest, response: &RegisterResponse, current: u32) -> u32 {
    server_expiry(sent, response)
        .unwrap_or(current)
        .min(MAX_EXPIRY)
        .max(REGISTER_MINIMUM_EXPIRY)
}

/// Next expiry to request after a 423 Interval Too Brief
///
/// A usable `Min-Expires` above the current value is adopted (capped at
/// [`MAX_EXPIRY`]). Without one the current value doubles toward the ceiling.
pub fn backoff_after_interval_too_brief(current: u32, min_expires: Option<u64>) -> u32 {
    let min_expires = min_expires
        .map(|value| value.min(u64::from(u32::MAX)) as u32)
        .unwrap_or(0);

    if min_expires != 0 && min_expires > current {
        min_expires.min(MAX_EXPIRY)
    } else if current < MAX_EXPIRY {
        current.saturating_mul(2).min(MAX_EXPIRY)
    } else {
        current
    }
}

/// Delay before the first cycle's successor when the agent starts
pub fn initial_refresh_period(expiry: u32) -> u32 {
    expiry
        .saturating_sub(REGISTRATION_HEAD_TIME)
        .max(REGISTER_MINIMUM_EXPIRY)
}
