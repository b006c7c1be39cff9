//! REGISTER request assembly

use std::sync::Arc;

use crate::message::{Contact, NameAddr, RegisterRequest};
use crate::session::Session;

/// Hook that rewrites every request just before it is sent
///
/// Typical use is adding provider-specific headers.
pub type RequestAdjuster = Arc<dyn Fn(RegisterRequest) -> RegisterRequest + Send + Sync>;

/// Builds REGISTER requests from the session record
#[derive(Clone, Default)]
pub struct RegistrationRequestBuilder {
    adjuster: Option<RequestAdjuster>,
}

impl std::fmt::Debug for RegistrationRequestBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationRequestBuilder")
            .field("adjuster", &self.adjuster.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl RegistrationRequestBuilder {
    pub fn new(adjuster: Option<RequestAdjuster>) -> Self {
        Self { adjuster }
    }

    /// Build a fresh REGISTER for `expiry` seconds
    ///
    /// Consumes one value of the session's sequence counter and generates a new
    /// From tag.
    pub(crate) fn build(&self, session: &mut Session, expiry: u32) -> RegisterRequest {
        session.sequence_number = session.sequence_number.saturating_add(1);

        let mut from = NameAddr::new(session.identity.clone());
        from.display_name = session.display_name.clone();
        from.tag = Some(new_tag());

        let mut to = NameAddr::new(session.identity.clone());
        to.display_name = session.display_name.clone();

        RegisterRequest {
            uri: session.identity.without_user(),
            from,
            to,
            call_id: session.call_id.clone(),
            cseq: session.sequence_number,
            contacts: vec![Contact::new(session.contact_uri())],
            expires: expiry,
            user_agent: session.user_agent.clone(),
            allow: session.allowed_methods.clone(),
            credentials: None,
            headers: session.custom_headers.clone(),
        }
    }

    /// Run the user hook, if any
    pub fn adjust(&self, request: RegisterRequest) -> RegisterRequest {
        match &self.adjuster {
            Some(adjuster) => adjuster(request),
            None => request,
        }
    }
}

fn new_tag() -> String {
    format!("{:08x}", rand::random::<u32>())
}
