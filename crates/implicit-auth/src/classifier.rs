//! Response classification
//!
//! Decides which pending request a parsed response answers and what kind of
//! request it was. Exact token equality through `CorrelationRegistry::consume`
//! is the primary path. When the token is unknown to this registry, a loose
//! compatibility fallback guesses the kind from the execution context and
//! checks the parent context's outstanding renewal states.
//!
//! The fallback can misattribute the kind when two operations race without
//! their states truly matching. It is kept as-is for behavioral compatibility
//! with existing hosts.

use serde::Serialize;
use tracing::{debug, warn};

use crate::callbacks::TokenReply;
use crate::constants::{ACCESS_TOKEN, ERROR, ERROR_DESCRIPTION, ID_TOKEN, STATE};
use crate::parser::{Parameters, is_auth_response};
use crate::registry::{ConsumeResult, CorrelationRegistry, RequestKind};
use crate::token::CorrelationToken;

/// Execution-context probe used by the fallback path only.
pub trait FrameProbe {
    /// Whether classification runs in the top-level browsing context.
    fn is_top_level(&self) -> bool;

    /// Renewal states outstanding in the context that issued the requests.
    fn outstanding_renewal_states(&self) -> Vec<CorrelationToken> {
        Vec::new()
    }
}

/// The outermost page.
#[derive(Debug, Clone, Default)]
pub struct TopLevelFrame {
    known_states: Vec<CorrelationToken>,
}

impl TopLevelFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Top-level page that can see states issued elsewhere (e.g. a popup's opener).
    pub fn with_states(known_states: Vec<CorrelationToken>) -> Self {
        Self { known_states }
    }
}

impl FrameProbe for TopLevelFrame {
    fn is_top_level(&self) -> bool {
        true
    }

    fn outstanding_renewal_states(&self) -> Vec<CorrelationToken> {
        self.known_states.clone()
    }
}

/// A nested frame, typically a hidden renewal iframe.
#[derive(Debug, Clone, Default)]
pub struct NestedFrame {
    parent_states: Vec<CorrelationToken>,
}

impl NestedFrame {
    pub fn new(parent_states: Vec<CorrelationToken>) -> Self {
        Self { parent_states }
    }
}

impl FrameProbe for NestedFrame {
    fn is_top_level(&self) -> bool {
        false
    }

    fn outstanding_renewal_states(&self) -> Vec<CorrelationToken> {
        self.parent_states.clone()
    }
}

/// Classified response. Built once per incoming fragment, read-only afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseEnvelope {
    #[serde(skip)]
    parameters: Parameters,
    is_auth_response: bool,
    correlation_token: Option<CorrelationToken>,
    matched_token: bool,
    request_kind: RequestKind,
    resource: Option<String>,
    error_code: Option<String>,
    error_description: Option<String>,
}

impl ResponseEnvelope {
    fn not_auth(parameters: Parameters) -> Self {
        Self {
            parameters,
            is_auth_response: false,
            correlation_token: None,
            matched_token: false,
            request_kind: RequestKind::Unknown,
            resource: None,
            error_code: None,
            error_description: None,
        }
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    pub fn is_auth_response(&self) -> bool {
        self.is_auth_response
    }

    pub fn correlation_token(&self) -> Option<&CorrelationToken> {
        self.correlation_token.as_ref()
    }

    pub fn matched_token(&self) -> bool {
        self.matched_token
    }

    pub fn request_kind(&self) -> RequestKind {
        self.request_kind
    }

    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    pub fn error_code(&self) -> Option<&str> {
        self.error_code.as_deref()
    }

    pub fn error_description(&self) -> Option<&str> {
        self.error_description.as_deref()
    }

    /// Auth-shaped but carrying no `state` to attribute it by.
    pub fn is_unattributable(&self) -> bool {
        self.is_auth_response && self.correlation_token.is_none()
    }

    pub fn access_token(&self) -> Option<&str> {
        self.parameter(ACCESS_TOKEN)
    }

    pub fn id_token(&self) -> Option<&str> {
        self.parameter(ID_TOKEN)
    }

    /// Reply handed to the waiter of the matched request.
    ///
    /// Renewals prefer the access token and fall back to the identity token
    /// (identity renewals only carry the latter); logins get the identity token.
    pub fn token_reply(&self) -> TokenReply {
        let token = match self.request_kind {
            RequestKind::Login => self.id_token(),
            _ => self.access_token().or_else(|| self.id_token()),
        };
        TokenReply {
            token: token.map(str::to_string),
            error: self.error_code.clone(),
            error_description: self.error_description.clone(),
        }
    }
}

/// Match a parsed response to a pending request and assign its kind.
pub fn classify(
    parameters: Parameters,
    registry: &mut CorrelationRegistry,
    frame: &dyn FrameProbe,
) -> ResponseEnvelope {
    if !is_auth_response(&parameters) {
        return ResponseEnvelope::not_auth(parameters);
    }

    let error_code = parameters.get(ERROR).cloned();
    let error_description = parameters.get(ERROR_DESCRIPTION).cloned();

    let Some(state) = parameters.get(STATE).cloned() else {
        warn!("auth response without state, cannot attribute it");
        return ResponseEnvelope {
            is_auth_response: true,
            error_code,
            error_description,
            ..ResponseEnvelope::not_auth(parameters)
        };
    };
    let token = CorrelationToken::from_value(state);

    let (request_kind, matched_token, resource) = match registry.consume(token.as_str()) {
        ConsumeResult::LoginMatch => (RequestKind::Login, true, None),
        ConsumeResult::RenewalMatch(resource) => (RequestKind::RenewToken, true, Some(resource)),
        ConsumeResult::NoMatch => {
            let kind = if frame.is_top_level() {
                registry.last_request_kind().unwrap_or(RequestKind::Unknown)
            } else {
                RequestKind::RenewToken
            };
            let matched = frame
                .outstanding_renewal_states()
                .iter()
                .any(|outstanding| *outstanding == token);
            debug!(
                state = token.short(),
                kind = kind.label(),
                matched,
                "state unknown to registry, using context fallback"
            );
            (kind, matched, None)
        }
    };

    ResponseEnvelope {
        parameters,
        is_auth_response: true,
        correlation_token: Some(token),
        matched_token,
        request_kind,
        resource,
        error_code,
        error_description,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::registry::LoginMode;
    use crate::storage::MemoryStore;
    use std::sync::Arc;

    fn registry() -> CorrelationRegistry {
        CorrelationRegistry::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn login_response_matches_login() {
        let mut registry = registry();
        let (token, _) = registry.begin_login(LoginMode::Redirect).unwrap();

        let fragment = format!("#id_token=abc&state={token}");
        let envelope = classify(parse(&fragment), &mut registry, &TopLevelFrame::new());

        assert!(envelope.is_auth_response());
        assert!(envelope.matched_token());
        assert_eq!(envelope.request_kind(), RequestKind::Login);
        assert_eq!(envelope.correlation_token(), Some(&token));
        assert_eq!(envelope.token_reply().token.as_deref(), Some("abc"));
    }

    #[test]
    fn renewal_response_carries_its_resource() {
        let mut registry = registry();
        let _graph = registry.begin_renewal("graph").unwrap();
        let mail = registry.begin_renewal("mail").unwrap();

        let fragment = format!("#state={mail}&access_token=xyz");
        let envelope = classify(parse(&fragment), &mut registry, &NestedFrame::default());

        assert_eq!(envelope.request_kind(), RequestKind::RenewToken);
        assert!(envelope.matched_token());
        assert_eq!(envelope.resource(), Some("mail"));
        assert_eq!(envelope.access_token(), Some("xyz"));
        assert!(registry.renewal_in_flight("graph"));
        assert!(!registry.renewal_in_flight("mail"));
    }

    #[test]
    fn unknown_state_error_is_unmatched() {
        let mut registry = registry();
        let envelope = classify(
            parse("#error=access_denied&error_description=x&state=unknown-state"),
            &mut registry,
            &TopLevelFrame::new(),
        );

        assert!(envelope.is_auth_response());
        assert!(!envelope.matched_token());
        assert_eq!(envelope.request_kind(), RequestKind::Unknown);
        assert_eq!(envelope.error_code(), Some("access_denied"));
        assert_eq!(envelope.error_description(), Some("x"));
    }

    #[test]
    fn response_without_state_is_unattributable() {
        let mut registry = registry();
        registry.begin_login(LoginMode::Redirect).unwrap();

        let envelope = classify(parse("#access_token=tok"), &mut registry, &TopLevelFrame::new());

        assert!(envelope.is_auth_response());
        assert!(envelope.is_unattributable());
        assert!(!envelope.matched_token());
        assert_eq!(envelope.request_kind(), RequestKind::Unknown);
        assert!(registry.login_in_flight(), "nothing may be consumed");
    }

    #[test]
    fn non_auth_fragment_is_unknown() {
        let mut registry = registry();
        let envelope = classify(parse("#/dashboard"), &mut registry, &TopLevelFrame::new());
        assert!(!envelope.is_auth_response());
        assert!(!envelope.matched_token());
        assert_eq!(envelope.request_kind(), RequestKind::Unknown);

        let empty = classify(parse(""), &mut registry, &TopLevelFrame::new());
        assert!(!empty.is_auth_response());
        assert_eq!(empty.request_kind(), RequestKind::Unknown);
    }

    #[test]
    fn second_delivery_of_same_state_does_not_match() {
        let mut registry = registry();
        let token = registry.begin_renewal("graph").unwrap();
        let fragment = format!("#access_token=a&state={token}");

        let first = classify(parse(&fragment), &mut registry, &TopLevelFrame::new());
        let second = classify(parse(&fragment), &mut registry, &TopLevelFrame::new());

        assert!(first.matched_token());
        assert!(!second.matched_token());
        assert_eq!(second.resource(), None);
    }

    #[test]
    fn nested_frame_fallback_assumes_renewal() {
        let mut registry = registry();
        registry.begin_login(LoginMode::Redirect).unwrap();

        let envelope = classify(
            parse("#access_token=a&state=from-elsewhere"),
            &mut registry,
            &NestedFrame::default(),
        );
        assert_eq!(envelope.request_kind(), RequestKind::RenewToken);
        assert!(!envelope.matched_token());
    }

    #[test]
    fn top_level_fallback_uses_last_initiated_kind() {
        let mut registry = registry();
        registry.begin_renewal("graph").unwrap();

        let envelope = classify(
            parse("#id_token=a&state=from-elsewhere"),
            &mut registry,
            &TopLevelFrame::new(),
        );
        assert_eq!(envelope.request_kind(), RequestKind::RenewToken);
        assert!(!envelope.matched_token());
    }

    #[test]
    fn fallback_matches_state_outstanding_in_parent_context() {
        // The renewal was issued by the parent page; the iframe's own registry
        // has never seen its state.
        let mut parent = registry();
        let token = parent.begin_renewal("graph").unwrap();

        let mut frame_registry = registry();
        let frame = NestedFrame::new(parent.outstanding_renewal_tokens());
        let fragment = format!("#access_token=a&state={token}");
        let envelope = classify(parse(&fragment), &mut frame_registry, &frame);

        assert_eq!(envelope.request_kind(), RequestKind::RenewToken);
        assert!(envelope.matched_token());
        assert_eq!(envelope.resource(), None, "fallback cannot name the resource");
        assert!(parent.renewal_in_flight("graph"), "fallback never consumes");
    }

    #[test]
    fn token_reply_prefers_access_token_for_renewals() {
        let mut registry = registry();
        let token = registry.begin_renewal("app").unwrap();
        let fragment = format!("#id_token=idt&access_token=at&state={token}");
        let envelope = classify(parse(&fragment), &mut registry, &NestedFrame::default());
        assert_eq!(envelope.token_reply().token.as_deref(), Some("at"));

        let token = registry.begin_renewal("app").unwrap();
        let fragment = format!("#id_token=idt&state={token}");
        let envelope = classify(parse(&fragment), &mut registry, &NestedFrame::default());
        assert_eq!(envelope.token_reply().token.as_deref(), Some("idt"));
    }
}
