//! Authorization URL construction
//!
//! The transport collaborator only needs a URL to navigate to, open in a
//! popup, or load into a hidden frame. Every URL carries the correlation token
//! as `state`; logins and identity-token renewals also carry the replay nonce.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::token::{CorrelationToken, ReplayNonce};

/// Characters left unescaped by `encodeURIComponent`.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Token type requested from the authorize endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    IdToken,
    Token,
}

impl ResponseType {
    pub fn as_str(self) -> &'static str {
        match self {
            ResponseType::IdToken => "id_token",
            ResponseType::Token => "token",
        }
    }
}

/// Percent-encode a single query or fragment component.
pub fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, COMPONENT).to_string()
}

/// Build the authorize URL shared by every request kind.
///
/// `resource` is omitted for logins, which ask for the client's own identity
/// token. A fresh `client-request-id` is attached so server-side logs can be
/// matched to the request.
pub fn authorize_url(
    config: &AuthConfig,
    response_type: ResponseType,
    resource: Option<&str>,
    state: &CorrelationToken,
) -> String {
    let mut url = format!(
        "{}{}/oauth2/authorize?response_type={}&client_id={}",
        config.instance,
        config.tenant,
        response_type.as_str(),
        encode_component(&config.client_id),
    );
    if let Some(resource) = resource {
        url.push_str("&resource=");
        url.push_str(&encode_component(resource));
    }
    url.push_str("&redirect_uri=");
    url.push_str(&encode_component(config.redirect_uri()));
    url.push_str("&state=");
    url.push_str(&encode_component(state.as_str()));
    if let Some(extra) = config.extra_query_parameter.as_deref().filter(|e| !e.is_empty()) {
        url.push('&');
        url.push_str(extra.trim_start_matches('&'));
    }
    url.push_str("&client-request-id=");
    url.push_str(&Uuid::new_v4().to_string());
    url
}

/// URL for an interactive login (redirect or popup).
pub fn login_url(config: &AuthConfig, state: &CorrelationToken, nonce: &ReplayNonce) -> String {
    let mut url = authorize_url(config, ResponseType::IdToken, None, state);
    url.push_str("&nonce=");
    url.push_str(&encode_component(nonce.expose()));
    url
}

/// Response type a renewal for `resource` asks for.
///
/// Renewing the login resource refreshes the identity token; any other
/// resource gets an access token.
pub fn renewal_response_type(config: &AuthConfig, resource: &str) -> ResponseType {
    if resource == config.login_resource() || resource == config.client_id {
        ResponseType::IdToken
    } else {
        ResponseType::Token
    }
}

/// URL for a renewal. Silent renewals add `prompt=none` so the authority never
/// shows UI inside the hidden frame.
pub fn renewal_url(
    config: &AuthConfig,
    resource: &str,
    state: &CorrelationToken,
    nonce: Option<&ReplayNonce>,
    silent: bool,
) -> String {
    let response_type = renewal_response_type(config, resource);
    let mut url = authorize_url(config, response_type, Some(resource), state);
    if silent {
        url.push_str("&prompt=none");
    }
    if let Some(nonce) = nonce {
        url.push_str("&nonce=");
        url.push_str(&encode_component(nonce.expose()));
    }
    url
}
