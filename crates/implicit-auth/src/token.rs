//! Correlation tokens and replay nonces
//!
//! A correlation token is the `state` value round-tripped through the
//! authorization server. A replay nonce is bound to a login and must come back
//! inside the identity token. Both are minted fresh per request attempt.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use common::Secret;
use rand::RngExt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque per-request correlation value (`state`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationToken(String);

impl CorrelationToken {
    /// Mint a fresh, globally unique token.
    pub fn mint() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap a value received in a response or read back from storage.
    pub fn from_value(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading characters only, for log fields.
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CorrelationToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Replay-protection nonce bound to a login.
///
/// Redacted in Debug output; the raw value is only exposed when it is written
/// into the authorization URL or durable storage.
#[derive(Debug, Clone)]
pub struct ReplayNonce(Secret<String>);

impl ReplayNonce {
    /// Mint a nonce from 32 random bytes, URL-safe base64 without padding.
    pub fn mint() -> Self {
        let mut bytes = [0u8; 32];
        rand::rng().fill(&mut bytes);
        Self(Secret::new(URL_SAFE_NO_PAD.encode(bytes)))
    }

    /// Rebuild a nonce read back from durable storage.
    pub fn from_stored(value: impl Into<String>) -> Self {
        Self(Secret::new(value.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.expose()
    }

    /// Whether `candidate` (e.g. the `nonce` claim of an id token) is this nonce.
    pub fn matches(&self, candidate: &str) -> bool {
        self.0.matches(&candidate.to_string())
    }
}
