//! Pending completions for popup logins and silent renewals
//!
//! Each entry owns the sending half of a oneshot channel, so it reaches
//! exactly one terminal outcome:
//! - `resolve` removes it and the caller completes it with the token reply
//! - `expire` removes it and fails the waiter with `RenewalTimeout`
//! - re-registering the same token drops the old entry; its waiter sees
//!   `Abandoned`
//!
//! Entries never outlive the page; nothing here is persisted.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::token::CorrelationToken;

/// What a completed request hands back to its waiter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TokenReply {
    /// Access token, or identity token for identity renewals and logins.
    pub token: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl TokenReply {
    pub fn is_error(&self) -> bool {
        self.error.is_some() || self.error_description.is_some()
    }
}

/// Terminal outcome delivered to a waiter.
pub type RenewalOutcome = Result<TokenReply>;

/// Waiting half of a pending entry.
#[derive(Debug)]
pub struct RenewalReceiver {
    token: CorrelationToken,
    rx: oneshot::Receiver<RenewalOutcome>,
}

impl RenewalReceiver {
    pub fn token(&self) -> &CorrelationToken {
        &self.token
    }

    /// Wait for the entry's terminal outcome.
    pub async fn wait(self) -> RenewalOutcome {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::Abandoned(self.token.to_string())),
        }
    }
}

/// A registered completion awaiting its response.
#[derive(Debug)]
pub struct PendingRenewalEntry {
    token: CorrelationToken,
    resource: String,
    issued_at: Instant,
    completion: oneshot::Sender<RenewalOutcome>,
}

impl PendingRenewalEntry {
    pub fn token(&self) -> &CorrelationToken {
        &self.token
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Deliver the reply. Returns false if the waiter already went away.
    pub fn complete(self, reply: TokenReply) -> bool {
        self.completion.send(Ok(reply)).is_ok()
    }

    fn fail(self, error: Error) -> bool {
        self.completion.send(Err(error)).is_ok()
    }
}

/// Pending entries keyed by correlation token.
#[derive(Debug, Default)]
pub struct PendingCallbackTable {
    entries: HashMap<CorrelationToken, PendingRenewalEntry>,
}

impl PendingCallbackTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a completion for `token`. Last registration wins.
    pub fn register(&mut self, token: CorrelationToken, resource: &str) -> RenewalReceiver {
        let (tx, rx) = oneshot::channel();
        let entry = PendingRenewalEntry {
            token: token.clone(),
            resource: resource.to_string(),
            issued_at: Instant::now(),
            completion: tx,
        };
        if self.entries.insert(token.clone(), entry).is_some() {
            debug!(state = token.short(), resource, "pending entry replaced");
        }
        RenewalReceiver { token, rx }
    }

    /// Remove and return the entry for `token`, `None` if unknown.
    ///
    /// A response arriving after its entry was expired lands here as `None`.
    pub fn resolve(&mut self, token: &CorrelationToken) -> Option<PendingRenewalEntry> {
        let entry = self.entries.remove(token);
        if entry.is_none() {
            debug!(state = token.short(), "no pending entry for response");
        }
        entry
    }

    /// Remove the entry without delivering a reply; its waiter sees a timeout.
    pub fn expire(&mut self, token: &CorrelationToken) -> bool {
        let Some(entry) = self.entries.remove(token) else {
            return false;
        };
        warn!(
            state = token.short(),
            resource = entry.resource(),
            "pending entry expired"
        );
        entry.fail(Error::RenewalTimeout(token.to_string()));
        true
    }

    /// Expire every entry issued more than `max_age` ago.
    pub fn expire_older_than(&mut self, max_age: Duration) -> Vec<CorrelationToken> {
        let now = Instant::now();
        let stale: Vec<CorrelationToken> = self
            .entries
            .values()
            .filter(|entry| now.duration_since(entry.issued_at) >= max_age)
            .map(|entry| entry.token.clone())
            .collect();
        for token in &stale {
            self.expire(token);
        }
        stale
    }

    pub fn contains(&self, token: &CorrelationToken) -> bool {
        self.entries.contains_key(token)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
