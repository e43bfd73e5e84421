//! Correlation token issuance and spend-once consumption
//!
//! The registry is the only place in-flight state changes. It holds at most
//! one active login and any number of renewals (one per resource), and
//! `consume` is the single point where a response claims a token.
//!
//! Lifecycle of a token:
//! 1. `begin_login` / `begin_renewal` mints it and marks the request in flight
//! 2. the transport carries it to the authority as `state`
//! 3. `consume` matches the returned `state`, removes the token and clears the
//!    in-flight flag
//! 4. a second `consume` of the same token is `NoMatch`
//!
//! Redirect logins and redirect token acquisitions also persist their token
//! to the durable store, because the page that consumes it is a fresh load
//! with an empty registry.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::constants::storage;
use crate::error::{Error, Result};
use crate::metrics;
use crate::storage::DurableStore;
use crate::token::{CorrelationToken, ReplayNonce};

/// Kind of request a response answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Login,
    RenewToken,
    Unknown,
}

impl RequestKind {
    pub fn label(self) -> &'static str {
        match self {
            RequestKind::Login => "login",
            RequestKind::RenewToken => "renew_token",
            RequestKind::Unknown => "unknown",
        }
    }
}

/// How a login reaches the authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginMode {
    /// Full-page navigation; the token must survive the reload.
    Redirect,
    /// Popup window; this page stays alive and keeps the token in memory.
    Popup,
}

/// Outcome of consuming a response's `state`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeResult {
    LoginMatch,
    RenewalMatch(String),
    NoMatch,
}

#[derive(Debug)]
struct ActiveLogin {
    token: CorrelationToken,
    nonce: ReplayNonce,
    mode: LoginMode,
}

/// Outstanding correlation tokens of one authentication context.
pub struct CorrelationRegistry {
    store: Arc<dyn DurableStore>,
    active_login: Option<ActiveLogin>,
    /// token -> resource
    renewals: HashMap<CorrelationToken, String>,
    renewals_in_flight: HashSet<String>,
    last_request: Option<RequestKind>,
}

impl CorrelationRegistry {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self {
            store,
            active_login: None,
            renewals: HashMap::new(),
            renewals_in_flight: HashSet::new(),
            last_request: None,
        }
    }

    /// Start a login: mint its token and nonce and persist them.
    ///
    /// Fails with `AlreadyInProgress` without touching any state if a login is
    /// outstanding. A popup login persists an empty login state so a redirect
    /// page reading storage can never claim the popup's response.
    pub fn begin_login(&mut self, mode: LoginMode) -> Result<(CorrelationToken, ReplayNonce)> {
        if let Some(active) = &self.active_login {
            warn!(state = active.token.short(), "login already in progress");
            return Err(Error::AlreadyInProgress);
        }

        let token = CorrelationToken::mint();
        let nonce = ReplayNonce::mint();

        let persisted_state = match mode {
            LoginMode::Redirect => token.as_str(),
            LoginMode::Popup => "",
        };
        self.store.set(storage::STATE_LOGIN, persisted_state, true)?;
        self.store.set(storage::NONCE_IDTOKEN, nonce.expose(), true)?;
        self.store.set(storage::LOGIN_ERROR, "", false)?;
        self.store.set(storage::ERROR, "", false)?;
        self.store.set(storage::ERROR_DESCRIPTION, "", false)?;

        info!(state = token.short(), ?mode, "login started");
        metrics::record_request_started(RequestKind::Login);

        self.active_login = Some(ActiveLogin {
            token: token.clone(),
            nonce: nonce.clone(),
            mode,
        });
        self.last_request = Some(RequestKind::Login);
        Ok((token, nonce))
    }

    /// Start a silent renewal for `resource`.
    ///
    /// Renewals for different resources run concurrently; a second renewal for
    /// a resource that already has one outstanding fails with
    /// `RenewalAlreadyInProgress`.
    pub fn begin_renewal(&mut self, resource: &str) -> Result<CorrelationToken> {
        let token = self.reserve_renewal(resource)?;
        info!(state = token.short(), resource, "token renewal started");
        Ok(token)
    }

    /// Start a token acquisition that leaves the page by full navigation.
    ///
    /// Same in-flight rules as `begin_renewal`, but the token and resource are
    /// also persisted so the page loaded after the redirect can match them.
    pub fn begin_renewal_redirect(&mut self, resource: &str) -> Result<CorrelationToken> {
        self.ensure_no_renewal(resource)?;
        let token = CorrelationToken::mint();
        self.store
            .set(storage::STATE_ACQUIRE_TOKEN, token.as_str(), true)?;
        self.store
            .set(storage::ACQUIRE_TOKEN_RESOURCE, resource, false)?;
        self.track_renewal(token.clone(), resource);
        info!(state = token.short(), resource, "redirect token acquisition started");
        Ok(token)
    }

    fn reserve_renewal(&mut self, resource: &str) -> Result<CorrelationToken> {
        self.ensure_no_renewal(resource)?;
        let token = CorrelationToken::mint();
        self.track_renewal(token.clone(), resource);
        Ok(token)
    }

    fn ensure_no_renewal(&self, resource: &str) -> Result<()> {
        if self.renewals_in_flight.contains(resource) {
            warn!(resource, "token renewal already in progress");
            return Err(Error::RenewalAlreadyInProgress(resource.to_string()));
        }
        Ok(())
    }

    fn track_renewal(&mut self, token: CorrelationToken, resource: &str) {
        self.renewals.insert(token, resource.to_string());
        self.renewals_in_flight.insert(resource.to_string());
        self.last_request = Some(RequestKind::RenewToken);
        metrics::record_request_started(RequestKind::RenewToken);
    }

    /// Claim `token` for an incoming response.
    ///
    /// Checks the login first (in memory, then the persisted login state), then
    /// renewals (in memory, then the persisted acquisition state). A match
    /// removes the token everywhere it was recorded; `NoMatch` changes nothing.
    /// Storage failures are logged and treated as absence so a broken store
    /// can never turn a response into a crash.
    pub fn consume(&mut self, token: &str) -> ConsumeResult {
        if token.is_empty() {
            return ConsumeResult::NoMatch;
        }

        if self
            .active_login
            .as_ref()
            .is_some_and(|active| active.token.as_str() == token)
        {
            if let Some(active) = self.active_login.take() {
                if active.mode == LoginMode::Redirect {
                    self.clear_if_stored(storage::STATE_LOGIN, token);
                }
                debug!(state = active.token.short(), "login token consumed");
            }
            return ConsumeResult::LoginMatch;
        }

        if self.stored_matches(storage::STATE_LOGIN, token) {
            self.blank(storage::STATE_LOGIN);
            debug!("persisted login token consumed");
            return ConsumeResult::LoginMatch;
        }

        if let Some(resource) = self.renewals.remove(&CorrelationToken::from_value(token)) {
            self.renewals_in_flight.remove(&resource);
            if self.clear_if_stored(storage::STATE_ACQUIRE_TOKEN, token) {
                self.blank(storage::ACQUIRE_TOKEN_RESOURCE);
            }
            debug!(resource, "renewal token consumed");
            return ConsumeResult::RenewalMatch(resource);
        }

        if self.stored_matches(storage::STATE_ACQUIRE_TOKEN, token) {
            let resource = self
                .read(storage::ACQUIRE_TOKEN_RESOURCE)
                .unwrap_or_default();
            self.blank(storage::STATE_ACQUIRE_TOKEN);
            self.blank(storage::ACQUIRE_TOKEN_RESOURCE);
            self.renewals_in_flight.remove(&resource);
            debug!(resource, "persisted acquisition token consumed");
            return ConsumeResult::RenewalMatch(resource);
        }

        ConsumeResult::NoMatch
    }

    /// Drop a renewal that will never be answered (frame timeout).
    ///
    /// Returns the resource it was for, `None` if already consumed.
    pub fn abandon_renewal(&mut self, token: &CorrelationToken) -> Option<String> {
        let resource = self.renewals.remove(token)?;
        self.renewals_in_flight.remove(&resource);
        if self.clear_if_stored(storage::STATE_ACQUIRE_TOKEN, token.as_str()) {
            self.blank(storage::ACQUIRE_TOKEN_RESOURCE);
        }
        debug!(state = token.short(), resource, "renewal abandoned");
        Some(resource)
    }

    /// Drop the active login if `token` is its correlation token.
    ///
    /// Used when a popup never answers or the login could not be handed out.
    /// The persisted login state is blanked so a late response cannot match.
    pub fn abandon_login(&mut self, token: &CorrelationToken) -> bool {
        if !self
            .active_login
            .as_ref()
            .is_some_and(|active| active.token == *token)
        {
            return false;
        }
        self.active_login = None;
        self.clear_if_stored(storage::STATE_LOGIN, token.as_str());
        debug!(state = token.short(), "login abandoned");
        true
    }

    pub fn login_in_flight(&self) -> bool {
        self.active_login.is_some()
    }

    pub fn renewal_in_flight(&self, resource: &str) -> bool {
        self.renewals_in_flight.contains(resource)
    }

    /// The request this context most recently initiated, if any.
    pub fn last_request_kind(&self) -> Option<RequestKind> {
        self.last_request
    }

    /// Every renewal token not yet consumed or abandoned.
    pub fn outstanding_renewal_tokens(&self) -> Vec<CorrelationToken> {
        self.renewals.keys().cloned().collect()
    }

    /// Nonce the returned identity token must carry.
    pub fn expected_nonce(&self) -> Option<ReplayNonce> {
        if let Some(active) = &self.active_login {
            return Some(active.nonce.clone());
        }
        self.read(storage::NONCE_IDTOKEN)
            .filter(|nonce| !nonce.is_empty())
            .map(ReplayNonce::from_stored)
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.store.get(key) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "failed to read correlation state");
                None
            }
        }
    }

    fn stored_matches(&self, key: &str, token: &str) -> bool {
        self.read(key).is_some_and(|stored| stored == token)
    }

    fn clear_if_stored(&self, key: &str, token: &str) -> bool {
        if self.stored_matches(key, token) {
            self.blank(key);
            true
        } else {
            false
        }
    }

    fn blank(&self, key: &str) {
        if let Err(e) = self.store.set(key, "", true) {
            warn!(key, error = %e, "failed to clear consumed correlation state");
        }
    }
}
