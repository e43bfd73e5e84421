//! Authentication context: one per configured client
//!
//! Ties the registry, the pending-completion table and the durable store
//! together behind the operations a host page calls. All registry and table
//! mutation happens under the context's locks, so the spend-once guarantee
//! holds even when responses are delivered from several threads.
//!
//! Contexts are shared through `ContextRegistry`: asking again with the same
//! configuration returns the existing instance.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::callbacks::{PendingCallbackTable, RenewalReceiver};
use crate::classifier::{FrameProbe, ResponseEnvelope, classify};
use crate::config::AuthConfig;
use crate::constants::storage;
use crate::error::Result;
use crate::metrics;
use crate::navigate;
use crate::parser::parse;
use crate::registry::{CorrelationRegistry, LoginMode, RequestKind};
use crate::storage::DurableStore;
use crate::token::{CorrelationToken, ReplayNonce};

/// A login ready to hand to the transport.
#[derive(Debug)]
pub struct LoginRequest {
    pub url: String,
    pub token: CorrelationToken,
    /// Present for popup logins, which complete in this page.
    pub completion: Option<RenewalReceiver>,
}

/// A silent renewal ready to load into a hidden frame.
#[derive(Debug)]
pub struct SilentRenewal {
    pub url: String,
    pub token: CorrelationToken,
    pub completion: RenewalReceiver,
}

/// Error persisted by the last auth response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredError {
    pub error: String,
    pub error_description: String,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Release whichever outstanding request `token` belongs to.
fn abandon(registry: &mut CorrelationRegistry, token: &CorrelationToken) -> bool {
    registry.abandon_renewal(token).is_some() || registry.abandon_login(token)
}

/// Correlation state of one configured client.
pub struct AuthenticationContext {
    config: AuthConfig,
    store: Arc<dyn DurableStore>,
    registry: Mutex<CorrelationRegistry>,
    callbacks: Mutex<PendingCallbackTable>,
}

impl AuthenticationContext {
    /// Build a context for `config` running on the page at `current_location`.
    ///
    /// A missing client id fails here; it is the only construction error.
    pub fn new(
        config: AuthConfig,
        current_location: &str,
        store: Arc<dyn DurableStore>,
    ) -> Result<Self> {
        let config = config.normalize(current_location)?;
        info!(
            client_id = %config.client_id,
            tenant = %config.tenant,
            popup = config.popup,
            "authentication context created"
        );
        Ok(Self {
            registry: Mutex::new(CorrelationRegistry::new(store.clone())),
            callbacks: Mutex::new(PendingCallbackTable::new()),
            config,
            store,
        })
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Start an interactive login from `start_page`.
    ///
    /// Redirect mode persists everything the post-redirect page needs. Popup
    /// mode also registers a completion the popup's response will resolve.
    pub fn login(&self, start_page: &str) -> Result<LoginRequest> {
        let mode = if self.config.popup {
            LoginMode::Popup
        } else {
            LoginMode::Redirect
        };

        let (token, nonce) = lock(&self.registry).begin_login(mode)?;
        if let Err(e) = self.store.set(storage::LOGIN_REQUEST, start_page, false) {
            lock(&self.registry).abandon_login(&token);
            return Err(e);
        }

        let url = navigate::login_url(&self.config, &token, &nonce);
        let completion = match mode {
            LoginMode::Popup => {
                Some(lock(&self.callbacks).register(token.clone(), &self.config.client_id))
            }
            LoginMode::Redirect => None,
        };

        Ok(LoginRequest {
            url,
            token,
            completion,
        })
    }

    /// Start a silent renewal of the token for `resource`.
    ///
    /// Renewing the login resource asks for a fresh identity token and so
    /// binds a new replay nonce.
    pub fn acquire_token_silent(&self, resource: &str) -> Result<SilentRenewal> {
        let token = lock(&self.registry).begin_renewal(resource)?;
        let nonce = self.bind_renewal_nonce(&token, resource)?;

        let completion = lock(&self.callbacks).register(token.clone(), resource);
        let url = navigate::renewal_url(&self.config, resource, &token, nonce.as_ref(), true);

        Ok(SilentRenewal {
            url,
            token,
            completion,
        })
    }

    /// Start a token acquisition by full-page redirect.
    pub fn acquire_token_redirect(&self, resource: &str) -> Result<(String, CorrelationToken)> {
        let token = lock(&self.registry).begin_renewal_redirect(resource)?;
        let nonce = self.bind_renewal_nonce(&token, resource)?;
        let url = navigate::renewal_url(&self.config, resource, &token, nonce.as_ref(), false);
        Ok((url, token))
    }

    /// Mint and persist a replay nonce when renewing `resource` returns an
    /// identity token. A failed write abandons the renewal.
    fn bind_renewal_nonce(
        &self,
        token: &CorrelationToken,
        resource: &str,
    ) -> Result<Option<ReplayNonce>> {
        let response_type = navigate::renewal_response_type(&self.config, resource);
        if response_type != navigate::ResponseType::IdToken {
            return Ok(None);
        }
        let nonce = ReplayNonce::mint();
        if let Err(e) = self.store.set(storage::NONCE_IDTOKEN, nonce.expose(), true) {
            lock(&self.registry).abandon_renewal(token);
            return Err(e);
        }
        Ok(Some(nonce))
    }

    /// Handle a raw response fragment delivered to this context.
    ///
    /// Never fails: non-auth fragments, unattributable responses and spent or
    /// unknown states come back as envelope values and are otherwise dropped.
    pub fn handle_response(&self, fragment: &str, frame: &dyn FrameProbe) -> ResponseEnvelope {
        let parameters = parse(fragment);
        let envelope = {
            let mut registry = lock(&self.registry);
            classify(parameters, &mut registry, frame)
        };

        if !envelope.is_auth_response() {
            debug!("fragment is not an auth response");
            return envelope;
        }

        metrics::record_response(envelope.request_kind(), envelope.matched_token());
        self.persist_error(&envelope);

        if envelope.is_unattributable() {
            return envelope;
        }

        if !envelope.matched_token() {
            warn!(
                state = envelope.correlation_token().map(CorrelationToken::short),
                kind = envelope.request_kind().label(),
                "response state matches no pending request, dropping"
            );
            return envelope;
        }

        if let Some(token) = envelope.correlation_token() {
            let entry = lock(&self.callbacks).resolve(token);
            if let Some(entry) = entry {
                let delivered = entry.complete(envelope.token_reply());
                debug!(state = token.short(), delivered, "pending completion resolved");
            }
            info!(
                state = token.short(),
                kind = envelope.request_kind().label(),
                resource = envelope.resource(),
                error = envelope.error_code(),
                "auth response matched"
            );
        }

        envelope
    }

    /// Give up on a renewal or popup login whose frame never answered.
    ///
    /// Fails the waiter and frees the resource (or the login slot) for a new
    /// request. Returns false when the request already completed.
    pub fn expire_renewal(&self, token: &CorrelationToken) -> bool {
        let expired = lock(&self.callbacks).expire(token);
        let abandoned = abandon(&mut lock(&self.registry), token);
        if expired || abandoned {
            metrics::record_renewal_expired();
        }
        expired || abandoned
    }

    /// Expire every pending completion older than `max_age`.
    pub fn expire_stale(&self, max_age: Duration) -> usize {
        let stale = lock(&self.callbacks).expire_older_than(max_age);
        let mut registry = lock(&self.registry);
        for token in &stale {
            abandon(&mut registry, token);
            metrics::record_renewal_expired();
        }
        stale.len()
    }

    /// Whether `candidate` is the replay nonce the next identity token must carry.
    pub fn nonce_matches(&self, candidate: &str) -> bool {
        self.expected_nonce()
            .is_some_and(|nonce| nonce.matches(candidate))
    }

    pub fn login_in_flight(&self) -> bool {
        lock(&self.registry).login_in_flight()
    }

    pub fn renewal_in_flight(&self, resource: &str) -> bool {
        lock(&self.registry).renewal_in_flight(resource)
    }

    pub fn last_request_kind(&self) -> Option<RequestKind> {
        lock(&self.registry).last_request_kind()
    }

    /// States a nested frame of this page should treat as its parent's.
    pub fn outstanding_renewal_tokens(&self) -> Vec<CorrelationToken> {
        lock(&self.registry).outstanding_renewal_tokens()
    }

    pub fn pending_completions(&self) -> usize {
        lock(&self.callbacks).len()
    }

    pub fn expected_nonce(&self) -> Option<ReplayNonce> {
        lock(&self.registry).expected_nonce()
    }

    /// Page the last login started from.
    pub fn login_start_page(&self) -> Result<Option<String>> {
        Ok(self
            .store
            .get(storage::LOGIN_REQUEST)?
            .filter(|page| !page.is_empty()))
    }

    /// Error left by the last auth response, if it carried one.
    pub fn stored_error(&self) -> Result<Option<StoredError>> {
        let error = self.store.get(storage::ERROR)?.unwrap_or_default();
        let error_description = self
            .store
            .get(storage::ERROR_DESCRIPTION)?
            .unwrap_or_default();
        if error.is_empty() && error_description.is_empty() {
            return Ok(None);
        }
        Ok(Some(StoredError {
            error,
            error_description,
        }))
    }

    fn persist_error(&self, envelope: &ResponseEnvelope) {
        let error = envelope.error_code().unwrap_or_default();
        let description = envelope.error_description().unwrap_or_default();
        if error.is_empty() && description.is_empty() {
            return;
        }

        let mut writes = vec![
            (storage::ERROR, error),
            (storage::ERROR_DESCRIPTION, description),
        ];
        if envelope.request_kind() == RequestKind::Login {
            writes.push((storage::LOGIN_ERROR, description));
        }
        for (key, value) in writes {
            if let Err(e) = self.store.set(key, value, false) {
                warn!(key, error = %e, "failed to persist response error");
            }
        }
    }
}

/// Contexts keyed by configuration identity.
#[derive(Default)]
pub struct ContextRegistry {
    contexts: Mutex<HashMap<String, Arc<AuthenticationContext>>>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the context for `config`, creating it on first use.
    ///
    /// When a context already exists for the same normalized configuration the
    /// given store is ignored and the existing instance is returned.
    pub fn get_or_init(
        &self,
        config: AuthConfig,
        current_location: &str,
        store: Arc<dyn DurableStore>,
    ) -> Result<Arc<AuthenticationContext>> {
        let config = config.normalize(current_location)?;
        let key = config.fingerprint();

        let mut contexts = lock(&self.contexts);
        if let Some(existing) = contexts.get(&key) {
            debug!(client_id = %config.client_id, "reusing authentication context");
            return Ok(existing.clone());
        }

        let context = Arc::new(AuthenticationContext::new(config, current_location, store)?);
        contexts.insert(key, context.clone());
        Ok(context)
    }

    pub fn len(&self) -> usize {
        lock(&self.contexts).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.contexts).is_empty()
    }
}
