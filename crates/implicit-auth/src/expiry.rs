//! Renewal timeouts
//!
//! A hidden renewal frame that never answers would otherwise hold its
//! resource forever. These tasks fail the waiter and free the resource once
//! the frame's load timeout has passed.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::context::AuthenticationContext;
use crate::token::CorrelationToken;

/// Expire one renewal after `timeout` unless its response arrived first.
///
/// The handle yields true when the timeout actually expired the renewal.
pub fn spawn_renewal_timeout(
    context: Arc<AuthenticationContext>,
    token: CorrelationToken,
    timeout: Duration,
) -> tokio::task::JoinHandle<bool> {
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        let expired = context.expire_renewal(&token);
        if expired {
            info!(state = token.short(), "renewal frame timed out");
        } else {
            debug!(state = token.short(), "renewal completed before timeout");
        }
        expired
    })
}

/// Spawn a background task that expires every completion older than `max_age`.
///
/// Runs every `interval` until the handle is aborted.
pub fn spawn_sweeper(
    context: Arc<AuthenticationContext>,
    interval: Duration,
    max_age: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick fires immediately; nothing can be stale yet
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let expired = context.expire_stale(max_age);
            if expired > 0 {
                info!(expired, "stale renewals expired");
            }
        }
    })
}
