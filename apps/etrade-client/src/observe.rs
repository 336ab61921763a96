//! Injected observability sink for auth lifecycle events.
//!
//! The core never mutates global logger state; it emits typed events
//! through an [`AuthSink`] supplied at construction. [`TracingSink`]
//! forwards them to `tracing`. Events never carry token secrets.

use crate::error::AuthStage;

/// Auth lifecycle events emitted by the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// A request token was issued and the user authorization URL built.
    RequestTokenIssued,
    /// The verifier was exchanged and an access token is now active.
    AccessTokenActive,
    /// The access token was renewed (same values, extended expiry).
    TokenRenewed,
    /// The server reported the token expired or invalid.
    TokenExpired {
        /// Stage at which expiry was discovered.
        stage: AuthStage,
    },
    /// The in-memory token was cleared after a revoke request.
    TokenRevoked {
        /// True when the server confirmed the revocation.
        server_confirmed: bool,
    },
    /// Server-side revocation failed; local state was still cleared.
    RevokeFailed {
        /// HTTP status, when the failure came from a response.
        status: Option<u16>,
    },
    /// A signed domain call is waiting out a retry delay.
    RetryScheduled {
        /// Delay before the next attempt, in milliseconds.
        delay_ms: u64,
        /// Attempt number just failed (1-based).
        attempt: u32,
    },
    /// An access token was loaded from the store.
    TokenLoaded,
    /// The access token was saved to the store.
    TokenSaved,
    /// The stored token was cleared.
    TokenCleared,
}

/// Sink for auth lifecycle events.
pub trait AuthSink: Send + Sync {
    /// Handle one event.
    fn event(&self, event: &AuthEvent);
}

/// Default sink: forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl AuthSink for TracingSink {
    fn event(&self, event: &AuthEvent) {
        match event {
            AuthEvent::RequestTokenIssued => tracing::info!("request token issued"),
            AuthEvent::AccessTokenActive => tracing::info!("access token active"),
            AuthEvent::TokenRenewed => tracing::info!("access token renewed"),
            AuthEvent::TokenExpired { stage } => {
                tracing::warn!(stage = %stage, "access token expired");
            }
            AuthEvent::TokenRevoked { server_confirmed } => {
                tracing::info!(server_confirmed, "access token revoked");
            }
            AuthEvent::RevokeFailed { status } => {
                tracing::warn!(?status, "server-side revoke failed, local token cleared");
            }
            AuthEvent::RetryScheduled { delay_ms, attempt } => {
                tracing::warn!(delay_ms, attempt, "retrying signed request");
            }
            AuthEvent::TokenLoaded => tracing::debug!("access token loaded from store"),
            AuthEvent::TokenSaved => tracing::debug!("access token saved to store"),
            AuthEvent::TokenCleared => tracing::debug!("stored access token cleared"),
        }
    }
}

/// Sink that discards all events. Useful in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl AuthSink for NullSink {
    fn event(&self, _event: &AuthEvent) {}
}
