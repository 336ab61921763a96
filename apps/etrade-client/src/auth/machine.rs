//! OAuth token lifecycle state machine.
//!
//! Owns the in-memory token and coordinates the four OAuth endpoints.
//! All lifecycle mutations happen under a single write guard, after the
//! network call has succeeded, so a cancelled or failed call leaves the
//! machine in its pre-call state and concurrent signers never observe a
//! torn token.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::config::EtradeConfig;
use crate::error::{AuthStage, EtradeError};
use crate::observe::{AuthEvent, AuthSink};
use crate::transport::{HttpResponse, SignedRequest, Transport};

use super::signature::{SignRequest, SignatureEngine};
use super::tokens::{AccessToken, RequestToken, TokenPair, parse_token_response};

/// Token lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// No token of any kind.
    Unauthenticated,
    /// A request token is pending user authorization.
    RequestTokenIssued,
    /// An access token is active and signing domain calls.
    AccessTokenActive,
    /// The server reported the access token expired or invalid.
    Expired,
    /// The access token was revoked server-side.
    Revoked,
}

impl std::fmt::Display for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::RequestTokenIssued => "REQUEST_TOKEN_ISSUED",
            Self::AccessTokenActive => "ACCESS_TOKEN_ACTIVE",
            Self::Expired => "EXPIRED",
            Self::Revoked => "REVOKED",
        };
        write!(f, "{name}")
    }
}

/// Policy for server-side revocation failures during [`AuthStateMachine::revoke`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RevokePolicy {
    /// Clear the local token regardless of the server outcome; report a
    /// failed server call through the sink instead of an error.
    #[default]
    BestEffort,
    /// Propagate a failed server call and leave local state untouched so
    /// the caller can retry.
    FailHard,
}

/// In-memory lifecycle record. Guarded by the machine's lock.
#[derive(Debug)]
struct Lifecycle {
    state: AuthState,
    access: Option<AccessToken>,
    pending: Option<TokenPair>,
}

/// OAuth 1.0a token lifecycle coordinator.
pub struct AuthStateMachine {
    config: Arc<EtradeConfig>,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn AuthSink>,
    revoke_policy: RevokePolicy,
    lifecycle: RwLock<Lifecycle>,
}

impl AuthStateMachine {
    /// Create a machine in the `Unauthenticated` state.
    #[must_use]
    pub fn new(
        config: Arc<EtradeConfig>,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn AuthSink>,
    ) -> Self {
        Self {
            config,
            transport,
            sink,
            revoke_policy: RevokePolicy::default(),
            lifecycle: RwLock::new(Lifecycle {
                state: AuthState::Unauthenticated,
                access: None,
                pending: None,
            }),
        }
    }

    /// Set the revocation policy.
    #[must_use]
    pub const fn with_revoke_policy(mut self, policy: RevokePolicy) -> Self {
        self.revoke_policy = policy;
        self
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> AuthState {
        self.lifecycle.read().await.state
    }

    /// True iff an access token is active.
    pub async fn is_authenticated(&self) -> bool {
        self.lifecycle.read().await.state == AuthState::AccessTokenActive
    }

    /// Snapshot of the active access token, if any, regardless of state.
    pub async fn access_token(&self) -> Option<AccessToken> {
        self.lifecycle.read().await.access.clone()
    }

    /// Access token for signing a domain call. Fails fast unless the
    /// machine is `AccessTokenActive`.
    pub(crate) async fn token_for_signing(&self) -> Result<AccessToken, EtradeError> {
        let lifecycle = self.lifecycle.read().await;
        match (&lifecycle.access, lifecycle.state) {
            (Some(token), AuthState::AccessTokenActive) => Ok(token.clone()),
            _ => Err(EtradeError::auth(
                AuthStage::Sign,
                format!("not authenticated (state {})", lifecycle.state),
            )),
        }
    }

    /// Step 1: obtain a request token and the user authorization URL.
    ///
    /// Allowed from every state except `AccessTokenActive`. Calling it
    /// again before the exchange invalidates the previous pending token.
    pub async fn get_request_token(&self) -> Result<RequestToken, EtradeError> {
        let mut lifecycle = self.lifecycle.write().await;
        if lifecycle.state == AuthState::AccessTokenActive {
            return Err(EtradeError::auth(
                AuthStage::RequestToken,
                "already authenticated; revoke or clear the access token first",
            ));
        }

        let url = format!("{}/request_token", self.config.oauth_base_url());
        let response = self
            .send_oauth(&url, None, None, Some("oob"), None)
            .await?;
        if !response.is_success() {
            return Err(EtradeError::auth_response(
                AuthStage::RequestToken,
                response.status,
                &response.body,
            ));
        }

        let pair = parse_token_response(&response.body)?;
        let authorization_url = self.config.authorize_url(&pair.token);

        lifecycle.pending = Some(pair.clone());
        lifecycle.state = AuthState::RequestTokenIssued;
        self.sink.event(&AuthEvent::RequestTokenIssued);

        Ok(RequestToken {
            token: pair.token,
            token_secret: pair.token_secret,
            authorization_url,
        })
    }

    /// Step 2: exchange the user's verifier for an access token,
    /// consuming the pending request token.
    pub async fn get_access_token(&self, verifier: &str) -> Result<AccessToken, EtradeError> {
        let verifier = verifier.trim();
        if verifier.is_empty() {
            return Err(EtradeError::auth(
                AuthStage::AccessToken,
                "verifier must not be empty",
            ));
        }

        let mut lifecycle = self.lifecycle.write().await;
        let Some(pending) = lifecycle.pending.clone() else {
            return Err(EtradeError::auth(
                AuthStage::AccessToken,
                "no pending request token; call get_request_token first",
            ));
        };

        let url = format!("{}/access_token", self.config.oauth_base_url());
        let response = self
            .send_oauth(
                &url,
                Some(&pending.token),
                Some(&pending.token_secret),
                None,
                Some(verifier),
            )
            .await?;
        if !response.is_success() {
            return Err(EtradeError::auth_response(
                AuthStage::AccessToken,
                response.status,
                &response.body,
            ));
        }

        let pair = parse_token_response(&response.body)?;
        let token = AccessToken::new(pair.token, pair.token_secret);

        lifecycle.pending = None;
        lifecycle.access = Some(token.clone());
        lifecycle.state = AuthState::AccessTokenActive;
        self.sink.event(&AuthEvent::AccessTokenActive);

        Ok(token)
    }

    /// Renew the active access token before the midnight-Eastern expiry.
    ///
    /// The server keeps the same token values and extends the expiry. A
    /// 401 means the token is already expired or invalid; the machine
    /// transitions to `Expired` and the caller must re-authenticate.
    pub async fn renew(&self) -> Result<(), EtradeError> {
        let mut lifecycle = self.lifecycle.write().await;
        let token = match (&lifecycle.access, lifecycle.state) {
            (Some(token), AuthState::AccessTokenActive) => token.clone(),
            _ => return Err(EtradeError::token("no active access token to renew", false)),
        };

        let url = format!("{}/renew_access_token", self.config.oauth_base_url());
        let response = self
            .send_oauth(&url, Some(&token.token), Some(&token.token_secret), None, None)
            .await?;

        if response.status == 401 {
            lifecycle.state = AuthState::Expired;
            self.sink.event(&AuthEvent::TokenExpired {
                stage: AuthStage::Renewal,
            });
            return Err(EtradeError::token("access token expired or invalid", true));
        }
        if !response.is_success() {
            return Err(EtradeError::auth_response(
                AuthStage::Renewal,
                response.status,
                &response.body,
            ));
        }

        self.sink.event(&AuthEvent::TokenRenewed);
        Ok(())
    }

    /// Revoke the active access token.
    ///
    /// Under the default best-effort policy the local token is cleared
    /// regardless of the server outcome and a server failure is reported
    /// through the sink. Under [`RevokePolicy::FailHard`] a server failure
    /// propagates and local state is untouched.
    pub async fn revoke(&self) -> Result<(), EtradeError> {
        let mut lifecycle = self.lifecycle.write().await;
        let token = match (&lifecycle.access, lifecycle.state) {
            (Some(token), AuthState::AccessTokenActive) => token.clone(),
            _ => {
                return Err(EtradeError::token(
                    "no active access token to revoke",
                    false,
                ));
            }
        };

        let url = format!("{}/revoke_access_token", self.config.oauth_base_url());
        let outcome = self
            .send_oauth(&url, Some(&token.token), Some(&token.token_secret), None, None)
            .await;

        let server_confirmed = match &outcome {
            Ok(response) if response.is_success() => true,
            Ok(response) => {
                if self.revoke_policy == RevokePolicy::FailHard {
                    return Err(EtradeError::auth_response(
                        AuthStage::Revocation,
                        response.status,
                        &response.body,
                    ));
                }
                self.sink.event(&AuthEvent::RevokeFailed {
                    status: Some(response.status),
                });
                false
            }
            Err(err) => {
                if self.revoke_policy == RevokePolicy::FailHard {
                    return Err(err.clone());
                }
                self.sink.event(&AuthEvent::RevokeFailed { status: None });
                false
            }
        };

        lifecycle.access = None;
        lifecycle.pending = None;
        lifecycle.state = AuthState::Unauthenticated;
        self.sink.event(&AuthEvent::TokenRevoked { server_confirmed });
        Ok(())
    }

    /// Inject an externally obtained access token (for example, loaded
    /// from a vault) without any network call.
    pub async fn set_access_token(&self, token: AccessToken) {
        let mut lifecycle = self.lifecycle.write().await;
        lifecycle.access = Some(token);
        lifecycle.pending = None;
        lifecycle.state = AuthState::AccessTokenActive;
    }

    /// Drop all tokens and return to `Unauthenticated`.
    pub async fn clear(&self) {
        let mut lifecycle = self.lifecycle.write().await;
        lifecycle.access = None;
        lifecycle.pending = None;
        lifecycle.state = AuthState::Unauthenticated;
    }

    /// Record a reactive expiry discovered outside `renew` (a 401 on a
    /// signed domain call).
    pub async fn mark_expired(&self) {
        let mut lifecycle = self.lifecycle.write().await;
        if lifecycle.state == AuthState::AccessTokenActive {
            lifecycle.state = AuthState::Expired;
            self.sink.event(&AuthEvent::TokenExpired {
                stage: AuthStage::Sign,
            });
        }
    }

    /// Record an out-of-band server-side revocation.
    pub async fn mark_revoked(&self) {
        let mut lifecycle = self.lifecycle.write().await;
        lifecycle.access = None;
        lifecycle.pending = None;
        lifecycle.state = AuthState::Revoked;
    }

    /// Sign and send one OAuth endpoint call. Single attempt; the OAuth
    /// parameters ride in the `Authorization` header with an empty body.
    async fn send_oauth(
        &self,
        url: &str,
        token: Option<&str>,
        token_secret: Option<&str>,
        callback: Option<&str>,
        verifier: Option<&str>,
    ) -> Result<HttpResponse, EtradeError> {
        let signed = SignatureEngine::sign(&SignRequest {
            method: "POST",
            url,
            consumer_key: &self.config.consumer_key,
            consumer_secret: &self.config.consumer_secret,
            token,
            token_secret,
            callback,
            verifier,
            params: &[],
        })?;

        let response = self
            .transport
            .send(&SignedRequest {
                method: "POST".to_string(),
                url: url.to_string(),
                headers: vec![("Authorization".to_string(), signed.authorization)],
                body: None,
            })
            .await?;

        // Auth endpoints are single-attempt; a 429 surfaces immediately.
        if response.status == 429 {
            return Err(EtradeError::RateLimited {
                retry_after_secs: response.retry_after.unwrap_or(60),
            });
        }
        Ok(response)
    }
}
