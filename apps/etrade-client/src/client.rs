//! Client facade: lifecycle entry points and the signed domain-call path.

use std::sync::Arc;
use std::time::Duration;

use crate::auth::{AccessToken, AuthState, AuthStateMachine, RequestToken, RevokePolicy};
use crate::compose::AuthorizedRequestComposer;
use crate::config::{Environment, EtradeConfig, RetryConfig};
use crate::error::EtradeError;
use crate::observe::{AuthEvent, AuthSink, TracingSink};
use crate::store::{FileTokenStore, TokenStore};
use crate::transport::{HttpResponse, HttpTransport, Transport};

/// E*Trade API client.
///
/// Composes the auth state machine, the request composer, the token
/// store, and the transport. Domain endpoint wrappers layer on top of
/// [`EtradeClient::send`]; this core only guarantees a correctly signed
/// request and a typed error surface.
pub struct EtradeClient {
    config: Arc<EtradeConfig>,
    machine: Arc<AuthStateMachine>,
    composer: AuthorizedRequestComposer,
    store: Arc<dyn TokenStore>,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn AuthSink>,
}

/// Builder for [`EtradeClient`] with pluggable collaborators.
pub struct EtradeClientBuilder {
    config: EtradeConfig,
    store: Option<Arc<dyn TokenStore>>,
    transport: Option<Arc<dyn Transport>>,
    sink: Option<Arc<dyn AuthSink>>,
    revoke_policy: RevokePolicy,
}

impl EtradeClientBuilder {
    /// Use a custom token store (database, secret manager, ...).
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use a custom transport.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use a custom observability sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn AuthSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Set the server-side revocation failure policy.
    #[must_use]
    pub const fn with_revoke_policy(mut self, policy: RevokePolicy) -> Self {
        self.revoke_policy = policy;
        self
    }

    /// Build the client.
    #[must_use]
    pub fn build(self) -> EtradeClient {
        let config = Arc::new(self.config);
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(HttpTransport::new(config.timeout)));
        let sink = self.sink.unwrap_or_else(|| Arc::new(TracingSink));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(FileTokenStore::new(config.environment)));
        let machine = Arc::new(
            AuthStateMachine::new(config.clone(), transport.clone(), sink.clone())
                .with_revoke_policy(self.revoke_policy),
        );
        let composer = AuthorizedRequestComposer::new(config.clone(), machine.clone());

        EtradeClient {
            config,
            machine,
            composer,
            store,
            transport,
            sink,
        }
    }
}

impl EtradeClient {
    /// Create a client with default collaborators.
    #[must_use]
    pub fn new(config: EtradeConfig) -> Self {
        Self::builder(config).build()
    }

    /// Start building a client with custom collaborators.
    #[must_use]
    pub fn builder(config: EtradeConfig) -> EtradeClientBuilder {
        EtradeClientBuilder {
            config,
            store: None,
            transport: None,
            sink: None,
            revoke_policy: RevokePolicy::default(),
        }
    }

    /// Create a client from `ETRADE_CONSUMER_KEY` and
    /// `ETRADE_CONSUMER_SECRET`.
    pub fn from_env(environment: Environment) -> Result<Self, EtradeError> {
        Ok(Self::new(EtradeConfig::from_env(environment)?))
    }

    /// Client configuration.
    #[must_use]
    pub fn config(&self) -> &EtradeConfig {
        &self.config
    }

    /// Acquire the transport's connection resources (connection pool).
    /// Optional; without it each request uses a one-shot connection.
    pub async fn open(&self) -> Result<(), EtradeError> {
        self.transport.open().await
    }

    /// Release the transport's connection resources. Dropping the client
    /// releases them regardless.
    pub async fn close(&self) -> Result<(), EtradeError> {
        self.transport.close().await
    }

    /// True iff an access token is active.
    pub async fn is_authenticated(&self) -> bool {
        self.machine.is_authenticated().await
    }

    /// Current auth lifecycle state.
    pub async fn auth_state(&self) -> AuthState {
        self.machine.state().await
    }

    /// OAuth step 1: obtain a request token and the URL the user must
    /// visit to authorize it.
    pub async fn request_token(&self) -> Result<RequestToken, EtradeError> {
        self.machine.get_request_token().await
    }

    /// OAuth step 2: exchange the user's verifier code for an access
    /// token.
    pub async fn exchange_verifier(&self, verifier: &str) -> Result<AccessToken, EtradeError> {
        self.machine.get_access_token(verifier).await
    }

    /// Renew the active access token. Tokens expire at midnight US
    /// Eastern; call this once per session before then.
    pub async fn renew_token(&self) -> Result<(), EtradeError> {
        self.machine.renew().await
    }

    /// Revoke the access token and clear the stored record.
    pub async fn revoke_token(&self) -> Result<(), EtradeError> {
        self.machine.revoke().await?;
        self.store.clear().await?;
        self.sink.event(&AuthEvent::TokenCleared);
        Ok(())
    }

    /// Inject an access token obtained elsewhere.
    pub async fn set_access_token(
        &self,
        token: impl Into<String>,
        token_secret: impl Into<String>,
    ) {
        self.machine
            .set_access_token(AccessToken::new(token, token_secret))
            .await;
    }

    /// Load a saved access token from the store, if any.
    ///
    /// Returns true when a token was loaded and activated.
    pub async fn load_token(&self) -> bool {
        match self.store.load().await {
            Some(token) => {
                self.machine.set_access_token(token).await;
                self.sink.event(&AuthEvent::TokenLoaded);
                true
            }
            None => false,
        }
    }

    /// Save the active access token to the store. No-op when no token is
    /// active.
    pub async fn save_token(&self) -> Result<(), EtradeError> {
        if let Some(token) = self.machine.access_token().await {
            self.store.save(&token).await?;
            self.sink.event(&AuthEvent::TokenSaved);
        }
        Ok(())
    }

    /// Clear both the stored and the in-memory token.
    pub async fn clear_token(&self) -> Result<(), EtradeError> {
        self.store.clear().await?;
        self.machine.clear().await;
        self.sink.event(&AuthEvent::TokenCleared);
        Ok(())
    }

    /// Make a signed GET request to a domain API path.
    pub async fn get(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<serde_json::Value, EtradeError> {
        self.send("GET", path, query, None).await
    }

    /// Make a signed POST request to a domain API path.
    pub async fn post(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, EtradeError> {
        self.send("POST", path, &[], Some(body)).await
    }

    /// Make a signed PUT request to a domain API path.
    pub async fn put(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, EtradeError> {
        self.send("PUT", path, &[], Some(body)).await
    }

    /// Make a signed DELETE request to a domain API path.
    pub async fn delete(&self, path: &str) -> Result<serde_json::Value, EtradeError> {
        self.send("DELETE", path, &[], None).await
    }

    /// Make a signed domain API call with the transport retry budget.
    ///
    /// Each attempt is signed afresh (new nonce and timestamp). 429
    /// responses honor `Retry-After` within the budget and surface as
    /// [`EtradeError::RateLimited`] once it is exhausted. A 401 marks the
    /// token expired; the caller must re-authenticate.
    pub async fn send(
        &self,
        method: &str,
        path: &str,
        query: &[(String, String)],
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, EtradeError> {
        let url = format!("{}{}", self.config.api_base_url(), path);
        let mut backoff = ExponentialBackoff::new(&self.config.retry);

        loop {
            let request = self
                .composer
                .compose(method, &url, query, body.clone())
                .await?;

            let response = match self.transport.send(&request).await {
                Ok(response) => response,
                Err(EtradeError::Network(message)) => {
                    if let Some(delay) = backoff.next_backoff() {
                        self.wait(delay, backoff.attempt).await;
                        continue;
                    }
                    return Err(EtradeError::Network(message));
                }
                Err(err) => return Err(err),
            };

            if response.is_success() {
                if response.body.trim().is_empty() {
                    return Ok(serde_json::Value::Null);
                }
                return serde_json::from_str(&response.body)
                    .map_err(|e| EtradeError::validation("response_body", e.to_string()));
            }

            match response.status {
                401 => {
                    self.machine.mark_expired().await;
                    return Err(EtradeError::token(
                        "access token rejected (401); re-authenticate",
                        true,
                    ));
                }
                429 => match backoff.next_backoff() {
                    Some(fallback) => {
                        let delay = response
                            .retry_after
                            .map_or(fallback, Duration::from_secs);
                        self.wait(delay, backoff.attempt).await;
                    }
                    None => {
                        return Err(EtradeError::RateLimited {
                            retry_after_secs: response.retry_after.unwrap_or(60),
                        });
                    }
                },
                408 | 500 | 502 | 503 | 504 => match backoff.next_backoff() {
                    Some(delay) => self.wait(delay, backoff.attempt).await,
                    None => return Err(api_error(&response)),
                },
                _ => return Err(api_error(&response)),
            }
        }
    }

    async fn wait(&self, delay: Duration, attempt: u32) {
        self.sink.event(&AuthEvent::RetryScheduled {
            delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            attempt,
        });
        tokio::time::sleep(delay).await;
    }
}

/// Map a non-2xx domain response to an API error, extracting the
/// E*Trade `{"Error": {"message": ...}}` shape when present.
fn api_error(response: &HttpResponse) -> EtradeError {
    let message = serde_json::from_str::<serde_json::Value>(&response.body)
        .ok()
        .and_then(|v| {
            v.get("Error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| format!("API error: {}", response.status));

    EtradeError::Api {
        status: response.status,
        message,
        body: crate::error::excerpt(&response.body),
    }
}

/// Exponential backoff calculator for the transport retry budget.
struct ExponentialBackoff {
    attempt: u32,
    max_attempts: u32,
    current_backoff: Duration,
    max_backoff: Duration,
    multiplier: f64,
}

impl ExponentialBackoff {
    const fn new(config: &RetryConfig) -> Self {
        Self {
            attempt: 0,
            max_attempts: config.max_attempts,
            current_backoff: config.initial_backoff,
            max_backoff: config.max_backoff,
            multiplier: config.multiplier,
        }
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        self.attempt += 1;
        if self.attempt >= self.max_attempts {
            return None;
        }

        let backoff = self.current_backoff;
        self.current_backoff = Duration::from_secs_f64(
            (self.current_backoff.as_secs_f64() * self.multiplier)
                .min(self.max_backoff.as_secs_f64()),
        );

        Some(backoff)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::transport::SignedRequest;

    use super::*;

    struct MemoryStore(Mutex<Option<AccessToken>>);

    impl MemoryStore {
        fn empty() -> Self {
            Self(Mutex::new(None))
        }
    }

    #[async_trait]
    impl TokenStore for MemoryStore {
        async fn save(&self, token: &AccessToken) -> Result<(), EtradeError> {
            *self.0.lock().unwrap() = Some(token.clone());
            Ok(())
        }

        async fn load(&self) -> Option<AccessToken> {
            self.0.lock().unwrap().clone()
        }

        async fn clear(&self) -> Result<(), EtradeError> {
            *self.0.lock().unwrap() = None;
            Ok(())
        }

        async fn has_token(&self) -> bool {
            self.0.lock().unwrap().is_some()
        }
    }

    struct ScriptedTransport(Mutex<VecDeque<HttpResponse>>);

    impl ScriptedTransport {
        fn new(responses: Vec<HttpResponse>) -> Self {
            Self(Mutex::new(responses.into()))
        }

        fn response(status: u16, body: &str) -> HttpResponse {
            HttpResponse {
                status,
                body: body.to_string(),
                retry_after: None,
            }
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, _request: &SignedRequest) -> Result<HttpResponse, EtradeError> {
            self.0
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| EtradeError::Network("no scripted response".to_string()))
        }
    }

    fn client_with(
        store: Arc<dyn TokenStore>,
        transport: Arc<dyn Transport>,
    ) -> EtradeClient {
        EtradeClient::builder(EtradeConfig::new("ck", "cs", Environment::Sandbox))
            .with_store(store)
            .with_transport(transport)
            .with_sink(Arc::new(crate::observe::NullSink))
            .build()
    }

    #[tokio::test]
    async fn load_token_returns_false_when_store_empty() {
        let client = client_with(
            Arc::new(MemoryStore::empty()),
            Arc::new(ScriptedTransport::new(vec![])),
        );
        assert!(!client.load_token().await);
        assert!(!client.is_authenticated().await);
    }

    #[tokio::test]
    async fn save_then_load_token_round_trips_through_store() {
        let store = Arc::new(MemoryStore::empty());
        let client = client_with(store.clone(), Arc::new(ScriptedTransport::new(vec![])));

        client.set_access_token("T1", "S1").await;
        client.save_token().await.unwrap();
        assert!(store.has_token().await);

        client.clear_token().await.unwrap();
        assert!(!client.is_authenticated().await);
        assert!(!store.has_token().await);
    }

    #[tokio::test]
    async fn save_token_without_active_token_is_a_no_op() {
        let store = Arc::new(MemoryStore::empty());
        let client = client_with(store.clone(), Arc::new(ScriptedTransport::new(vec![])));
        client.save_token().await.unwrap();
        assert!(!store.has_token().await);
    }

    #[tokio::test]
    async fn revoke_token_clears_the_store() {
        let store = Arc::new(MemoryStore::empty());
        let client = client_with(
            store.clone(),
            Arc::new(ScriptedTransport::new(vec![ScriptedTransport::response(
                200, "",
            )])),
        );

        client.set_access_token("T1", "S1").await;
        client.save_token().await.unwrap();
        client.revoke_token().await.unwrap();

        assert!(!store.has_token().await);
        assert_eq!(client.auth_state().await, AuthState::Unauthenticated);
    }

    #[tokio::test]
    async fn send_fails_fast_when_unauthenticated() {
        let client = client_with(
            Arc::new(MemoryStore::empty()),
            Arc::new(ScriptedTransport::new(vec![])),
        );
        let err = client.get("/accounts/list", &[]).await.unwrap_err();
        assert!(matches!(err, EtradeError::Auth { .. }));
    }

    #[tokio::test]
    async fn send_marks_token_expired_on_401() {
        let client = client_with(
            Arc::new(MemoryStore::empty()),
            Arc::new(ScriptedTransport::new(vec![ScriptedTransport::response(
                401,
                "oauth_problem=token_rejected",
            )])),
        );
        client.set_access_token("T1", "S1").await;

        let err = client.get("/accounts/list", &[]).await.unwrap_err();
        assert!(matches!(err, EtradeError::Token { expired: true, .. }));
        assert_eq!(client.auth_state().await, AuthState::Expired);

        // Subsequent signed calls fail fast until re-authentication.
        let err = client.get("/accounts/list", &[]).await.unwrap_err();
        assert!(matches!(err, EtradeError::Auth { .. }));
    }

    #[tokio::test]
    async fn send_parses_json_and_maps_empty_bodies_to_null() {
        let client = client_with(
            Arc::new(MemoryStore::empty()),
            Arc::new(ScriptedTransport::new(vec![
                ScriptedTransport::response(200, r#"{"AccountListResponse":{}}"#),
                ScriptedTransport::response(204, ""),
            ])),
        );
        client.set_access_token("T1", "S1").await;

        let value = client.get("/accounts/list", &[]).await.unwrap();
        assert!(value.get("AccountListResponse").is_some());

        let empty = client.delete("/alerts/7").await.unwrap();
        assert!(empty.is_null());
    }

    #[test]
    fn api_error_extracts_etrade_error_message() {
        let response = HttpResponse {
            status: 400,
            body: r#"{"Error":{"code":1001,"message":"Invalid symbol"}}"#.to_string(),
            retry_after: None,
        };
        match api_error(&response) {
            EtradeError::Api { status, message, .. } => {
                assert_eq!(status, 400);
                assert_eq!(message, "Invalid symbol");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn api_error_falls_back_to_status_message() {
        let response = HttpResponse {
            status: 502,
            body: "<html>bad gateway</html>".to_string(),
            retry_after: None,
        };
        match api_error(&response) {
            EtradeError::Api { message, .. } => assert_eq!(message, "API error: 502"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn exponential_backoff_increments_and_caps() {
        let config = RetryConfig {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(250),
            multiplier: 2.0,
        };
        let mut backoff = ExponentialBackoff::new(&config);

        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(200)));
        // Capped at max_backoff.
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(250)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(250)));
        assert_eq!(backoff.next_backoff(), None);
    }

    #[test]
    fn exponential_backoff_exhausts_after_max_attempts() {
        let config = RetryConfig {
            max_attempts: 1,
            ..RetryConfig::default()
        };
        let mut backoff = ExponentialBackoff::new(&config);
        assert_eq!(backoff.next_backoff(), None);
    }
}
