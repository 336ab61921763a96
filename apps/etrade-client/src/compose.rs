//! Signing composer for outbound domain API calls.
//!
//! Bridges the state machine and the signature engine: every call gets a
//! fresh nonce and timestamp, and fails fast when no access token is
//! active. The composer never retries and never mutates auth state.

use std::sync::Arc;

use crate::auth::{AuthStateMachine, SignRequest, SignatureEngine};
use crate::auth::signature::percent_encode;
use crate::config::EtradeConfig;
use crate::error::EtradeError;
use crate::transport::SignedRequest;

/// Builds signed, ready-to-send requests for domain API calls.
pub struct AuthorizedRequestComposer {
    config: Arc<EtradeConfig>,
    machine: Arc<AuthStateMachine>,
}

impl AuthorizedRequestComposer {
    /// Create a composer over the given state machine.
    #[must_use]
    pub fn new(config: Arc<EtradeConfig>, machine: Arc<AuthStateMachine>) -> Self {
        Self { config, machine }
    }

    /// Sign one domain API request.
    ///
    /// `url` is the base URL without a query component; `query` carries
    /// the query parameters, which are included in the signature. JSON
    /// bodies are not form-encoded and stay out of the signature base
    /// string.
    pub async fn compose(
        &self,
        method: &str,
        url: &str,
        query: &[(String, String)],
        body: Option<serde_json::Value>,
    ) -> Result<SignedRequest, EtradeError> {
        let token = self.machine.token_for_signing().await?;

        let signed = SignatureEngine::sign(&SignRequest {
            method,
            url,
            consumer_key: &self.config.consumer_key,
            consumer_secret: &self.config.consumer_secret,
            token: Some(&token.token),
            token_secret: Some(&token.token_secret),
            callback: None,
            verifier: None,
            params: query,
        })?;

        let mut headers = vec![
            ("Authorization".to_string(), signed.authorization),
            ("Accept".to_string(), "application/json".to_string()),
        ];
        if body.is_some() {
            headers.push(("Content-Type".to_string(), "application/json".to_string()));
        }

        Ok(SignedRequest {
            method: method.to_string(),
            url: full_url(url, query),
            headers,
            body,
        })
    }
}

/// Append the query string, percent-encoded the same way the signature
/// base string encodes it.
fn full_url(url: &str, query: &[(String, String)]) -> String {
    if query.is_empty() {
        return url.to_string();
    }
    let encoded = query
        .iter()
        .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    format!("{url}?{encoded}")
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use crate::auth::AccessToken;
    use crate::config::Environment;
    use crate::observe::NullSink;
    use crate::transport::{HttpResponse, Transport};

    use super::*;

    /// Transport that must never be reached from the composer.
    struct UnreachableTransport;

    #[async_trait]
    impl Transport for UnreachableTransport {
        async fn send(&self, _request: &SignedRequest) -> Result<HttpResponse, EtradeError> {
            panic!("composer must not touch the transport");
        }
    }

    fn composer() -> (AuthorizedRequestComposer, Arc<AuthStateMachine>) {
        let config = Arc::new(EtradeConfig::new("ck", "cs", Environment::Sandbox));
        let machine = Arc::new(AuthStateMachine::new(
            config.clone(),
            Arc::new(UnreachableTransport),
            Arc::new(NullSink),
        ));
        (
            AuthorizedRequestComposer::new(config, machine.clone()),
            machine,
        )
    }

    #[tokio::test]
    async fn compose_fails_fast_when_unauthenticated() {
        let (composer, _) = composer();
        let err = composer
            .compose("GET", "https://apisb.etrade.com/v1/accounts/list", &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, EtradeError::Auth { .. }));
        assert!(err.must_reauthenticate());
    }

    #[tokio::test]
    async fn compose_signs_with_active_token() {
        let (composer, machine) = composer();
        machine.set_access_token(AccessToken::new("T1", "S1")).await;

        let query = vec![("detailFlag".to_string(), "ALL".to_string())];
        let request = composer
            .compose("GET", "https://apisb.etrade.com/v1/accounts/list", &query, None)
            .await
            .unwrap();

        assert_eq!(request.method, "GET");
        assert_eq!(
            request.url,
            "https://apisb.etrade.com/v1/accounts/list?detailFlag=ALL"
        );
        let authorization = &request.headers[0].1;
        assert!(authorization.contains("oauth_token=\"T1\""));
        assert!(authorization.contains("oauth_consumer_key=\"ck\""));
        assert!(request.headers.iter().any(|(k, v)| k == "Accept" && v == "application/json"));
        assert!(request.body.is_none());
    }

    #[tokio::test]
    async fn compose_uses_fresh_nonce_per_call() {
        let (composer, machine) = composer();
        machine.set_access_token(AccessToken::new("T1", "S1")).await;

        let first = composer
            .compose("GET", "https://apisb.etrade.com/v1/market/quote/AAPL", &[], None)
            .await
            .unwrap();
        let second = composer
            .compose("GET", "https://apisb.etrade.com/v1/market/quote/AAPL", &[], None)
            .await
            .unwrap();
        assert_ne!(first.headers[0].1, second.headers[0].1);
    }

    #[tokio::test]
    async fn compose_sets_content_type_for_json_bodies() {
        let (composer, machine) = composer();
        machine.set_access_token(AccessToken::new("T1", "S1")).await;

        let body = serde_json::json!({"PreviewOrderRequest": {}});
        let request = composer
            .compose(
                "POST",
                "https://apisb.etrade.com/v1/accounts/k1/orders/preview",
                &[],
                Some(body.clone()),
            )
            .await
            .unwrap();
        assert!(request
            .headers
            .iter()
            .any(|(k, v)| k == "Content-Type" && v == "application/json"));
        assert_eq!(request.body, Some(body));
    }

    #[test]
    fn full_url_encodes_query_values() {
        let query = vec![("symbols".to_string(), "BRK.B,AAPL".to_string())];
        let url = full_url("https://api.example.com/quote", &query);
        assert_eq!(url, "https://api.example.com/quote?symbols=BRK.B%2CAAPL");
    }
}
