//! Token models and token endpoint response parsing.

use serde::{Deserialize, Serialize};

use crate::error::EtradeError;

/// Access token used to sign domain API calls.
///
/// The only persisted secret. The server expires it at midnight US Eastern
/// with no machine-readable expiry returned to the client.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    /// Token value.
    pub token: String,
    /// Token secret.
    pub token_secret: String,
}

impl AccessToken {
    /// Create an access token.
    #[must_use]
    pub fn new(token: impl Into<String>, token_secret: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            token_secret: token_secret.into(),
        }
    }
}

// Token secrets stay out of debug output and logs.
impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &self.token)
            .field("token_secret", &"<redacted>")
            .finish()
    }
}

/// Request token plus the URL the user must visit to authorize it.
///
/// Transient and single-use: it exists only between the request-token and
/// access-token calls and is never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct RequestToken {
    /// Token value.
    pub token: String,
    /// Token secret.
    pub token_secret: String,
    /// User-facing authorization URL.
    pub authorization_url: String,
}

impl std::fmt::Debug for RequestToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestToken")
            .field("token", &self.token)
            .field("token_secret", &"<redacted>")
            .field("authorization_url", &self.authorization_url)
            .finish()
    }
}

/// Form-encoded body returned by the request-token and access-token
/// endpoints.
#[derive(Debug, Deserialize)]
struct TokenEndpointBody {
    #[serde(default)]
    oauth_token: Option<String>,
    #[serde(default)]
    oauth_token_secret: Option<String>,
}

/// Parsed token endpoint response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TokenPair {
    pub token: String,
    pub token_secret: String,
}

/// Parse `oauth_token` and `oauth_token_secret` out of a form-encoded
/// token endpoint response, validating both fields are present and
/// non-empty.
pub(crate) fn parse_token_response(body: &str) -> Result<TokenPair, EtradeError> {
    let parsed: TokenEndpointBody = serde_urlencoded::from_str(body)
        .map_err(|e| EtradeError::validation("token_response", e.to_string()))?;

    let token = parsed
        .oauth_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| EtradeError::validation("oauth_token", "missing or empty"))?;
    let token_secret = parsed
        .oauth_token_secret
        .filter(|s| !s.is_empty())
        .ok_or_else(|| EtradeError::validation("oauth_token_secret", "missing or empty"))?;

    Ok(TokenPair {
        token,
        token_secret,
    })
}
