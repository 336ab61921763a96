//! Typed errors for the E*Trade client core.
//!
//! Every error carries enough context (HTTP status, response body excerpt)
//! for callers to distinguish "must re-authenticate" from "retry later"
//! from "programmer error".

use thiserror::Error;

/// Maximum number of response-body characters carried inside an error.
const BODY_EXCERPT_LEN: usize = 256;

/// OAuth flow stage at which an auth failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStage {
    /// `POST /oauth/request_token`.
    RequestToken,
    /// `POST /oauth/access_token`.
    AccessToken,
    /// `POST /oauth/renew_access_token`.
    Renewal,
    /// `POST /oauth/revoke_access_token`.
    Revocation,
    /// Signing an outbound domain API request.
    Sign,
}

impl AuthStage {
    /// Stable identifier for the stage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RequestToken => "request_token",
            Self::AccessToken => "access_token",
            Self::Renewal => "renewal",
            Self::Revocation => "revocation",
            Self::Sign => "sign",
        }
    }
}

impl std::fmt::Display for AuthStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors from the E*Trade client core.
#[derive(Debug, Error, Clone)]
pub enum EtradeError {
    /// OAuth handshake failure (bad verifier, no pending request token,
    /// non-2xx from a token endpoint).
    #[error("OAuth {stage} failed: {message}")]
    Auth {
        /// Flow stage that failed.
        stage: AuthStage,
        /// What went wrong.
        message: String,
        /// HTTP status, when the failure came from a response.
        status: Option<u16>,
        /// Response body excerpt, when available.
        body: Option<String>,
    },

    /// Token invalid, expired, or revoked (detected reactively).
    #[error("Token error: {message}")]
    Token {
        /// What went wrong.
        message: String,
        /// True when the server reported the token expired or invalid.
        expired: bool,
    },

    /// Rate limited (429) after the transport retry budget was exhausted.
    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        /// Suggested retry delay in seconds.
        retry_after_secs: u64,
    },

    /// Malformed or missing fields in a token endpoint response, or an
    /// invalid value supplied by the caller.
    #[error("Validation error on {field}: {message}")]
    Validation {
        /// Field that failed validation.
        field: String,
        /// What went wrong.
        message: String,
    },

    /// Non-2xx response from a signed domain API call.
    #[error("API error {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Server-provided or derived message.
        message: String,
        /// Response body excerpt.
        body: String,
    },

    /// Transport-level failure (connect, timeout, unsupported method).
    #[error("Network error: {0}")]
    Network(String),

    /// Signature computation failure. Fatal, never retried.
    #[error("Signature error: {0}")]
    Signature(String),

    /// Token store I/O failure on save or clear.
    #[error("Token store error: {0}")]
    Store(String),
}

impl EtradeError {
    /// Auth failure with no response context.
    #[must_use]
    pub fn auth(stage: AuthStage, message: impl Into<String>) -> Self {
        Self::Auth {
            stage,
            message: message.into(),
            status: None,
            body: None,
        }
    }

    /// Auth failure from a non-2xx token endpoint response.
    #[must_use]
    pub fn auth_response(stage: AuthStage, status: u16, body: &str) -> Self {
        Self::Auth {
            stage,
            message: format!("unexpected status {status}"),
            status: Some(status),
            body: Some(excerpt(body)),
        }
    }

    /// Token failure.
    #[must_use]
    pub fn token(message: impl Into<String>, expired: bool) -> Self {
        Self::Token {
            message: message.into(),
            expired,
        }
    }

    /// Validation failure for a named field.
    #[must_use]
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// True when the caller must run the OAuth flow again before any
    /// further signed call can succeed.
    #[must_use]
    pub const fn must_reauthenticate(&self) -> bool {
        matches!(
            self,
            Self::Token { expired: true, .. } | Self::Auth { stage: AuthStage::Sign, .. }
        )
    }

    /// True when the operation may succeed if retried later, unchanged.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Network(_))
    }
}

/// Truncate a response body for inclusion in an error.
#[must_use]
pub(crate) fn excerpt(body: &str) -> String {
    if body.len() <= BODY_EXCERPT_LEN {
        return body.to_string();
    }
    let mut end = BODY_EXCERPT_LEN;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}
