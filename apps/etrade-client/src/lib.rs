// Allow unwrap/expect in tests - tests should panic on unexpected errors
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::too_many_lines,
        clippy::items_after_statements
    )
)]

//! Typed client core for the E*Trade REST API.
//!
//! The hard part of talking to E*Trade is OAuth 1.0a: every request must
//! be individually signed, tokens expire at midnight US Eastern with no
//! machine-readable expiry, and the three-legged handshake has to be
//! coordinated with durable token storage. This crate owns that core and
//! nothing else; endpoint wrappers (accounts, market data, orders) layer
//! on top of [`EtradeClient::send`].
//!
//! # Layout
//!
//! - `auth`: signature engine, token models, lifecycle state machine
//! - `store`: pluggable token persistence (file-backed default)
//! - `transport`: single-attempt send port (reqwest default)
//! - `compose`: per-call signing of domain requests
//! - `client`: the facade tying it together
//! - `observe`: injected structured event sink (no global logger state)
//!
//! # Example
//!
//! ```no_run
//! use etrade_client::{Environment, EtradeClient, EtradeConfig};
//!
//! # async fn flow() -> Result<(), etrade_client::EtradeError> {
//! let config = EtradeConfig::from_env(Environment::Sandbox)?;
//! let client = EtradeClient::new(config);
//!
//! if !client.load_token().await {
//!     let request = client.request_token().await?;
//!     println!("authorize at: {}", request.authorization_url);
//!     // ... user enters the verifier code ...
//!     client.exchange_verifier("12345").await?;
//!     client.save_token().await?;
//! }
//!
//! let accounts = client.get("/accounts/list", &[]).await?;
//! # let _ = accounts;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

/// OAuth 1.0a signing and token lifecycle.
pub mod auth;

/// Client facade.
pub mod client;

/// Per-call signing of domain requests.
pub mod compose;

/// Environment, credentials, and retry configuration.
pub mod config;

/// Typed error surface.
pub mod error;

/// Injected observability sink.
pub mod observe;

/// Durable token persistence.
pub mod store;

/// Transport port and reqwest default.
pub mod transport;

pub use auth::{AccessToken, AuthState, AuthStateMachine, RequestToken, RevokePolicy, SignatureEngine};
pub use client::{EtradeClient, EtradeClientBuilder};
pub use compose::AuthorizedRequestComposer;
pub use config::{Environment, EtradeConfig, RetryConfig};
pub use error::{AuthStage, EtradeError};
pub use observe::{AuthEvent, AuthSink, NullSink, TracingSink};
pub use store::{FileTokenStore, TokenStore};
pub use transport::{HttpResponse, HttpTransport, SignedRequest, Transport};
