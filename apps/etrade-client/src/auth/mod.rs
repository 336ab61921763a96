//! OAuth 1.0a authentication core.
//!
//! Three pieces: a pure [`SignatureEngine`], token models with validated
//! endpoint response parsing, and the [`AuthStateMachine`] that owns the
//! token lifecycle.

mod machine;
pub mod signature;
mod tokens;

pub use machine::{AuthState, AuthStateMachine, RevokePolicy};
pub use signature::{SignRequest, SignatureEngine, SignedParams};
pub use tokens::{AccessToken, RequestToken};
