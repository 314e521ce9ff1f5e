//! # Wallet Authentication
//!
//! The challenge/response protocol behind "sign in with wallet" and "link a
//! wallet to my account". The layers, bottom up:
//!
//! 1. **nonce** — single-use, time-bounded challenge values per
//!    (address, chain) pair.
//! 2. **signature** — EVM `personal_sign` verification: does this signature
//!    over this message recover to this address?
//! 3. **message** — the human-readable challenge text wallets display.
//! 4. **login** — the full sign-in orchestration (nonce, message, signature,
//!    identity resolution, session issuance).
//! 5. **link** — the session-gated variant that attaches a wallet to an
//!    existing identity.
//!
//! ## Why the nonce and the signature are separate concerns
//!
//! The nonce bounds *when* a signature is acceptable; the signature proves
//! *who* produced it. Conflating them invites bugs where a verifier accepts a
//! valid signature over an unrelated message against a stale cached nonce —
//! which is why the flows additionally require the signed message to embed
//! the literal nonce value.

pub mod link;
pub mod login;
pub mod message;
pub mod nonce;
pub mod signature;

pub use link::{LinkOutcome, WalletLinker};
pub use login::{AuthRequest, AuthSuccess, WalletAuthenticator};
pub use message::challenge_message;
pub use nonce::{normalize_address, NonceRecord, NonceStore};

use thiserror::Error;

/// Failure taxonomy for the wallet-auth flows.
///
/// Every variant maps to a stable machine-readable code via
/// [`AuthError::code`], so clients branch on codes instead of matching
/// strings. Variants marked internal are logged in full and surfaced
/// generically.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No current nonce for this (address, chain), the nonce expired, or a
    /// concurrent request consumed it first.
    #[error("challenge nonce is missing, expired, or already used")]
    InvalidNonce,

    /// The signature does not recover to the claimed address (or is
    /// malformed — clients get no oracle distinguishing the two).
    #[error("signature verification failed")]
    InvalidSignature,

    /// The submitted message does not embed the issued nonce value.
    #[error("message does not embed the issued challenge")]
    InvalidMessage,

    /// The chain identifier is not one this service verifies.
    #[error("unsupported chain: {0}")]
    UnsupportedChain(String),

    /// The caller presented no session credential, or an unresolvable one.
    /// Link flow only.
    #[error("caller is not authenticated")]
    Unauthenticated,

    /// The wallet is already bound to a different identity. Bindings are
    /// never transferred implicitly.
    #[error("wallet is already linked to another account")]
    WalletAlreadyLinked,

    /// Identity provisioning or session issuance failed. Internal.
    #[error("identity platform failure: {0}")]
    Provisioning(String),

    /// Storage layer failure. Internal.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl AuthError {
    /// Stable machine-readable code for client branching.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidNonce => "invalid_nonce",
            AuthError::InvalidSignature => "invalid_signature",
            AuthError::InvalidMessage => "invalid_message",
            AuthError::UnsupportedChain(_) => "unsupported_chain",
            AuthError::Unauthenticated => "unauthenticated",
            AuthError::WalletAlreadyLinked => "wallet_already_linked",
            AuthError::Provisioning(_) | AuthError::Storage(_) => "internal",
        }
    }

    /// `true` for failures that must not leak detail to the caller.
    pub fn is_internal(&self) -> bool {
        matches!(self, AuthError::Provisioning(_) | AuthError::Storage(_))
    }
}

impl From<crate::identity::IdentityError> for AuthError {
    fn from(e: crate::identity::IdentityError) -> Self {
        AuthError::Provisioning(e.to_string())
    }
}

impl From<crate::db::DbError> for AuthError {
    fn from(e: crate::db::DbError) -> Self {
        AuthError::Storage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        // These strings are wire contract. Changing one breaks clients.
        assert_eq!(AuthError::InvalidNonce.code(), "invalid_nonce");
        assert_eq!(AuthError::InvalidSignature.code(), "invalid_signature");
        assert_eq!(AuthError::InvalidMessage.code(), "invalid_message");
        assert_eq!(AuthError::Unauthenticated.code(), "unauthenticated");
        assert_eq!(AuthError::WalletAlreadyLinked.code(), "wallet_already_linked");
        assert_eq!(AuthError::UnsupportedChain("x".into()).code(), "unsupported_chain");
        assert_eq!(AuthError::Storage("x".into()).code(), "internal");
    }

    #[test]
    fn internal_variants_are_flagged() {
        assert!(AuthError::Storage("boom".into()).is_internal());
        assert!(AuthError::Provisioning("boom".into()).is_internal());
        assert!(!AuthError::InvalidNonce.is_internal());
        assert!(!AuthError::WalletAlreadyLinked.is_internal());
    }
}
