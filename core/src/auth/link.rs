//! # Wallet Link Flow
//!
//! Attaches an additional wallet to an identity that is *already* signed in.
//! Same challenge/response skeleton as sign-in, with two differences:
//!
//! - The caller must present a resolvable session credential, checked before
//!   any signature work. An unauthenticated caller learns nothing about
//!   nonces or bindings.
//! - No identity is ever provisioned. The binding either attaches to the
//!   session's identity, is already there (idempotent success), or belongs
//!   to someone else (conflict, binding untouched).

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::auth::login::AuthRequest;
use crate::auth::nonce::{normalize_address, NonceStore};
use crate::auth::{signature, AuthError};
use crate::bindings::{BindResult, BindingStore, WalletKind};
use crate::config::{self, LINK_NONCE_WINDOW};
use crate::identity::{IdentityId, IdentityProvider};

/// How a link request resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkOutcome {
    /// The wallet is now bound to the caller's identity.
    Linked,

    /// The wallet was already bound to the caller's identity. Re-linking
    /// your own wallet is a no-op, not an error.
    AlreadyLinked,
}

/// Executes the session-gated wallet link flow.
#[derive(Clone)]
pub struct WalletLinker {
    nonces: NonceStore,
    bindings: BindingStore,
    identity: Arc<dyn IdentityProvider>,
    window: Duration,
}

impl WalletLinker {
    pub fn new(
        nonces: NonceStore,
        bindings: BindingStore,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            nonces,
            bindings,
            identity,
            // Linking is a settings-page flow, not a login wall; users wander
            // off to their wallet app, so the challenge lives longer.
            window: LINK_NONCE_WINDOW,
        }
    }

    /// Links the wallet in `request` to the identity behind `credential`.
    pub async fn link(
        &self,
        credential: &str,
        request: &AuthRequest,
    ) -> Result<(IdentityId, LinkOutcome), AuthError> {
        // Session first. Everything else is unreachable without one.
        let identity_id = self
            .identity
            .resolve_session(credential)
            .await?
            .ok_or(AuthError::Unauthenticated)?;

        if !config::is_supported_chain(&request.chain) {
            return Err(AuthError::UnsupportedChain(request.chain.clone()));
        }
        let address = normalize_address(&request.address);

        let nonce = self
            .nonces
            .current(&address, &request.chain, self.window)?
            .ok_or(AuthError::InvalidNonce)?;
        if !request.message.contains(&nonce.value) {
            return Err(AuthError::InvalidMessage);
        }

        let verified = signature::verify(&address, &request.message, &request.signature)
            .unwrap_or(false);
        if !verified {
            tracing::warn!(
                identity = %identity_id,
                %address,
                chain = %request.chain,
                "link signature rejected"
            );
            return Err(AuthError::InvalidSignature);
        }

        if !self.nonces.retire(&nonce)? {
            return Err(AuthError::InvalidNonce);
        }

        match self.bindings.bind(identity_id, &address, &request.chain, WalletKind::Evm)? {
            BindResult::Created(_) => Ok((identity_id, LinkOutcome::Linked)),
            BindResult::Existing(existing) if existing.identity_id == identity_id => {
                Ok((identity_id, LinkOutcome::AlreadyLinked))
            }
            BindResult::Existing(existing) => {
                tracing::warn!(
                    identity = %identity_id,
                    owner = %existing.identity_id,
                    %address,
                    "link refused: wallet bound elsewhere"
                );
                Err(AuthError::WalletAlreadyLinked)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
