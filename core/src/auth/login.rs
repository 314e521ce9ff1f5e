//! # Wallet Sign-In Flow
//!
//! The full challenge/response orchestration: validate the chain, find the
//! current nonce, check the signed message embeds it, verify the signature,
//! retire the nonce, then resolve or provision the identity and mint a
//! session.
//!
//! ## Ordering invariant
//!
//! The nonce is retired only *after* the signature verifies. A failed
//! signature leaves the challenge intact so the client can retry signing
//! without a fresh round trip. Retirement is an atomic take: if two requests
//! carry the same nonce past verification, exactly one retires it and the
//! other fails with `InvalidNonce` — a nonce authorizes at most one login.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::auth::nonce::{normalize_address, NonceStore};
use crate::auth::{signature, AuthError};
use crate::bindings::{BindResult, BindingStore, WalletKind};
use crate::config::{self, LOGIN_NONCE_WINDOW};
use crate::identity::{wallet_login_handle, IdentityId, IdentityProvider};

// ---------------------------------------------------------------------------
// Request / Response Types
// ---------------------------------------------------------------------------

/// A signed challenge submitted for sign-in.
#[derive(Clone, Debug, Deserialize)]
pub struct AuthRequest {
    /// Wallet address claiming to sign in.
    pub address: String,

    /// Chain identifier, e.g. `eip155:1`.
    pub chain: String,

    /// The full message text the wallet signed.
    pub message: String,

    /// 65-byte `personal_sign` signature, hex-encoded.
    pub signature: String,
}

/// Result of a successful sign-in.
#[derive(Clone, Debug, Serialize)]
pub struct AuthSuccess {
    /// The identity the wallet resolved to.
    pub identity_id: IdentityId,

    /// One-time session link minted by the identity platform.
    pub session_link: String,

    /// `true` when this sign-in provisioned a brand-new identity. The
    /// service layer keys first-time side effects (the signup credit grant)
    /// off this flag.
    pub new_identity: bool,
}

// ---------------------------------------------------------------------------
// WalletAuthenticator
// ---------------------------------------------------------------------------

/// Executes the wallet sign-in flow end to end.
#[derive(Clone)]
pub struct WalletAuthenticator {
    nonces: NonceStore,
    bindings: BindingStore,
    identity: Arc<dyn IdentityProvider>,
    window: Duration,
}

impl WalletAuthenticator {
    pub fn new(
        nonces: NonceStore,
        bindings: BindingStore,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            nonces,
            bindings,
            identity,
            window: LOGIN_NONCE_WINDOW,
        }
    }

    /// Overrides the nonce freshness window. Test hook.
    #[cfg(test)]
    pub(crate) fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Runs the sign-in flow for a signed challenge.
    pub async fn authenticate(&self, request: &AuthRequest) -> Result<AuthSuccess, AuthError> {
        if !config::is_supported_chain(&request.chain) {
            return Err(AuthError::UnsupportedChain(request.chain.clone()));
        }
        let address = normalize_address(&request.address);

        let nonce = self
            .nonces
            .current(&address, &request.chain, self.window)?
            .ok_or(AuthError::InvalidNonce)?;

        // The signed text must embed the literal challenge value. Without
        // this, a valid signature over any old message would pass.
        if !request.message.contains(&nonce.value) {
            return Err(AuthError::InvalidMessage);
        }

        let verified = signature::verify(&address, &request.message, &request.signature)
            .unwrap_or(false);
        if !verified {
            tracing::warn!(%address, chain = %request.chain, "sign-in signature rejected");
            return Err(AuthError::InvalidSignature);
        }

        // Atomic take: a concurrent request that got here first wins.
        if !self.nonces.retire(&nonce)? {
            return Err(AuthError::InvalidNonce);
        }

        let (identity_id, new_identity) = self.resolve_identity(&address, &request.chain).await?;
        let session_link = self.identity.issue_session_link(identity_id).await?;

        tracing::info!(
            identity = %identity_id,
            %address,
            chain = %request.chain,
            new_identity,
            "wallet sign-in succeeded"
        );
        Ok(AuthSuccess {
            identity_id,
            session_link,
            new_identity,
        })
    }

    /// Maps a verified wallet to its identity, provisioning one on first
    /// sign-in.
    ///
    /// Two first-time sign-ins racing on the same wallet both provision
    /// against the same deterministic handle (idempotent on the platform
    /// side) and then race the binding CAS; the loser adopts the winner's
    /// identity, so the wallet never ends up with two.
    async fn resolve_identity(
        &self,
        address: &str,
        chain: &str,
    ) -> Result<(IdentityId, bool), AuthError> {
        if let Some(binding) = self.bindings.get(address, chain)? {
            return Ok((binding.identity_id, false));
        }

        let handle = wallet_login_handle(address, chain);
        let provisioned = self.identity.create_identity(&handle).await?;

        match self.bindings.bind(provisioned, address, chain, WalletKind::Evm)? {
            BindResult::Created(binding) => Ok((binding.identity_id, true)),
            BindResult::Existing(binding) => Ok((binding.identity_id, false)),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
