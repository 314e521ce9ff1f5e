//! # Identity Platform Contract
//!
//! WalletGate does not own user accounts. Identities, their login handles,
//! and session credentials live in an external identity/session platform;
//! this module defines the narrow contract the auth flows consume, and an
//! in-memory implementation used by tests and dev deployments.
//!
//! The contract is three operations:
//!
//! 1. `create_identity(seed_handle)` — provision an identity addressable by
//!    a deterministic handle (the auth flows derive it from the wallet).
//! 2. `issue_session_link(identity)` — mint a one-time sign-in link for an
//!    identity whose wallet ownership was just verified.
//! 3. `resolve_session(credential)` — map a bearer credential back to its
//!    identity, or nothing if the credential is unknown/expired.
//!
//! Network I/O to the real platform is the async suspension point of the
//! auth flows, hence the async trait even though the in-memory
//! implementation never awaits anything.

use async_trait::async_trait;
use dashmap::DashMap;
use rand::RngCore;
use thiserror::Error;
use uuid::Uuid;

/// Opaque identifier for an identity owned by the external platform.
pub type IdentityId = Uuid;

/// Errors surfaced by the identity platform.
///
/// Both variants are internal per the error-handling policy: they get logged
/// with full detail and surfaced to clients as a generic failure.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The platform refused or failed to provision an identity.
    #[error("identity provisioning failed: {0}")]
    Provisioning(String),

    /// The platform refused or failed to mint a session credential.
    #[error("session issuance failed: {0}")]
    SessionIssuance(String),
}

/// The contract of the external identity/session platform.
///
/// Implementations must be safe to call concurrently; the auth flows issue
/// overlapping requests without any serialization.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Provisions an identity for the given deterministic seed handle.
    ///
    /// Must be idempotent per handle: provisioning the same handle twice
    /// returns the same identity rather than creating a duplicate.
    async fn create_identity(&self, seed_handle: &str) -> Result<IdentityId, IdentityError>;

    /// Mints a one-time sign-in link (or opaque token) for the identity.
    /// Called only after wallet ownership has been verified.
    async fn issue_session_link(&self, identity: IdentityId) -> Result<String, IdentityError>;

    /// Resolves a bearer session credential to its identity.
    ///
    /// Returns `Ok(None)` for unknown or expired credentials — that is a
    /// client-correctable condition (`Unauthenticated`), not an error.
    async fn resolve_session(&self, credential: &str)
        -> Result<Option<IdentityId>, IdentityError>;
}

/// Derives the synthetic login handle for a wallet, so identities provisioned
/// through wallet sign-in are address-addressable in the platform.
///
/// The handle is deterministic: the same wallet always maps to the same
/// handle, which combined with idempotent provisioning guarantees a wallet
/// never fans out into duplicate identities.
pub fn wallet_login_handle(address: &str, chain: &str) -> String {
    format!("wallet:{chain}:{address}")
}

// ---------------------------------------------------------------------------
// In-Memory Implementation
// ---------------------------------------------------------------------------

/// Identity platform backed by process-local maps.
///
/// Used by the test suites and by `walletgate run` in dev mode, where a
/// hosted platform isn't wired up. Sessions never expire here; expiry is the
/// real platform's concern.
#[derive(Debug, Default)]
pub struct InMemoryIdentityProvider {
    /// seed handle -> identity.
    identities: DashMap<String, IdentityId>,
    /// session token -> identity.
    sessions: DashMap<String, IdentityId>,
}

impl InMemoryIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of identities provisioned so far. Test hook.
    pub fn identity_count(&self) -> usize {
        self.identities.len()
    }

    /// Extracts the bearer token from a session link minted by
    /// [`issue_session_link`](IdentityProvider::issue_session_link).
    pub fn token_from_link(link: &str) -> Option<&str> {
        link.split_once("token=").map(|(_, t)| t)
    }
}

#[async_trait]
impl IdentityProvider for InMemoryIdentityProvider {
    async fn create_identity(&self, seed_handle: &str) -> Result<IdentityId, IdentityError> {
        // entry() makes concurrent provisioning of the same handle converge
        // on a single identity.
        let id = *self
            .identities
            .entry(seed_handle.to_string())
            .or_insert_with(Uuid::new_v4);
        Ok(id)
    }

    async fn issue_session_link(&self, identity: IdentityId) -> Result<String, IdentityError> {
        let mut token_bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut token_bytes);
        let token = hex::encode(token_bytes);
        self.sessions.insert(token.clone(), identity);
        Ok(format!("https://walletgate.app/session?token={token}"))
    }

    async fn resolve_session(
        &self,
        credential: &str,
    ) -> Result<Option<IdentityId>, IdentityError> {
        Ok(self.sessions.get(credential).map(|entry| *entry.value()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
