//! # Wallet Bindings
//!
//! The persistent association between a wallet (address, chain) and the
//! identity that proved ownership of it. One wallet maps to at most one
//! identity; one identity may hold many wallets.
//!
//! Uniqueness is enforced at the storage layer with compare-and-swap, not by
//! a check-then-insert in the flows — two racing link attempts for the same
//! wallet resolve to exactly one binding no matter how they interleave.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::Tree;

use crate::auth::nonce::normalize_address;
use crate::db::{composite_key, DbError, GateDb, TREE_WALLET_BINDINGS};
use crate::identity::IdentityId;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Wallet families the verifier understands. EVM-only today; the enum exists
/// so stored bindings don't need a migration when another family lands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletKind {
    Evm,
}

/// A wallet attached to an identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletBinding {
    /// Owning identity.
    pub identity_id: IdentityId,

    /// Normalized wallet address.
    pub address: String,

    /// Chain identifier, e.g. `eip155:1`.
    pub chain: String,

    /// Wallet family.
    pub kind: WalletKind,

    /// When ownership was first proven.
    pub linked_at: DateTime<Utc>,
}

/// Outcome of [`BindingStore::bind`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BindResult {
    /// The binding was inserted; this caller won.
    Created(WalletBinding),

    /// A binding already existed for this wallet. Carries the existing
    /// binding — the caller decides whether that's idempotent success (same
    /// identity) or a conflict (different identity).
    Existing(WalletBinding),
}

// ---------------------------------------------------------------------------
// BindingStore
// ---------------------------------------------------------------------------

/// Reads and writes wallet bindings.
///
/// Cheap to clone — the sled tree handle is reference-counted.
#[derive(Clone)]
pub struct BindingStore {
    tree: Tree,
}

impl BindingStore {
    /// Opens the bindings tree from the database.
    pub fn new(db: &GateDb) -> Result<Self, DbError> {
        Ok(Self {
            tree: db.open_tree(TREE_WALLET_BINDINGS)?,
        })
    }

    /// Looks up the binding for a wallet, if any.
    pub fn get(&self, address: &str, chain: &str) -> Result<Option<WalletBinding>, DbError> {
        let key = binding_key(address, chain);
        let Some(bytes) = self.tree.get(key)? else {
            return Ok(None);
        };
        let binding = bincode::deserialize(&bytes)
            .map_err(|e| DbError::Serialization(e.to_string()))?;
        Ok(Some(binding))
    }

    /// Attempts to bind a wallet to an identity.
    ///
    /// The insert is a compare-and-swap against an absent key, so under
    /// concurrent attempts exactly one caller gets [`BindResult::Created`];
    /// everyone else gets [`BindResult::Existing`] with the winner's binding.
    /// An existing binding is never overwritten or transferred here.
    pub fn bind(
        &self,
        identity_id: IdentityId,
        address: &str,
        chain: &str,
        kind: WalletKind,
    ) -> Result<BindResult, DbError> {
        let address = normalize_address(address);
        let key = binding_key(&address, chain);

        let binding = WalletBinding {
            identity_id,
            address,
            chain: chain.to_string(),
            kind,
            linked_at: Utc::now(),
        };
        let bytes = bincode::serialize(&binding)
            .map_err(|e| DbError::Serialization(e.to_string()))?;

        match self.tree.compare_and_swap(&key, None as Option<&[u8]>, Some(bytes))? {
            Ok(()) => {
                tracing::info!(
                    identity = %binding.identity_id,
                    address = %binding.address,
                    chain = %binding.chain,
                    "wallet bound to identity"
                );
                Ok(BindResult::Created(binding))
            }
            Err(cas) => {
                // Lost the race (or the wallet was bound long ago). Hand the
                // caller the current occupant.
                let current = cas
                    .current
                    .ok_or_else(|| DbError::Serialization("binding vanished mid-swap".into()))?;
                let existing = bincode::deserialize(&current)
                    .map_err(|e| DbError::Serialization(e.to_string()))?;
                Ok(BindResult::Existing(existing))
            }
        }
    }

    /// Every wallet bound to the given identity.
    ///
    /// Full scan — binding counts per identity are small (a handful of
    /// wallets), and the tree is keyed for the wallet-to-identity direction
    /// the hot paths need.
    pub fn wallets_of(&self, identity_id: IdentityId) -> Result<Vec<WalletBinding>, DbError> {
        let mut out = Vec::new();
        for entry in self.tree.iter() {
            let (_, bytes) = entry?;
            let binding: WalletBinding = bincode::deserialize(&bytes)
                .map_err(|e| DbError::Serialization(e.to_string()))?;
            if binding.identity_id == identity_id {
                out.push(binding);
            }
        }
        Ok(out)
    }

    /// Number of bindings stored. Test hook.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

/// Storage key for a wallet: `address \0 chain`, address normalized.
fn binding_key(address: &str, chain: &str) -> Vec<u8> {
    composite_key(&[&normalize_address(address), chain])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
