//! # GateDb — Persistent Storage Engine
//!
//! The persistence layer for WalletGate, built on sled's embedded key-value
//! store. All on-disk data flows through this module.
//!
//! ## Tree Layout
//!
//! sled organizes data into named "trees" (analogous to tables). Each tree is
//! an independent B+ tree with its own keyspace:
//!
//! | Tree              | Key                                   | Value                        |
//! |-------------------|---------------------------------------|------------------------------|
//! | `auth_nonces`     | `address \0 chain \0 issued_at (8B BE)` | `bincode(NonceRecord)`     |
//! | `wallet_bindings` | `address \0 chain`                    | `bincode(WalletBinding)`     |
//! | `credit_balances` | `identity_id` (16B UUID)              | `bincode(BalanceRecord)`     |
//! | `credit_entries`  | `identity_id (16B) ++ seq (8B BE)`    | `bincode(CreditTransaction)` |
//!
//! Timestamps and sequence numbers are stored big-endian so sled's
//! lexicographic ordering matches numeric ordering — prefix scans then yield
//! records in issue/append order for free.
//!
//! ## Atomicity
//!
//! The stores built on top of this module never do read-modify-write from
//! the caller's side. Nonce consumption is an atomic `remove`, binding
//! insertion is a `compare_and_swap`, and ledger mutations run inside
//! multi-tree sled transactions. `GateDb` itself only hands out trees.

use sled::{Db, Tree};
use std::path::Path;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type DbResult<T> = Result<T, DbError>;

// ---------------------------------------------------------------------------
// Tree Names
// ---------------------------------------------------------------------------

/// Challenge nonces issued for (address, chain) pairs.
pub const TREE_AUTH_NONCES: &str = "auth_nonces";

/// Wallet-to-identity bindings, keyed by (address, chain).
pub const TREE_WALLET_BINDINGS: &str = "wallet_bindings";

/// Per-identity credit balance records.
pub const TREE_CREDIT_BALANCES: &str = "credit_balances";

/// Append-only credit transaction log.
pub const TREE_CREDIT_ENTRIES: &str = "credit_entries";

/// Separator between the variable-length components of composite keys.
/// NUL can't appear in an address or a chain id, so keys parse unambiguously.
pub const KEY_SEPARATOR: u8 = 0;

// ---------------------------------------------------------------------------
// GateDb
// ---------------------------------------------------------------------------

/// Persistent storage engine for WalletGate.
///
/// Wraps a sled `Db` instance and hands out the named trees the domain
/// stores operate on. All serialization uses bincode for compactness.
///
/// # Thread Safety
///
/// sled is inherently thread-safe — trees support lock-free concurrent reads
/// and serialized writes. `GateDb` can be shared across threads via
/// `Arc<GateDb>` (or plain `Clone`, which is cheap) without external
/// synchronization.
#[derive(Debug, Clone)]
pub struct GateDb {
    /// The underlying sled database handle.
    db: Db,
}

impl GateDb {
    /// Open or create a database at the given filesystem path.
    ///
    /// If the directory doesn't exist, sled creates it. If the database
    /// already exists, all existing data is available immediately.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Create a temporary database that lives in memory and is cleaned up
    /// automatically when dropped.
    ///
    /// Ideal for unit tests — no filesystem side effects, no cleanup needed.
    pub fn open_temporary() -> DbResult<Self> {
        let config = sled::Config::new().temporary(true);
        let db = config.open()?;
        Ok(Self { db })
    }

    /// Open a named sled tree from the underlying database.
    ///
    /// The domain stores ([`NonceStore`](crate::auth::nonce::NonceStore),
    /// [`BindingStore`](crate::bindings::BindingStore),
    /// [`CreditLedger`](crate::ledger::CreditLedger)) each open their own
    /// trees through this. A tree is created on first open.
    pub fn open_tree(&self, name: &str) -> DbResult<Tree> {
        Ok(self.db.open_tree(name)?)
    }

    /// Force a flush of all pending writes to disk.
    ///
    /// sled buffers writes in memory for performance. This call blocks until
    /// all data is durable on the underlying storage device.
    pub fn flush(&self) -> DbResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

/// Builds a composite key from variable-length string components, joined by
/// [`KEY_SEPARATOR`].
pub fn composite_key(parts: &[&str]) -> Vec<u8> {
    let mut key = Vec::with_capacity(parts.iter().map(|p| p.len() + 1).sum());
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            key.push(KEY_SEPARATOR);
        }
        key.extend_from_slice(part.as_bytes());
    }
    key
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_temporary_database() {
        let db = GateDb::open_temporary().expect("should create temp db");
        let tree = db.open_tree(TREE_AUTH_NONCES).unwrap();
        assert_eq!(tree.len(), 0);
    }

    #[test]
    fn open_persistent_database() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = GateDb::open(dir.path()).expect("should open db");
        let tree = db.open_tree(TREE_CREDIT_BALANCES).unwrap();
        tree.insert(b"k", b"v").unwrap();
        db.flush().unwrap();
        drop(tree);
        drop(db);

        // Re-open to verify persistence.
        let db2 = GateDb::open(dir.path()).expect("should reopen db");
        let tree2 = db2.open_tree(TREE_CREDIT_BALANCES).unwrap();
        assert_eq!(tree2.get(b"k").unwrap().unwrap().as_ref(), b"v");
    }

    #[test]
    fn trees_are_independent_keyspaces() {
        let db = GateDb::open_temporary().unwrap();
        let a = db.open_tree(TREE_AUTH_NONCES).unwrap();
        let b = db.open_tree(TREE_WALLET_BINDINGS).unwrap();

        a.insert(b"same_key", b"from_a").unwrap();
        b.insert(b"same_key", b"from_b").unwrap();

        assert_eq!(a.get(b"same_key").unwrap().unwrap().as_ref(), b"from_a");
        assert_eq!(b.get(b"same_key").unwrap().unwrap().as_ref(), b"from_b");
    }

    #[test]
    fn composite_keys_are_unambiguous() {
        let ab_c = composite_key(&["ab", "c"]);
        let a_bc = composite_key(&["a", "bc"]);
        assert_ne!(ab_c, a_bc);
        assert_eq!(ab_c, b"ab\0c");
    }

    #[test]
    fn composite_key_prefix_scanning_order() {
        // Big-endian suffixes after a composite prefix must sort numerically.
        let db = GateDb::open_temporary().unwrap();
        let tree = db.open_tree("scratch").unwrap();

        let mut prefix = composite_key(&["0xabc", "eip155:1"]);
        prefix.push(KEY_SEPARATOR);
        for ts in [3u64, 1, 2] {
            let mut key = prefix.clone();
            key.extend_from_slice(&ts.to_be_bytes());
            tree.insert(key, &ts.to_be_bytes()).unwrap();
        }

        let values: Vec<u64> = tree
            .scan_prefix(&prefix)
            .map(|r| {
                let (_, v) = r.unwrap();
                u64::from_be_bytes(v.as_ref().try_into().unwrap())
            })
            .collect();
        assert_eq!(values, vec![1, 2, 3]);
    }
}
