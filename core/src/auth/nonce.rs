//! # Challenge Nonce Store
//!
//! Issues unpredictable, single-use challenge values scoped to an
//! (address, chain) pair and answers freshness queries about them.
//!
//! ## Lifecycle
//!
//! A nonce is *issued* on challenge request, *fetched* when a signed message
//! comes back, and *retired* (deleted) only after the signature verifies —
//! two-phase consumption, so a failed signature check doesn't burn the
//! challenge and force the client through another round trip.
//!
//! Issuing does not invalidate prior nonces. Only the most recently issued
//! record within the freshness window is ever accepted, which makes client
//! retries ("request a fresh challenge") always safe at the cost of a short
//! overlap where an older nonce is still on disk. That overlap is harmless:
//! acceptance also requires the literal nonce value to appear in the signed
//! message, and retirement is an atomic take.
//!
//! ## Key layout
//!
//! `address \0 chain \0 issued_at_millis (8B BE)` — the big-endian timestamp
//! suffix means a prefix scan yields records oldest-first, so "most recent"
//! is the last element of the range.

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sled::Tree;
use std::time::Duration;

use crate::config::NONCE_ENTROPY_BYTES;
use crate::db::{composite_key, DbError, GateDb, KEY_SEPARATOR, TREE_AUTH_NONCES};

// ---------------------------------------------------------------------------
// NonceRecord
// ---------------------------------------------------------------------------

/// A persisted challenge nonce.
///
/// Exclusively owned by [`NonceStore`] — no other component mutates these.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceRecord {
    /// Normalized (lower-case) wallet address the challenge was issued for.
    pub address: String,

    /// Chain identifier, e.g. `eip155:1`.
    pub chain: String,

    /// The unguessable challenge value, hex-encoded.
    pub value: String,

    /// When this nonce was issued. Also embedded in the storage key.
    pub issued_at: DateTime<Utc>,
}

impl NonceRecord {
    /// Returns `true` if this record is still within the given freshness
    /// window as of `now`.
    pub fn is_fresh(&self, window: Duration, now: DateTime<Utc>) -> bool {
        let age_ms = now.timestamp_millis() - self.issued_at.timestamp_millis();
        age_ms >= 0 && (age_ms as u128) <= window.as_millis()
    }

    /// The storage key for this record.
    fn storage_key(&self) -> Vec<u8> {
        let mut key = composite_key(&[&self.address, &self.chain]);
        key.push(KEY_SEPARATOR);
        key.extend_from_slice(&(self.issued_at.timestamp_millis() as u64).to_be_bytes());
        key
    }
}

/// Canonicalizes a wallet address: trimmed and lower-cased.
///
/// EVM addresses are case-insensitive hex (EIP-55 checksumming is a display
/// concern); storing one canonical form keeps (address, chain) lookups exact.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_ascii_lowercase()
}

// ---------------------------------------------------------------------------
// NonceStore
// ---------------------------------------------------------------------------

/// Issues and retires challenge nonces.
///
/// Cheap to clone — the sled tree handle is reference-counted.
#[derive(Clone)]
pub struct NonceStore {
    tree: Tree,
}

impl NonceStore {
    /// Opens the nonce tree from the database.
    pub fn new(db: &GateDb) -> Result<Self, DbError> {
        Ok(Self {
            tree: db.open_tree(TREE_AUTH_NONCES)?,
        })
    }

    /// Issues a fresh challenge nonce for an (address, chain) pair.
    ///
    /// The address is normalized before storage. Prior unexpired nonces are
    /// left in place — callers always validate against the most recent
    /// record, so issuing is safe to repeat.
    pub fn issue(&self, address: &str, chain: &str) -> Result<NonceRecord, DbError> {
        let mut entropy = vec![0u8; NONCE_ENTROPY_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut entropy);

        let record = NonceRecord {
            address: normalize_address(address),
            chain: chain.to_string(),
            value: hex::encode(entropy),
            issued_at: Utc::now(),
        };

        let bytes = bincode::serialize(&record)
            .map_err(|e| DbError::Serialization(e.to_string()))?;
        self.tree.insert(record.storage_key(), bytes)?;

        tracing::debug!(
            address = %record.address,
            chain = %record.chain,
            "challenge nonce issued"
        );
        Ok(record)
    }

    /// Fetch phase of two-phase consumption: returns the most recently
    /// issued nonce for (address, chain) iff it is younger than `window`.
    ///
    /// Returns `Ok(None)` when no record exists or the latest one has
    /// expired — callers surface that as `InvalidNonce`. This method never
    /// deletes anything; retirement is explicit and happens only after the
    /// caller's signature verification succeeds.
    pub fn current(
        &self,
        address: &str,
        chain: &str,
        window: Duration,
    ) -> Result<Option<NonceRecord>, DbError> {
        let prefix = self.pair_prefix(address, chain);

        // Latest record = last key in the prefix range (BE timestamp suffix).
        let Some(entry) = self.tree.scan_prefix(&prefix).next_back() else {
            return Ok(None);
        };
        let (_, bytes) = entry?;
        let record: NonceRecord = bincode::deserialize(&bytes)
            .map_err(|e| DbError::Serialization(e.to_string()))?;

        if record.is_fresh(window, Utc::now()) {
            Ok(Some(record))
        } else {
            Ok(None)
        }
    }

    /// Retires a consumed nonce: an atomic take.
    ///
    /// Returns `true` iff this caller actually removed the record. Under two
    /// racing verifications of the same nonce, exactly one caller observes
    /// `true`; the flows treat `false` as `InvalidNonce`, which closes the
    /// replay window entirely (the stricter of the two consumption
    /// strategies).
    pub fn retire(&self, record: &NonceRecord) -> Result<bool, DbError> {
        let taken = self.tree.remove(record.storage_key())?.is_some();
        if taken {
            tracing::debug!(
                address = %record.address,
                chain = %record.chain,
                "challenge nonce retired"
            );
        }
        Ok(taken)
    }

    /// Housekeeping sweep: deletes every record older than `window`.
    ///
    /// Expired nonces are already unusable — `current` ignores them — so
    /// this only reclaims space. Returns the number of records removed.
    pub fn purge_expired(&self, window: Duration) -> Result<usize, DbError> {
        let now = Utc::now();
        let mut purged = 0;
        for entry in self.tree.iter() {
            let (key, bytes) = entry?;
            let record: NonceRecord = bincode::deserialize(&bytes)
                .map_err(|e| DbError::Serialization(e.to_string()))?;
            if !record.is_fresh(window, now) {
                self.tree.remove(key)?;
                purged += 1;
            }
        }
        Ok(purged)
    }

    /// Number of stored nonce records (all pairs, fresh or not).
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Prefix covering every record for one (address, chain) pair.
    fn pair_prefix(&self, address: &str, chain: &str) -> Vec<u8> {
        let mut prefix = composite_key(&[&normalize_address(address), chain]);
        prefix.push(KEY_SEPARATOR);
        prefix
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: &str = "0xAbC0000000000000000000000000000000000001";
    const CHAIN: &str = "eip155:1";
    const WINDOW: Duration = Duration::from_secs(300);

    fn store() -> NonceStore {
        let db = GateDb::open_temporary().unwrap();
        NonceStore::new(&db).unwrap()
    }

    #[test]
    fn issue_normalizes_address() {
        let nonces = store();
        let record = nonces.issue(ADDR, CHAIN).unwrap();
        assert_eq!(record.address, ADDR.to_ascii_lowercase());
    }

    #[test]
    fn issued_nonce_is_current() {
        let nonces = store();
        let issued = nonces.issue(ADDR, CHAIN).unwrap();

        let current = nonces.current(ADDR, CHAIN, WINDOW).unwrap().unwrap();
        assert_eq!(current, issued);
    }

    #[test]
    fn nonce_values_are_unique_and_sized() {
        let nonces = store();
        let a = nonces.issue(ADDR, CHAIN).unwrap();
        let b = nonces.issue(ADDR, CHAIN).unwrap();
        assert_ne!(a.value, b.value);
        assert_eq!(a.value.len(), NONCE_ENTROPY_BYTES * 2); // hex doubles
    }

    #[test]
    fn current_returns_most_recent() {
        let nonces = store();
        nonces.issue(ADDR, CHAIN).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = nonces.issue(ADDR, CHAIN).unwrap();

        let current = nonces.current(ADDR, CHAIN, WINDOW).unwrap().unwrap();
        assert_eq!(current.value, second.value);
    }

    #[test]
    fn current_is_scoped_per_pair() {
        let nonces = store();
        nonces.issue(ADDR, CHAIN).unwrap();

        assert!(nonces.current(ADDR, "eip155:137", WINDOW).unwrap().is_none());
        assert!(nonces
            .current("0xdead000000000000000000000000000000000000", CHAIN, WINDOW)
            .unwrap()
            .is_none());
    }

    #[test]
    fn lookup_is_case_insensitive_on_address() {
        let nonces = store();
        let issued = nonces.issue(ADDR, CHAIN).unwrap();

        let via_upper = nonces
            .current(&ADDR.to_ascii_uppercase().replace("0X", "0x"), CHAIN, WINDOW)
            .unwrap()
            .unwrap();
        assert_eq!(via_upper.value, issued.value);
    }

    #[test]
    fn expired_nonce_is_not_current() {
        let nonces = store();
        nonces.issue(ADDR, CHAIN).unwrap();

        // A zero-length window expires everything immediately.
        assert!(nonces
            .current(ADDR, CHAIN, Duration::from_millis(0))
            .unwrap()
            .is_none());
    }

    #[test]
    fn retire_is_an_atomic_take() {
        let nonces = store();
        let record = nonces.issue(ADDR, CHAIN).unwrap();

        assert!(nonces.retire(&record).unwrap());
        // Second retire of the same record loses the race.
        assert!(!nonces.retire(&record).unwrap());
        assert!(nonces.current(ADDR, CHAIN, WINDOW).unwrap().is_none());
    }

    #[test]
    fn retire_leaves_other_nonces_alone() {
        let nonces = store();
        let old = nonces.issue(ADDR, CHAIN).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let newer = nonces.issue(ADDR, CHAIN).unwrap();

        assert!(nonces.retire(&newer).unwrap());

        // The older record is still on disk (and, being latest now, current).
        let current = nonces.current(ADDR, CHAIN, WINDOW).unwrap().unwrap();
        assert_eq!(current.value, old.value);
    }

    #[test]
    fn purge_removes_only_expired() {
        let nonces = store();
        nonces.issue(ADDR, CHAIN).unwrap();
        nonces.issue("0xdead000000000000000000000000000000000000", CHAIN).unwrap();

        // Nothing is older than five minutes.
        assert_eq!(nonces.purge_expired(WINDOW).unwrap(), 0);
        assert_eq!(nonces.len(), 2);

        // Everything is older than zero milliseconds.
        assert_eq!(nonces.purge_expired(Duration::from_millis(0)).unwrap(), 2);
        assert!(nonces.is_empty());
    }

    #[test]
    fn freshness_math() {
        let now = Utc::now();
        let record = NonceRecord {
            address: "0xabc".into(),
            chain: CHAIN.into(),
            value: "aa".into(),
            issued_at: now - chrono::Duration::seconds(299),
        };
        assert!(record.is_fresh(WINDOW, now));

        let stale = NonceRecord {
            issued_at: now - chrono::Duration::seconds(301),
            ..record
        };
        assert!(!stale.is_fresh(WINDOW, now));
    }
}
