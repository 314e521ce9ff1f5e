//! # Credit Ledger
//!
//! Per-identity credit balances plus an append-only transaction log, with one
//! hard rule: a balance never goes negative, no matter how many debits race.
//!
//! ## Atomicity
//!
//! Every mutation runs inside a multi-tree sled transaction covering both the
//! balance tree and the entry tree. The conditional check ("is the balance
//! sufficient?"), the decrement, and the log append commit together or not at
//! all — there is no window where the balance moved but the log didn't, and
//! two racing debits against a balance that covers only one serialize so that
//! exactly one commits.
//!
//! ## Log layout
//!
//! Entries are keyed `identity_id (16B) ++ seq (8B BE)`, where `seq` is a
//! per-identity counter carried on the balance record and bumped inside the
//! same transaction. A prefix scan over an identity yields its history in
//! append order; reversed, newest-first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Transactional, Tree};
use thiserror::Error;

use crate::config::MAX_TRANSACTION_PAGE;
use crate::db::{DbError, GateDb, TREE_CREDIT_BALANCES, TREE_CREDIT_ENTRIES};
use crate::identity::IdentityId;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Why a ledger entry exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// One-time grant at account provisioning.
    SignupGrant,

    /// Credits consumed by product usage.
    Usage,

    /// Credits purchased or otherwise added.
    TopUp,

    /// Manual operator correction.
    Adjustment,
}

/// A single entry in the append-only log. Never mutated after commit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditTransaction {
    /// Identity whose balance this entry moved.
    pub identity_id: IdentityId,

    /// Per-identity sequence number, strictly increasing from 1.
    pub seq: u64,

    /// Signed delta: positive for grants/top-ups, negative for usage.
    pub amount: i64,

    /// Category of the movement.
    pub kind: TransactionKind,

    /// Human-readable reason, e.g. `"report generation"`.
    pub description: String,

    /// Optional correlation id tying the entry to the session or request
    /// that caused it.
    pub related_session_id: Option<String>,

    /// Commit time.
    pub created_at: DateTime<Utc>,
}

/// The current balance for an identity. Internal to the ledger; callers see
/// plain `u64` balances.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct BalanceRecord {
    identity_id: IdentityId,
    credits: u64,
    /// Sequence number of the most recent log entry.
    tx_seq: u64,
    updated_at: DateTime<Utc>,
}

/// Errors surfaced by ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The debit would overdraw the balance. Carries both sides so callers
    /// can report the shortfall.
    #[error("insufficient credits: {available} available, {requested} requested")]
    InsufficientCredits { available: u64, requested: u64 },

    /// No balance record exists for this identity.
    #[error("identity {0} has no credit account")]
    IdentityNotProvisioned(IdentityId),

    /// The amount is zero or exceeds the representable delta.
    #[error("amount must be positive and at most {}", i64::MAX)]
    InvalidAmount,

    /// A credit would overflow the balance counter.
    #[error("balance overflow")]
    Overflow,

    #[error("storage failure: {0}")]
    Db(String),

    #[error("serialization failure: {0}")]
    Serialization(String),
}

impl LedgerError {
    /// Stable machine-readable code for client branching.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InsufficientCredits { .. } => "insufficient_credits",
            LedgerError::IdentityNotProvisioned(_) => "not_provisioned",
            LedgerError::InvalidAmount | LedgerError::Overflow => "invalid_amount",
            LedgerError::Db(_) | LedgerError::Serialization(_) => "internal",
        }
    }
}

impl From<DbError> for LedgerError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::Sled(e) => LedgerError::Db(e.to_string()),
            DbError::Serialization(s) => LedgerError::Serialization(s),
        }
    }
}

impl From<sled::Error> for LedgerError {
    fn from(e: sled::Error) -> Self {
        LedgerError::Db(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// CreditLedger
// ---------------------------------------------------------------------------

/// Balance store plus append-only log, mutated transactionally.
///
/// Cheap to clone — sled tree handles are reference-counted.
#[derive(Clone)]
pub struct CreditLedger {
    balances: Tree,
    entries: Tree,
}

impl CreditLedger {
    /// Opens the ledger trees from the database.
    pub fn new(db: &GateDb) -> Result<Self, DbError> {
        Ok(Self {
            balances: db.open_tree(TREE_CREDIT_BALANCES)?,
            entries: db.open_tree(TREE_CREDIT_ENTRIES)?,
        })
    }

    /// Creates the credit account for an identity with an initial grant.
    ///
    /// Idempotent: if the account already exists, nothing changes and the
    /// existing balance is returned. Called on the first-sign-in path, which
    /// can race with itself; the transaction makes the duplicate a no-op.
    pub fn provision(&self, identity_id: IdentityId, grant: u64) -> Result<u64, LedgerError> {
        let result = (&self.balances, &self.entries).transaction(|(balances, entries)| {
            let key = identity_id.as_bytes().to_vec();
            if let Some(bytes) = balances.get(&key)? {
                let existing: BalanceRecord = deserialize(&bytes)?;
                return Ok(existing.credits);
            }

            let now = Utc::now();
            let tx_seq = if grant > 0 { 1 } else { 0 };
            let record = BalanceRecord {
                identity_id,
                credits: grant,
                tx_seq,
                updated_at: now,
            };
            balances.insert(key, serialize(&record)?)?;

            if grant > 0 {
                let entry = CreditTransaction {
                    identity_id,
                    seq: tx_seq,
                    amount: grant as i64,
                    kind: TransactionKind::SignupGrant,
                    description: "signup credit grant".into(),
                    related_session_id: None,
                    created_at: now,
                };
                entries.insert(entry_key(identity_id, tx_seq), serialize(&entry)?)?;
            }
            Ok(grant)
        });
        let credits = unwrap_tx(result)?;
        tracing::info!(identity = %identity_id, credits, "credit account ready");
        Ok(credits)
    }

    /// Atomically debits `amount` credits if and only if the balance covers
    /// it, appending a matching log entry in the same transaction.
    ///
    /// Returns the balance after the debit.
    pub fn debit(
        &self,
        identity_id: IdentityId,
        amount: u64,
        description: &str,
        related_session_id: Option<String>,
    ) -> Result<u64, LedgerError> {
        validate_amount(amount)?;

        let result = (&self.balances, &self.entries).transaction(|(balances, entries)| {
            let key = identity_id.as_bytes().to_vec();
            let mut record: BalanceRecord = match balances.get(&key)? {
                Some(bytes) => deserialize(&bytes)?,
                None => {
                    return Err(ConflictableTransactionError::Abort(
                        LedgerError::IdentityNotProvisioned(identity_id),
                    ))
                }
            };

            if record.credits < amount {
                return Err(ConflictableTransactionError::Abort(
                    LedgerError::InsufficientCredits {
                        available: record.credits,
                        requested: amount,
                    },
                ));
            }

            record.credits -= amount;
            record.tx_seq += 1;
            record.updated_at = Utc::now();

            let entry = CreditTransaction {
                identity_id,
                seq: record.tx_seq,
                amount: -(amount as i64),
                kind: TransactionKind::Usage,
                description: description.to_string(),
                related_session_id: related_session_id.clone(),
                created_at: record.updated_at,
            };
            entries.insert(entry_key(identity_id, record.tx_seq), serialize(&entry)?)?;
            balances.insert(key, serialize(&record)?)?;
            Ok(record.credits)
        });
        let remaining = unwrap_tx(result)?;
        tracing::debug!(identity = %identity_id, amount, remaining, "credits debited");
        Ok(remaining)
    }

    /// Atomically adds `amount` credits, appending a matching log entry.
    ///
    /// Returns the balance after the credit.
    pub fn credit(
        &self,
        identity_id: IdentityId,
        amount: u64,
        kind: TransactionKind,
        description: &str,
    ) -> Result<u64, LedgerError> {
        validate_amount(amount)?;

        let result = (&self.balances, &self.entries).transaction(|(balances, entries)| {
            let key = identity_id.as_bytes().to_vec();
            let mut record: BalanceRecord = match balances.get(&key)? {
                Some(bytes) => deserialize(&bytes)?,
                None => {
                    return Err(ConflictableTransactionError::Abort(
                        LedgerError::IdentityNotProvisioned(identity_id),
                    ))
                }
            };

            record.credits = record
                .credits
                .checked_add(amount)
                .ok_or(ConflictableTransactionError::Abort(LedgerError::Overflow))?;
            record.tx_seq += 1;
            record.updated_at = Utc::now();

            let entry = CreditTransaction {
                identity_id,
                seq: record.tx_seq,
                amount: amount as i64,
                kind,
                description: description.to_string(),
                related_session_id: None,
                created_at: record.updated_at,
            };
            entries.insert(entry_key(identity_id, record.tx_seq), serialize(&entry)?)?;
            balances.insert(key, serialize(&record)?)?;
            Ok(record.credits)
        });
        unwrap_tx(result)
    }

    /// Current balance for an identity.
    pub fn balance(&self, identity_id: IdentityId) -> Result<u64, LedgerError> {
        match self.balances.get(identity_id.as_bytes())? {
            Some(bytes) => {
                let record: BalanceRecord = bincode::deserialize(&bytes)
                    .map_err(|e| LedgerError::Serialization(e.to_string()))?;
                Ok(record.credits)
            }
            None => Err(LedgerError::IdentityNotProvisioned(identity_id)),
        }
    }

    /// `true` if the identity has a credit account.
    pub fn is_provisioned(&self, identity_id: IdentityId) -> Result<bool, LedgerError> {
        Ok(self.balances.contains_key(identity_id.as_bytes())?)
    }

    /// Newest-first page of the identity's transaction log.
    ///
    /// `limit` is clamped to [`MAX_TRANSACTION_PAGE`].
    pub fn recent_transactions(
        &self,
        identity_id: IdentityId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>, LedgerError> {
        let limit = limit.min(MAX_TRANSACTION_PAGE);
        let mut out = Vec::with_capacity(limit);
        for entry in self
            .entries
            .scan_prefix(identity_id.as_bytes())
            .rev()
            .skip(offset)
            .take(limit)
        {
            let (_, bytes) = entry?;
            let tx: CreditTransaction = bincode::deserialize(&bytes)
                .map_err(|e| LedgerError::Serialization(e.to_string()))?;
            out.push(tx);
        }
        Ok(out)
    }

    /// Sums every log entry for an identity.
    ///
    /// Invariant check: for any identity, this equals the stored balance.
    /// Exposed for the reconciliation sweep and the test suite.
    pub fn entry_sum(&self, identity_id: IdentityId) -> Result<i128, LedgerError> {
        let mut sum: i128 = 0;
        for entry in self.entries.scan_prefix(identity_id.as_bytes()) {
            let (_, bytes) = entry?;
            let tx: CreditTransaction = bincode::deserialize(&bytes)
                .map_err(|e| LedgerError::Serialization(e.to_string()))?;
            sum += tx.amount as i128;
        }
        Ok(sum)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn validate_amount(amount: u64) -> Result<(), LedgerError> {
    if amount == 0 || amount > i64::MAX as u64 {
        return Err(LedgerError::InvalidAmount);
    }
    Ok(())
}

fn entry_key(identity_id: IdentityId, seq: u64) -> Vec<u8> {
    let mut key = identity_id.as_bytes().to_vec();
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

fn serialize<T: Serialize>(
    value: &T,
) -> Result<Vec<u8>, ConflictableTransactionError<LedgerError>> {
    bincode::serialize(value).map_err(|e| {
        ConflictableTransactionError::Abort(LedgerError::Serialization(e.to_string()))
    })
}

fn deserialize<T: for<'de> Deserialize<'de>>(
    bytes: &[u8],
) -> Result<T, ConflictableTransactionError<LedgerError>> {
    bincode::deserialize(bytes).map_err(|e| {
        ConflictableTransactionError::Abort(LedgerError::Serialization(e.to_string()))
    })
}

fn unwrap_tx<T>(result: Result<T, TransactionError<LedgerError>>) -> Result<T, LedgerError> {
    match result {
        Ok(v) => Ok(v),
        Err(TransactionError::Abort(e)) => Err(e),
        Err(TransactionError::Storage(e)) => Err(LedgerError::Db(e.to_string())),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn ledger() -> CreditLedger {
        let db = GateDb::open_temporary().unwrap();
        CreditLedger::new(&db).unwrap()
    }

    #[test]
    fn provision_grants_and_logs() {
        let ledger = ledger();
        let id = Uuid::new_v4();

        assert_eq!(ledger.provision(id, 100).unwrap(), 100);
        assert_eq!(ledger.balance(id).unwrap(), 100);

        let log = ledger.recent_transactions(id, 10, 0).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].amount, 100);
        assert_eq!(log[0].kind, TransactionKind::SignupGrant);
    }

    #[test]
    fn provision_is_idempotent() {
        let ledger = ledger();
        let id = Uuid::new_v4();

        ledger.provision(id, 100).unwrap();
        ledger.debit(id, 30, "usage", None).unwrap();

        // A duplicate provision must not reset the balance or re-grant.
        assert_eq!(ledger.provision(id, 100).unwrap(), 70);
        assert_eq!(ledger.balance(id).unwrap(), 70);
        assert_eq!(ledger.recent_transactions(id, 10, 0).unwrap().len(), 2);
    }

    #[test]
    fn zero_grant_provisions_empty_account() {
        let ledger = ledger();
        let id = Uuid::new_v4();

        assert_eq!(ledger.provision(id, 0).unwrap(), 0);
        assert!(ledger.is_provisioned(id).unwrap());
        assert!(ledger.recent_transactions(id, 10, 0).unwrap().is_empty());
    }

    #[test]
    fn debit_decrements_and_logs() {
        let ledger = ledger();
        let id = Uuid::new_v4();
        ledger.provision(id, 100).unwrap();

        let remaining = ledger
            .debit(id, 25, "report generation", Some("sess-1".into()))
            .unwrap();
        assert_eq!(remaining, 75);

        let log = ledger.recent_transactions(id, 10, 0).unwrap();
        assert_eq!(log[0].amount, -25);
        assert_eq!(log[0].kind, TransactionKind::Usage);
        assert_eq!(log[0].related_session_id.as_deref(), Some("sess-1"));
    }

    #[test]
    fn overdraw_is_rejected_and_leaves_no_trace() {
        let ledger = ledger();
        let id = Uuid::new_v4();
        ledger.provision(id, 10).unwrap();

        let result = ledger.debit(id, 11, "too much", None);
        match result {
            Err(LedgerError::InsufficientCredits { available, requested }) => {
                assert_eq!(available, 10);
                assert_eq!(requested, 11);
            }
            other => panic!("expected InsufficientCredits, got {other:?}"),
        }

        // Neither balance nor log moved.
        assert_eq!(ledger.balance(id).unwrap(), 10);
        assert_eq!(ledger.recent_transactions(id, 10, 0).unwrap().len(), 1);
    }

    #[test]
    fn debit_to_exactly_zero_is_allowed() {
        let ledger = ledger();
        let id = Uuid::new_v4();
        ledger.provision(id, 10).unwrap();

        assert_eq!(ledger.debit(id, 10, "all of it", None).unwrap(), 0);
        assert!(matches!(
            ledger.debit(id, 1, "one more", None),
            Err(LedgerError::InsufficientCredits { .. })
        ));
    }

    #[test]
    fn unprovisioned_identity_is_an_error() {
        let ledger = ledger();
        let id = Uuid::new_v4();

        assert!(matches!(
            ledger.debit(id, 1, "x", None),
            Err(LedgerError::IdentityNotProvisioned(_))
        ));
        assert!(matches!(
            ledger.balance(id),
            Err(LedgerError::IdentityNotProvisioned(_))
        ));
        assert!(!ledger.is_provisioned(id).unwrap());
    }

    #[test]
    fn zero_amounts_are_invalid() {
        let ledger = ledger();
        let id = Uuid::new_v4();
        ledger.provision(id, 10).unwrap();

        assert!(matches!(
            ledger.debit(id, 0, "x", None),
            Err(LedgerError::InvalidAmount)
        ));
        assert!(matches!(
            ledger.credit(id, 0, TransactionKind::TopUp, "x"),
            Err(LedgerError::InvalidAmount)
        ));
    }

    #[test]
    fn credit_adds_and_logs() {
        let ledger = ledger();
        let id = Uuid::new_v4();
        ledger.provision(id, 10).unwrap();

        assert_eq!(
            ledger.credit(id, 40, TransactionKind::TopUp, "purchase").unwrap(),
            50
        );
        let log = ledger.recent_transactions(id, 10, 0).unwrap();
        assert_eq!(log[0].amount, 40);
        assert_eq!(log[0].kind, TransactionKind::TopUp);
    }

    #[test]
    fn credit_overflow_is_rejected() {
        let ledger = ledger();
        let id = Uuid::new_v4();
        ledger.provision(id, u64::MAX - 5).unwrap();

        assert!(matches!(
            ledger.credit(id, 10, TransactionKind::TopUp, "x"),
            Err(LedgerError::Overflow)
        ));
        assert_eq!(ledger.balance(id).unwrap(), u64::MAX - 5);
    }

    #[test]
    fn transactions_page_newest_first() {
        let ledger = ledger();
        let id = Uuid::new_v4();
        ledger.provision(id, 100).unwrap();
        for i in 1..=5u64 {
            ledger.debit(id, i, &format!("debit {i}"), None).unwrap();
        }

        let page = ledger.recent_transactions(id, 3, 0).unwrap();
        assert_eq!(page.len(), 3);
        assert_eq!(page[0].amount, -5);
        assert_eq!(page[1].amount, -4);
        assert_eq!(page[2].amount, -3);

        let next = ledger.recent_transactions(id, 3, 3).unwrap();
        assert_eq!(next.len(), 3); // -2, -1, and the signup grant
        assert_eq!(next[2].kind, TransactionKind::SignupGrant);
    }

    #[test]
    fn page_limit_is_clamped() {
        let ledger = ledger();
        let id = Uuid::new_v4();
        ledger.provision(id, 100).unwrap();

        // Ask for far more than the cap allows; shouldn't blow up, just clamp.
        let page = ledger.recent_transactions(id, usize::MAX, 0).unwrap();
        assert_eq!(page.len(), 1);
    }

    #[test]
    fn logs_are_scoped_per_identity() {
        let ledger = ledger();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        ledger.provision(a, 100).unwrap();
        ledger.provision(b, 100).unwrap();
        ledger.debit(a, 5, "a only", None).unwrap();

        assert_eq!(ledger.recent_transactions(a, 10, 0).unwrap().len(), 2);
        assert_eq!(ledger.recent_transactions(b, 10, 0).unwrap().len(), 1);
    }

    #[test]
    fn log_reconciles_with_balance() {
        let ledger = ledger();
        let id = Uuid::new_v4();
        ledger.provision(id, 100).unwrap();
        ledger.debit(id, 30, "usage", None).unwrap();
        ledger.credit(id, 15, TransactionKind::TopUp, "purchase").unwrap();
        ledger.debit(id, 1, "usage", None).unwrap();

        assert_eq!(
            ledger.entry_sum(id).unwrap(),
            ledger.balance(id).unwrap() as i128
        );
    }

    #[test]
    fn codes_are_stable() {
        // Wire contract, mirrored by the HTTP layer.
        assert_eq!(
            LedgerError::InsufficientCredits { available: 0, requested: 1 }.code(),
            "insufficient_credits"
        );
        assert_eq!(
            LedgerError::IdentityNotProvisioned(Uuid::new_v4()).code(),
            "not_provisioned"
        );
        assert_eq!(LedgerError::InvalidAmount.code(), "invalid_amount");
        assert_eq!(LedgerError::Overflow.code(), "invalid_amount");
        assert_eq!(LedgerError::Db("x".into()).code(), "internal");
    }

    #[test]
    fn concurrent_debits_never_overdraw() {
        let ledger = ledger();
        let id = Uuid::new_v4();
        ledger.provision(id, 1).unwrap();

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let l = ledger.clone();
                std::thread::spawn(move || l.debit(id, 1, "race", None))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let successes = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
        assert_eq!(ledger.balance(id).unwrap(), 0);
        assert_eq!(
            ledger.entry_sum(id).unwrap(),
            ledger.balance(id).unwrap() as i128
        );
    }

    #[test]
    fn many_concurrent_debits_settle_exactly() {
        let ledger = ledger();
        let id = Uuid::new_v4();
        ledger.provision(id, 10).unwrap();

        // 16 threads race to debit 1 credit each against a balance of 10.
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let l = ledger.clone();
                std::thread::spawn(move || l.debit(id, 1, "race", None))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let successes = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 10);
        assert_eq!(ledger.balance(id).unwrap(), 0);
        // One grant entry plus one entry per successful debit, nothing else.
        assert_eq!(
            ledger.entry_sum(id).unwrap(),
            ledger.balance(id).unwrap() as i128
        );
    }
}
