// Copyright (c) 2026 WalletGate Maintainers. MIT License.
// See LICENSE for details.

//! # WalletGate — Core Library
//!
//! WalletGate is the auth-and-metering backbone for a product whose front-end
//! lives elsewhere: users prove control of a cryptographic wallet to sign in
//! or to link that wallet to an existing account, and every metered action
//! spends a credit from an append-only ledger that refuses to double-spend.
//!
//! Two subsystems carry real contracts:
//!
//! - **Wallet auth** — a nonce-based challenge/response protocol. The server
//!   issues an unguessable, time-bounded nonce for an (address, chain) pair;
//!   the client signs a message embedding it; the server verifies the
//!   signature, consumes the nonce exactly once, and resolves an identity.
//! - **Credit ledger** — a non-negative integer balance per identity with an
//!   atomic conditional debit. Two concurrent debits against a balance of one
//!   credit must produce exactly one success. No exceptions.
//!
//! ## Architecture
//!
//! - **auth** — nonce store, EVM signature verification, sign-in and link
//!   flows, and the error taxonomy clients branch on.
//! - **bindings** — the one-wallet-to-one-identity binding table.
//! - **identity** — the contract of the external identity/session platform,
//!   plus an in-memory implementation for tests and dev deployments.
//! - **ledger** — balances and the append-only transaction log.
//! - **db** — persistent storage over sled's embedded key-value store.
//! - **config** — every constant that would otherwise be a magic number.
//!
//! ## Design Philosophy
//!
//! 1. The security property rests on signature unforgeability, not on nonce
//!    mutual exclusion — but we take the mutual exclusion anyway when it's
//!    free (atomic nonce take, compare-and-swap binding insert).
//! 2. Shared mutable state is mutated only through narrow atomic operations.
//!    No read-then-compare-then-write escapes the storage layer.
//! 3. Every failure a client can act on has a stable machine-readable code.

pub mod auth;
pub mod bindings;
pub mod config;
pub mod db;
pub mod identity;
pub mod ledger;
