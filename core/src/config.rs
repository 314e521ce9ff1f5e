//! # Configuration & Constants
//!
//! Every magic number in WalletGate lives here. If you're hardcoding a
//! constant somewhere else, you're doing it wrong.
//!
//! The two freshness windows deserve a note: the login window is tight
//! because an unauthenticated attacker replaying a captured challenge is the
//! threat model there. The link window is looser because the caller already
//! holds a valid session, which lowers the replay value of a stale nonce.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Challenge Nonces
// ---------------------------------------------------------------------------

/// Freshness window for the sign-in flow. A login nonce older than this is
/// rejected even if it was never consumed.
pub const LOGIN_NONCE_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Freshness window for the wallet-link flow. Longer than the login window
/// on purpose — the caller is already authenticated.
pub const LINK_NONCE_WINDOW: Duration = Duration::from_secs(10 * 60);

/// Raw entropy per nonce, in bytes, before hex encoding. 32 bytes of OS
/// randomness; guessing one is not a realistic attack.
pub const NONCE_ENTROPY_BYTES: usize = 32;

// ---------------------------------------------------------------------------
// Wallet Addresses & Signatures
// ---------------------------------------------------------------------------

/// Length of a hex-encoded EVM address including the `0x` prefix.
pub const EVM_ADDRESS_LENGTH: usize = 42;

/// Length of an EVM `personal_sign` signature in bytes: r (32) || s (32) || v (1).
pub const SIGNATURE_LENGTH_BYTES: usize = 65;

/// Chain namespace prefix for EVM chains, CAIP-2 style (`eip155:1` is
/// Ethereum mainnet). The only namespace currently supported.
pub const EVM_CHAIN_PREFIX: &str = "eip155:";

/// Returns `true` if the given chain identifier is one this service can
/// verify signatures for.
pub fn is_supported_chain(chain: &str) -> bool {
    chain
        .strip_prefix(EVM_CHAIN_PREFIX)
        .is_some_and(|id| !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()))
}

// ---------------------------------------------------------------------------
// Credit Ledger
// ---------------------------------------------------------------------------

/// Credits granted when the service provisions a brand-new identity.
/// The ledger itself never auto-creates balances; the service layer invokes
/// provisioning with this amount on the new-identity sign-in path.
pub const SIGNUP_CREDIT_GRANT: u64 = 100;

/// Default page size for the transaction log.
pub const DEFAULT_TRANSACTION_PAGE: usize = 20;

/// Hard ceiling on a single transaction-log page. Requests beyond this are
/// clamped, not rejected — pagination is a convenience, not a contract.
pub const MAX_TRANSACTION_PAGE: usize = 100;

// ---------------------------------------------------------------------------
// Challenge Message
// ---------------------------------------------------------------------------

/// Domain shown in the challenge message when the service doesn't configure
/// its own. Wallets display this to the user before signing.
pub const DEFAULT_CHALLENGE_DOMAIN: &str = "walletgate.app";

// ---------------------------------------------------------------------------
// Service Ports
// ---------------------------------------------------------------------------

/// Default HTTP API port.
pub const DEFAULT_API_PORT: u16 = 8460;

/// Default Prometheus metrics port.
pub const DEFAULT_METRICS_PORT: u16 = 8461;
