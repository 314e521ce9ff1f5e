//! # Challenge Message Construction
//!
//! Builds the human-readable text a wallet shows its user before signing.
//! Modeled on the sign-in-with-wallet convention: a domain line, the wallet
//! address, then labeled fields. The flows only ever *require* that the
//! literal nonce value appears somewhere in what the client signs — the rest
//! of the template exists for the human reading the wallet prompt.

use crate::auth::nonce::NonceRecord;
use chrono::SecondsFormat;

/// Renders the challenge message for a nonce record.
///
/// `domain` identifies the requesting service (e.g. `walletgate.app`) so
/// users can spot phishing prompts that name somewhere else.
pub fn challenge_message(domain: &str, record: &NonceRecord) -> String {
    format!(
        "{domain} wants you to sign in with your wallet:\n\
         {address}\n\
         \n\
         Chain: {chain}\n\
         Nonce: {nonce}\n\
         Issued At: {issued_at}",
        address = record.address,
        chain = record.chain,
        nonce = record.value,
        issued_at = record.issued_at.to_rfc3339_opts(SecondsFormat::Millis, true),
    )
}
