//! # EVM Signature Verification
//!
//! Decides whether a signature over a message was produced by the private
//! key controlling a given EVM address, per the chain's standard
//! message-signing scheme (`personal_sign`, EIP-191):
//!
//! 1. Hash `"\x19Ethereum Signed Message:\n" + len(message) + message` with
//!    Keccak-256.
//! 2. Recover the secp256k1 public key from the 65-byte `r || s || v`
//!    signature over that digest.
//! 3. Derive the signer address — the last 20 bytes of the Keccak-256 of the
//!    uncompressed public key — and compare against the claimed address.
//!
//! A wrong key, a tampered message, and a mismatched address all come out as
//! a plain `false`. We intentionally don't tell callers which; an error
//! oracle here is a gift to attackers. [`SignatureError`] is reserved for
//! input that isn't even shaped like a signature.
//!
//! Pure functions, no side effects, safe to call any number of times.

use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use sha3::{Digest, Keccak256};
use thiserror::Error;

use crate::config::SIGNATURE_LENGTH_BYTES;

/// Errors for input that cannot be interpreted as a signature at all.
///
/// A parseable-but-invalid signature is *not* an error — `verify` returns
/// `Ok(false)` for those.
#[derive(Debug, Error)]
pub enum SignatureError {
    /// The signature is not valid hex.
    #[error("signature is not valid hex")]
    NotHex,

    /// The signature is not 65 bytes.
    #[error("signature must be {SIGNATURE_LENGTH_BYTES} bytes, got {0}")]
    BadLength(usize),

    /// The recovery byte is outside {0, 1, 27, 28}.
    #[error("invalid recovery id: {0}")]
    BadRecoveryId(u8),
}

/// Keccak-256 digest of arbitrary bytes.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// The EIP-191 "personal message" digest wallets actually sign.
pub fn hash_personal_message(message: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(b"\x19Ethereum Signed Message:\n");
    hasher.update(message.len().to_string().as_bytes());
    hasher.update(message);
    hasher.finalize().into()
}

/// Derives the lower-case hex EVM address for a recovered public key.
pub fn address_from_key(key: &VerifyingKey) -> String {
    // Uncompressed SEC1 point: 0x04 || X (32B) || Y (32B). The address hash
    // covers only the coordinates.
    let point = key.to_encoded_point(false);
    let digest = keccak256(&point.as_bytes()[1..]);
    format!("0x{}", hex::encode(&digest[12..]))
}

/// Verifies a `personal_sign` signature against a claimed address.
///
/// Returns `Ok(true)` iff the signature over `message` recovers to
/// `address` (compared case-insensitively). Returns `Ok(false)` for any
/// well-formed signature that doesn't — wrong key, wrong message, wrong
/// address. Returns `Err` only for malformed input.
pub fn verify(address: &str, message: &str, signature: &str) -> Result<bool, SignatureError> {
    let recovered = match recover_signer(message, signature)? {
        Some(addr) => addr,
        None => return Ok(false),
    };
    Ok(recovered == address.trim().to_ascii_lowercase())
}

/// Recovers the signing address from a `personal_sign` signature.
///
/// `Ok(None)` means the signature was well-formed but no public key could be
/// recovered from it — merely invalid, not malformed.
pub fn recover_signer(message: &str, signature: &str) -> Result<Option<String>, SignatureError> {
    let raw = hex::decode(signature.trim().trim_start_matches("0x"))
        .map_err(|_| SignatureError::NotHex)?;
    if raw.len() != SIGNATURE_LENGTH_BYTES {
        return Err(SignatureError::BadLength(raw.len()));
    }

    // Wallets emit v as 27/28 (legacy) or 0/1; normalize to the raw parity.
    let v = raw[64];
    let parity = match v {
        0 | 1 => v,
        27 | 28 => v - 27,
        other => return Err(SignatureError::BadRecoveryId(other)),
    };
    let recovery_id =
        RecoveryId::from_byte(parity).ok_or(SignatureError::BadRecoveryId(v))?;

    let Ok(sig) = Signature::from_slice(&raw[..64]) else {
        // r or s out of field range. Shaped like a signature but not one.
        return Ok(None);
    };

    let digest = hash_personal_message(message.as_bytes());
    match VerifyingKey::recover_from_prehash(&digest, &sig, recovery_id) {
        Ok(key) => Ok(Some(address_from_key(&key))),
        Err(_) => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::SigningKey;
    use rand_core::OsRng;

    /// Signs `message` the way an EVM wallet would, returning the 0x-hex
    /// 65-byte signature and the signer's address.
    fn wallet_sign(key: &SigningKey, message: &str) -> (String, String) {
        let digest = hash_personal_message(message.as_bytes());
        let (sig, recovery_id) = key
            .sign_prehash_recoverable(&digest)
            .expect("signing cannot fail on a 32-byte digest");

        let mut raw = sig.to_bytes().to_vec();
        raw.push(recovery_id.to_byte() + 27);
        let address = address_from_key(&VerifyingKey::from(key));
        (format!("0x{}", hex::encode(raw)), address)
    }

    #[test]
    fn valid_signature_verifies() {
        let key = SigningKey::random(&mut OsRng);
        let (sig, address) = wallet_sign(&key, "sign in please");
        assert!(verify(&address, "sign in please", &sig).unwrap());
    }

    #[test]
    fn address_comparison_is_case_insensitive() {
        let key = SigningKey::random(&mut OsRng);
        let (sig, address) = wallet_sign(&key, "case test");
        let checksummed = address.to_ascii_uppercase().replacen("0X", "0x", 1);
        assert!(verify(&checksummed, "case test", &sig).unwrap());
    }

    #[test]
    fn wrong_message_fails() {
        let key = SigningKey::random(&mut OsRng);
        let (sig, address) = wallet_sign(&key, "original message");
        assert!(!verify(&address, "tampered message", &sig).unwrap());
    }

    #[test]
    fn wrong_address_fails() {
        // A valid signature by key A presented with key B's address must be
        // rejected — the signature-binding property.
        let key_a = SigningKey::random(&mut OsRng);
        let key_b = SigningKey::random(&mut OsRng);
        let (sig, _) = wallet_sign(&key_a, "hello");
        let address_b = address_from_key(&VerifyingKey::from(&key_b));
        assert!(!verify(&address_b, "hello", &sig).unwrap());
    }

    #[test]
    fn legacy_and_modern_v_bytes_both_accepted() {
        let key = SigningKey::random(&mut OsRng);
        let digest = hash_personal_message(b"v byte test");
        let (sig, recovery_id) = key.sign_prehash_recoverable(&digest).unwrap();
        let address = address_from_key(&VerifyingKey::from(&key));

        let mut legacy = sig.to_bytes().to_vec();
        legacy.push(recovery_id.to_byte() + 27);
        let mut modern = sig.to_bytes().to_vec();
        modern.push(recovery_id.to_byte());

        assert!(verify(&address, "v byte test", &hex::encode(&legacy)).unwrap());
        assert!(verify(&address, "v byte test", &hex::encode(&modern)).unwrap());
    }

    #[test]
    fn non_hex_signature_is_malformed() {
        let result = verify("0xabc", "msg", "not-hex-at-all");
        assert!(matches!(result, Err(SignatureError::NotHex)));
    }

    #[test]
    fn short_signature_is_malformed() {
        let result = verify("0xabc", "msg", &hex::encode([0u8; 64]));
        assert!(matches!(result, Err(SignatureError::BadLength(64))));
    }

    #[test]
    fn bad_recovery_byte_is_malformed() {
        let mut raw = vec![1u8; 64];
        raw.push(9); // not in {0, 1, 27, 28}
        let result = verify("0xabc", "msg", &hex::encode(raw));
        assert!(matches!(result, Err(SignatureError::BadRecoveryId(9))));
    }

    #[test]
    fn zeroed_signature_is_invalid_not_malformed() {
        // All-zero r/s is out of range: well-formed bytes, unrecoverable key.
        let mut raw = vec![0u8; 64];
        raw.push(27);
        assert!(!verify("0xabc", "msg", &hex::encode(raw)).unwrap());
    }

    #[test]
    fn personal_message_hash_matches_known_vector() {
        // keccak256("\x19Ethereum Signed Message:\n5hello") — a fixed vector
        // checked against established EVM tooling.
        let digest = hash_personal_message(b"hello");
        assert_eq!(
            hex::encode(digest),
            "50b2c43fd39106bafbba0da34fc430e1f91e3c96ea2acee2bc34119f92b37750",
        );
    }

    #[test]
    fn recovered_address_shape() {
        let key = SigningKey::random(&mut OsRng);
        let address = address_from_key(&VerifyingKey::from(&key));
        assert_eq!(address.len(), crate::config::EVM_ADDRESS_LENGTH);
        assert!(address.starts_with("0x"));
        assert_eq!(address, address.to_ascii_lowercase());
    }
}
