// src/utils/crypto.rs
//! Hashing and encoding helpers shared by the issuer, prover and verifier.
//!
//! - SHA-256 digests (tails file hashes)
//! - Base58 rendering of digests
//! - Attribute encoding: raw string values to the decimal integers CL signs

use num_bigint::BigUint;
use sha2::{Digest, Sha256};

/// Computes a SHA-256 digest of the input data.
pub fn hash_data(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Base58-encoded SHA-256, the form used for `tailsHash`.
pub fn base58_digest(data: &[u8]) -> String {
    bs58::encode(hash_data(data)).into_string()
}

/// Encodes a raw attribute value into the decimal string that gets signed.
///
/// Values that parse as a 32-bit integer encode to themselves so that predicates
/// can be proven over them. Anything else encodes to the SHA-256 of its UTF-8
/// bytes read as a big-endian integer.
///
/// # Example
/// ```
/// use anoncreds_system::utils::crypto::encode_attribute;
/// assert_eq!(encode_attribute("42"), "42");
/// assert_ne!(encode_attribute("Alice"), "Alice");
/// ```
pub fn encode_attribute(raw: &str) -> String {
    match raw.parse::<i32>() {
        Ok(value) => value.to_string(),
        Err(_) => BigUint::from_bytes_be(&hash_data(raw.as_bytes())).to_str_radix(10),
    }
}

/// Compares two decimal integer strings numerically (`"007" == "7"`).
/// Returns `false` if either side is not a decimal integer.
pub fn decimal_eq(left: &str, right: &str) -> bool {
    match (
        BigUint::parse_bytes(left.as_bytes(), 10),
        BigUint::parse_bytes(right.as_bytes(), 10),
    ) {
        (Some(l), Some(r)) => l == r,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_encode_to_themselves() {
        assert_eq!(encode_attribute("28"), "28");
        assert_eq!(encode_attribute("-5"), "-5");
    }

    #[test]
    fn strings_encode_to_digest_integer() {
        let encoded = encode_attribute("Alice");
        assert!(encoded.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(encoded, encode_attribute("Alice"));
        assert_ne!(encoded, encode_attribute("alice"));
    }

    #[test]
    fn base58_digest_is_stable() {
        let a = base58_digest(b"tails");
        assert_eq!(a, base58_digest(b"tails"));
        assert_eq!(bs58::decode(&a).into_vec().unwrap().len(), 32);
    }

    #[test]
    fn decimal_comparison_ignores_leading_zeros() {
        assert!(decimal_eq("0012345", "12345"));
        assert!(!decimal_eq("12345", "12346"));
        assert!(!decimal_eq("abc", "abc"));
    }
}
