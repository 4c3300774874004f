// src/models/did.rs
//! Decentralized identifier validation.
//!
//! Issuer and prover DIDs show up as the leading component of every
//! anoncreds id (`{did}:2:...`, `{did}:3:CL:...`). Two forms are accepted:
//! - unqualified: base58 of a 16 or 32 byte verkey prefix (`NcYxiDXkpYi6ov5FcYDi1e`)
//! - qualified: `did:<method>:<method-specific-id>`

use crate::errors::{AnoncredsError, AnoncredsResult};

/// Checks that `did` is a well-formed unqualified or qualified DID.
///
/// # Errors
/// `InvalidStructure` naming the offending value.
pub fn validate_did(did: &str) -> AnoncredsResult<()> {
    if let Some(rest) = did.strip_prefix("did:") {
        let mut parts = rest.splitn(2, ':');
        let method = parts.next().unwrap_or_default();
        let id = parts.next().unwrap_or_default();
        let method_ok = !method.is_empty()
            && method.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
        if method_ok && !id.is_empty() {
            return Ok(());
        }
        return Err(AnoncredsError::InvalidStructure(format!("Invalid qualified DID: {}", did)));
    }

    match bs58::decode(did).into_vec() {
        Ok(bytes) if bytes.len() == 16 || bytes.len() == 32 => Ok(()),
        Ok(bytes) => Err(AnoncredsError::InvalidStructure(format!(
            "DID {} decodes to {} bytes, expected 16 or 32",
            did,
            bytes.len()
        ))),
        Err(_) => Err(AnoncredsError::InvalidStructure(format!("DID {} is not base58", did))),
    }
}

/// Extracts the issuer DID from an id of the form `{did}:{marker}:...`.
pub(crate) fn did_before_marker<'a>(id: &'a str, marker: &str) -> Option<&'a str> {
    id.split_once(&format!(":{}:", marker)).map(|(did, _)| did)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_unqualified_and_qualified() {
        assert!(validate_did("NcYxiDXkpYi6ov5FcYDi1e").is_ok());
        assert!(validate_did("did:sov:NcYxiDXkpYi6ov5FcYDi1e").is_ok());
    }

    #[test]
    fn rejects_malformed() {
        assert!(validate_did("").is_err());
        assert!(validate_did("did:Sov:abc").is_err());
        assert!(validate_did("did:sov:").is_err());
        assert!(validate_did("0OIl").is_err());
        assert!(validate_did("abc").is_err());
    }

    #[test]
    fn extracts_leading_did() {
        assert_eq!(
            did_before_marker("NcYxiDXkpYi6ov5FcYDi1e:3:CL:1:tag", "3"),
            Some("NcYxiDXkpYi6ov5FcYDi1e")
        );
        assert_eq!(did_before_marker("nothing-here", "3"), None);
    }
}
