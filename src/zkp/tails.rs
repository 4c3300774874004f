// src/zkp/tails.rs
//! Revocation tails blobs.
//!
//! A tails blob is the two-byte version tag `[0, 2]` followed by every tail
//! point in generator order. The blob is written once when a registry is
//! created and read back whole by anyone who computes witnesses.

use crate::errors::{AnoncredsError, AnoncredsResult};
use crate::zkp::{RevocationTailsAccessor, RevocationTailsGenerator, Tail};
use ursa::errors::{err_msg, UrsaCryptoError, UrsaCryptoErrorKind};

pub const TAILS_BLOB_TAG: [u8; 2] = [0, 2];

/// Drains the generator into a tagged tails blob.
pub fn build_tails_blob(generator: &mut RevocationTailsGenerator) -> AnoncredsResult<Vec<u8>> {
    let mut blob = Vec::with_capacity(TAILS_BLOB_TAG.len() + generator.count() as usize * Tail::BYTES_REPR_SIZE);
    blob.extend_from_slice(&TAILS_BLOB_TAG);
    while let Some(tail) = generator.try_next()? {
        blob.extend_from_slice(&tail.to_bytes()?);
    }
    Ok(blob)
}

/// In-memory tails accessor over a downloaded blob.
#[derive(Debug, Clone)]
pub struct TailsReader {
    tails: Vec<u8>,
}

impl TailsReader {
    /// # Errors
    /// `InvalidStructure` if the blob lacks the version tag or is truncated.
    pub fn from_blob(blob: Vec<u8>) -> AnoncredsResult<Self> {
        if blob.len() < TAILS_BLOB_TAG.len() || blob[..TAILS_BLOB_TAG.len()] != TAILS_BLOB_TAG {
            return Err(AnoncredsError::InvalidStructure(
                "Tails blob has unknown version tag".to_string(),
            ));
        }
        let tails = blob[TAILS_BLOB_TAG.len()..].to_vec();
        if tails.len() % Tail::BYTES_REPR_SIZE != 0 {
            return Err(AnoncredsError::InvalidStructure(
                "Tails blob is truncated".to_string(),
            ));
        }
        Ok(TailsReader { tails })
    }

    pub fn count(&self) -> usize {
        self.tails.len() / Tail::BYTES_REPR_SIZE
    }
}

impl RevocationTailsAccessor for TailsReader {
    fn access_tail(&self, tail_id: u32, accessor: &mut dyn FnMut(&Tail)) -> Result<(), UrsaCryptoError> {
        let start = tail_id as usize * Tail::BYTES_REPR_SIZE;
        let bytes = self
            .tails
            .get(start..start + Tail::BYTES_REPR_SIZE)
            .ok_or_else(|| err_msg(UrsaCryptoErrorKind::InvalidState, format!("Tail {} is out of range", tail_id)))?;
        let tail = Tail::from_bytes(bytes)?;
        accessor(&tail);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_untagged_blob() {
        assert!(TailsReader::from_blob(vec![]).is_err());
        assert!(TailsReader::from_blob(vec![1, 2, 3]).is_err());
    }

    #[test]
    fn rejects_truncated_blob() {
        let mut blob = TAILS_BLOB_TAG.to_vec();
        blob.extend_from_slice(&[0u8; 7]);
        assert!(TailsReader::from_blob(blob).is_err());
    }

    #[test]
    fn empty_blob_has_no_tails() {
        let reader = TailsReader::from_blob(TAILS_BLOB_TAG.to_vec()).unwrap();
        assert_eq!(reader.count(), 0);
        assert!(reader.access_tail(0, &mut |_| {}).is_err());
    }
}
