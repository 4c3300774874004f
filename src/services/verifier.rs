// src/services/verifier.rs
//! Proof verification service.
//!
//! A verifier needs no wallet. It generates proof-request nonces and checks
//! presented proofs against the public schemas, credential definitions and
//! revocation registries the caller resolved for the proof's identifiers.

use crate::errors::AnoncredsResult;
use crate::models::credential_definition::CredentialDefinition;
use crate::models::proof::Proof;
use crate::models::proof_request::ProofRequest;
use crate::models::revocation::RevocationRegistryDefinition;
use crate::models::schema::Schema;
use crate::zkp::proof_verification::{verify, RevocationRegistries, VerificationInputs};
use crate::zkp::{new_nonce, Nonce};
use log::{debug, info, warn};
use std::collections::HashMap;

/// Stateless verifier role.
#[derive(Debug, Default)]
pub struct Verifier;

impl Verifier {
    pub fn new() -> Self {
        Verifier
    }

    /// Fresh 80-bit nonce for a proof request, as a decimal string.
    pub fn generate_nonce(&self) -> AnoncredsResult<String> {
        let nonce: Nonce = new_nonce()?;
        Ok(nonce.to_dec()?)
    }

    /// Verifies `proof` against `proof_req`.
    ///
    /// # Arguments
    /// * `schemas`, `cred_defs` - Keyed by id; must cover every proof identifier
    /// * `rev_reg_defs` - Keyed by registry id; needed for revocable sub-proofs
    /// * `rev_regs` - Registry snapshots keyed by registry id, then timestamp
    ///
    /// # Returns
    /// `Ok(false)` for a proof that is well-formed but does not hold: a wrong
    /// revealed value, a failed crypto check or a revoked credential.
    ///
    /// # Errors
    /// `InvalidStructure` when the proof does not answer the request's shape or
    /// a referenced artifact is missing.
    pub fn verify_proof(
        &self,
        proof_req: &ProofRequest,
        proof: &Proof,
        schemas: &HashMap<String, Schema>,
        cred_defs: &HashMap<String, CredentialDefinition>,
        rev_reg_defs: &HashMap<String, RevocationRegistryDefinition>,
        rev_regs: &RevocationRegistries,
    ) -> AnoncredsResult<bool> {
        debug!(
            "verify_proof >>> name: {}, sub-proofs: {}",
            proof_req.name,
            proof.identifiers.len()
        );

        let inputs = VerificationInputs {
            schemas,
            cred_defs,
            rev_reg_defs,
            rev_regs,
        };
        let valid = verify(proof_req, proof, &inputs)?;

        if valid {
            info!("Proof for '{}' verified", proof_req.name);
        } else {
            warn!("Proof for '{}' rejected", proof_req.name);
        }
        Ok(valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_nonce_is_decimal_and_fresh() {
        let verifier = Verifier::new();
        let first = verifier.generate_nonce().unwrap();
        let second = verifier.generate_nonce().unwrap();

        assert!(!first.is_empty());
        assert!(first.chars().all(|c| c.is_ascii_digit()));
        assert_ne!(first, second);
    }
}
