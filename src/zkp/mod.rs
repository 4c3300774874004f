// src/zkp/mod.rs
//! CL-signature plumbing over `ursa::cl`.
//!
//! All signature, accumulator and proof math lives in ursa. This module
//! re-exports the ursa types the rest of the crate speaks in and builds the
//! ursa-side schema and value structures from the crate's models.

pub mod proof_generation;
pub mod proof_verification;
pub mod tails;

pub use ursa::cl::issuer::Issuer as CryptoIssuer;
pub use ursa::cl::prover::Prover as CryptoProver;
pub use ursa::cl::verifier::Verifier as CryptoVerifier;
pub use ursa::cl::{
    new_nonce, BlindedCredentialSecrets, BlindedCredentialSecretsCorrectnessProof,
    CredentialKeyCorrectnessProof, CredentialPrimaryPublicKey, CredentialPrivateKey,
    CredentialPublicKey, CredentialRevocationPublicKey, CredentialSchema,
    CredentialSecretsBlindingFactors, CredentialSignature,
    CredentialValues as CryptoCredentialValues, MasterSecret, NonCredentialSchema,
    NonCredentialSchemaBuilder, Nonce, Proof, RevocationKeyPrivate, RevocationKeyPublic,
    RevocationRegistry, RevocationRegistryDelta, RevocationTailsAccessor,
    RevocationTailsGenerator, SignatureCorrectnessProof, SubProofRequest, Tail, Witness,
};

use crate::errors::{AnoncredsError, AnoncredsResult};
use crate::models::credential::CredentialValues;
use crate::models::proof_request::PredicateInfo;
use crate::models::schema::{attr_common_view, AttributeNames};

/// Name of the hidden attribute carrying the prover's master secret.
pub const MASTER_SECRET_ATTR: &str = "master_secret";

pub fn build_credential_schema(attrs: &AttributeNames) -> AnoncredsResult<CredentialSchema> {
    let mut builder = CryptoIssuer::new_credential_schema_builder()?;
    for attr in attrs.iter() {
        builder.add_attr(&attr_common_view(attr))?;
    }
    Ok(builder.finalize()?)
}

pub fn build_non_credential_schema() -> AnoncredsResult<NonCredentialSchema> {
    let mut builder = NonCredentialSchemaBuilder::new()?;
    builder.add_attr(MASTER_SECRET_ATTR)?;
    Ok(builder.finalize()?)
}

/// Known credential values plus, when given, the hidden master secret.
pub fn build_credential_values(
    values: &CredentialValues,
    master_secret: Option<&MasterSecret>,
) -> AnoncredsResult<CryptoCredentialValues> {
    let mut builder = CryptoIssuer::new_credential_values_builder()?;
    for (attr, value) in values.0.iter() {
        builder.add_dec_known(&attr_common_view(attr), &value.encoded)?;
    }
    if let Some(master_secret) = master_secret {
        builder.add_value_hidden(MASTER_SECRET_ATTR, &master_secret.value()?)?;
    }
    Ok(builder.finalize()?)
}

/// Values carrying only the master secret, blinded into a credential request.
pub fn build_master_secret_values(master_secret: &MasterSecret) -> AnoncredsResult<CryptoCredentialValues> {
    let mut builder = CryptoIssuer::new_credential_values_builder()?;
    builder.add_value_hidden(MASTER_SECRET_ATTR, &master_secret.value()?)?;
    Ok(builder.finalize()?)
}

/// What one sub-proof discloses: revealed attribute names and predicates.
pub fn build_sub_proof_request<'a, A, P>(revealed: A, predicates: P) -> AnoncredsResult<SubProofRequest>
where
    A: IntoIterator<Item = &'a String>,
    P: IntoIterator<Item = &'a PredicateInfo>,
{
    let mut builder = CryptoVerifier::new_sub_proof_request_builder()?;
    for attr in revealed {
        builder.add_revealed_attr(&attr_common_view(attr))?;
    }
    for predicate in predicates {
        builder.add_predicate(
            &attr_common_view(&predicate.name),
            predicate.p_type.to_ursa(),
            predicate.p_value,
        )?;
    }
    Ok(builder.finalize()?)
}

/// Checks the issued values name exactly the schema attributes.
pub fn check_values_cover_schema(values: &CredentialValues, attrs: &AttributeNames) -> AnoncredsResult<()> {
    let mut expected: Vec<String> = attrs.iter().map(|a| attr_common_view(a)).collect();
    let mut given: Vec<String> = values.0.keys().map(|a| attr_common_view(a)).collect();
    expected.sort();
    given.sort();
    if expected != given {
        return Err(AnoncredsError::InvalidStructure(format!(
            "Credential values {:?} do not match schema attributes {:?}",
            given, expected
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_must_match_schema_names() {
        let attrs: AttributeNames = ["Name", "age"].into_iter().collect();
        let values: CredentialValues = [("name", "Alice"), ("Age", "28")].into_iter().collect();
        assert!(check_values_cover_schema(&values, &attrs).is_ok());

        let missing: CredentialValues = [("name", "Alice")].into_iter().collect();
        assert!(check_values_cover_schema(&missing, &attrs).is_err());

        let extra: CredentialValues = [("name", "Alice"), ("age", "28"), ("x", "1")].into_iter().collect();
        assert!(check_values_cover_schema(&extra, &attrs).is_err());
    }

    #[test]
    fn builds_ursa_structures() {
        let attrs: AttributeNames = ["name", "age"].into_iter().collect();
        assert!(build_credential_schema(&attrs).is_ok());
        assert!(build_non_credential_schema().is_ok());

        let master_secret = CryptoProver::new_master_secret().unwrap();
        let values: CredentialValues = [("name", "Alice"), ("age", "28")].into_iter().collect();
        assert!(build_credential_values(&values, Some(&master_secret)).is_ok());
        assert!(build_master_secret_values(&master_secret).is_ok());
    }
}
