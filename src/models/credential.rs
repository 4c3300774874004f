// src/models/credential.rs
//! Credential issuance payloads.
//!
//! The issuance exchange runs offer -> request -> credential:
//! 1. Issuer sends a [`CredentialOffer`] with a fresh nonce
//! 2. Prover answers with a [`CredentialRequest`] carrying its blinded master
//!    secret, keeping [`CredentialRequestMetadata`] to unblind later
//! 3. Issuer signs a [`Credential`] over the requested [`CredentialValues`]
//!
//! The prover then stores the credential and reads it back as [`CredentialInfo`].

use crate::models::schema::attr_common_view;
use crate::utils::crypto::encode_attribute;
use crate::zkp::{
    BlindedCredentialSecrets, BlindedCredentialSecretsCorrectnessProof,
    CredentialKeyCorrectnessProof, CredentialSecretsBlindingFactors, CredentialSignature,
    MasterSecret as CryptoMasterSecret, Nonce, RevocationRegistry as CryptoRevocationRegistry,
    SignatureCorrectnessProof, Witness,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Serialize, Deserialize)]
pub struct CredentialOffer {
    pub schema_id: String,
    pub cred_def_id: String,
    pub key_correctness_proof: CredentialKeyCorrectnessProof,
    pub nonce: Nonce,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CredentialRequest {
    pub prover_did: String,
    pub cred_def_id: String,
    pub blinded_ms: BlindedCredentialSecrets,
    pub blinded_ms_correctness_proof: BlindedCredentialSecretsCorrectnessProof,
    pub nonce: Nonce,
}

/// Prover-private data needed to unblind the issued signature.
#[derive(Debug, Serialize, Deserialize)]
pub struct CredentialRequestMetadata {
    pub master_secret_blinding_data: CredentialSecretsBlindingFactors,
    pub nonce: Nonce,
    pub master_secret_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MasterSecret {
    pub value: CryptoMasterSecret,
}

/// One attribute in both its raw form and the decimal encoding that is signed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttributeValues {
    pub raw: String,
    pub encoded: String,
}

impl AttributeValues {
    /// Pairs a raw value with its standard encoding.
    pub fn from_raw(raw: &str) -> Self {
        AttributeValues {
            raw: raw.to_string(),
            encoded: encode_attribute(raw),
        }
    }
}

/// Credential attribute values keyed by attribute name.
///
/// ```json
/// {"name": {"raw": "Alice", "encoded": "12345"}, "degree": {"raw": "BA", "encoded": "67890"}}
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct CredentialValues(pub HashMap<String, AttributeValues>);

impl CredentialValues {
    /// Looks an attribute up by name, ignoring case and whitespace.
    pub fn get(&self, name: &str) -> Option<&AttributeValues> {
        let wanted = attr_common_view(name);
        self.0
            .iter()
            .find(|(key, _)| attr_common_view(key) == wanted)
            .map(|(_, value)| value)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for CredentialValues {
    /// Builds values from `(name, raw)` pairs using the standard encoding.
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        CredentialValues(
            iter.into_iter()
                .map(|(name, raw)| {
                    let raw = raw.into();
                    (name.into(), AttributeValues::from_raw(&raw))
                })
                .collect(),
        )
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Credential {
    pub schema_id: String,
    pub cred_def_id: String,
    pub rev_reg_id: Option<String>,
    pub values: CredentialValues,
    pub signature: CredentialSignature,
    pub signature_correctness_proof: SignatureCorrectnessProof,
    pub rev_reg: Option<CryptoRevocationRegistry>,
    pub witness: Option<Witness>,
}

impl Credential {
    /// Revocation index the credential was signed at, if revocable.
    pub fn cred_rev_id(&self) -> Option<u32> {
        self.signature.extract_index()
    }
}

/// Searchable summary of a stored credential.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialInfo {
    pub referent: String,
    pub attrs: HashMap<String, String>,
    pub schema_id: String,
    pub cred_def_id: String,
    pub rev_reg_id: Option<String>,
    pub cred_rev_id: Option<String>,
}

/// Which attributes of a credential definition get searchable value tags.
///
/// `None` (no policy) tags every attribute. Serialized as a JSON array of
/// names, or `null`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct CredentialAttrTagPolicy {
    pub taggable: Option<HashSet<String>>,
}

impl CredentialAttrTagPolicy {
    pub fn tag_all() -> Self {
        Self::default()
    }

    pub fn only<I: IntoIterator<Item = S>, S: AsRef<str>>(names: I) -> Self {
        CredentialAttrTagPolicy {
            taggable: Some(names.into_iter().map(|n| attr_common_view(n.as_ref())).collect()),
        }
    }

    pub fn is_taggable(&self, attr_name: &str) -> bool {
        match &self.taggable {
            None => true,
            Some(names) => {
                let wanted = attr_common_view(attr_name);
                names.iter().any(|name| attr_common_view(name) == wanted)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_lookup_ignores_case_and_spaces() {
        let values: CredentialValues = [("First Name", "Alice")].into_iter().collect();
        assert_eq!(values.get("firstname").unwrap().raw, "Alice");
        assert!(values.get("age").is_none());
    }

    #[test]
    fn values_keep_explicit_encodings() {
        let json = r#"{"name":{"raw":"Alice","encoded":"12345"}}"#;
        let values: CredentialValues = serde_json::from_str(json).unwrap();
        assert_eq!(values.get("name").unwrap().encoded, "12345");
        assert_eq!(serde_json::to_string(&values).unwrap(), json);
    }

    #[test]
    fn tag_policy_defaults_to_everything() {
        let policy: CredentialAttrTagPolicy = serde_json::from_str("null").unwrap();
        assert!(policy.is_taggable("anything"));

        let policy: CredentialAttrTagPolicy = serde_json::from_str(r#"["First Name"]"#).unwrap();
        assert!(policy.is_taggable("firstname"));
        let policy = CredentialAttrTagPolicy::only(["Name"]);
        assert!(policy.is_taggable("name"));
        assert!(!policy.is_taggable("degree"));
    }
}
