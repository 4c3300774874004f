// src/models/credential_definition.rs
//! Credential definition: an issuer's CL key material bound to one schema.
//!
//! The public half is published; the private key and key-correctness proof
//! stay in the issuer's wallet under the same id.

use crate::errors::{AnoncredsError, AnoncredsResult};
use crate::models::did::did_before_marker;
use crate::zkp::{
    CredentialKeyCorrectnessProof as CryptoCredentialKeyCorrectnessProof,
    CredentialPrimaryPublicKey, CredentialPrivateKey, CredentialPublicKey,
    CredentialRevocationPublicKey,
};
use serde::{Deserialize, Serialize};

pub const CRED_DEF_MARKER: &str = "3";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SignatureType {
    CL,
}

impl SignatureType {
    pub fn to_str(&self) -> &'static str {
        match self {
            SignatureType::CL => "CL",
        }
    }

    /// Parses an optional signature type, defaulting to `CL`.
    pub fn parse(value: Option<&str>) -> AnoncredsResult<Self> {
        match value.unwrap_or("CL") {
            "CL" => Ok(SignatureType::CL),
            other => Err(AnoncredsError::InvalidStructure(format!(
                "Unsupported signature type: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialDefinitionConfig {
    #[serde(default)]
    pub support_revocation: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CredentialDefinitionData {
    pub primary: CredentialPrimaryPublicKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revocation: Option<CredentialRevocationPublicKey>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "ver")]
pub enum CredentialDefinition {
    #[serde(rename = "1.0")]
    CredentialDefinitionV1(CredentialDefinitionV1),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialDefinitionV1 {
    pub id: String,
    pub schema_id: String,
    #[serde(rename = "type")]
    pub signature_type: SignatureType,
    pub tag: String,
    pub value: CredentialDefinitionData,
}

impl CredentialDefinition {
    /// `{did}:3:CL:{schema_ref}:{tag}` where `schema_ref` is the schema's ledger
    /// sequence number when known, its id otherwise.
    pub fn build_id(issuer_did: &str, schema_ref: &str, signature_type: SignatureType, tag: &str) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            issuer_did,
            CRED_DEF_MARKER,
            signature_type.to_str(),
            schema_ref,
            tag
        )
    }

    pub fn v1(&self) -> &CredentialDefinitionV1 {
        match self {
            CredentialDefinition::CredentialDefinitionV1(cred_def) => cred_def,
        }
    }

    pub fn id(&self) -> &str {
        &self.v1().id
    }

    pub fn supports_revocation(&self) -> bool {
        self.v1().value.revocation.is_some()
    }

    /// Reassembles the full CL public key from the published parts.
    pub fn public_key(&self) -> AnoncredsResult<CredentialPublicKey> {
        let data = &self.v1().value;
        Ok(CredentialPublicKey::build_from_parts(&data.primary, data.revocation.as_ref())?)
    }
}

/// Issuer DID embedded in a credential definition id.
pub fn cred_def_issuer_did(cred_def_id: &str) -> Option<&str> {
    did_before_marker(cred_def_id, CRED_DEF_MARKER)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CredentialDefinitionPrivate {
    pub value: CredentialPrivateKey,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CredentialKeyCorrectnessProof {
    pub value: CryptoCredentialKeyCorrectnessProof,
}

/// Key material produced by a rotation start and promoted by rotation apply.
#[derive(Debug, Serialize, Deserialize)]
pub struct TemporaryCredentialDefinition {
    pub cred_def: CredentialDefinition,
    pub cred_def_priv: CredentialDefinitionPrivate,
    pub cred_def_correctness_proof: CredentialKeyCorrectnessProof,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_ids_from_seq_no_or_schema_id() {
        assert_eq!(
            CredentialDefinition::build_id("NcYxiDXkpYi6ov5FcYDi1e", "12", SignatureType::CL, "tag"),
            "NcYxiDXkpYi6ov5FcYDi1e:3:CL:12:tag"
        );
        let id = CredentialDefinition::build_id(
            "NcYxiDXkpYi6ov5FcYDi1e",
            "NcYxiDXkpYi6ov5FcYDi1e:2:gvt:1.0",
            SignatureType::CL,
            "tag",
        );
        assert_eq!(cred_def_issuer_did(&id), Some("NcYxiDXkpYi6ov5FcYDi1e"));
    }

    #[test]
    fn only_cl_is_supported() {
        assert_eq!(SignatureType::parse(None).unwrap(), SignatureType::CL);
        assert!(SignatureType::parse(Some("BBS")).is_err());
    }
}
