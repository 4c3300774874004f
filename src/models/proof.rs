// src/models/proof.rs
//! Proof presentation types: what the prover selects and what it sends back.

use crate::models::credential::{AttributeValues, CredentialInfo};
use crate::models::proof_request::NonRevocedInterval;
use crate::zkp::Proof as CryptoProof;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Prover's selection of credentials for each referent of a proof request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestedCredentials {
    #[serde(default)]
    pub self_attested_attributes: HashMap<String, String>,
    #[serde(default)]
    pub requested_attributes: HashMap<String, RequestedAttribute>,
    #[serde(default)]
    pub requested_predicates: HashMap<String, ProvingCredentialKey>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestedAttribute {
    pub cred_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    #[serde(default = "default_revealed")]
    pub revealed: bool,
}

fn default_revealed() -> bool {
    true
}

/// One sub-proof: a credential proven against one registry timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProvingCredentialKey {
    pub cred_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

impl From<&RequestedAttribute> for ProvingCredentialKey {
    fn from(attr: &RequestedAttribute) -> Self {
        ProvingCredentialKey {
            cred_id: attr.cred_id.clone(),
            timestamp: attr.timestamp,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Proof {
    pub proof: CryptoProof,
    pub requested_proof: RequestedProof,
    pub identifiers: Vec<Identifier>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RequestedProof {
    #[serde(default)]
    pub revealed_attrs: HashMap<String, RevealedAttributeInfo>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub revealed_attr_groups: HashMap<String, RevealedAttributeGroupInfo>,
    #[serde(default)]
    pub self_attested_attrs: HashMap<String, String>,
    #[serde(default)]
    pub unrevealed_attrs: HashMap<String, SubProofReferent>,
    #[serde(default)]
    pub predicates: HashMap<String, SubProofReferent>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubProofReferent {
    pub sub_proof_index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RevealedAttributeInfo {
    pub sub_proof_index: u32,
    pub raw: String,
    pub encoded: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RevealedAttributeGroupInfo {
    pub sub_proof_index: u32,
    pub values: HashMap<String, AttributeValues>,
}

/// Public artifacts a sub-proof was built against, in sub-proof order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identifier {
    pub schema_id: String,
    pub cred_def_id: String,
    #[serde(default)]
    pub rev_reg_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<u64>,
}

/// Candidate credentials for every referent of a proof request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CredentialsForProofRequest {
    pub attrs: HashMap<String, Vec<RequestedCredential>>,
    pub predicates: HashMap<String, Vec<RequestedCredential>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestedCredential {
    pub cred_info: CredentialInfo,
    pub interval: Option<NonRevocedInterval>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requested_attributes_reveal_by_default() {
        let json = r#"{
            "self_attested_attributes": {"attr3": "8-800-300"},
            "requested_attributes": {"attr1": {"cred_id": "c1"}, "attr2": {"cred_id": "c1", "revealed": false, "timestamp": 7}},
            "requested_predicates": {"pred1": {"cred_id": "c1"}}
        }"#;
        let requested: RequestedCredentials = serde_json::from_str(json).unwrap();
        assert!(requested.requested_attributes["attr1"].revealed);
        assert!(!requested.requested_attributes["attr2"].revealed);

        let key: ProvingCredentialKey = (&requested.requested_attributes["attr2"]).into();
        assert_eq!(key, ProvingCredentialKey { cred_id: "c1".into(), timestamp: Some(7) });
        assert!(requested.requested_predicates["pred1"] < key);
    }

    #[test]
    fn requested_proof_tolerates_missing_sections() {
        let requested: RequestedProof = serde_json::from_str(r#"{"revealed_attrs":{}}"#).unwrap();
        assert!(requested.predicates.is_empty());
        assert!(!serde_json::to_string(&requested).unwrap().contains("revealed_attr_groups"));
    }
}
