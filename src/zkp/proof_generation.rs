// src/zkp/proof_generation.rs
//! Proof assembly for a proof request.
//!
//! The prover's selection ([`RequestedCredentials`]) is grouped by
//! `(cred_id, timestamp)`; each group becomes one CL sub-proof, in key order,
//! and gets one [`Identifier`] at the same index. Every requested attribute
//! ends up in exactly one of `revealed_attrs`, `revealed_attr_groups`,
//! `unrevealed_attrs` or `self_attested_attrs` of the resulting
//! [`RequestedProof`].

use crate::errors::{AnoncredsError, AnoncredsResult};
use crate::models::credential::Credential;
use crate::models::credential_definition::CredentialDefinition;
use crate::models::proof::{
    Identifier, Proof, ProvingCredentialKey, RequestedCredentials, RequestedProof,
    RevealedAttributeGroupInfo, RevealedAttributeInfo, SubProofReferent,
};
use crate::models::proof_request::{AttributeInfo, PredicateInfo, ProofRequest};
use crate::models::revocation::RevocationState;
use crate::models::schema::Schema;
use crate::zkp::{
    build_credential_schema, build_credential_values, build_non_credential_schema,
    build_sub_proof_request, CryptoProver, MasterSecret, MASTER_SECRET_ATTR,
};
use log::debug;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Revocation states keyed by credential id or registry id, then timestamp.
pub type RevocationStates = HashMap<String, HashMap<u64, RevocationState>>;

/// Artifacts a proof is built against, all resolved by the caller.
pub struct ProofInputs<'a> {
    pub credentials: &'a HashMap<String, Credential>,
    pub master_secret: &'a MasterSecret,
    pub schemas: &'a HashMap<String, Schema>,
    pub cred_defs: &'a HashMap<String, CredentialDefinition>,
    pub rev_states: &'a RevocationStates,
}

#[derive(Default)]
struct SubProofSelection<'a> {
    attrs: Vec<(&'a str, &'a AttributeInfo, bool)>,
    predicates: Vec<(&'a str, &'a PredicateInfo)>,
}

/// Checks that every referent of the request is answered exactly once and
/// that nothing else is answered.
pub fn check_requested_credentials(proof_req: &ProofRequest, requested: &RequestedCredentials) -> AnoncredsResult<()> {
    proof_req.validate()?;

    for (referent, info) in &proof_req.requested_attributes {
        let by_credential = requested.requested_attributes.contains_key(referent);
        let self_attested = requested.self_attested_attributes.contains_key(referent);
        match (by_credential, self_attested) {
            (true, true) => {
                return Err(AnoncredsError::InvalidStructure(format!(
                    "Attribute {} is both self-attested and resolved by a credential",
                    referent
                )))
            }
            (false, false) => {
                return Err(AnoncredsError::InvalidStructure(format!(
                    "Attribute {} is not resolved",
                    referent
                )))
            }
            (false, true) if info.is_group() => {
                return Err(AnoncredsError::InvalidStructure(format!(
                    "Attribute group {} can not be self-attested",
                    referent
                )))
            }
            _ => {}
        }
    }

    let unknown_attr = requested
        .requested_attributes
        .keys()
        .chain(requested.self_attested_attributes.keys())
        .find(|referent| !proof_req.requested_attributes.contains_key(*referent));
    if let Some(referent) = unknown_attr {
        return Err(AnoncredsError::InvalidStructure(format!(
            "Attribute {} is not part of the proof request",
            referent
        )));
    }

    let requested_predicates: HashSet<&String> = proof_req.requested_predicates.keys().collect();
    let resolved_predicates: HashSet<&String> = requested.requested_predicates.keys().collect();
    if requested_predicates != resolved_predicates {
        return Err(AnoncredsError::InvalidStructure(
            "Requested predicates do not match the proof request".to_string(),
        ));
    }
    Ok(())
}

/// Builds the CL proof answering `proof_req` with the selected credentials.
///
/// # Errors
/// - `InvalidStructure` when the selection does not answer the request, or a
///   credential, schema, credential definition or revocation state it needs is
///   not supplied
/// - crypto errors when a credential cannot satisfy its sub-proof
pub fn build_proof(
    proof_req: &ProofRequest,
    requested: &RequestedCredentials,
    inputs: &ProofInputs<'_>,
) -> AnoncredsResult<Proof> {
    check_requested_credentials(proof_req, requested)?;

    let mut selections: BTreeMap<ProvingCredentialKey, SubProofSelection<'_>> = BTreeMap::new();
    for (referent, attr) in &requested.requested_attributes {
        let info = &proof_req.requested_attributes[referent];
        if info.is_group() && !attr.revealed {
            return Err(AnoncredsError::InvalidStructure(format!(
                "Attribute group {} must be revealed",
                referent
            )));
        }
        selections
            .entry(attr.into())
            .or_default()
            .attrs
            .push((referent.as_str(), info, attr.revealed));
    }
    for (referent, key) in &requested.requested_predicates {
        let info = &proof_req.requested_predicates[referent];
        selections
            .entry(key.clone())
            .or_default()
            .predicates
            .push((referent.as_str(), info));
    }

    let non_credential_schema = build_non_credential_schema()?;
    let mut proof_builder = CryptoProver::new_proof_builder()?;
    proof_builder.add_common_attribute(MASTER_SECRET_ATTR)?;

    let mut requested_proof = RequestedProof {
        self_attested_attrs: requested.self_attested_attributes.clone(),
        ..RequestedProof::default()
    };
    let mut identifiers = Vec::with_capacity(selections.len());

    for (sub_proof_index, (key, selection)) in selections.iter().enumerate() {
        let sub_proof_index = sub_proof_index as u32;
        let credential = inputs.credentials.get(&key.cred_id).ok_or_else(|| {
            AnoncredsError::InvalidStructure(format!("Credential {} not provided", key.cred_id))
        })?;
        let schema = inputs.schemas.get(&credential.schema_id).ok_or_else(|| {
            AnoncredsError::InvalidStructure(format!("Schema {} not provided", credential.schema_id))
        })?;
        let cred_def = inputs.cred_defs.get(&credential.cred_def_id).ok_or_else(|| {
            AnoncredsError::InvalidStructure(format!(
                "Credential definition {} not provided",
                credential.cred_def_id
            ))
        })?;
        let rev_state = match key.timestamp {
            Some(timestamp) => Some(find_revocation_state(inputs.rev_states, &key.cred_id, credential, timestamp)?),
            None => None,
        };

        let mut revealed_names = Vec::new();
        for (referent, info, revealed) in &selection.attrs {
            let names = info.names_checked(referent)?;
            for name in &names {
                if credential.values.get(name).is_none() {
                    return Err(AnoncredsError::InvalidStructure(format!(
                        "Credential {} has no attribute {}",
                        key.cred_id, name
                    )));
                }
            }
            if *revealed {
                record_revealed(&mut requested_proof, referent, info, &names, credential, sub_proof_index)?;
                revealed_names.extend(names);
            } else {
                requested_proof
                    .unrevealed_attrs
                    .insert(referent.to_string(), SubProofReferent { sub_proof_index });
            }
        }
        for (referent, _) in &selection.predicates {
            requested_proof
                .predicates
                .insert(referent.to_string(), SubProofReferent { sub_proof_index });
        }

        let sub_proof_request = build_sub_proof_request(
            revealed_names.iter(),
            selection.predicates.iter().map(|(_, info)| *info),
        )?;
        let credential_schema = build_credential_schema(schema.attr_names())?;
        let credential_values = build_credential_values(&credential.values, Some(inputs.master_secret))?;
        let credential_pub_key = cred_def.public_key()?;

        proof_builder.add_sub_proof_request(
            &sub_proof_request,
            &credential_schema,
            &non_credential_schema,
            &credential.signature,
            &credential_values,
            &credential_pub_key,
            rev_state.map(|state| &state.rev_reg),
            rev_state.map(|state| &state.witness),
        )?;

        identifiers.push(Identifier {
            schema_id: credential.schema_id.clone(),
            cred_def_id: credential.cred_def_id.clone(),
            rev_reg_id: credential.rev_reg_id.clone(),
            timestamp: key.timestamp,
        });
        debug!("build_proof: sub-proof {} for credential {}", sub_proof_index, key.cred_id);
    }

    let proof = proof_builder.finalize(&proof_req.nonce)?;
    Ok(Proof {
        proof,
        requested_proof,
        identifiers,
    })
}

fn record_revealed(
    requested_proof: &mut RequestedProof,
    referent: &str,
    info: &AttributeInfo,
    names: &[String],
    credential: &Credential,
    sub_proof_index: u32,
) -> AnoncredsResult<()> {
    if info.is_group() {
        let mut values = HashMap::new();
        for name in names {
            if let Some(value) = credential.values.get(name) {
                values.insert(name.clone(), value.clone());
            }
        }
        requested_proof.revealed_attr_groups.insert(
            referent.to_string(),
            RevealedAttributeGroupInfo { sub_proof_index, values },
        );
        return Ok(());
    }

    let name = names.first().ok_or_else(|| {
        AnoncredsError::InvalidStructure(format!("Attribute {} has no name", referent))
    })?;
    let value = credential
        .values
        .get(name)
        .ok_or_else(|| AnoncredsError::InvalidStructure(format!("Credential has no attribute {}", name)))?;
    requested_proof.revealed_attrs.insert(
        referent.to_string(),
        RevealedAttributeInfo {
            sub_proof_index,
            raw: value.raw.clone(),
            encoded: value.encoded.clone(),
        },
    );
    Ok(())
}

fn find_revocation_state<'a>(
    rev_states: &'a RevocationStates,
    cred_id: &str,
    credential: &Credential,
    timestamp: u64,
) -> AnoncredsResult<&'a RevocationState> {
    let rev_reg_id = credential.rev_reg_id.as_deref().ok_or_else(|| {
        AnoncredsError::InvalidStructure(format!(
            "Credential {} is not revocable but a timestamp was requested",
            cred_id
        ))
    })?;
    rev_states
        .get(cred_id)
        .or_else(|| rev_states.get(rev_reg_id))
        .and_then(|states| states.get(&timestamp))
        .ok_or_else(|| {
            AnoncredsError::InvalidStructure(format!(
                "Revocation state for {} at {} not provided",
                rev_reg_id, timestamp
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proof_request() -> ProofRequest {
        serde_json::from_str(
            r#"{
                "name": "p", "version": "1.0", "nonce": "1234567890",
                "requested_attributes": {
                    "attr1": {"name": "name"},
                    "attr2": {"names": ["name", "degree"]},
                    "attr3": {"name": "phone"}
                },
                "requested_predicates": {"pred1": {"name": "age", "p_type": ">=", "p_value": 18}}
            }"#,
        )
        .unwrap()
    }

    fn requested(json: &str) -> RequestedCredentials {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn accepts_full_resolution() {
        let selection = requested(
            r#"{
                "self_attested_attributes": {"attr3": "555"},
                "requested_attributes": {"attr1": {"cred_id": "c"}, "attr2": {"cred_id": "c"}},
                "requested_predicates": {"pred1": {"cred_id": "c"}}
            }"#,
        );
        assert!(check_requested_credentials(&proof_request(), &selection).is_ok());
    }

    #[test]
    fn rejects_unresolved_and_double_resolved() {
        let unresolved = requested(
            r#"{"requested_attributes": {"attr1": {"cred_id": "c"}, "attr2": {"cred_id": "c"}},
                "requested_predicates": {"pred1": {"cred_id": "c"}}}"#,
        );
        assert!(check_requested_credentials(&proof_request(), &unresolved).is_err());

        let doubled = requested(
            r#"{"self_attested_attributes": {"attr1": "x", "attr3": "555"},
                "requested_attributes": {"attr1": {"cred_id": "c"}, "attr2": {"cred_id": "c"}},
                "requested_predicates": {"pred1": {"cred_id": "c"}}}"#,
        );
        assert!(check_requested_credentials(&proof_request(), &doubled).is_err());
    }

    #[test]
    fn rejects_self_attested_group_and_unknown_referents() {
        let group = requested(
            r#"{"self_attested_attributes": {"attr2": "x", "attr3": "555"},
                "requested_attributes": {"attr1": {"cred_id": "c"}},
                "requested_predicates": {"pred1": {"cred_id": "c"}}}"#,
        );
        assert!(check_requested_credentials(&proof_request(), &group).is_err());

        let unknown = requested(
            r#"{"self_attested_attributes": {"attr3": "555", "attr9": "x"},
                "requested_attributes": {"attr1": {"cred_id": "c"}, "attr2": {"cred_id": "c"}},
                "requested_predicates": {"pred1": {"cred_id": "c"}}}"#,
        );
        assert!(check_requested_credentials(&proof_request(), &unknown).is_err());

        let missing_predicate = requested(
            r#"{"self_attested_attributes": {"attr3": "555"},
                "requested_attributes": {"attr1": {"cred_id": "c"}, "attr2": {"cred_id": "c"}}}"#,
        );
        assert!(check_requested_credentials(&proof_request(), &missing_predicate).is_err());
    }
}
