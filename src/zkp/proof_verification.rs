// src/zkp/proof_verification.rs
//! Proof verification.
//!
//! A proof is accepted only when all of these hold:
//! 1. it answers exactly the referents of the request, through sub-proofs that exist
//! 2. each answered referent satisfies its restrictions
//! 3. revealed encodings equal what the CL sub-proof actually reveals
//! 4. non-revocation intervals are met by a registry timestamp
//! 5. the aggregated CL proof verifies against the request nonce
//!
//! A failed check yields `Ok(false)`. Missing public artifacts are a caller
//! error and yield `InvalidStructure`.

use crate::errors::{AnoncredsError, AnoncredsResult};
use crate::models::credential_definition::{cred_def_issuer_did, CredentialDefinition};
use crate::models::proof::{Identifier, Proof};
use crate::models::proof_request::{NonRevocedInterval, PredicateInfo, ProofRequest};
use crate::models::revocation::{RevocationRegistry, RevocationRegistryDefinition};
use crate::models::schema::{attr_common_view, parse_schema_id, Schema};
use crate::utils::crypto::decimal_eq;
use crate::wallet::credential_storage::{marker_tag, normalize_tag_name, value_tag};
use crate::wallet::query::Query;
use crate::zkp::{
    build_credential_schema, build_non_credential_schema, build_sub_proof_request,
    CryptoVerifier, MASTER_SECRET_ATTR,
};
use log::warn;
use std::collections::{HashMap, HashSet};

/// Registry entries keyed by registry id, then timestamp.
pub type RevocationRegistries = HashMap<String, HashMap<u64, RevocationRegistry>>;

/// Public artifacts a proof is verified against.
pub struct VerificationInputs<'a> {
    pub schemas: &'a HashMap<String, Schema>,
    pub cred_defs: &'a HashMap<String, CredentialDefinition>,
    pub rev_reg_defs: &'a HashMap<String, RevocationRegistryDefinition>,
    pub rev_regs: &'a RevocationRegistries,
}

/// What one referent of the proof resolved to.
struct ResolvedReferent<'a> {
    referent: &'a str,
    sub_proof_index: usize,
    names: Vec<String>,
    /// Raw values revealed for this referent, by attribute name.
    revealed: HashMap<String, String>,
    restrictions: Option<&'a Query>,
    interval: Option<NonRevocedInterval>,
}

/// Verifies `proof` against `proof_req`.
///
/// # Errors
/// `InvalidStructure` when the request is malformed or an artifact referenced
/// by the proof's identifiers was not supplied.
pub fn verify(proof_req: &ProofRequest, proof: &Proof, inputs: &VerificationInputs<'_>) -> AnoncredsResult<bool> {
    proof_req.validate()?;
    check_artifacts_supplied(proof, inputs)?;

    let resolved = match resolve_referents(proof_req, proof) {
        Ok(resolved) => resolved,
        Err(reason) => {
            warn!("Proof rejected: {}", reason);
            return Ok(false);
        }
    };

    if let Err(reason) = check_self_attested(proof_req, proof) {
        warn!("Proof rejected: {}", reason);
        return Ok(false);
    }

    for referent in &resolved {
        let identifier = &proof.identifiers[referent.sub_proof_index];
        if let Err(reason) = check_restrictions(referent, identifier) {
            warn!("Proof rejected: {}", reason);
            return Ok(false);
        }
        if let Err(reason) = check_non_revoked(referent, identifier, inputs) {
            warn!("Proof rejected: {}", reason);
            return Ok(false);
        }
    }

    if let Err(reason) = check_revealed_encodings(proof_req, proof) {
        warn!("Proof rejected: {}", reason);
        return Ok(false);
    }

    match verify_crypto(proof_req, proof, inputs) {
        Ok(true) => Ok(true),
        Ok(false) => {
            warn!("Proof rejected: CL proof does not verify");
            Ok(false)
        }
        Err(err) => {
            warn!("Proof rejected: {}", err);
            Ok(false)
        }
    }
}

fn check_artifacts_supplied(proof: &Proof, inputs: &VerificationInputs<'_>) -> AnoncredsResult<()> {
    for identifier in &proof.identifiers {
        if !inputs.schemas.contains_key(&identifier.schema_id) {
            return Err(AnoncredsError::InvalidStructure(format!(
                "Schema not found for id: {}",
                identifier.schema_id
            )));
        }
        if !inputs.cred_defs.contains_key(&identifier.cred_def_id) {
            return Err(AnoncredsError::InvalidStructure(format!(
                "CredentialDefinition not found for id: {}",
                identifier.cred_def_id
            )));
        }
        if let (Some(rev_reg_id), Some(timestamp)) = (&identifier.rev_reg_id, identifier.timestamp) {
            if !inputs.rev_reg_defs.contains_key(rev_reg_id) {
                return Err(AnoncredsError::InvalidStructure(format!(
                    "RevocationRegistryDefinition not found for id: {}",
                    rev_reg_id
                )));
            }
            let entry = inputs.rev_regs.get(rev_reg_id).and_then(|entries| entries.get(&timestamp));
            if entry.is_none() {
                return Err(AnoncredsError::InvalidStructure(format!(
                    "RevocationRegistry not found for id: {} and timestamp: {}",
                    rev_reg_id, timestamp
                )));
            }
        }
    }
    Ok(())
}

/// Maps every referent of the request onto its sub-proof. Fails when the
/// referent sets differ or an index points past the proof.
fn resolve_referents<'a>(proof_req: &'a ProofRequest, proof: &'a Proof) -> Result<Vec<ResolvedReferent<'a>>, String> {
    let requested_proof = &proof.requested_proof;
    let sub_proof_count = proof.identifiers.len().min(proof.proof.proofs.len());

    let answered: Vec<&String> = requested_proof
        .revealed_attrs
        .keys()
        .chain(requested_proof.revealed_attr_groups.keys())
        .chain(requested_proof.unrevealed_attrs.keys())
        .chain(requested_proof.self_attested_attrs.keys())
        .collect();
    let answered_set: HashSet<&String> = answered.iter().copied().collect();
    let requested_set: HashSet<&String> = proof_req.requested_attributes.keys().collect();
    if answered.len() != answered_set.len() || answered_set != requested_set {
        return Err("requested attributes do not match the proof".to_string());
    }
    let predicates_answered: HashSet<&String> = requested_proof.predicates.keys().collect();
    let predicates_requested: HashSet<&String> = proof_req.requested_predicates.keys().collect();
    if predicates_answered != predicates_requested {
        return Err("requested predicates do not match the proof".to_string());
    }

    let check_index = |referent: &str, index: u32| -> Result<usize, String> {
        let index = index as usize;
        if index >= sub_proof_count {
            return Err(format!("referent {} points at missing sub-proof {}", referent, index));
        }
        Ok(index)
    };

    let mut resolved = Vec::new();
    for (referent, info) in &proof_req.requested_attributes {
        if requested_proof.self_attested_attrs.contains_key(referent) {
            continue;
        }
        let names = info.names_checked(referent).map_err(|err| err.to_string())?;
        let (index, revealed) = if let Some(attr) = requested_proof.revealed_attrs.get(referent) {
            if info.is_group() {
                return Err(format!("attribute group {} revealed as a single value", referent));
            }
            let revealed = names.iter().map(|name| (name.clone(), attr.raw.clone())).collect();
            (attr.sub_proof_index, revealed)
        } else if let Some(group) = requested_proof.revealed_attr_groups.get(referent) {
            let wanted: HashSet<String> = names.iter().map(|name| attr_common_view(name)).collect();
            let given: HashSet<String> = group.values.keys().map(|name| attr_common_view(name)).collect();
            if !info.is_group() || wanted != given {
                return Err(format!("attribute group {} does not reveal the requested names", referent));
            }
            let revealed = group
                .values
                .iter()
                .map(|(name, value)| (name.clone(), value.raw.clone()))
                .collect();
            (group.sub_proof_index, revealed)
        } else if let Some(attr) = requested_proof.unrevealed_attrs.get(referent) {
            (attr.sub_proof_index, HashMap::new())
        } else {
            return Err(format!("attribute {} is not answered", referent));
        };
        resolved.push(ResolvedReferent {
            referent,
            sub_proof_index: check_index(referent, index)?,
            names,
            revealed,
            restrictions: info.restrictions.as_ref(),
            interval: proof_req.interval_for(info.non_revoked.as_ref()),
        });
    }

    for (referent, info) in &proof_req.requested_predicates {
        let index = requested_proof
            .predicates
            .get(referent)
            .map(|predicate| predicate.sub_proof_index)
            .ok_or_else(|| format!("predicate {} is not answered", referent))?;
        resolved.push(ResolvedReferent {
            referent,
            sub_proof_index: check_index(referent, index)?,
            names: vec![info.name.clone()],
            revealed: HashMap::new(),
            restrictions: info.restrictions.as_ref(),
            interval: proof_req.interval_for(info.non_revoked.as_ref()),
        });
    }
    Ok(resolved)
}

fn check_self_attested(proof_req: &ProofRequest, proof: &Proof) -> Result<(), String> {
    for referent in proof.requested_proof.self_attested_attrs.keys() {
        let restricted = proof_req
            .requested_attributes
            .get(referent)
            .map_or(false, |info| info.restrictions.is_some());
        if restricted {
            return Err(format!("self-attested attribute {} has restrictions", referent));
        }
    }
    Ok(())
}

/// Tags the identifier and revealed values stand for, named like the tags a
/// prover's wallet gives the credential.
fn identifier_tags(identifier: &Identifier, referent: &ResolvedReferent<'_>) -> HashMap<String, String> {
    let mut tags = HashMap::new();
    tags.insert("schema_id".to_string(), identifier.schema_id.clone());
    if let Some((did, name, version)) = parse_schema_id(&identifier.schema_id) {
        tags.insert("schema_issuer_did".to_string(), did);
        tags.insert("schema_name".to_string(), name);
        tags.insert("schema_version".to_string(), version);
    }
    if let Some(did) = cred_def_issuer_did(&identifier.cred_def_id) {
        tags.insert("issuer_did".to_string(), did.to_string());
    }
    tags.insert("cred_def_id".to_string(), identifier.cred_def_id.clone());
    tags.insert(
        "rev_reg_id".to_string(),
        identifier.rev_reg_id.clone().unwrap_or_else(|| "None".to_string()),
    );
    for name in &referent.names {
        tags.insert(marker_tag(name), "1".to_string());
    }
    for (name, raw) in &referent.revealed {
        tags.insert(value_tag(name), raw.clone());
    }
    tags
}

fn check_restrictions(referent: &ResolvedReferent<'_>, identifier: &Identifier) -> Result<(), String> {
    let restrictions = match referent.restrictions {
        Some(restrictions) => restrictions.clone().map_names(normalize_tag_name),
        None => return Ok(()),
    };
    if restrictions.matches(&identifier_tags(identifier, referent)) {
        Ok(())
    } else {
        Err(format!("referent {} does not satisfy its restrictions", referent.referent))
    }
}

fn check_non_revoked(
    referent: &ResolvedReferent<'_>,
    identifier: &Identifier,
    inputs: &VerificationInputs<'_>,
) -> Result<(), String> {
    let interval = match &referent.interval {
        Some(interval) => interval,
        None => return Ok(()),
    };
    let revocable = inputs
        .cred_defs
        .get(&identifier.cred_def_id)
        .map_or(false, CredentialDefinition::supports_revocation);
    if !revocable {
        return Ok(());
    }
    match identifier.timestamp {
        Some(timestamp) if interval.contains(timestamp) => Ok(()),
        Some(timestamp) => Err(format!(
            "referent {} proven at {} outside its non-revoked interval",
            referent.referent, timestamp
        )),
        None => Err(format!(
            "referent {} requires a non-revocation proof",
            referent.referent
        )),
    }
}

fn check_revealed_encodings(proof_req: &ProofRequest, proof: &Proof) -> Result<(), String> {
    for (referent, attr) in &proof.requested_proof.revealed_attrs {
        let name = proof_req
            .requested_attributes
            .get(referent)
            .and_then(|info| info.name.as_ref())
            .ok_or_else(|| format!("revealed attribute {} has no requested name", referent))?;
        let revealed = sub_proof_revealed(proof, attr.sub_proof_index as usize)?;
        let crypto_value = revealed
            .get(&attr_common_view(name))
            .ok_or_else(|| format!("{} is not revealed by the proof", name))?;
        if !decimal_eq(crypto_value, &attr.encoded) {
            return Err(format!("encoded value of {} does not match the proof", referent));
        }
    }
    for (referent, group) in &proof.requested_proof.revealed_attr_groups {
        let revealed = sub_proof_revealed(proof, group.sub_proof_index as usize)?;
        for (name, value) in &group.values {
            let crypto_value = revealed
                .get(&attr_common_view(name))
                .ok_or_else(|| format!("{} of group {} is not revealed by the proof", name, referent))?;
            if !decimal_eq(crypto_value, &value.encoded) {
                return Err(format!("encoded value of {} in group {} does not match the proof", name, referent));
            }
        }
    }
    Ok(())
}

fn sub_proof_revealed(proof: &Proof, index: usize) -> Result<HashMap<String, String>, String> {
    proof
        .proof
        .proofs
        .get(index)
        .ok_or_else(|| format!("sub-proof {} is missing", index))?
        .revealed_attrs()
        .map_err(|err| err.to_string())
}

fn verify_crypto(proof_req: &ProofRequest, proof: &Proof, inputs: &VerificationInputs<'_>) -> AnoncredsResult<bool> {
    let non_credential_schema = build_non_credential_schema()?;
    let mut proof_verifier = CryptoVerifier::new_proof_verifier()?;
    proof_verifier.add_common_attribute(MASTER_SECRET_ATTR)?;

    for (sub_proof_index, identifier) in proof.identifiers.iter().enumerate() {
        let (revealed_names, predicates) = disclosed_for(proof_req, proof, sub_proof_index as u32);
        let sub_proof_request = build_sub_proof_request(revealed_names.iter(), predicates)?;

        let schema = inputs.schemas.get(&identifier.schema_id).ok_or_else(|| {
            AnoncredsError::InvalidStructure(format!("Schema not found for id: {}", identifier.schema_id))
        })?;
        let cred_def = inputs.cred_defs.get(&identifier.cred_def_id).ok_or_else(|| {
            AnoncredsError::InvalidStructure(format!(
                "CredentialDefinition not found for id: {}",
                identifier.cred_def_id
            ))
        })?;
        let credential_schema = build_credential_schema(schema.attr_names())?;
        let credential_pub_key = cred_def.public_key()?;

        let (rev_key_pub, rev_reg) = match (&identifier.rev_reg_id, identifier.timestamp) {
            (Some(rev_reg_id), Some(timestamp)) => {
                let rev_reg_def = inputs.rev_reg_defs.get(rev_reg_id).ok_or_else(|| {
                    AnoncredsError::InvalidStructure(format!(
                        "RevocationRegistryDefinition not found for id: {}",
                        rev_reg_id
                    ))
                })?;
                let rev_reg = inputs
                    .rev_regs
                    .get(rev_reg_id)
                    .and_then(|entries| entries.get(&timestamp))
                    .ok_or_else(|| {
                        AnoncredsError::InvalidStructure(format!(
                            "RevocationRegistry not found for id: {} and timestamp: {}",
                            rev_reg_id, timestamp
                        ))
                    })?;
                (Some(&rev_reg_def.v1().value.public_keys.accum_key), Some(rev_reg.value()))
            }
            _ => (None, None),
        };

        proof_verifier.add_sub_proof_request(
            &sub_proof_request,
            &credential_schema,
            &non_credential_schema,
            &credential_pub_key,
            rev_key_pub,
            rev_reg,
        )?;
    }

    Ok(proof_verifier.verify(&proof.proof, &proof_req.nonce)?)
}

/// Attribute names revealed by, and predicates proven by, one sub-proof.
fn disclosed_for<'a>(proof_req: &'a ProofRequest, proof: &Proof, sub_proof_index: u32) -> (Vec<String>, Vec<&'a PredicateInfo>) {
    let requested_proof = &proof.requested_proof;
    let mut revealed = Vec::new();
    for (referent, attr) in &requested_proof.revealed_attrs {
        if attr.sub_proof_index != sub_proof_index {
            continue;
        }
        if let Some(name) = proof_req.requested_attributes.get(referent).and_then(|info| info.name.clone()) {
            revealed.push(name);
        }
    }
    for (referent, group) in &requested_proof.revealed_attr_groups {
        if group.sub_proof_index != sub_proof_index {
            continue;
        }
        if let Some(names) = proof_req.requested_attributes.get(referent).and_then(|info| info.names.clone()) {
            revealed.extend(names);
        }
    }

    let predicates = requested_proof
        .predicates
        .iter()
        .filter(|(_, predicate)| predicate.sub_proof_index == sub_proof_index)
        .filter_map(|(referent, _)| proof_req.requested_predicates.get(referent))
        .collect();
    (revealed, predicates)
}
