// src/services/prover.rs
//! Prover Service
//!
//! The holder side of anoncreds:
//! - master secrets and credential requests
//! - processing and storing issued credentials
//! - credential search, for plain queries and for proof requests
//! - proof creation
//! - revocation states (witnesses) for non-revocation proofs
//!
//! Searches are snapshots taken when the search is opened. Each search owns a
//! handle that must be closed; a closed handle is rejected with
//! `CommonInvalidParam`.

use crate::errors::{AnoncredsError, AnoncredsResult};
use crate::models::credential::{
    Credential, CredentialAttrTagPolicy, CredentialInfo, CredentialOffer, CredentialRequest,
    CredentialRequestMetadata,
};
use crate::models::credential_definition::CredentialDefinition;
use crate::models::did::validate_did;
use crate::models::proof::{CredentialsForProofRequest, Proof, RequestedCredential, RequestedCredentials};
use crate::models::proof_request::{NonRevocedInterval, PredicateInfo, ProofRequest};
use crate::models::revocation::{RevocationRegistryDefinition, RevocationRegistryDelta, RevocationState};
use crate::models::schema::{attr_common_view, Schema};
use crate::storage::{BlobReaderHandle, BlobStorageService};
use crate::utils::handles::{Handle, HandleArena};
use crate::wallet::credential_storage::{marker_tag, CredentialStorage};
use crate::wallet::key_management::KeyManager;
use crate::wallet::query::Query;
use crate::wallet::Wallet;
use crate::zkp::proof_generation::{build_proof, ProofInputs, RevocationStates};
use crate::zkp::tails::TailsReader;
use crate::zkp::{build_credential_values, build_master_secret_values, new_nonce, CryptoProver, Witness};
use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// Open credential search: a snapshot and a cursor into it.
pub struct CredentialSearch {
    items: Vec<CredentialInfo>,
    cursor: usize,
}

/// Open proof-request search: one snapshot and cursor per referent.
pub struct ProofRequestSearch {
    referents: HashMap<String, CredentialSearchCursor>,
}

struct CredentialSearchCursor {
    items: Vec<RequestedCredential>,
    cursor: usize,
}

pub type CredentialSearchHandle = Handle<CredentialSearch>;
pub type ProofRequestSearchHandle = Handle<ProofRequestSearch>;

fn take_batch<T: Clone>(items: &[T], cursor: &mut usize, count: usize) -> Vec<T> {
    let start = (*cursor).min(items.len());
    let end = start.saturating_add(count).min(items.len());
    *cursor = end;
    items[start..end].to_vec()
}

/// Holder role over a shared blob storage service.
pub struct Prover {
    blob_storage: Arc<BlobStorageService>,
    searches: Mutex<HandleArena<CredentialSearch>>,
    proof_req_searches: Mutex<HandleArena<ProofRequestSearch>>,
}

impl Prover {
    pub fn new(blob_storage: Arc<BlobStorageService>) -> Self {
        Prover {
            blob_storage,
            searches: Mutex::new(HandleArena::new()),
            proof_req_searches: Mutex::new(HandleArena::new()),
        }
    }

    fn searches(&self) -> AnoncredsResult<MutexGuard<'_, HandleArena<CredentialSearch>>> {
        self.searches
            .lock()
            .map_err(|_| AnoncredsError::InvalidState("credential search lock poisoned".to_string()))
    }

    fn proof_req_searches(&self) -> AnoncredsResult<MutexGuard<'_, HandleArena<ProofRequestSearch>>> {
        self.proof_req_searches
            .lock()
            .map_err(|_| AnoncredsError::InvalidState("proof request search lock poisoned".to_string()))
    }

    /// Creates a master secret, named `master_secret_id` or a random UUID.
    ///
    /// # Errors
    /// `MasterSecretDuplicateName` if the name is taken.
    pub async fn create_master_secret(&self, wallet: &Wallet, master_secret_id: Option<&str>) -> AnoncredsResult<String> {
        debug!("create_master_secret >>> id: {:?}", master_secret_id);
        let id = KeyManager::new(wallet).create_master_secret(master_secret_id)?;
        debug!("create_master_secret <<< id: {}", id);
        Ok(id)
    }

    /// Blinds the named master secret into a request for `offer`.
    ///
    /// # Returns
    /// The request for the issuer and the metadata needed to store the
    /// resulting credential.
    pub async fn create_credential_req(
        &self,
        wallet: &Wallet,
        prover_did: &str,
        offer: &CredentialOffer,
        cred_def: &CredentialDefinition,
        master_secret_id: &str,
    ) -> AnoncredsResult<(CredentialRequest, CredentialRequestMetadata)> {
        debug!(
            "create_credential_req >>> prover_did: {}, cred_def_id: {}, master_secret_id: {}",
            prover_did, offer.cred_def_id, master_secret_id
        );

        validate_did(prover_did)?;
        if offer.cred_def_id != cred_def.id() {
            return Err(AnoncredsError::InvalidStructure(format!(
                "Offer is for {} but the credential definition is {}",
                offer.cred_def_id,
                cred_def.id()
            )));
        }

        let master_secret = KeyManager::new(wallet).get_master_secret(master_secret_id)?;
        let credential_values = build_master_secret_values(&master_secret)?;
        let credential_pub_key = cred_def.public_key()?;

        let (blinded_ms, master_secret_blinding_data, blinded_ms_correctness_proof) = CryptoProver::blind_credential_secrets(
            &credential_pub_key,
            &offer.key_correctness_proof,
            &credential_values,
            &offer.nonce,
        )?;

        let nonce = new_nonce()?;
        let request = CredentialRequest {
            prover_did: prover_did.to_string(),
            cred_def_id: offer.cred_def_id.clone(),
            blinded_ms,
            blinded_ms_correctness_proof,
            nonce: nonce.try_clone()?,
        };
        let metadata = CredentialRequestMetadata {
            master_secret_blinding_data,
            nonce,
            master_secret_name: master_secret_id.to_string(),
        };

        debug!("create_credential_req <<<");
        Ok((request, metadata))
    }

    /// Unblinds and checks an issued credential, then stores it.
    ///
    /// # Arguments
    /// * `cred_id` - Id to store under; a random UUID when `None`
    /// * `rev_reg_def` - Required when the credential is revocable
    ///
    /// # Errors
    /// Crypto errors when the signature does not check out against the
    /// request metadata and credential definition.
    pub async fn store_credential(
        &self,
        wallet: &Wallet,
        cred_id: Option<&str>,
        metadata: &CredentialRequestMetadata,
        mut credential: Credential,
        cred_def: &CredentialDefinition,
        rev_reg_def: Option<&RevocationRegistryDefinition>,
    ) -> AnoncredsResult<String> {
        debug!(
            "store_credential >>> cred_id: {:?}, cred_def_id: {}, rev_reg_id: {:?}",
            cred_id, credential.cred_def_id, credential.rev_reg_id
        );

        if credential.cred_def_id != cred_def.id() {
            return Err(AnoncredsError::InvalidStructure(format!(
                "Credential is for {} but the credential definition is {}",
                credential.cred_def_id,
                cred_def.id()
            )));
        }
        if credential.rev_reg_id.is_some() && rev_reg_def.is_none() {
            return Err(AnoncredsError::InvalidStructure(
                "Revocation registry definition is required for a revocable credential".to_string(),
            ));
        }

        let id = cred_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let master_secret = KeyManager::new(wallet).get_master_secret(&metadata.master_secret_name)?;
        let credential_values = build_credential_values(&credential.values, Some(&master_secret))?;
        let credential_pub_key = cred_def.public_key()?;

        CryptoProver::process_credential_signature(
            &mut credential.signature,
            &credential_values,
            &credential.signature_correctness_proof,
            &metadata.master_secret_blinding_data,
            &credential_pub_key,
            &metadata.nonce,
            rev_reg_def.map(|def| &def.v1().value.public_keys.accum_key),
            credential.rev_reg.as_ref(),
            credential.witness.as_ref(),
        )?;

        CredentialStorage::new(wallet).store_credential(&id, &credential)?;

        debug!("store_credential <<< id: {}", id);
        Ok(id)
    }

    pub async fn get_credential(&self, wallet: &Wallet, cred_id: &str) -> AnoncredsResult<CredentialInfo> {
        CredentialStorage::new(wallet).get_credential_info(cred_id)
    }

    pub async fn delete_credential(&self, wallet: &Wallet, cred_id: &str) -> AnoncredsResult<()> {
        debug!("delete_credential >>> cred_id: {}", cred_id);
        CredentialStorage::new(wallet).remove_credential(cred_id)
    }

    /// All credentials whose tags equal every `filter` entry.
    #[deprecated(note = "use search_credentials")]
    pub async fn get_credentials(&self, wallet: &Wallet, filter: &HashMap<String, String>) -> AnoncredsResult<Vec<CredentialInfo>> {
        let query = Query::and_all(
            filter
                .iter()
                .map(|(name, value)| Query::Eq(name.clone(), value.clone()))
                .collect(),
        );
        CredentialStorage::new(wallet).search_credentials(&query)
    }

    /// Opens a search over stored credentials.
    ///
    /// # Returns
    /// The search handle and the total number of matches.
    pub async fn search_credentials(&self, wallet: &Wallet, query: &Query) -> AnoncredsResult<(CredentialSearchHandle, usize)> {
        debug!("search_credentials >>> query: {}", query.to_value());
        let items = CredentialStorage::new(wallet).search_credentials(query)?;
        let total_count = items.len();
        let handle = self.searches()?.insert(CredentialSearch { items, cursor: 0 });
        debug!("search_credentials <<< handle: {:?}, total_count: {}", handle, total_count);
        Ok((handle, total_count))
    }

    /// Next `count` results; fewer once the search is exhausted.
    pub fn fetch_credentials(&self, handle: CredentialSearchHandle, count: usize) -> AnoncredsResult<Vec<CredentialInfo>> {
        let mut searches = self.searches()?;
        let search = searches
            .get_mut(handle)
            .ok_or_else(|| AnoncredsError::InvalidParam(1, format!("Invalid search handle {:?}", handle)))?;
        Ok(take_batch(&search.items, &mut search.cursor, count))
    }

    pub fn close_credentials_search(&self, handle: CredentialSearchHandle) -> AnoncredsResult<()> {
        self.searches()?
            .remove(handle)
            .map(|_| ())
            .ok_or_else(|| AnoncredsError::InvalidParam(1, format!("Invalid search handle {:?}", handle)))
    }

    /// Every candidate credential for every referent of `proof_req`.
    #[deprecated(note = "use search_credentials_for_proof_req")]
    pub async fn get_credentials_for_proof_req(
        &self,
        wallet: &Wallet,
        proof_req: &ProofRequest,
    ) -> AnoncredsResult<CredentialsForProofRequest> {
        let storage = CredentialStorage::new(wallet);
        let mut result = CredentialsForProofRequest::default();
        for (referent, candidates) in collect_candidates(&storage, proof_req, None)? {
            match candidates.kind {
                ReferentKind::Attribute => result.attrs.insert(referent, candidates.items),
                ReferentKind::Predicate => result.predicates.insert(referent, candidates.items),
            };
        }
        Ok(result)
    }

    /// Opens a search over candidates for each referent of `proof_req`.
    ///
    /// # Arguments
    /// * `extra_query` - Additional WQL per referent, and-ed with the request's
    ///   own restrictions
    pub async fn search_credentials_for_proof_req(
        &self,
        wallet: &Wallet,
        proof_req: &ProofRequest,
        extra_query: Option<&HashMap<String, Query>>,
    ) -> AnoncredsResult<ProofRequestSearchHandle> {
        debug!("search_credentials_for_proof_req >>> name: {}", proof_req.name);

        let storage = CredentialStorage::new(wallet);
        let referents = collect_candidates(&storage, proof_req, extra_query)?
            .into_iter()
            .map(|(referent, candidates)| {
                (
                    referent,
                    CredentialSearchCursor {
                        items: candidates.items,
                        cursor: 0,
                    },
                )
            })
            .collect();
        let handle = self.proof_req_searches()?.insert(ProofRequestSearch { referents });

        debug!("search_credentials_for_proof_req <<< handle: {:?}", handle);
        Ok(handle)
    }

    /// Next `count` candidates for `item_referent`.
    ///
    /// # Errors
    /// `InvalidStructure` if the referent is not part of the searched request.
    pub fn fetch_credentials_for_proof_req(
        &self,
        handle: ProofRequestSearchHandle,
        item_referent: &str,
        count: usize,
    ) -> AnoncredsResult<Vec<RequestedCredential>> {
        let mut searches = self.proof_req_searches()?;
        let search = searches
            .get_mut(handle)
            .ok_or_else(|| AnoncredsError::InvalidParam(1, format!("Invalid search handle {:?}", handle)))?;
        let cursor = search.referents.get_mut(item_referent).ok_or_else(|| {
            AnoncredsError::InvalidStructure(format!("Referent {} is not part of the proof request", item_referent))
        })?;
        Ok(take_batch(&cursor.items, &mut cursor.cursor, count))
    }

    pub fn close_credentials_search_for_proof_req(&self, handle: ProofRequestSearchHandle) -> AnoncredsResult<()> {
        self.proof_req_searches()?
            .remove(handle)
            .map(|_| ())
            .ok_or_else(|| AnoncredsError::InvalidParam(1, format!("Invalid search handle {:?}", handle)))
    }

    /// Builds a proof answering `proof_req` from the prover's selection.
    ///
    /// Schemas, credential definitions and revocation states are supplied by
    /// the caller; anything the selection needs but is missing is an
    /// `InvalidStructure` error.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_proof(
        &self,
        wallet: &Wallet,
        proof_req: &ProofRequest,
        requested_credentials: &RequestedCredentials,
        master_secret_id: &str,
        schemas: &HashMap<String, Schema>,
        cred_defs: &HashMap<String, CredentialDefinition>,
        rev_states: &RevocationStates,
    ) -> AnoncredsResult<Proof> {
        debug!(
            "create_proof >>> name: {}, master_secret_id: {}",
            proof_req.name, master_secret_id
        );

        let master_secret = KeyManager::new(wallet).get_master_secret(master_secret_id)?;

        let storage = CredentialStorage::new(wallet);
        let mut credentials = HashMap::new();
        let cred_ids = requested_credentials
            .requested_attributes
            .values()
            .map(|attr| &attr.cred_id)
            .chain(requested_credentials.requested_predicates.values().map(|key| &key.cred_id));
        for cred_id in cred_ids {
            if !credentials.contains_key(cred_id) {
                credentials.insert(cred_id.clone(), storage.get_credential(cred_id)?);
            }
        }

        let inputs = ProofInputs {
            credentials: &credentials,
            master_secret: &master_secret,
            schemas,
            cred_defs,
            rev_states,
        };
        let proof = build_proof(proof_req, requested_credentials, &inputs)?;

        debug!("create_proof <<< sub-proofs: {}", proof.identifiers.len());
        Ok(proof)
    }

    /// Sets which attributes of `cred_def_id` credentials are tagged for
    /// value search. With `retroactive`, stored credentials are re-tagged.
    pub async fn set_credential_attr_tag_policy(
        &self,
        wallet: &Wallet,
        cred_def_id: &str,
        policy: &CredentialAttrTagPolicy,
        retroactive: bool,
    ) -> AnoncredsResult<()> {
        debug!(
            "set_credential_attr_tag_policy >>> cred_def_id: {}, policy: {:?}, retroactive: {}",
            cred_def_id, policy, retroactive
        );
        CredentialStorage::new(wallet).set_tag_policy(cred_def_id, policy, retroactive)
    }

    pub async fn get_credential_attr_tag_policy(&self, wallet: &Wallet, cred_def_id: &str) -> AnoncredsResult<CredentialAttrTagPolicy> {
        CredentialStorage::new(wallet).tag_policy(cred_def_id)
    }

    /// Computes a witness for `cred_rev_id` from a delta that starts at the
    /// registry's genesis.
    pub async fn create_revocation_state(
        &self,
        tails_reader: BlobReaderHandle,
        rev_reg_def: &RevocationRegistryDefinition,
        rev_reg_delta: &RevocationRegistryDelta,
        timestamp: u64,
        cred_rev_id: &str,
    ) -> AnoncredsResult<RevocationState> {
        debug!(
            "create_revocation_state >>> rev_reg_id: {}, timestamp: {}, cred_rev_id: {}",
            rev_reg_def.v1().id, timestamp, cred_rev_id
        );

        let index = parse_cred_rev_id(cred_rev_id)?;
        let definition = rev_reg_def.v1();
        let tails = self.read_tails(tails_reader, rev_reg_def).await?;

        let witness = Witness::new(
            index,
            definition.value.max_cred_num,
            definition.value.issuance_type.to_bool(),
            rev_reg_delta.value(),
            &tails,
        )?;

        Ok(RevocationState {
            witness,
            rev_reg: rev_reg_delta.to_registry(),
            timestamp,
        })
    }

    /// Advances `rev_state` by a delta that starts where the state's registry
    /// snapshot ends.
    pub async fn update_revocation_state(
        &self,
        tails_reader: BlobReaderHandle,
        rev_state: RevocationState,
        rev_reg_def: &RevocationRegistryDefinition,
        rev_reg_delta: &RevocationRegistryDelta,
        timestamp: u64,
        cred_rev_id: &str,
    ) -> AnoncredsResult<RevocationState> {
        debug!(
            "update_revocation_state >>> rev_reg_id: {}, from: {}, to: {}",
            rev_reg_def.v1().id, rev_state.timestamp, timestamp
        );

        let index = parse_cred_rev_id(cred_rev_id)?;
        let tails = self.read_tails(tails_reader, rev_reg_def).await?;

        let mut witness = rev_state.witness;
        witness.update(index, rev_reg_def.v1().value.max_cred_num, rev_reg_delta.value(), &tails)?;

        Ok(RevocationState {
            witness,
            rev_reg: rev_reg_delta.to_registry(),
            timestamp,
        })
    }

    async fn read_tails(&self, reader: BlobReaderHandle, rev_reg_def: &RevocationRegistryDefinition) -> AnoncredsResult<TailsReader> {
        let value = &rev_reg_def.v1().value;
        let blob = self
            .blob_storage
            .read_blob(reader, &value.tails_location, &value.tails_hash)
            .await?;
        TailsReader::from_blob(blob)
    }
}

fn parse_cred_rev_id(cred_rev_id: &str) -> AnoncredsResult<u32> {
    cred_rev_id
        .parse()
        .map_err(|_| AnoncredsError::InvalidStructure(format!("Cannot parse credential revocation id: {}", cred_rev_id)))
}

enum ReferentKind {
    Attribute,
    Predicate,
}

struct Candidates {
    kind: ReferentKind,
    items: Vec<RequestedCredential>,
}

/// WQL selecting credentials that carry every name and meet the restrictions.
fn referent_query(names: &[String], restrictions: Option<&Query>, extra: Option<&Query>) -> Query {
    let mut parts: Vec<Query> = names
        .iter()
        .map(|name| Query::Eq(marker_tag(name), "1".to_string()))
        .collect();
    parts.extend(restrictions.cloned());
    parts.extend(extra.cloned());
    Query::and_all(parts)
}

fn predicate_holds(info: &CredentialInfo, predicate: &PredicateInfo) -> bool {
    let wanted = attr_common_view(&predicate.name);
    info.attrs
        .iter()
        .find(|(name, _)| attr_common_view(name) == wanted)
        .map_or(false, |(_, raw)| predicate.satisfied_by(raw))
}

fn requested(items: Vec<CredentialInfo>, interval: Option<NonRevocedInterval>) -> Vec<RequestedCredential> {
    items
        .into_iter()
        .map(|cred_info| RequestedCredential {
            cred_info,
            interval: interval.clone(),
        })
        .collect()
}

fn collect_candidates(
    storage: &CredentialStorage<'_>,
    proof_req: &ProofRequest,
    extra_query: Option<&HashMap<String, Query>>,
) -> AnoncredsResult<HashMap<String, Candidates>> {
    proof_req.validate()?;
    let extra = |referent: &str| extra_query.and_then(|queries| queries.get(referent));
    let mut result = HashMap::new();

    for (referent, info) in &proof_req.requested_attributes {
        let names = info.names_checked(referent)?;
        let query = referent_query(&names, info.restrictions.as_ref(), extra(referent));
        let items = storage.search_credentials(&query)?;
        let interval = proof_req.interval_for(info.non_revoked.as_ref());
        result.insert(
            referent.clone(),
            Candidates {
                kind: ReferentKind::Attribute,
                items: requested(items, interval),
            },
        );
    }

    for (referent, predicate) in &proof_req.requested_predicates {
        let query = referent_query(
            std::slice::from_ref(&predicate.name),
            predicate.restrictions.as_ref(),
            extra(referent),
        );
        let items: Vec<CredentialInfo> = storage
            .search_credentials(&query)?
            .into_iter()
            .filter(|info| predicate_holds(info, predicate))
            .collect();
        let interval = proof_req.interval_for(predicate.non_revoked.as_ref());
        result.insert(
            referent.clone(),
            Candidates {
                kind: ReferentKind::Predicate,
                items: requested(items, interval),
            },
        );
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_batch_pages_to_the_end() {
        let items = vec![1, 2, 3, 4, 5];
        let mut cursor = 0;
        assert_eq!(take_batch(&items, &mut cursor, 2), vec![1, 2]);
        assert_eq!(take_batch(&items, &mut cursor, 2), vec![3, 4]);
        assert_eq!(take_batch(&items, &mut cursor, 2), vec![5]);
        assert!(take_batch(&items, &mut cursor, 2).is_empty());
    }

    #[test]
    fn test_referent_query_combines_markers_and_restrictions() {
        let restriction = Query::Eq("schema_name".to_string(), "degree".to_string());
        let query = referent_query(&["First Name".to_string()], Some(&restriction), None);
        assert_eq!(
            query,
            Query::And(vec![
                Query::Eq("attr::firstname::marker".to_string(), "1".to_string()),
                restriction,
            ])
        );
    }

    #[test]
    fn test_predicate_holds_on_integer_values() {
        let info = CredentialInfo {
            referent: "c".into(),
            attrs: [("Age".to_string(), "28".to_string())].into_iter().collect(),
            schema_id: "s".into(),
            cred_def_id: "d".into(),
            rev_reg_id: None,
            cred_rev_id: None,
        };
        let predicate: PredicateInfo = serde_json::from_str(r#"{"name":"age","p_type":">=","p_value":18}"#).unwrap();
        assert!(predicate_holds(&info, &predicate));

        let predicate: PredicateInfo = serde_json::from_str(r#"{"name":"age","p_type":">","p_value":30}"#).unwrap();
        assert!(!predicate_holds(&info, &predicate));
    }

    #[tokio::test]
    async fn test_closed_search_handle_is_rejected() {
        let prover = Prover::new(Arc::new(BlobStorageService::new()));
        let service = crate::wallet::WalletService::new();
        let config = crate::wallet::WalletConfig::new("prover-search");
        service.create_wallet(&config).unwrap();
        let wallet = service.get_wallet(service.open_wallet(&config).unwrap()).unwrap();

        let (handle, total) = prover.search_credentials(&wallet, &Query::default()).await.unwrap();
        assert_eq!(total, 0);
        prover.close_credentials_search(handle).unwrap();
        assert!(matches!(
            prover.fetch_credentials(handle, 1),
            Err(AnoncredsError::InvalidParam(1, _))
        ));
    }
}
