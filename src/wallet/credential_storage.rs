// src/wallet/credential_storage.rs
//! Credential storage for the prover side of the wallet.
//!
//! Credentials are stored as wallet records tagged for search:
//! - `schema_id`, `schema_issuer_did`, `schema_name`, `schema_version`
//! - `issuer_did`, `cred_def_id`, `rev_reg_id` (`"None"` when not revocable)
//! - `attr::<name>::marker` = `"1"` for every attribute
//! - `attr::<name>::value` = raw value, for attributes the tag policy allows
//!
//! Attribute names inside tags are normalized with [`attr_common_view`].

use crate::errors::AnoncredsResult;
use crate::models::credential::{Credential, CredentialAttrTagPolicy, CredentialInfo};
use crate::models::credential_definition::cred_def_issuer_did;
use crate::models::schema::{attr_common_view, parse_schema_id};
use crate::wallet::query::Query;
use crate::wallet::Wallet;
use log::debug;
use std::collections::HashMap;

pub fn marker_tag(attr_name: &str) -> String {
    format!("attr::{}::marker", attr_common_view(attr_name))
}

pub fn value_tag(attr_name: &str) -> String {
    format!("attr::{}::value", attr_common_view(attr_name))
}

/// Normalizes the attribute part of `attr::<name>::marker|value` tag names;
/// other names pass through.
pub fn normalize_tag_name(name: &str) -> String {
    let parsed = name
        .strip_prefix("attr::")
        .and_then(|rest| rest.rsplit_once("::"))
        .filter(|(_, suffix)| *suffix == "marker" || *suffix == "value");
    match parsed {
        Some((attr, suffix)) => format!("attr::{}::{}", attr_common_view(attr), suffix),
        None => name.to_string(),
    }
}

/// Search tags for a credential under the given tag policy.
pub fn build_credential_tags(credential: &Credential, policy: &CredentialAttrTagPolicy) -> HashMap<String, String> {
    let mut tags = HashMap::new();

    tags.insert("schema_id".to_string(), credential.schema_id.clone());
    if let Some((did, name, version)) = parse_schema_id(&credential.schema_id) {
        tags.insert("schema_issuer_did".to_string(), did);
        tags.insert("schema_name".to_string(), name);
        tags.insert("schema_version".to_string(), version);
    }
    if let Some(did) = cred_def_issuer_did(&credential.cred_def_id) {
        tags.insert("issuer_did".to_string(), did.to_string());
    }
    tags.insert("cred_def_id".to_string(), credential.cred_def_id.clone());
    tags.insert(
        "rev_reg_id".to_string(),
        credential.rev_reg_id.clone().unwrap_or_else(|| "None".to_string()),
    );

    for (attr, value) in credential.values.0.iter() {
        tags.insert(marker_tag(attr), "1".to_string());
        if policy.is_taggable(attr) {
            tags.insert(value_tag(attr), value.raw.clone());
        }
    }
    tags
}

/// Searchable summary of a stored credential.
pub fn credential_info(referent: &str, credential: &Credential) -> CredentialInfo {
    CredentialInfo {
        referent: referent.to_string(),
        attrs: credential
            .values
            .0
            .iter()
            .map(|(name, value)| (name.clone(), value.raw.clone()))
            .collect(),
        schema_id: credential.schema_id.clone(),
        cred_def_id: credential.cred_def_id.clone(),
        rev_reg_id: credential.rev_reg_id.clone(),
        cred_rev_id: credential.cred_rev_id().map(|idx| idx.to_string()),
    }
}

/// Prover credential records of one wallet.
pub struct CredentialStorage<'a> {
    wallet: &'a Wallet,
}

impl<'a> CredentialStorage<'a> {
    pub fn new(wallet: &'a Wallet) -> Self {
        CredentialStorage { wallet }
    }

    /// Tag policy for a credential definition; tags everything when unset.
    pub fn tag_policy(&self, cred_def_id: &str) -> AnoncredsResult<CredentialAttrTagPolicy> {
        Ok(self
            .wallet
            .get_object_opt::<CredentialAttrTagPolicy>(cred_def_id)?
            .unwrap_or_default())
    }

    /// Replaces the tag policy. With `retroactive`, every stored credential of
    /// `cred_def_id` is re-tagged under the new policy.
    pub fn set_tag_policy(&self, cred_def_id: &str, policy: &CredentialAttrTagPolicy, retroactive: bool) -> AnoncredsResult<()> {
        if policy.taggable.is_some() {
            self.wallet.upsert_object(cred_def_id, policy)?;
        } else if self.wallet.record_exists::<CredentialAttrTagPolicy>(cred_def_id)? {
            self.wallet.delete_record::<CredentialAttrTagPolicy>(cred_def_id)?;
        }

        if retroactive {
            let query = Query::Eq("cred_def_id".to_string(), cred_def_id.to_string());
            let stored = self.wallet.search_records::<Credential>(&query)?;
            debug!("set_tag_policy: re-tagging {} credentials of {}", stored.len(), cred_def_id);
            for entry in stored {
                let tags = build_credential_tags(&entry.value, policy);
                self.wallet.update_record_tags::<Credential>(&entry.id, tags)?;
            }
        }
        Ok(())
    }

    /// Stores a processed credential under `id` with tags from the current policy.
    ///
    /// # Errors
    /// `WalletItemAlreadyExists` if `id` is taken.
    pub fn store_credential(&self, id: &str, credential: &Credential) -> AnoncredsResult<()> {
        let policy = self.tag_policy(&credential.cred_def_id)?;
        let tags = build_credential_tags(credential, &policy);
        self.wallet.add_object(id, credential, tags)
    }

    pub fn get_credential(&self, id: &str) -> AnoncredsResult<Credential> {
        self.wallet.get_object(id)
    }

    pub fn get_credential_info(&self, id: &str) -> AnoncredsResult<CredentialInfo> {
        Ok(credential_info(id, &self.get_credential(id)?))
    }

    pub fn contains_credential(&self, id: &str) -> AnoncredsResult<bool> {
        self.wallet.record_exists::<Credential>(id)
    }

    pub fn remove_credential(&self, id: &str) -> AnoncredsResult<()> {
        self.wallet.delete_record::<Credential>(id)
    }

    /// Snapshot of the credentials matching `query`, ordered by id.
    pub fn search_credentials(&self, query: &Query) -> AnoncredsResult<Vec<CredentialInfo>> {
        let query = query.clone().map_names(normalize_tag_name);
        Ok(self
            .wallet
            .search_records::<Credential>(&query)?
            .iter()
            .map(|entry| credential_info(&entry.id, &entry.value))
            .collect())
    }

    pub fn count_credentials(&self, query: &Query) -> AnoncredsResult<usize> {
        let query = query.clone().map_names(normalize_tag_name);
        self.wallet.count_records::<Credential>(&query)
    }
}
