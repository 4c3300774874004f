// src/wallet/storage.rs
//! Pluggable record storage behind a wallet.
//!
//! A backend is registered with the [`WalletService`](super::WalletService) as a
//! [`WalletStorageType`] under a name; opening a wallet of that type yields a
//! [`WalletStorage`] holding the wallet's records.

use crate::errors::AnoncredsResult;
use crate::wallet::query::Query;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// One stored record: a JSON value plus plain-text tags, addressed by `(type, id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageRecord {
    #[serde(rename = "type")]
    pub type_: String,
    pub id: String,
    pub value: String,
    pub tags: HashMap<String, String>,
}

impl StorageRecord {
    pub fn new(type_: &str, id: &str, value: String, tags: HashMap<String, String>) -> Self {
        StorageRecord {
            type_: type_.to_string(),
            id: id.to_string(),
            value,
            tags,
        }
    }
}

/// Record operations on an open wallet.
///
/// # Errors
/// Implementations report `WalletItemNotFound` for missing records and
/// `WalletItemAlreadyExists` when adding over an existing `(type, id)`.
pub trait WalletStorage: Send + Sync {
    fn add(&self, record: StorageRecord) -> AnoncredsResult<()>;

    fn get(&self, type_: &str, id: &str) -> AnoncredsResult<StorageRecord>;

    fn update(&self, type_: &str, id: &str, value: &str) -> AnoncredsResult<()>;

    /// Replaces the record's whole tag set.
    fn update_tags(&self, type_: &str, id: &str, tags: HashMap<String, String>) -> AnoncredsResult<()>;

    fn delete(&self, type_: &str, id: &str) -> AnoncredsResult<()>;

    /// All records of `type_` whose tags satisfy `query`, ordered by id.
    fn search(&self, type_: &str, query: &Query) -> AnoncredsResult<Vec<StorageRecord>>;

    fn count(&self, type_: &str, query: &Query) -> AnoncredsResult<usize> {
        Ok(self.search(type_, query)?.len())
    }

    /// Every record of every type, used for export.
    fn get_all(&self) -> AnoncredsResult<Vec<StorageRecord>>;
}

/// Factory for one kind of wallet storage.
pub trait WalletStorageType: Send + Sync {
    fn create_storage(&self, id: &str, config: Option<&Value>) -> AnoncredsResult<()>;

    fn open_storage(&self, id: &str, config: Option<&Value>) -> AnoncredsResult<Arc<dyn WalletStorage>>;

    fn delete_storage(&self, id: &str, config: Option<&Value>) -> AnoncredsResult<()>;
}
