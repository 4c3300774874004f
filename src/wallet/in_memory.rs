// src/wallet/in_memory.rs
//! In-memory wallet storage, registered as the `"default"` storage type.
//!
//! Records live for the lifetime of the process; closing and reopening a
//! wallet returns the same records. Each wallet's records sit behind one
//! mutex so tag updates and searches never observe a half-written record.

use crate::errors::{AnoncredsError, AnoncredsResult};
use crate::wallet::query::Query;
use crate::wallet::storage::{StorageRecord, WalletStorage, WalletStorageType};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

type RecordKey = (String, String);

#[derive(Default)]
pub struct InMemoryStorage {
    records: Mutex<BTreeMap<RecordKey, StorageRecord>>,
}

impl InMemoryStorage {
    fn records(&self) -> AnoncredsResult<MutexGuard<'_, BTreeMap<RecordKey, StorageRecord>>> {
        self.records
            .lock()
            .map_err(|_| AnoncredsError::WalletStorage("wallet records lock poisoned".to_string()))
    }

    fn key(type_: &str, id: &str) -> RecordKey {
        (type_.to_string(), id.to_string())
    }

    fn not_found(type_: &str, id: &str) -> AnoncredsError {
        AnoncredsError::WalletItemNotFound(format!("{} {}", type_, id))
    }
}

impl WalletStorage for InMemoryStorage {
    fn add(&self, record: StorageRecord) -> AnoncredsResult<()> {
        let mut records = self.records()?;
        let key = Self::key(&record.type_, &record.id);
        if records.contains_key(&key) {
            return Err(AnoncredsError::WalletItemAlreadyExists(format!(
                "{} {}",
                record.type_, record.id
            )));
        }
        records.insert(key, record);
        Ok(())
    }

    fn get(&self, type_: &str, id: &str) -> AnoncredsResult<StorageRecord> {
        self.records()?
            .get(&Self::key(type_, id))
            .cloned()
            .ok_or_else(|| Self::not_found(type_, id))
    }

    fn update(&self, type_: &str, id: &str, value: &str) -> AnoncredsResult<()> {
        let mut records = self.records()?;
        let record = records
            .get_mut(&Self::key(type_, id))
            .ok_or_else(|| Self::not_found(type_, id))?;
        record.value = value.to_string();
        Ok(())
    }

    fn update_tags(&self, type_: &str, id: &str, tags: HashMap<String, String>) -> AnoncredsResult<()> {
        let mut records = self.records()?;
        let record = records
            .get_mut(&Self::key(type_, id))
            .ok_or_else(|| Self::not_found(type_, id))?;
        record.tags = tags;
        Ok(())
    }

    fn delete(&self, type_: &str, id: &str) -> AnoncredsResult<()> {
        self.records()?
            .remove(&Self::key(type_, id))
            .map(|_| ())
            .ok_or_else(|| Self::not_found(type_, id))
    }

    fn search(&self, type_: &str, query: &Query) -> AnoncredsResult<Vec<StorageRecord>> {
        Ok(self
            .records()?
            .values()
            .filter(|record| record.type_ == type_ && query.matches(&record.tags))
            .cloned()
            .collect())
    }

    fn get_all(&self) -> AnoncredsResult<Vec<StorageRecord>> {
        Ok(self.records()?.values().cloned().collect())
    }
}

/// Keeps every created in-memory wallet, keyed by wallet id.
#[derive(Default)]
pub struct InMemoryStorageType {
    wallets: Mutex<HashMap<String, Arc<InMemoryStorage>>>,
}

impl InMemoryStorageType {
    pub fn new() -> Self {
        Self::default()
    }

    fn wallets(&self) -> AnoncredsResult<MutexGuard<'_, HashMap<String, Arc<InMemoryStorage>>>> {
        self.wallets
            .lock()
            .map_err(|_| AnoncredsError::WalletStorage("wallet registry lock poisoned".to_string()))
    }
}

impl WalletStorageType for InMemoryStorageType {
    fn create_storage(&self, id: &str, _config: Option<&Value>) -> AnoncredsResult<()> {
        let mut wallets = self.wallets()?;
        if wallets.contains_key(id) {
            return Err(AnoncredsError::WalletAlreadyExists(id.to_string()));
        }
        wallets.insert(id.to_string(), Arc::new(InMemoryStorage::default()));
        Ok(())
    }

    fn open_storage(&self, id: &str, _config: Option<&Value>) -> AnoncredsResult<Arc<dyn WalletStorage>> {
        let wallets = self.wallets()?;
        let storage = wallets
            .get(id)
            .cloned()
            .ok_or_else(|| AnoncredsError::WalletNotFound(id.to_string()))?;
        Ok(storage)
    }

    fn delete_storage(&self, id: &str, _config: Option<&Value>) -> AnoncredsResult<()> {
        self.wallets()?
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| AnoncredsError::WalletNotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, tags: &[(&str, &str)]) -> StorageRecord {
        StorageRecord::new(
            "Test",
            id,
            format!("{{\"id\":\"{}\"}}", id),
            tags.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        )
    }

    #[test]
    fn test_add_get_delete() {
        let storage = InMemoryStorage::default();
        storage.add(record("a", &[("color", "red")])).unwrap();

        assert_eq!(storage.get("Test", "a").unwrap().tags["color"], "red");
        assert!(matches!(
            storage.add(record("a", &[])),
            Err(AnoncredsError::WalletItemAlreadyExists(_))
        ));
        assert!(matches!(storage.get("Other", "a"), Err(AnoncredsError::WalletItemNotFound(_))));

        storage.delete("Test", "a").unwrap();
        assert!(storage.delete("Test", "a").is_err());
    }

    #[test]
    fn test_update_value_and_tags() {
        let storage = InMemoryStorage::default();
        storage.add(record("a", &[("color", "red")])).unwrap();

        storage.update("Test", "a", "{}").unwrap();
        storage
            .update_tags("Test", "a", [("size".to_string(), "L".to_string())].into_iter().collect())
            .unwrap();

        let stored = storage.get("Test", "a").unwrap();
        assert_eq!(stored.value, "{}");
        assert!(!stored.tags.contains_key("color"));
        assert!(storage.update("Test", "missing", "{}").is_err());
    }

    #[test]
    fn test_search_filters_by_type_and_tags() {
        let storage = InMemoryStorage::default();
        storage.add(record("b", &[("color", "red")])).unwrap();
        storage.add(record("a", &[("color", "red")])).unwrap();
        storage.add(record("c", &[("color", "blue")])).unwrap();

        let found = storage
            .search("Test", &Query::Eq("color".into(), "red".into()))
            .unwrap();
        let ids: Vec<_> = found.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(storage.count("Test", &Query::default()).unwrap(), 3);
        assert_eq!(storage.count("Other", &Query::default()).unwrap(), 0);
    }

    #[test]
    fn test_storage_type_lifecycle() {
        let storage_type = InMemoryStorageType::new();
        storage_type.create_storage("w1", None).unwrap();
        assert!(matches!(
            storage_type.create_storage("w1", None),
            Err(AnoncredsError::WalletAlreadyExists(_))
        ));

        let storage = storage_type.open_storage("w1", None).unwrap();
        storage.add(record("a", &[])).unwrap();
        let reopened = storage_type.open_storage("w1", None).unwrap();
        assert!(reopened.get("Test", "a").is_ok());

        storage_type.delete_storage("w1", None).unwrap();
        assert!(matches!(storage_type.open_storage("w1", None), Err(AnoncredsError::WalletNotFound(_))));
    }
}
