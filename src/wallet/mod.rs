// src/wallet/mod.rs
//! Wallet: the typed record store shared by the issuer and prover roles.
//!
//! [`WalletService`] owns the registered storage types and the open wallets.
//! An open [`Wallet`] is a cheap clonable view over its storage that stores and
//! loads serde records by `(type, id)`, where the type name comes from the
//! record's [`WalletRecord`] impl.

pub mod credential_storage;
pub mod in_memory;
pub mod key_management;
pub mod query;
pub mod records;
pub mod sqlite;
pub mod storage;

use crate::errors::{AnoncredsError, AnoncredsResult};
use crate::utils::handles::{Handle, HandleArena};
use crate::utils::serialization::{deserialize, serialize};
use crate::wallet::in_memory::InMemoryStorageType;
use crate::wallet::query::Query;
use crate::wallet::storage::{StorageRecord, WalletStorage, WalletStorageType};
use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

pub const DEFAULT_STORAGE_TYPE: &str = "default";

const EXPORT_VERSION: u32 = 1;

/// File written by [`WalletService::export_wallet`]. Records are kept verbatim,
/// values and tags in plain text.
#[derive(Serialize, Deserialize)]
struct WalletExport {
    version: u32,
    wallet_id: String,
    records: Vec<StorageRecord>,
}

/// A serde payload stored in the wallet under a fixed record type.
pub trait WalletRecord: Serialize + DeserializeOwned {
    const TYPE: &'static str;
}

/// Identifies a wallet and the storage type it lives in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WalletConfig {
    pub id: String,
    #[serde(default)]
    pub storage_type: Option<String>,
    #[serde(default)]
    pub storage_config: Option<Value>,
}

impl WalletConfig {
    pub fn new(id: &str) -> Self {
        WalletConfig {
            id: id.to_string(),
            storage_type: None,
            storage_config: None,
        }
    }

    fn storage_type(&self) -> &str {
        self.storage_type.as_deref().unwrap_or(DEFAULT_STORAGE_TYPE)
    }
}

/// A record loaded by a search, together with its id and tags.
#[derive(Debug, Clone)]
pub struct WalletEntry<T> {
    pub id: String,
    pub value: T,
    pub tags: HashMap<String, String>,
}

#[derive(Clone)]
pub struct Wallet {
    id: String,
    storage: Arc<dyn WalletStorage>,
}

pub type WalletHandle = Handle<Wallet>;

impl Wallet {
    pub fn new(id: &str, storage: Arc<dyn WalletStorage>) -> Self {
        Wallet {
            id: id.to_string(),
            storage,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Stores a new record.
    ///
    /// # Errors
    /// `WalletItemAlreadyExists` if a record of the same type and id exists.
    pub fn add_object<T: WalletRecord>(&self, id: &str, object: &T, tags: HashMap<String, String>) -> AnoncredsResult<()> {
        let value = serialize(object)?;
        self.storage.add(StorageRecord::new(T::TYPE, id, value, tags))
    }

    /// Loads a record.
    ///
    /// # Errors
    /// `WalletItemNotFound` if no such record exists.
    pub fn get_object<T: WalletRecord>(&self, id: &str) -> AnoncredsResult<T> {
        let record = self.storage.get(T::TYPE, id)?;
        deserialize(&record.value, T::TYPE)
    }

    pub fn get_object_opt<T: WalletRecord>(&self, id: &str) -> AnoncredsResult<Option<T>> {
        match self.get_object(id) {
            Ok(object) => Ok(Some(object)),
            Err(AnoncredsError::WalletItemNotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn get_tags<T: WalletRecord>(&self, id: &str) -> AnoncredsResult<HashMap<String, String>> {
        Ok(self.storage.get(T::TYPE, id)?.tags)
    }

    pub fn update_object<T: WalletRecord>(&self, id: &str, object: &T) -> AnoncredsResult<()> {
        let value = serialize(object)?;
        self.storage.update(T::TYPE, id, &value)
    }

    /// Adds the record, or overwrites its value if it already exists.
    pub fn upsert_object<T: WalletRecord>(&self, id: &str, object: &T) -> AnoncredsResult<()> {
        if self.record_exists::<T>(id)? {
            self.update_object(id, object)
        } else {
            self.add_object(id, object, HashMap::new())
        }
    }

    pub fn update_record_tags<T: WalletRecord>(&self, id: &str, tags: HashMap<String, String>) -> AnoncredsResult<()> {
        self.storage.update_tags(T::TYPE, id, tags)
    }

    pub fn delete_record<T: WalletRecord>(&self, id: &str) -> AnoncredsResult<()> {
        self.storage.delete(T::TYPE, id)
    }

    pub fn record_exists<T: WalletRecord>(&self, id: &str) -> AnoncredsResult<bool> {
        match self.storage.get(T::TYPE, id) {
            Ok(_) => Ok(true),
            Err(AnoncredsError::WalletItemNotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Snapshot of every matching record, ordered by id.
    pub fn search_records<T: WalletRecord>(&self, query: &Query) -> AnoncredsResult<Vec<WalletEntry<T>>> {
        self.storage
            .search(T::TYPE, query)?
            .into_iter()
            .map(|record| {
                Ok(WalletEntry {
                    value: deserialize(&record.value, T::TYPE)?,
                    id: record.id,
                    tags: record.tags,
                })
            })
            .collect()
    }

    pub fn count_records<T: WalletRecord>(&self, query: &Query) -> AnoncredsResult<usize> {
        self.storage.count(T::TYPE, query)
    }
}

/// Registry of storage types and open wallets.
pub struct WalletService {
    storage_types: Mutex<HashMap<String, Arc<dyn WalletStorageType>>>,
    wallets: Mutex<HandleArena<Wallet>>,
}

impl Default for WalletService {
    fn default() -> Self {
        Self::new()
    }
}

impl WalletService {
    /// Creates the service with the in-memory backend registered as `"default"`.
    pub fn new() -> Self {
        let mut storage_types: HashMap<String, Arc<dyn WalletStorageType>> = HashMap::new();
        storage_types.insert(DEFAULT_STORAGE_TYPE.to_string(), Arc::new(InMemoryStorageType::new()));
        WalletService {
            storage_types: Mutex::new(storage_types),
            wallets: Mutex::new(HandleArena::new()),
        }
    }

    fn storage_types(&self) -> AnoncredsResult<MutexGuard<'_, HashMap<String, Arc<dyn WalletStorageType>>>> {
        self.storage_types
            .lock()
            .map_err(|_| AnoncredsError::InvalidState("storage type registry lock poisoned".to_string()))
    }

    fn wallets(&self) -> AnoncredsResult<MutexGuard<'_, HandleArena<Wallet>>> {
        self.wallets
            .lock()
            .map_err(|_| AnoncredsError::InvalidState("wallet registry lock poisoned".to_string()))
    }

    fn storage_type(&self, name: &str) -> AnoncredsResult<Arc<dyn WalletStorageType>> {
        self.storage_types()?
            .get(name)
            .cloned()
            .ok_or_else(|| AnoncredsError::WalletUnknownType(name.to_string()))
    }

    /// Makes a custom backend available to `create_wallet`/`open_wallet`.
    ///
    /// # Errors
    /// `WalletTypeAlreadyRegistered` if `name` is taken.
    pub fn register_storage_type(&self, name: &str, storage_type: Arc<dyn WalletStorageType>) -> AnoncredsResult<()> {
        let mut types = self.storage_types()?;
        if types.contains_key(name) {
            return Err(AnoncredsError::WalletTypeAlreadyRegistered(name.to_string()));
        }
        types.insert(name.to_string(), storage_type);
        info!("Registered wallet storage type {}", name);
        Ok(())
    }

    pub fn create_wallet(&self, config: &WalletConfig) -> AnoncredsResult<()> {
        debug!("create_wallet >>> id: {}, type: {}", config.id, config.storage_type());
        self.storage_type(config.storage_type())?
            .create_storage(&config.id, config.storage_config.as_ref())?;
        debug!("create_wallet <<<");
        Ok(())
    }

    /// Opens a wallet and returns its handle.
    ///
    /// # Errors
    /// - `WalletAlreadyOpened` if the wallet is open under another handle
    /// - `WalletNotFound` if it was never created
    pub fn open_wallet(&self, config: &WalletConfig) -> AnoncredsResult<WalletHandle> {
        debug!("open_wallet >>> id: {}", config.id);
        let storage_type = self.storage_type(config.storage_type())?;

        let mut wallets = self.wallets()?;
        if wallets.values().any(|wallet| wallet.id == config.id) {
            return Err(AnoncredsError::WalletAlreadyOpened(config.id.clone()));
        }
        let storage = storage_type.open_storage(&config.id, config.storage_config.as_ref())?;
        let handle = wallets.insert(Wallet::new(&config.id, storage));

        debug!("open_wallet <<< handle: {:?}", handle);
        Ok(handle)
    }

    pub fn get_wallet(&self, handle: WalletHandle) -> AnoncredsResult<Wallet> {
        self.wallets()?
            .get(handle)
            .cloned()
            .ok_or(AnoncredsError::WalletInvalidHandle)
    }

    pub fn close_wallet(&self, handle: WalletHandle) -> AnoncredsResult<()> {
        debug!("close_wallet >>> handle: {:?}", handle);
        self.wallets()?
            .remove(handle)
            .map(|_| ())
            .ok_or(AnoncredsError::WalletInvalidHandle)
    }

    /// Deletes a closed wallet and all its records.
    pub fn delete_wallet(&self, config: &WalletConfig) -> AnoncredsResult<()> {
        debug!("delete_wallet >>> id: {}", config.id);
        if self.wallets()?.values().any(|wallet| wallet.id == config.id) {
            return Err(AnoncredsError::InvalidState(format!(
                "Wallet {} is opened and can not be deleted",
                config.id
            )));
        }
        self.storage_type(config.storage_type())?
            .delete_storage(&config.id, config.storage_config.as_ref())
    }

    /// Writes every record of an open wallet to a new file at `path`.
    ///
    /// # Returns
    /// The number of exported records.
    ///
    /// # Errors
    /// `IOError` if `path` already exists or can not be written.
    pub fn export_wallet(&self, handle: WalletHandle, path: &Path) -> AnoncredsResult<usize> {
        debug!("export_wallet >>> handle: {:?}, path: {}", handle, path.display());
        let wallet = self.get_wallet(handle)?;
        if path.exists() {
            return Err(AnoncredsError::IOError(format!(
                "Export file {} already exists",
                path.display()
            )));
        }

        let export = WalletExport {
            version: EXPORT_VERSION,
            wallet_id: wallet.id.clone(),
            records: wallet.storage.get_all()?,
        };
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, serialize(&export)?)?;

        info!("Exported {} records of wallet {}", export.records.len(), wallet.id);
        Ok(export.records.len())
    }

    /// Creates the wallet described by `config` and fills it from an export file.
    /// The new wallet is removed again if any record fails to import.
    ///
    /// # Errors
    /// - `WalletAlreadyExists` if `config` names an existing wallet
    /// - `InvalidStructure` for a malformed or unsupported export file
    pub fn import_wallet(&self, config: &WalletConfig, path: &Path) -> AnoncredsResult<usize> {
        debug!("import_wallet >>> id: {}, path: {}", config.id, path.display());
        let export: WalletExport = deserialize(&fs::read_to_string(path)?, "wallet export")?;
        if export.version != EXPORT_VERSION {
            return Err(AnoncredsError::InvalidStructure(format!(
                "Unsupported wallet export version {}",
                export.version
            )));
        }

        let storage_type = self.storage_type(config.storage_type())?;
        let storage_config = config.storage_config.as_ref();
        storage_type.create_storage(&config.id, storage_config)?;

        let imported = storage_type
            .open_storage(&config.id, storage_config)
            .and_then(|storage| {
                let count = export.records.len();
                export.records.into_iter().try_for_each(|record| storage.add(record))?;
                Ok(count)
            });
        match imported {
            Ok(count) => {
                info!("Imported {} records from wallet {} into {}", count, export.wallet_id, config.id);
                Ok(count)
            }
            Err(err) => {
                storage_type.delete_storage(&config.id, storage_config)?;
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Note {
        text: String,
    }

    impl WalletRecord for Note {
        const TYPE: &'static str = "Test::Note";
    }

    fn open_test_wallet(service: &WalletService, id: &str) -> Wallet {
        let config = WalletConfig::new(id);
        service.create_wallet(&config).unwrap();
        let handle = service.open_wallet(&config).unwrap();
        service.get_wallet(handle).unwrap()
    }

    #[test]
    fn test_wallet_lifecycle() {
        let service = WalletService::new();
        let config = WalletConfig::new("lifecycle");

        assert!(matches!(service.open_wallet(&config), Err(AnoncredsError::WalletNotFound(_))));
        service.create_wallet(&config).unwrap();
        assert!(matches!(service.create_wallet(&config), Err(AnoncredsError::WalletAlreadyExists(_))));

        let handle = service.open_wallet(&config).unwrap();
        assert!(matches!(service.open_wallet(&config), Err(AnoncredsError::WalletAlreadyOpened(_))));
        assert!(service.delete_wallet(&config).is_err());

        service.close_wallet(handle).unwrap();
        assert!(matches!(service.get_wallet(handle), Err(AnoncredsError::WalletInvalidHandle)));
        assert!(matches!(service.close_wallet(handle), Err(AnoncredsError::WalletInvalidHandle)));

        service.delete_wallet(&config).unwrap();
        assert!(matches!(service.open_wallet(&config), Err(AnoncredsError::WalletNotFound(_))));
    }

    #[test]
    fn test_unknown_and_duplicate_storage_types() {
        let service = WalletService::new();
        let mut config = WalletConfig::new("w");
        config.storage_type = Some("postgres".into());
        assert!(matches!(service.create_wallet(&config), Err(AnoncredsError::WalletUnknownType(_))));

        assert!(matches!(
            service.register_storage_type(DEFAULT_STORAGE_TYPE, Arc::new(InMemoryStorageType::new())),
            Err(AnoncredsError::WalletTypeAlreadyRegistered(_))
        ));
        service
            .register_storage_type("postgres", Arc::new(InMemoryStorageType::new()))
            .unwrap();
        service.create_wallet(&config).unwrap();
    }

    #[test]
    fn test_typed_records() {
        let service = WalletService::new();
        let wallet = open_test_wallet(&service, "records");
        let note = Note { text: "hello".into() };

        wallet.add_object("n1", &note, HashMap::new()).unwrap();
        assert!(matches!(
            wallet.add_object("n1", &note, HashMap::new()),
            Err(AnoncredsError::WalletItemAlreadyExists(_))
        ));
        assert_eq!(wallet.get_object::<Note>("n1").unwrap(), note);
        assert!(wallet.get_object_opt::<Note>("n2").unwrap().is_none());

        wallet.upsert_object("n1", &Note { text: "bye".into() }).unwrap();
        wallet.upsert_object("n2", &Note { text: "new".into() }).unwrap();
        assert_eq!(wallet.get_object::<Note>("n1").unwrap().text, "bye");
        assert_eq!(wallet.count_records::<Note>(&Query::default()).unwrap(), 2);

        wallet.delete_record::<Note>("n1").unwrap();
        assert!(!wallet.record_exists::<Note>("n1").unwrap());
    }

    #[test]
    fn test_search_records_by_tag() {
        let service = WalletService::new();
        let wallet = open_test_wallet(&service, "search");
        for (id, color) in [("a", "red"), ("b", "blue"), ("c", "red")] {
            let tags = [("color".to_string(), color.to_string())].into_iter().collect();
            wallet.add_object(id, &Note { text: id.into() }, tags).unwrap();
        }

        let reds = wallet
            .search_records::<Note>(&Query::Eq("color".into(), "red".into()))
            .unwrap();
        let texts: Vec<_> = reds.iter().map(|entry| entry.value.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "c"]);
    }

    #[test]
    fn test_export_then_import() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup").join("wallet.json");
        let service = WalletService::new();

        let config = WalletConfig::new("source");
        service.create_wallet(&config).unwrap();
        let handle = service.open_wallet(&config).unwrap();
        let wallet = service.get_wallet(handle).unwrap();
        for (id, color) in [("a", "red"), ("b", "blue")] {
            let tags = [("color".to_string(), color.to_string())].into_iter().collect();
            wallet.add_object(id, &Note { text: id.into() }, tags).unwrap();
        }

        assert_eq!(service.export_wallet(handle, &path).unwrap(), 2);
        assert!(matches!(service.export_wallet(handle, &path), Err(AnoncredsError::IOError(_))));

        assert!(matches!(
            service.import_wallet(&config, &path),
            Err(AnoncredsError::WalletAlreadyExists(_))
        ));
        let copy = WalletConfig::new("copy");
        assert_eq!(service.import_wallet(&copy, &path).unwrap(), 2);
        let restored = service.get_wallet(service.open_wallet(&copy).unwrap()).unwrap();
        assert_eq!(restored.get_object::<Note>("b").unwrap().text, "b");
        let reds = restored
            .search_records::<Note>(&Query::Eq("color".into(), "red".into()))
            .unwrap();
        assert_eq!(reds.len(), 1);
    }

    #[test]
    fn test_import_rejects_unknown_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet.json");
        fs::write(&path, r#"{"version":9,"wallet_id":"x","records":[]}"#).unwrap();

        let service = WalletService::new();
        let config = WalletConfig::new("imported");
        assert!(matches!(
            service.import_wallet(&config, &path),
            Err(AnoncredsError::InvalidStructure(_))
        ));
        assert!(matches!(service.open_wallet(&config), Err(AnoncredsError::WalletNotFound(_))));
    }
}
