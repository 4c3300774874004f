// src/wallet/sqlite.rs
//! SQLite wallet storage, registered by `main` as the `"sqlite"` storage type.
//!
//! Each wallet is one database file at `<base_dir>/<wallet id>/sqlite.db`;
//! `storage_config.path` replaces `base_dir` for a single wallet. Records go
//! to `items` and their plain-text tags to `tags`. WQL is evaluated over the
//! loaded tags, so a search reads every record of the requested type.

use crate::errors::{AnoncredsError, AnoncredsResult};
use crate::wallet::query::Query;
use crate::wallet::storage::{StorageRecord, WalletStorage, WalletStorageType};
use log::{debug, info};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Transaction};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

pub const SQLITE_STORAGE_TYPE: &str = "sqlite";

const DB_FILE: &str = "sqlite.db";

const CREATE_SCHEMA: &str = "
    PRAGMA encoding = 'UTF-8';
    CREATE TABLE IF NOT EXISTS items (
        id INTEGER PRIMARY KEY,
        type TEXT NOT NULL,
        name TEXT NOT NULL,
        value TEXT NOT NULL,
        UNIQUE (type, name)
    );
    CREATE TABLE IF NOT EXISTS tags (
        item_id INTEGER NOT NULL REFERENCES items(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (item_id, name)
    );
    CREATE INDEX IF NOT EXISTS ix_tags_name_value ON tags (name, value);
";

fn map_sqlite_err(err: rusqlite::Error) -> AnoncredsError {
    AnoncredsError::WalletStorage(err.to_string())
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(failure, _) if failure.code == ErrorCode::ConstraintViolation)
}

/// Records of one wallet in an open SQLite connection.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    fn open(path: &Path) -> AnoncredsResult<Self> {
        let conn = Connection::open(path).map_err(map_sqlite_err)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;").map_err(map_sqlite_err)?;
        Ok(SqliteStorage { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> AnoncredsResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AnoncredsError::WalletStorage("sqlite connection lock poisoned".to_string()))
    }

    fn not_found(type_: &str, id: &str) -> AnoncredsError {
        AnoncredsError::WalletItemNotFound(format!("{} {}", type_, id))
    }

    fn item_id(conn: &Connection, type_: &str, id: &str) -> AnoncredsResult<i64> {
        conn.query_row(
            "SELECT id FROM items WHERE type = ?1 AND name = ?2",
            params![type_, id],
            |row| row.get(0),
        )
        .optional()
        .map_err(map_sqlite_err)?
        .ok_or_else(|| Self::not_found(type_, id))
    }

    fn insert_tags(tx: &Transaction<'_>, item_id: i64, tags: &HashMap<String, String>) -> AnoncredsResult<()> {
        let mut stmt = tx
            .prepare_cached("INSERT INTO tags (item_id, name, value) VALUES (?1, ?2, ?3)")
            .map_err(map_sqlite_err)?;
        for (name, value) in tags {
            stmt.execute(params![item_id, name, value]).map_err(map_sqlite_err)?;
        }
        Ok(())
    }

    /// Tags of every item matching `type_`, or of all items when `None`.
    fn load_tags(conn: &Connection, type_: Option<&str>) -> AnoncredsResult<HashMap<i64, HashMap<String, String>>> {
        let mut stmt = conn
            .prepare(
                "SELECT t.item_id, t.name, t.value FROM tags t JOIN items i ON i.id = t.item_id
                 WHERE ?1 IS NULL OR i.type = ?1",
            )
            .map_err(map_sqlite_err)?;
        let rows = stmt
            .query_map(params![type_], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
            })
            .map_err(map_sqlite_err)?;

        let mut tags: HashMap<i64, HashMap<String, String>> = HashMap::new();
        for row in rows {
            let (item_id, name, value) = row.map_err(map_sqlite_err)?;
            tags.entry(item_id).or_default().insert(name, value);
        }
        Ok(tags)
    }

    fn load_records(conn: &Connection, type_: Option<&str>) -> AnoncredsResult<Vec<StorageRecord>> {
        let mut tags = Self::load_tags(conn, type_)?;
        let mut stmt = conn
            .prepare("SELECT id, type, name, value FROM items WHERE ?1 IS NULL OR type = ?1 ORDER BY type, name")
            .map_err(map_sqlite_err)?;
        let rows = stmt
            .query_map(params![type_], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(map_sqlite_err)?;

        let mut records = Vec::new();
        for row in rows {
            let (item_id, type_, name, value) = row.map_err(map_sqlite_err)?;
            let record_tags = tags.remove(&item_id).unwrap_or_default();
            records.push(StorageRecord::new(&type_, &name, value, record_tags));
        }
        Ok(records)
    }
}

impl WalletStorage for SqliteStorage {
    fn add(&self, record: StorageRecord) -> AnoncredsResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(map_sqlite_err)?;
        match tx.execute(
            "INSERT INTO items (type, name, value) VALUES (?1, ?2, ?3)",
            params![record.type_, record.id, record.value],
        ) {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                return Err(AnoncredsError::WalletItemAlreadyExists(format!(
                    "{} {}",
                    record.type_, record.id
                )))
            }
            Err(err) => return Err(map_sqlite_err(err)),
        }
        let item_id = tx.last_insert_rowid();
        Self::insert_tags(&tx, item_id, &record.tags)?;
        tx.commit().map_err(map_sqlite_err)
    }

    fn get(&self, type_: &str, id: &str) -> AnoncredsResult<StorageRecord> {
        let conn = self.conn()?;
        let (item_id, value): (i64, String) = conn
            .query_row(
                "SELECT id, value FROM items WHERE type = ?1 AND name = ?2",
                params![type_, id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(map_sqlite_err)?
            .ok_or_else(|| Self::not_found(type_, id))?;

        let mut stmt = conn
            .prepare_cached("SELECT name, value FROM tags WHERE item_id = ?1")
            .map_err(map_sqlite_err)?;
        let tags = stmt
            .query_map(params![item_id], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(map_sqlite_err)?
            .collect::<Result<HashMap<String, String>, _>>()
            .map_err(map_sqlite_err)?;

        Ok(StorageRecord::new(type_, id, value, tags))
    }

    fn update(&self, type_: &str, id: &str, value: &str) -> AnoncredsResult<()> {
        let updated = self
            .conn()?
            .execute(
                "UPDATE items SET value = ?3 WHERE type = ?1 AND name = ?2",
                params![type_, id, value],
            )
            .map_err(map_sqlite_err)?;
        match updated {
            0 => Err(Self::not_found(type_, id)),
            _ => Ok(()),
        }
    }

    fn update_tags(&self, type_: &str, id: &str, tags: HashMap<String, String>) -> AnoncredsResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(map_sqlite_err)?;
        let item_id = Self::item_id(&tx, type_, id)?;
        tx.execute("DELETE FROM tags WHERE item_id = ?1", params![item_id])
            .map_err(map_sqlite_err)?;
        Self::insert_tags(&tx, item_id, &tags)?;
        tx.commit().map_err(map_sqlite_err)
    }

    fn delete(&self, type_: &str, id: &str) -> AnoncredsResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(map_sqlite_err)?;
        let item_id = Self::item_id(&tx, type_, id)?;
        tx.execute("DELETE FROM tags WHERE item_id = ?1", params![item_id])
            .map_err(map_sqlite_err)?;
        tx.execute("DELETE FROM items WHERE id = ?1", params![item_id])
            .map_err(map_sqlite_err)?;
        tx.commit().map_err(map_sqlite_err)
    }

    fn search(&self, type_: &str, query: &Query) -> AnoncredsResult<Vec<StorageRecord>> {
        let conn = self.conn()?;
        Ok(Self::load_records(&conn, Some(type_))?
            .into_iter()
            .filter(|record| query.matches(&record.tags))
            .collect())
    }

    fn get_all(&self) -> AnoncredsResult<Vec<StorageRecord>> {
        let conn = self.conn()?;
        Self::load_records(&conn, None)
    }
}

/// Creates, opens and deletes SQLite wallets below a base directory.
pub struct SqliteStorageType {
    base_dir: PathBuf,
}

impl SqliteStorageType {
    pub fn new<P: Into<PathBuf>>(base_dir: P) -> Self {
        SqliteStorageType {
            base_dir: base_dir.into(),
        }
    }

    fn db_path(&self, id: &str, config: Option<&Value>) -> AnoncredsResult<PathBuf> {
        if id.is_empty() || id == "." || id == ".." || id.contains(['/', '\\']) {
            return Err(AnoncredsError::InvalidStructure(format!(
                "Wallet id {:?} can not be used as a directory name",
                id
            )));
        }
        let base_dir = config
            .and_then(|config| config.get("path"))
            .and_then(Value::as_str)
            .map(PathBuf::from)
            .unwrap_or_else(|| self.base_dir.clone());
        Ok(base_dir.join(id).join(DB_FILE))
    }
}

impl WalletStorageType for SqliteStorageType {
    fn create_storage(&self, id: &str, config: Option<&Value>) -> AnoncredsResult<()> {
        let path = self.db_path(id, config)?;
        debug!("create_storage >>> path: {}", path.display());
        if path.exists() {
            return Err(AnoncredsError::WalletAlreadyExists(id.to_string()));
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let conn = Connection::open(&path).map_err(map_sqlite_err)?;
        conn.execute_batch(CREATE_SCHEMA).map_err(map_sqlite_err)?;
        info!("Created sqlite wallet {} at {}", id, path.display());
        Ok(())
    }

    fn open_storage(&self, id: &str, config: Option<&Value>) -> AnoncredsResult<Arc<dyn WalletStorage>> {
        let path = self.db_path(id, config)?;
        if !path.exists() {
            return Err(AnoncredsError::WalletNotFound(id.to_string()));
        }
        Ok(Arc::new(SqliteStorage::open(&path)?))
    }

    fn delete_storage(&self, id: &str, config: Option<&Value>) -> AnoncredsResult<()> {
        let path = self.db_path(id, config)?;
        if !path.exists() {
            return Err(AnoncredsError::WalletNotFound(id.to_string()));
        }
        if let Some(dir) = path.parent() {
            fs::remove_dir_all(dir)?;
        }
        info!("Deleted sqlite wallet {}", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::key_management::KeyManager;
    use crate::wallet::{WalletConfig, WalletService};
    use serde_json::json;

    fn record(id: &str, tags: &[(&str, &str)]) -> StorageRecord {
        StorageRecord::new(
            "Test",
            id,
            format!("{{\"id\":\"{}\"}}", id),
            tags.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        )
    }

    fn open_storage(dir: &tempfile::TempDir) -> Arc<dyn WalletStorage> {
        let storage_type = SqliteStorageType::new(dir.path());
        storage_type.create_storage("w", None).unwrap();
        storage_type.open_storage("w", None).unwrap()
    }

    #[test]
    fn test_records_and_tags() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open_storage(&dir);

        storage.add(record("a", &[("color", "red"), ("size", "L")])).unwrap();
        assert!(matches!(
            storage.add(record("a", &[])),
            Err(AnoncredsError::WalletItemAlreadyExists(_))
        ));
        let stored = storage.get("Test", "a").unwrap();
        assert_eq!(stored.tags.len(), 2);
        assert_eq!(stored.value, r#"{"id":"a"}"#);

        storage.update("Test", "a", "{}").unwrap();
        storage
            .update_tags("Test", "a", [("color".to_string(), "blue".to_string())].into_iter().collect())
            .unwrap();
        let stored = storage.get("Test", "a").unwrap();
        assert_eq!(stored.value, "{}");
        assert_eq!(stored.tags, [("color".to_string(), "blue".to_string())].into_iter().collect());

        assert!(matches!(storage.update("Test", "b", "{}"), Err(AnoncredsError::WalletItemNotFound(_))));
        storage.delete("Test", "a").unwrap();
        assert!(matches!(storage.get("Test", "a"), Err(AnoncredsError::WalletItemNotFound(_))));
        assert!(storage.delete("Test", "a").is_err());
    }

    #[test]
    fn test_search_orders_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open_storage(&dir);
        storage.add(record("b", &[("color", "red")])).unwrap();
        storage.add(record("a", &[("color", "red")])).unwrap();
        storage.add(record("c", &[("color", "blue")])).unwrap();
        storage
            .add(StorageRecord::new("Other", "d", "{}".to_string(), HashMap::new()))
            .unwrap();

        let found = storage.search("Test", &Query::Eq("color".into(), "red".into())).unwrap();
        let ids: Vec<_> = found.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(storage.count("Test", &Query::default()).unwrap(), 3);
        assert_eq!(storage.get_all().unwrap().len(), 4);
    }

    #[test]
    fn test_storage_type_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let storage_type = SqliteStorageType::new(dir.path());

        storage_type.create_storage("w1", None).unwrap();
        assert!(matches!(
            storage_type.create_storage("w1", None),
            Err(AnoncredsError::WalletAlreadyExists(_))
        ));
        assert!(dir.path().join("w1").join(DB_FILE).exists());

        let other = tempfile::tempdir().unwrap();
        let config = json!({ "path": other.path().to_str().unwrap() });
        storage_type.create_storage("w1", Some(&config)).unwrap();
        assert!(other.path().join("w1").join(DB_FILE).exists());

        storage_type.delete_storage("w1", None).unwrap();
        assert!(matches!(storage_type.open_storage("w1", None), Err(AnoncredsError::WalletNotFound(_))));
        assert!(storage_type.open_storage("w1", Some(&config)).is_ok());

        assert!(matches!(
            storage_type.create_storage("../escape", None),
            Err(AnoncredsError::InvalidStructure(_))
        ));
    }

    #[test]
    fn test_wallet_survives_service_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = WalletConfig {
            id: "durable".to_string(),
            storage_type: Some(SQLITE_STORAGE_TYPE.to_string()),
            storage_config: None,
        };

        {
            let service = WalletService::new();
            service
                .register_storage_type(SQLITE_STORAGE_TYPE, Arc::new(SqliteStorageType::new(dir.path())))
                .unwrap();
            service.create_wallet(&config).unwrap();
            let wallet = service.get_wallet(service.open_wallet(&config).unwrap()).unwrap();
            KeyManager::new(&wallet).create_master_secret(Some("ms")).unwrap();
        }

        let service = WalletService::new();
        service
            .register_storage_type(SQLITE_STORAGE_TYPE, Arc::new(SqliteStorageType::new(dir.path())))
            .unwrap();
        let wallet = service.get_wallet(service.open_wallet(&config).unwrap()).unwrap();
        let keys = KeyManager::new(&wallet);
        assert!(keys.has_master_secret("ms").unwrap());
        assert!(keys.get_master_secret("ms").is_ok());
        assert!(matches!(
            keys.create_master_secret(Some("ms")),
            Err(AnoncredsError::MasterSecretDuplicateName(_))
        ));
    }
}
