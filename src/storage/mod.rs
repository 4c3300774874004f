// src/storage/mod.rs
//! Blob storage for revocation tails.
//!
//! Blobs are written and read through handles opened against a named backend
//! ([`BlobStorageType`]). Every blob is addressed by the base58 SHA-256 of its
//! content; readers re-hash what they fetch and refuse a mismatch.
//!
//! Built-in backends:
//! - `"default"`: files on local disk ([`file_storage::FileBlobStorage`])
//! - `"ipfs"`: an IPFS node ([`ipfs_client::IpfsStorage`]), registered by `main`

pub mod file_storage;
pub mod ipfs_client;

use crate::errors::{AnoncredsError, AnoncredsResult};
use crate::utils::crypto::base58_digest;
use crate::utils::handles::{Handle, HandleArena};
use async_trait::async_trait;
use log::{debug, info};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

pub const DEFAULT_BLOB_STORAGE_TYPE: &str = "default";

/// A blob storage backend. `config` is the JSON the handle was opened with.
#[async_trait]
pub trait BlobStorageType: Send + Sync {
    /// Stores `data`, whose hash is `hash`, and returns its location.
    async fn write(&self, config: &Value, data: Vec<u8>, hash: &str) -> AnoncredsResult<String>;

    /// Fetches the blob stored at `location` with the given `hash`.
    async fn read(&self, config: &Value, location: &str, hash: &str) -> AnoncredsResult<Vec<u8>>;
}

/// Backend and configuration bound to an open writer or reader handle.
#[derive(Clone)]
pub struct BlobChannel {
    type_name: String,
    config: Value,
    backend: Arc<dyn BlobStorageType>,
}

pub struct BlobWriter(BlobChannel);
pub struct BlobReader(BlobChannel);

pub type BlobWriterHandle = Handle<BlobWriter>;
pub type BlobReaderHandle = Handle<BlobReader>;

pub struct BlobStorageService {
    types: Mutex<HashMap<String, Arc<dyn BlobStorageType>>>,
    writers: Mutex<HandleArena<BlobWriter>>,
    readers: Mutex<HandleArena<BlobReader>>,
}

impl Default for BlobStorageService {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> AnoncredsResult<MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|_| AnoncredsError::InvalidState(format!("{} lock poisoned", what)))
}

impl BlobStorageService {
    /// Creates the service with the file backend registered as `"default"`.
    pub fn new() -> Self {
        let mut types: HashMap<String, Arc<dyn BlobStorageType>> = HashMap::new();
        types.insert(
            DEFAULT_BLOB_STORAGE_TYPE.to_string(),
            Arc::new(file_storage::FileBlobStorage::new()),
        );
        BlobStorageService {
            types: Mutex::new(types),
            writers: Mutex::new(HandleArena::new()),
            readers: Mutex::new(HandleArena::new()),
        }
    }

    pub fn register_type(&self, name: &str, backend: Arc<dyn BlobStorageType>) -> AnoncredsResult<()> {
        let mut types = lock(&self.types, "blob storage types")?;
        if types.contains_key(name) {
            return Err(AnoncredsError::InvalidStructure(format!(
                "Blob storage type {} is already registered",
                name
            )));
        }
        types.insert(name.to_string(), backend);
        info!("Registered blob storage type {}", name);
        Ok(())
    }

    fn channel(&self, type_name: &str, config: Value) -> AnoncredsResult<BlobChannel> {
        let backend = lock(&self.types, "blob storage types")?
            .get(type_name)
            .cloned()
            .ok_or_else(|| AnoncredsError::InvalidStructure(format!("Unknown blob storage type: {}", type_name)))?;
        Ok(BlobChannel {
            type_name: type_name.to_string(),
            config,
            backend,
        })
    }

    pub fn open_writer(&self, type_name: &str, config: Value) -> AnoncredsResult<BlobWriterHandle> {
        let channel = self.channel(type_name, config)?;
        let handle = lock(&self.writers, "blob writers")?.insert(BlobWriter(channel));
        debug!("open_writer <<< type: {}, handle: {:?}", type_name, handle);
        Ok(handle)
    }

    pub fn open_reader(&self, type_name: &str, config: Value) -> AnoncredsResult<BlobReaderHandle> {
        let channel = self.channel(type_name, config)?;
        let handle = lock(&self.readers, "blob readers")?.insert(BlobReader(channel));
        debug!("open_reader <<< type: {}, handle: {:?}", type_name, handle);
        Ok(handle)
    }

    /// Writes a blob and returns `(location, hash)`.
    ///
    /// # Errors
    /// `InvalidParam` for a closed or unknown writer handle.
    pub async fn write_blob(&self, handle: BlobWriterHandle, data: Vec<u8>) -> AnoncredsResult<(String, String)> {
        let channel = lock(&self.writers, "blob writers")?
            .get(handle)
            .map(|writer| writer.0.clone())
            .ok_or_else(|| AnoncredsError::InvalidParam(1, format!("Invalid blob writer handle {:?}", handle)))?;

        let hash = base58_digest(&data);
        let location = channel.backend.write(&channel.config, data, &hash).await?;
        debug!("write_blob <<< type: {}, location: {}, hash: {}", channel.type_name, location, hash);
        Ok((location, hash))
    }

    /// Reads a blob and checks it against `hash`.
    ///
    /// # Errors
    /// - `InvalidParam` for a closed or unknown reader handle
    /// - `InvalidStructure` if the content does not hash to `hash`
    pub async fn read_blob(&self, handle: BlobReaderHandle, location: &str, hash: &str) -> AnoncredsResult<Vec<u8>> {
        let channel = lock(&self.readers, "blob readers")?
            .get(handle)
            .map(|reader| reader.0.clone())
            .ok_or_else(|| AnoncredsError::InvalidParam(1, format!("Invalid blob reader handle {:?}", handle)))?;

        let data = channel.backend.read(&channel.config, location, hash).await?;
        if base58_digest(&data) != hash {
            return Err(AnoncredsError::InvalidStructure(format!(
                "Blob at {} does not match hash {}",
                location, hash
            )));
        }
        Ok(data)
    }

    pub fn close_writer(&self, handle: BlobWriterHandle) -> AnoncredsResult<()> {
        lock(&self.writers, "blob writers")?
            .remove(handle)
            .map(|_| ())
            .ok_or_else(|| AnoncredsError::InvalidParam(1, format!("Invalid blob writer handle {:?}", handle)))
    }

    pub fn close_reader(&self, handle: BlobReaderHandle) -> AnoncredsResult<()> {
        lock(&self.readers, "blob readers")?
            .remove(handle)
            .map(|_| ())
            .ok_or_else(|| AnoncredsError::InvalidParam(1, format!("Invalid blob reader handle {:?}", handle)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn file_config(dir: &tempfile::TempDir) -> Value {
        json!({ "base_dir": dir.path().to_str().unwrap(), "uri_pattern": "" })
    }

    #[tokio::test]
    async fn test_write_then_read_blob() {
        let dir = tempfile::tempdir().unwrap();
        let service = BlobStorageService::new();

        let writer = service.open_writer("default", file_config(&dir)).unwrap();
        let (location, hash) = service.write_blob(writer, b"tails".to_vec()).await.unwrap();
        assert_eq!(hash, base58_digest(b"tails"));

        let reader = service.open_reader("default", file_config(&dir)).unwrap();
        assert_eq!(service.read_blob(reader, &location, &hash).await.unwrap(), b"tails");

        let wrong = base58_digest(b"other");
        assert!(service.read_blob(reader, &location, &wrong).await.is_err());
    }

    #[tokio::test]
    async fn test_closed_handles_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let service = BlobStorageService::new();

        let writer = service.open_writer("default", file_config(&dir)).unwrap();
        service.close_writer(writer).unwrap();
        assert!(matches!(
            service.write_blob(writer, vec![1]).await,
            Err(AnoncredsError::InvalidParam(1, _))
        ));
        assert!(service.close_writer(writer).is_err());

        let reader = service.open_reader("default", file_config(&dir)).unwrap();
        service.close_reader(reader).unwrap();
        assert!(service.read_blob(reader, "x", "y").await.is_err());
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let service = BlobStorageService::new();
        assert!(service.open_writer("s3", json!({})).is_err());
        assert!(service
            .register_type("default", Arc::new(file_storage::FileBlobStorage::new()))
            .is_err());

        let never_opened = BlobWriterHandle::from_u64(42);
        assert!(tokio_test::block_on(service.write_blob(never_opened, vec![0])).is_err());
    }
}
