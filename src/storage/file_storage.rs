// src/storage/file_storage.rs
//! Local-disk blob backend.
//!
//! Config: `{"base_dir": "/path/to/tails", "uri_pattern": ""}`.
//! Blobs are written to `{base_dir}/{hash}`. The returned location is that
//! path, or `uri_pattern` with `{hash}` substituted when a pattern is set, so
//! a published registry can point at wherever the files are served from.

use crate::config::default_tails_dir;
use crate::errors::{AnoncredsError, AnoncredsResult};
use crate::storage::BlobStorageType;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use tokio::fs;

#[derive(Debug, Deserialize)]
struct FileBlobConfig {
    #[serde(default)]
    base_dir: Option<String>,
    #[serde(default)]
    uri_pattern: Option<String>,
}

impl FileBlobConfig {
    fn parse(config: &Value) -> AnoncredsResult<Self> {
        serde_json::from_value(config.clone())
            .map_err(|err| AnoncredsError::InvalidStructure(format!("Invalid file blob config: {}", err)))
    }

    fn base_dir(&self) -> PathBuf {
        PathBuf::from(self.base_dir.clone().unwrap_or_else(default_tails_dir))
    }
}

#[derive(Debug, Default)]
pub struct FileBlobStorage;

impl FileBlobStorage {
    pub fn new() -> Self {
        FileBlobStorage
    }
}

#[async_trait]
impl BlobStorageType for FileBlobStorage {
    async fn write(&self, config: &Value, data: Vec<u8>, hash: &str) -> AnoncredsResult<String> {
        let config = FileBlobConfig::parse(config)?;
        let base_dir = config.base_dir();
        fs::create_dir_all(&base_dir).await?;

        let path = base_dir.join(hash);
        fs::write(&path, data).await?;

        Ok(match config.uri_pattern.as_deref() {
            Some(pattern) if !pattern.is_empty() => pattern.replace("{hash}", hash),
            _ => path.to_string_lossy().into_owned(),
        })
    }

    /// Reads `{base_dir}/{hash}` when a base directory is configured, the
    /// location as a path otherwise.
    async fn read(&self, config: &Value, location: &str, hash: &str) -> AnoncredsResult<Vec<u8>> {
        let config = FileBlobConfig::parse(config)?;
        let path = match &config.base_dir {
            Some(base_dir) => PathBuf::from(base_dir).join(hash),
            None => PathBuf::from(location),
        };
        Ok(fs::read(&path).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_uri_pattern_sets_location() {
        let dir = tempfile::tempdir().unwrap();
        let config = json!({
            "base_dir": dir.path().to_str().unwrap(),
            "uri_pattern": "https://tails.example.com/{hash}"
        });
        let storage = FileBlobStorage::new();

        let location = storage.write(&config, vec![1, 2, 3], "abc").await.unwrap();
        assert_eq!(location, "https://tails.example.com/abc");
        assert!(dir.path().join("abc").exists());
        assert_eq!(storage.read(&config, &location, "abc").await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = json!({ "base_dir": dir.path().to_str().unwrap() });
        let err = FileBlobStorage::new().read(&config, "", "missing").await.unwrap_err();
        assert!(matches!(err, AnoncredsError::IOError(_)));
    }
}
