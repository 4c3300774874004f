// src/storage/ipfs_client.rs
//! IPFS blob backend for tails files.
//!
//! Registered under the `"ipfs"` blob storage type. A written blob's location
//! is its IPFS CID; reading fetches the CID back and the blob service checks
//! the content against the tails hash.
//!
//! # Security Considerations
//! - Everything pinned to IPFS is public. Tails files carry no secrets, so
//!   this is the intended use.
//! - The CID is content-derived but is not the tails hash; registries must
//!   still publish `tailsHash` for verification.

use crate::errors::{AnoncredsError, AnoncredsResult};
use crate::storage::BlobStorageType;
use async_trait::async_trait;
use bytes::BytesMut;
use futures::TryStreamExt;
use ipfs_api_backend_hyper::{IpfsApi, IpfsClient, TryFromUri};
use log::debug;
use serde_json::Value;
use std::io::Cursor;
use std::sync::Arc;
use tokio::task;

/// Thread-safe IPFS client wrapper.
///
/// The hyper-backed client futures are not `Send`, so each call runs on a
/// dedicated runtime inside `spawn_blocking`.
#[derive(Clone)]
pub struct IpfsStorage {
    client: Arc<IpfsClient>,
}

fn ipfs_error(err: impl std::fmt::Display) -> AnoncredsError {
    AnoncredsError::IOError(format!("ipfs: {}", err))
}

impl IpfsStorage {
    /// Connects to the IPFS HTTP API at `api_url`, e.g. `http://localhost:5001`.
    ///
    /// # Errors
    /// `InvalidStructure` if the URL does not parse.
    pub fn new(api_url: &str) -> AnoncredsResult<Self> {
        let client = IpfsClient::from_str(api_url)
            .map_err(|e| AnoncredsError::InvalidStructure(format!("Invalid IPFS api url {}: {}", api_url, e)))?;
        Ok(IpfsStorage {
            client: Arc::new(client),
        })
    }

    /// Stores raw bytes and returns their CID.
    pub async fn store_data(&self, data: Vec<u8>) -> AnoncredsResult<String> {
        let client = self.client.clone();

        let added = task::spawn_blocking(move || -> AnoncredsResult<_> {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(async { client.add(Cursor::new(data)).await.map_err(ipfs_error) })
        })
        .await??;

        debug!("store_data <<< cid: {}", added.hash);
        Ok(added.hash)
    }

    /// Fetches the bytes behind a CID.
    pub async fn retrieve_data(&self, cid: &str) -> AnoncredsResult<Vec<u8>> {
        let client = self.client.clone();
        let cid = cid.to_string();

        let data = task::spawn_blocking(move || -> AnoncredsResult<_> {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(async {
                client
                    .cat(&cid)
                    .try_fold(BytesMut::new(), |mut acc, chunk| async move {
                        acc.extend_from_slice(&chunk);
                        Ok(acc)
                    })
                    .await
                    .map_err(ipfs_error)
            })
        })
        .await??;

        Ok(data.to_vec())
    }
}

#[async_trait]
impl BlobStorageType for IpfsStorage {
    async fn write(&self, _config: &Value, data: Vec<u8>, _hash: &str) -> AnoncredsResult<String> {
        self.store_data(data).await
    }

    async fn read(&self, _config: &Value, location: &str, _hash: &str) -> AnoncredsResult<Vec<u8>> {
        self.retrieve_data(location).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{mock, Matcher};
    use serde_json::json;

    #[tokio::test]
    async fn test_write_returns_cid() {
        let _m = mock("POST", Matcher::Regex(r"^/api/v0/add".to_string()))
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"Name":"tails","Hash":"QmTailsCid","Size":"5"}"#)
            .create();

        let storage = IpfsStorage::new(&mockito::server_url()).unwrap();
        let cid = storage.write(&json!({}), b"tails".to_vec(), "hash").await.unwrap();
        assert_eq!(cid, "QmTailsCid");
    }

    #[tokio::test]
    async fn test_read_fetches_content() {
        let _m = mock("POST", Matcher::Regex(r"^/api/v0/cat".to_string()))
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("tails")
            .create();

        let storage = IpfsStorage::new(&mockito::server_url()).unwrap();
        let data = storage.read(&json!({}), "QmTailsCid", "hash").await.unwrap();
        assert_eq!(data, b"tails");
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        assert!(matches!(
            IpfsStorage::new("not a url"),
            Err(AnoncredsError::InvalidStructure(_))
        ));
    }
}
