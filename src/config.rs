// src/config.rs
//! Runtime configuration for the anoncreds service.
//!
//! Settings are layered, later sources overriding earlier ones:
//! 1. Built-in defaults
//! 2. An optional `anoncreds.toml` (or the file named by `ANONCREDS_CONFIG`)
//! 3. Environment variables prefixed with `ANONCREDS_`, nested with `__`
//!    (e.g. `ANONCREDS_SERVER__PORT=8080`)
//!
//! `.env` files are honoured through `dotenv` in `main` before loading.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::net::SocketAddr;

/// Top-level service settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub wallet: WalletSettings,
    pub blob_storage: BlobStorageSettings,
    pub ipfs: IpfsSettings,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Upper bound on request bodies; proofs over many credentials get large.
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletSettings {
    /// Storage backend used when a wallet config names none.
    pub storage_type: String,
    /// Directory the sqlite backend keeps one sub-directory per wallet in.
    pub base_dir: String,
}

/// Defaults for tails blob readers and writers opened through the API.
#[derive(Debug, Clone, Deserialize)]
pub struct BlobStorageSettings {
    pub writer_type: String,
    pub reader_type: String,
    pub base_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IpfsSettings {
    pub api_url: String,
}

impl Settings {
    /// Loads settings from defaults, the optional config file and the environment.
    ///
    /// # Errors
    /// Returns `ConfigError` if a source is malformed or a value has the wrong type.
    pub fn load() -> Result<Self, ConfigError> {
        let file = std::env::var("ANONCREDS_CONFIG").unwrap_or_else(|_| "anoncreds".to_string());
        Self::from_file(&file)
    }

    /// Same as [`Settings::load`], reading the named file instead of the default one.
    pub fn from_file(file: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000_i64)?
            .set_default("server.max_body_bytes", 16_i64 * 1024 * 1024)?
            .set_default("wallet.storage_type", "sqlite")?
            .set_default("wallet.base_dir", default_wallet_dir())?
            .set_default("blob_storage.writer_type", "default")?
            .set_default("blob_storage.reader_type", "default")?
            .set_default("blob_storage.base_dir", default_tails_dir())?
            .set_default("ipfs.api_url", "http://localhost:5001")?
            .add_source(File::with_name(file).required(false))
            .add_source(
                Environment::with_prefix("ANONCREDS")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()
    }

    /// Socket address the API server binds to.
    pub fn server_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.server.host, self.server.port).parse()
    }
}

/// `$HOME/.anoncreds/wallet`, or a temp directory when there is no home.
pub fn default_wallet_dir() -> String {
    std::env::var_os("HOME")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
        .join(".anoncreds")
        .join("wallet")
        .to_string_lossy()
        .into_owned()
}

pub fn default_tails_dir() -> String {
    std::env::temp_dir()
        .join("anoncreds")
        .join("tails")
        .to_string_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_a_file() {
        let settings = Settings::from_file("does-not-exist").unwrap();
        assert_eq!(settings.wallet.storage_type, "sqlite");
        assert!(settings.wallet.base_dir.ends_with("wallet"));
        assert_eq!(settings.blob_storage.writer_type, "default");
        assert!(settings.blob_storage.base_dir.ends_with("tails"));
        assert!(settings.server.max_body_bytes > 0);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "[server]\nport = 8088\n[ipfs]\napi_url = \"http://ipfs:5001\"\n").unwrap();

        let settings = Settings::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(settings.server.port, 8088);
        assert_eq!(settings.ipfs.api_url, "http://ipfs:5001");
        assert_eq!(settings.server_addr().unwrap().port(), 8088);
    }
}
