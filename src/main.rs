// src/main.rs

//! # Anoncreds System - Main Entry Point
//!
//! Loads configuration, wires the wallet and blob storage services together
//! and starts the API server.
//!
//! ## Configuration
//! - `.env` is loaded first, then `anoncreds.toml` (or `ANONCREDS_CONFIG`)
//! - `ANONCREDS_SERVER__PORT`, `ANONCREDS_IPFS__API_URL`, ... override single values
//! - `RUST_LOG` controls log output (default `info`)

use anoncreds_system::config::Settings;
use anoncreds_system::storage::ipfs_client::IpfsStorage;
use anoncreds_system::wallet::sqlite::{SqliteStorageType, SQLITE_STORAGE_TYPE};
use anoncreds_system::{ApiServer, BlobStorageService, WalletService};
use anyhow::Context;
use dotenv::dotenv;
use log::info;
use std::sync::Arc;

/// Main application entry point
///
/// # Initialization Sequence
/// 1. Load environment and settings
/// 2. Register the IPFS blob backend next to the file backend
/// 3. Register the sqlite wallet backend next to the in-memory one
/// 4. Start the API server
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = Settings::load().context("failed to load settings")?;

    let blob_storage = Arc::new(BlobStorageService::new());
    let ipfs = IpfsStorage::new(&settings.ipfs.api_url).context("failed to create IPFS client")?;
    blob_storage
        .register_type("ipfs", Arc::new(ipfs))
        .context("failed to register IPFS blob storage")?;

    let wallets = Arc::new(WalletService::new());
    wallets
        .register_storage_type(
            SQLITE_STORAGE_TYPE,
            Arc::new(SqliteStorageType::new(&settings.wallet.base_dir)),
        )
        .context("failed to register sqlite wallet storage")?;
    let addr = settings.server_addr().context("invalid server address")?;

    info!(
        "Starting anoncreds API (wallet storage: {}, tails writer: {})",
        settings.wallet.storage_type, settings.blob_storage.writer_type
    );
    ApiServer::new(&settings, wallets, blob_storage)
        .run(addr)
        .await
        .context("API server failed")?;

    Ok(())
}
