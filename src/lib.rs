// src/lib.rs

//! # Anoncreds System
//!
//! Anonymous credentials over CL signatures: an issuer signs attribute
//! bundles, a prover holds them in a wallet and proves facts about them with
//! selective disclosure and predicates, and a verifier checks the proofs,
//! optionally against a revocation accumulator.
//!
//! ## Architecture Overview
//! 1. **Services Layer**: issuer, prover and verifier roles plus the HTTP API
//! 2. **Wallet Layer**: tagged, WQL-searchable records behind pluggable storage
//! 3. **Storage Layer**: tails blobs on local disk or IPFS
//! 4. **Cryptography Layer**: CL signatures, accumulators and proofs via `ursa`

pub mod config;
pub mod errors;
pub mod models;
pub mod services;
pub mod storage;
pub mod utils;
pub mod wallet;
pub mod zkp;

pub use errors::{AnoncredsError, AnoncredsResult, ErrorCode};
pub use services::api_server::ApiServer;
pub use services::credential_issuer::CredentialIssuer;
pub use services::prover::Prover;
pub use services::verifier::Verifier;
pub use storage::BlobStorageService;
pub use wallet::{Wallet, WalletConfig, WalletService};
