// src/services/mod.rs
//! Role services (issuer, prover, verifier) and the HTTP API over them.

pub mod api_server;
pub mod credential_issuer;
pub mod prover;
pub mod verifier;
