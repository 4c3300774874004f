// src/models/mod.rs
//! Typed, versioned payloads exchanged between issuer, prover and verifier.

pub mod credential;
pub mod credential_definition;
pub mod did;
pub mod proof;
pub mod proof_request;
pub mod revocation;
pub mod schema;
