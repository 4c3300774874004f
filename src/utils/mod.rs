// src/utils/mod.rs
//! Shared helpers: hashing/encoding, JSON plumbing and typed handles.

pub mod crypto;
pub mod handles;
pub mod serialization;
