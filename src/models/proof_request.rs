// src/models/proof_request.rs
//! Proof request sent by a verifier.
//!
//! ```json
//! {
//!   "name": "degree check", "version": "1.0", "nonce": "123432421212",
//!   "requested_attributes": {"attr1_referent": {"name": "name", "restrictions": {"schema_name": "degree"}}},
//!   "requested_predicates": {"predicate1_referent": {"name": "age", "p_type": ">=", "p_value": 18}},
//!   "non_revoked": {"from": 0, "to": 1700000000}
//! }
//! ```

use crate::errors::{AnoncredsError, AnoncredsResult};
use crate::wallet::query::Query;
use crate::zkp::Nonce;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Serialize, Deserialize)]
pub struct ProofRequest {
    pub name: String,
    pub version: String,
    pub nonce: Nonce,
    #[serde(default)]
    pub requested_attributes: HashMap<String, AttributeInfo>,
    #[serde(default)]
    pub requested_predicates: HashMap<String, PredicateInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub non_revoked: Option<NonRevocedInterval>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ver: Option<String>,
}

impl ProofRequest {
    /// Checks that every attribute referent names its attributes in exactly one way.
    pub fn validate(&self) -> AnoncredsResult<()> {
        for (referent, info) in &self.requested_attributes {
            info.names_checked(referent)?;
        }
        Ok(())
    }

    /// Interval that applies to a referent: its own, else the request-wide one.
    pub fn interval_for(&self, own: Option<&NonRevocedInterval>) -> Option<NonRevocedInterval> {
        own.or(self.non_revoked.as_ref()).cloned()
    }
}

/// A requested attribute. Exactly one of `name` and `names` must be set;
/// `names` requests a group revealed from a single credential.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttributeInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub names: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restrictions: Option<Query>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub non_revoked: Option<NonRevocedInterval>,
}

impl AttributeInfo {
    pub fn names_checked(&self, referent: &str) -> AnoncredsResult<Vec<String>> {
        match (&self.name, &self.names) {
            (Some(name), None) => Ok(vec![name.clone()]),
            (None, Some(names)) if !names.is_empty() => Ok(names.clone()),
            (None, Some(_)) => Err(AnoncredsError::InvalidStructure(format!(
                "Proof request attribute {} has empty names",
                referent
            ))),
            _ => Err(AnoncredsError::InvalidStructure(format!(
                "Proof request attribute {} must set exactly one of name and names",
                referent
            ))),
        }
    }

    pub fn is_group(&self) -> bool {
        self.names.is_some()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PredicateTypes {
    #[serde(rename = ">=")]
    GE,
    #[serde(rename = "<=")]
    LE,
    #[serde(rename = ">")]
    GT,
    #[serde(rename = "<")]
    LT,
}

impl PredicateTypes {
    /// Name the crypto engine uses for this comparison.
    pub fn to_ursa(&self) -> &'static str {
        match self {
            PredicateTypes::GE => "GE",
            PredicateTypes::LE => "LE",
            PredicateTypes::GT => "GT",
            PredicateTypes::LT => "LT",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PredicateInfo {
    pub name: String,
    pub p_type: PredicateTypes,
    pub p_value: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restrictions: Option<Query>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub non_revoked: Option<NonRevocedInterval>,
}

impl PredicateInfo {
    /// Whether a raw credential value satisfies the predicate. Values that are
    /// not 32-bit integers never do.
    pub fn satisfied_by(&self, raw: &str) -> bool {
        let value = match raw.parse::<i32>() {
            Ok(value) => value,
            Err(_) => return false,
        };
        match self.p_type {
            PredicateTypes::GE => value >= self.p_value,
            PredicateTypes::GT => value > self.p_value,
            PredicateTypes::LE => value <= self.p_value,
            PredicateTypes::LT => value < self.p_value,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NonRevocedInterval {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<u64>,
}

impl NonRevocedInterval {
    pub fn contains(&self, timestamp: u64) -> bool {
        self.from.map_or(true, |from| from <= timestamp) && self.to.map_or(true, |to| timestamp <= to)
    }
}
