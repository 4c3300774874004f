// src/models/revocation.rs
//! Revocation registry artifacts.
//!
//! - [`RevocationRegistryDefinition`]: accumulator configuration plus tails location
//! - [`RevocationRegistry`]: accumulator value at a point in time (a registry entry)
//! - [`RevocationRegistryDelta`]: mergeable change between two accumulator values
//! - [`RevocationState`]: a prover's witness against a registry snapshot
//! - [`RevocationRegistryInfo`]: issuer-local index bookkeeping

use crate::errors::{AnoncredsError, AnoncredsResult};
use crate::utils::serialization::to_value;
use crate::zkp::{
    RevocationKeyPrivate, RevocationKeyPublic, RevocationRegistry as CryptoRevocationRegistry,
    RevocationRegistryDelta as CryptoRevocationRegistryDelta, Witness,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const REV_REG_MARKER: &str = "4";
pub const DEFAULT_MAX_CRED_NUM: u32 = 100_000;

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum IssuanceType {
    /// Every index is issued when the registry is created; only revocation mutates it.
    ISSUANCE_BY_DEFAULT,
    /// Indices are issued one at a time as credentials are signed.
    #[default]
    ISSUANCE_ON_DEMAND,
}

impl IssuanceType {
    pub fn to_bool(&self) -> bool {
        *self == IssuanceType::ISSUANCE_BY_DEFAULT
    }
}

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RegistryType {
    CL_ACCUM,
}

impl RegistryType {
    pub fn to_str(&self) -> &'static str {
        match self {
            RegistryType::CL_ACCUM => "CL_ACCUM",
        }
    }

    pub fn parse(value: Option<&str>) -> AnoncredsResult<Self> {
        match value.unwrap_or("CL_ACCUM") {
            "CL_ACCUM" => Ok(RegistryType::CL_ACCUM),
            other => Err(AnoncredsError::InvalidStructure(format!(
                "Unsupported revocation registry type: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RevocationRegistryConfig {
    pub issuance_type: Option<IssuanceType>,
    pub max_cred_num: Option<u32>,
}

impl RevocationRegistryConfig {
    pub fn issuance_type(&self) -> IssuanceType {
        self.issuance_type.unwrap_or_default()
    }

    pub fn max_cred_num(&self) -> u32 {
        self.max_cred_num.unwrap_or(DEFAULT_MAX_CRED_NUM)
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevocationRegistryDefinitionValuePublicKeys {
    pub accum_key: RevocationKeyPublic,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevocationRegistryDefinitionValue {
    pub issuance_type: IssuanceType,
    pub max_cred_num: u32,
    pub public_keys: RevocationRegistryDefinitionValuePublicKeys,
    pub tails_hash: String,
    pub tails_location: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "ver")]
pub enum RevocationRegistryDefinition {
    #[serde(rename = "1.0")]
    RevocationRegistryDefinitionV1(RevocationRegistryDefinitionV1),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevocationRegistryDefinitionV1 {
    pub id: String,
    pub revoc_def_type: RegistryType,
    pub tag: String,
    pub cred_def_id: String,
    pub value: RevocationRegistryDefinitionValue,
}

impl RevocationRegistryDefinition {
    /// `{did}:4:{cred_def_id}:CL_ACCUM:{tag}`
    pub fn build_id(issuer_did: &str, cred_def_id: &str, rev_reg_type: RegistryType, tag: &str) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            issuer_did,
            REV_REG_MARKER,
            cred_def_id,
            rev_reg_type.to_str(),
            tag
        )
    }

    pub fn v1(&self) -> &RevocationRegistryDefinitionV1 {
        match self {
            RevocationRegistryDefinition::RevocationRegistryDefinitionV1(def) => def,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RevocationRegistryDefinitionPrivate {
    pub value: RevocationKeyPrivate,
}

/// Accumulator snapshot; published as a registry entry.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "ver")]
pub enum RevocationRegistry {
    #[serde(rename = "1.0")]
    RevocationRegistryV1(RevocationRegistryV1),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RevocationRegistryV1 {
    pub value: CryptoRevocationRegistry,
}

impl RevocationRegistry {
    pub fn new(value: CryptoRevocationRegistry) -> Self {
        RevocationRegistry::RevocationRegistryV1(RevocationRegistryV1 { value })
    }

    pub fn value(&self) -> &CryptoRevocationRegistry {
        match self {
            RevocationRegistry::RevocationRegistryV1(reg) => &reg.value,
        }
    }

    pub fn value_mut(&mut self) -> &mut CryptoRevocationRegistry {
        match self {
            RevocationRegistry::RevocationRegistryV1(reg) => &mut reg.value,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "ver")]
pub enum RevocationRegistryDelta {
    #[serde(rename = "1.0")]
    RevocationRegistryDeltaV1(RevocationRegistryDeltaV1),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RevocationRegistryDeltaV1 {
    pub value: CryptoRevocationRegistryDelta,
}

impl RevocationRegistryDelta {
    pub fn new(value: CryptoRevocationRegistryDelta) -> Self {
        RevocationRegistryDelta::RevocationRegistryDeltaV1(RevocationRegistryDeltaV1 { value })
    }

    pub fn value(&self) -> &CryptoRevocationRegistryDelta {
        match self {
            RevocationRegistryDelta::RevocationRegistryDeltaV1(delta) => &delta.value,
        }
    }

    /// Folds `next` onto `self`. `next` must start where `self` ends, i.e.
    /// `next.prevAccum == self.accum`; the result ends at `next.accum`.
    ///
    /// # Errors
    /// `InvalidStructure` when the deltas are not chained.
    pub fn merge(&self, next: &RevocationRegistryDelta) -> AnoncredsResult<RevocationRegistryDelta> {
        let mut merged = self.value().clone();
        merged.merge(next.value()).map_err(|_| {
            AnoncredsError::InvalidStructure(
                "Revocation registry deltas can not be merged: prevAccum of the second delta does not match accum of the first".to_string(),
            )
        })?;
        Ok(RevocationRegistryDelta::new(merged))
    }

    /// Accumulator value this delta ends at, in its wire form.
    pub fn accum(&self) -> AnoncredsResult<serde_json::Value> {
        to_value(self.value())?
            .get("accum")
            .cloned()
            .ok_or_else(|| AnoncredsError::InvalidStructure("Delta without accum".to_string()))
    }

    /// Registry snapshot this delta ends at.
    pub fn to_registry(&self) -> CryptoRevocationRegistry {
        CryptoRevocationRegistry::from(self.value().clone())
    }
}

/// A prover's non-revocation witness valid against `rev_reg` at `timestamp`.
#[derive(Debug, Serialize, Deserialize)]
pub struct RevocationState {
    pub witness: Witness,
    pub rev_reg: CryptoRevocationRegistry,
    pub timestamp: u64,
}

/// Issuer-side index bookkeeping for one registry.
///
/// `used_ids` holds issued indices for `ISSUANCE_ON_DEMAND` registries and
/// revoked indices for `ISSUANCE_BY_DEFAULT` ones.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RevocationRegistryInfo {
    pub id: String,
    pub curr_id: u32,
    pub used_ids: HashSet<u32>,
}

impl RevocationRegistryInfo {
    pub fn new(id: &str) -> Self {
        RevocationRegistryInfo {
            id: id.to_string(),
            curr_id: 0,
            used_ids: HashSet::new(),
        }
    }

    /// Index sets `(issued, revoked)` describing the registry from genesis.
    pub fn index_sets(&self, issuance_type: IssuanceType, max_cred_num: u32) -> (HashSet<u32>, HashSet<u32>) {
        match issuance_type {
            IssuanceType::ISSUANCE_ON_DEMAND => (self.used_ids.clone(), HashSet::new()),
            IssuanceType::ISSUANCE_BY_DEFAULT => {
                let issued = (1..=max_cred_num)
                    .filter(|idx| !self.used_ids.contains(idx))
                    .collect();
                (issued, self.used_ids.clone())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config: RevocationRegistryConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.issuance_type(), IssuanceType::ISSUANCE_ON_DEMAND);
        assert_eq!(config.max_cred_num(), 100_000);

        let config: RevocationRegistryConfig =
            serde_json::from_str(r#"{"issuance_type":"ISSUANCE_BY_DEFAULT","max_cred_num":5}"#).unwrap();
        assert!(config.issuance_type().to_bool());
        assert_eq!(config.max_cred_num(), 5);
    }

    #[test]
    fn builds_registry_ids() {
        assert_eq!(
            RevocationRegistryDefinition::build_id(
                "NcYxiDXkpYi6ov5FcYDi1e",
                "NcYxiDXkpYi6ov5FcYDi1e:3:CL:1:tag",
                RegistryType::CL_ACCUM,
                "r1"
            ),
            "NcYxiDXkpYi6ov5FcYDi1e:4:NcYxiDXkpYi6ov5FcYDi1e:3:CL:1:tag:CL_ACCUM:r1"
        );
        assert!(RegistryType::parse(Some("OTHER")).is_err());
    }

    #[test]
    fn index_sets_follow_issuance_type() {
        let mut info = RevocationRegistryInfo::new("id");
        info.used_ids.insert(2);

        let (issued, revoked) = info.index_sets(IssuanceType::ISSUANCE_ON_DEMAND, 3);
        assert_eq!(issued, [2].into_iter().collect());
        assert!(revoked.is_empty());

        let (issued, revoked) = info.index_sets(IssuanceType::ISSUANCE_BY_DEFAULT, 3);
        assert_eq!(issued, [1, 3].into_iter().collect());
        assert_eq!(revoked, [2].into_iter().collect());
    }
}
