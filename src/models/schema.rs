// src/models/schema.rs
//! Credential schema: the attribute-name list for one credential type.

use crate::errors::{AnoncredsError, AnoncredsResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const SCHEMA_MARKER: &str = "2";
pub const MAX_ATTRIBUTES_COUNT: usize = 125;

/// Versioned schema as published to the registry.
///
/// ```json
/// {"ver":"1.0","id":"NcYxiDXkpYi6ov5FcYDi1e:2:degree:1.0","name":"degree",
///  "version":"1.0","attrNames":["name","degree"],"seqNo":null}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "ver")]
pub enum Schema {
    #[serde(rename = "1.0")]
    SchemaV1(SchemaV1),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SchemaV1 {
    pub id: String,
    pub name: String,
    pub version: String,
    pub attr_names: AttributeNames,
    #[serde(default)]
    pub seq_no: Option<u32>,
}

/// Set of attribute names; serialized as a JSON array.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct AttributeNames(pub HashSet<String>);

impl AttributeNames {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names must be non-empty, at most [`MAX_ATTRIBUTES_COUNT`], and distinct
    /// once case and whitespace are ignored.
    pub fn validate(&self) -> AnoncredsResult<()> {
        if self.0.is_empty() {
            return Err(AnoncredsError::InvalidStructure(
                "Empty list of Schema attributes has been passed".to_string(),
            ));
        }
        if self.0.len() > MAX_ATTRIBUTES_COUNT {
            return Err(AnoncredsError::InvalidStructure(format!(
                "The number of Schema attributes {} cannot be greater than {}",
                self.0.len(),
                MAX_ATTRIBUTES_COUNT
            )));
        }
        let mut seen = HashSet::new();
        for name in &self.0 {
            if name.trim().is_empty() {
                return Err(AnoncredsError::InvalidStructure(
                    "Schema attribute names cannot be empty".to_string(),
                ));
            }
            if !seen.insert(attr_common_view(name)) {
                return Err(AnoncredsError::InvalidStructure(format!(
                    "Schema attribute {} is duplicated after normalization",
                    name
                )));
            }
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for AttributeNames {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        AttributeNames(iter.into_iter().map(Into::into).collect())
    }
}

/// Canonical form of an attribute name: lowercase with all spaces removed.
/// `"First Name"` and `"firstname"` address the same attribute.
pub fn attr_common_view(name: &str) -> String {
    name.replace(' ', "").to_lowercase()
}

impl Schema {
    pub fn build_id(issuer_did: &str, name: &str, version: &str) -> String {
        format!("{}:{}:{}:{}", issuer_did, SCHEMA_MARKER, name, version)
    }

    pub fn id(&self) -> &str {
        match self {
            Schema::SchemaV1(schema) => &schema.id,
        }
    }

    pub fn attr_names(&self) -> &AttributeNames {
        match self {
            Schema::SchemaV1(schema) => &schema.attr_names,
        }
    }
}

/// Components of a schema id: `(issuer_did, name, version)`.
///
/// The issuer DID may itself contain `:` (qualified DIDs), so the id is split
/// from the right.
pub fn parse_schema_id(id: &str) -> Option<(String, String, String)> {
    let mut parts = id.rsplitn(4, ':');
    let version = parts.next()?;
    let name = parts.next()?;
    let marker = parts.next()?;
    let did = parts.next()?;
    if marker != SCHEMA_MARKER || did.is_empty() {
        return None;
    }
    Some((did.to_string(), name.to_string(), version.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_wire_format() {
        let schema = Schema::SchemaV1(SchemaV1 {
            id: Schema::build_id("NcYxiDXkpYi6ov5FcYDi1e", "degree", "1.0"),
            name: "degree".into(),
            version: "1.0".into(),
            attr_names: ["name"].into_iter().collect(),
            seq_no: None,
        });
        let json = serde_json::to_value(&schema).unwrap();
        assert_eq!(json["ver"], "1.0");
        assert_eq!(json["id"], "NcYxiDXkpYi6ov5FcYDi1e:2:degree:1.0");
        assert_eq!(json["attrNames"], serde_json::json!(["name"]));

        let back: Schema = serde_json::from_value(json).unwrap();
        assert_eq!(back, schema);
    }

    #[test]
    fn attribute_names_must_be_distinct_after_normalization() {
        let names: AttributeNames = ["First Name", "firstname"].into_iter().collect();
        assert!(names.validate().is_err());

        let names: AttributeNames = ["name", "age"].into_iter().collect();
        assert!(names.validate().is_ok());

        assert!(AttributeNames::new().validate().is_err());
    }

    #[test]
    fn too_many_attributes_rejected() {
        let names: AttributeNames = (0..=MAX_ATTRIBUTES_COUNT).map(|i| format!("a{}", i)).collect();
        assert!(names.validate().is_err());
    }

    #[test]
    fn parses_schema_ids() {
        let (did, name, version) = parse_schema_id("NcYxiDXkpYi6ov5FcYDi1e:2:gvt:1.0").unwrap();
        assert_eq!((did.as_str(), name.as_str(), version.as_str()), ("NcYxiDXkpYi6ov5FcYDi1e", "gvt", "1.0"));
        assert!(parse_schema_id("NcYxiDXkpYi6ov5FcYDi1e:3:gvt:1.0").is_none());
        assert_eq!(attr_common_view("First Name"), "firstname");
    }
}
