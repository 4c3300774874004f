// src/wallet/query.rs
//! Wallet query language (WQL).
//!
//! MongoDB-style filters over record tags:
//!
//! ```json
//! {"$and": [{"schema_name": "degree"}, {"attr::age::value": {"$gte": "18"}}]}
//! ```
//!
//! Operators: `$eq` (bare string), `$neq`, `$gt`, `$gte`, `$lt`, `$lte`,
//! `$like` (`%` and `_` wildcards), `$in`, `$and`, `$or`, `$not`.
//! A JSON array is accepted as the legacy restrictions form and read as `$or`
//! over its elements. Comparisons are plain string comparisons.
//!
//! An empty `$or`, like an empty `$and`, constrains nothing.

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Query {
    And(Vec<Query>),
    Or(Vec<Query>),
    Not(Box<Query>),
    Eq(String, String),
    Neq(String, String),
    Gt(String, String),
    Gte(String, String),
    Lt(String, String),
    Lte(String, String),
    Like(String, String),
    In(String, Vec<String>),
}

impl Default for Query {
    /// The empty conjunction, matching every record.
    fn default() -> Self {
        Query::And(Vec::new())
    }
}

impl Query {
    /// Evaluates the query against a record's tags. A missing tag fails every
    /// comparison, including `$neq`.
    pub fn matches(&self, tags: &HashMap<String, String>) -> bool {
        match self {
            Query::And(queries) => queries.iter().all(|q| q.matches(tags)),
            Query::Or(queries) => queries.is_empty() || queries.iter().any(|q| q.matches(tags)),
            Query::Not(query) => !query.matches(tags),
            Query::Eq(name, value) => tags.get(name).map_or(false, |v| v == value),
            Query::Neq(name, value) => tags.get(name).map_or(false, |v| v != value),
            Query::Gt(name, value) => tags.get(name).map_or(false, |v| v > value),
            Query::Gte(name, value) => tags.get(name).map_or(false, |v| v >= value),
            Query::Lt(name, value) => tags.get(name).map_or(false, |v| v < value),
            Query::Lte(name, value) => tags.get(name).map_or(false, |v| v <= value),
            Query::Like(name, pattern) => tags.get(name).map_or(false, |v| like(v, pattern)),
            Query::In(name, values) => tags.get(name).map_or(false, |v| values.contains(v)),
        }
    }

    /// Flattens trivially nested operators. Returns `None` for a query that
    /// constrains nothing.
    pub fn optimise(self) -> Option<Query> {
        match self {
            Query::Not(inner) => match *inner {
                Query::Not(nested) => nested.optimise(),
                other => Some(Query::Not(Box::new(other))),
            },
            Query::And(queries) => {
                let queries = queries.into_iter().filter_map(Query::optimise).collect();
                Self::collapse(queries, Query::And)
            }
            Query::Or(queries) => {
                // an unconstrained alternative makes the whole disjunction unconstrained
                let queries = queries.into_iter().map(Query::optimise).collect::<Option<Vec<_>>>()?;
                Self::collapse(queries, Query::Or)
            }
            Query::In(name, mut values) if values.len() == 1 => Some(Query::Eq(name, values.remove(0))),
            other => Some(other),
        }
    }

    fn collapse(mut queries: Vec<Query>, rebuild: fn(Vec<Query>) -> Query) -> Option<Query> {
        match queries.len() {
            0 => None,
            1 => Some(queries.remove(0)),
            _ => Some(rebuild(queries)),
        }
    }

    /// Rewrites every tag name with `f`, leaving structure and values alone.
    pub fn map_names<F: Fn(&str) -> String + Copy>(self, f: F) -> Query {
        match self {
            Query::And(queries) => Query::And(queries.into_iter().map(|q| q.map_names(f)).collect()),
            Query::Or(queries) => Query::Or(queries.into_iter().map(|q| q.map_names(f)).collect()),
            Query::Not(query) => Query::Not(Box::new(query.map_names(f))),
            Query::Eq(name, value) => Query::Eq(f(&name), value),
            Query::Neq(name, value) => Query::Neq(f(&name), value),
            Query::Gt(name, value) => Query::Gt(f(&name), value),
            Query::Gte(name, value) => Query::Gte(f(&name), value),
            Query::Lt(name, value) => Query::Lt(f(&name), value),
            Query::Lte(name, value) => Query::Lte(f(&name), value),
            Query::Like(name, value) => Query::Like(f(&name), value),
            Query::In(name, values) => Query::In(f(&name), values),
        }
    }

    /// Conjunction of the given queries, simplified.
    pub fn and_all(queries: Vec<Query>) -> Query {
        Query::And(queries).optimise().unwrap_or_default()
    }

    pub fn to_value(&self) -> Value {
        match self {
            Query::Eq(name, value) => json!({ name: value }),
            Query::Neq(name, value) => json!({ name: { "$neq": value } }),
            Query::Gt(name, value) => json!({ name: { "$gt": value } }),
            Query::Gte(name, value) => json!({ name: { "$gte": value } }),
            Query::Lt(name, value) => json!({ name: { "$lt": value } }),
            Query::Lte(name, value) => json!({ name: { "$lte": value } }),
            Query::Like(name, value) => json!({ name: { "$like": value } }),
            Query::In(name, values) => json!({ name: { "$in": values } }),
            Query::And(queries) if queries.is_empty() => json!({}),
            Query::And(queries) => json!({ "$and": queries.iter().map(Query::to_value).collect::<Vec<_>>() }),
            Query::Or(queries) if queries.is_empty() => json!({}),
            Query::Or(queries) => json!({ "$or": queries.iter().map(Query::to_value).collect::<Vec<_>>() }),
            Query::Not(query) => json!({ "$not": query.to_value() }),
        }
    }
}

impl Serialize for Query {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Query {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Object(map) => parse_query(map).map_err(de::Error::custom),
            Value::Array(restrictions) => {
                let mut alternatives = Vec::with_capacity(restrictions.len());
                for restriction in restrictions {
                    let restriction: Map<String, Value> = restriction
                        .as_object()
                        .ok_or_else(|| de::Error::custom("Restriction is invalid"))?
                        .iter()
                        .filter(|(_, v)| !v.is_null())
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
                    if !restriction.is_empty() {
                        alternatives.push(Value::Object(restriction));
                    }
                }
                let mut map = Map::new();
                map.insert("$or".to_string(), Value::Array(alternatives));
                let query = parse_query(map).map_err(de::Error::custom)?;
                Ok(query.optimise().unwrap_or_default())
            }
            _ => Err(de::Error::custom("Restriction must be either object or array")),
        }
    }
}

fn parse_query(map: Map<String, Value>) -> Result<Query, String> {
    let mut operators = Vec::new();
    for (key, value) in map {
        if let Some(operator) = parse_operator(key, value)? {
            operators.push(operator);
        }
    }
    Ok(if operators.len() == 1 {
        operators.remove(0)
    } else {
        Query::And(operators)
    })
}

fn parse_operator(key: String, value: Value) -> Result<Option<Query>, String> {
    match (key.as_str(), value) {
        ("$and", Value::Array(values)) if values.is_empty() => Ok(None),
        ("$and", Value::Array(values)) => Ok(Some(Query::And(parse_list(values)?))),
        ("$and", _) => Err("$and must be array of JSON objects".to_string()),
        ("$or", Value::Array(values)) if values.is_empty() => Ok(None),
        ("$or", Value::Array(values)) => Ok(Some(Query::Or(parse_list(values)?))),
        ("$or", _) => Err("$or must be array of JSON objects".to_string()),
        ("$not", Value::Object(map)) => Ok(Some(Query::Not(Box::new(parse_query(map)?)))),
        ("$not", _) => Err("$not must be JSON object".to_string()),
        (_, Value::String(value)) => Ok(Some(Query::Eq(key, value))),
        (_, Value::Object(map)) => {
            if map.len() != 1 {
                return Err(format!("value of {} must be JSON object of length 1", key));
            }
            let (operator, value) = map.into_iter().next().ok_or("empty operator")?;
            parse_single_operator(&operator, key, value).map(Some)
        }
        (_, _) => Err(format!("Unsupported value for {}", key)),
    }
}

fn parse_list(values: Vec<Value>) -> Result<Vec<Query>, String> {
    values
        .into_iter()
        .map(|value| match value {
            Value::Object(map) => parse_query(map),
            _ => Err("operator must be array of JSON objects".to_string()),
        })
        .collect()
}

fn parse_single_operator(operator: &str, key: String, value: Value) -> Result<Query, String> {
    match (operator, value) {
        ("$neq", Value::String(v)) => Ok(Query::Neq(key, v)),
        ("$gt", Value::String(v)) => Ok(Query::Gt(key, v)),
        ("$gte", Value::String(v)) => Ok(Query::Gte(key, v)),
        ("$lt", Value::String(v)) => Ok(Query::Lt(key, v)),
        ("$lte", Value::String(v)) => Ok(Query::Lte(key, v)),
        ("$like", Value::String(v)) => Ok(Query::Like(key, v)),
        ("$in", Value::Array(values)) => {
            let values = values
                .into_iter()
                .map(|v| match v {
                    Value::String(s) => Ok(s),
                    _ => Err("$in must be used with array of strings".to_string()),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Query::In(key, values))
        }
        ("$neq" | "$gt" | "$gte" | "$lt" | "$lte" | "$like", _) => {
            Err(format!("{} must be used with string", operator))
        }
        ("$in", _) => Err("$in must be used with array of strings".to_string()),
        (other, _) => Err(format!("Unknown operator {}", other)),
    }
}

/// SQL `LIKE` matching: `%` is any run of characters, `_` exactly one.
fn like(value: &str, pattern: &str) -> bool {
    let value: Vec<char> = value.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    let (mut v, mut p) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while v < value.len() {
        if p < pattern.len() && (pattern[p] == '_' || pattern[p] == value[v]) {
            v += 1;
            p += 1;
        } else if p < pattern.len() && pattern[p] == '%' {
            backtrack = Some((p, v));
            p += 1;
        } else if let Some((star_p, star_v)) = backtrack {
            p = star_p + 1;
            v = star_v + 1;
            backtrack = Some((star_p, star_v + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|c| *c == '%')
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::distributions::Alphanumeric;
    use rand::{thread_rng, Rng};

    fn random_string(len: usize) -> String {
        thread_rng()
            .sample_iter(&Alphanumeric)
            .take(len)
            .map(char::from)
            .collect()
    }

    fn tags(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn empty_object_is_empty_and() {
        let query: Query = serde_json::from_str("{}").unwrap();
        assert_eq!(query, Query::And(vec![]));
        let query: Query = serde_json::from_str(r#"{"$or":[]}"#).unwrap();
        assert_eq!(query, Query::And(vec![]));
    }

    #[test]
    fn parses_simple_operators() {
        let name = random_string(10);
        let value = random_string(10);

        let query: Query = serde_json::from_str(&format!(r#"{{"{}":"{}"}}"#, name, value)).unwrap();
        assert_eq!(query, Query::Eq(name.clone(), value.clone()));

        let query: Query = serde_json::from_str(&format!(r#"{{"{}":{{"$gte":"{}"}}}}"#, name, value)).unwrap();
        assert_eq!(query, Query::Gte(name.clone(), value.clone()));

        let query: Query =
            serde_json::from_str(&format!(r#"{{"{}":{{"$in":["{}","x"]}}}}"#, name, value)).unwrap();
        assert_eq!(query, Query::In(name, vec![value, "x".to_string()]));
    }

    #[test]
    fn parses_nested_operators() {
        let json = r#"{"$and":[{"a":"1"},{"$not":{"b":{"$like":"x%"}}},{"$or":[{"c":"2"},{"d":"3"}]}]}"#;
        let query: Query = serde_json::from_str(json).unwrap();
        assert_eq!(
            query,
            Query::And(vec![
                Query::Eq("a".into(), "1".into()),
                Query::Not(Box::new(Query::Like("b".into(), "x%".into()))),
                Query::Or(vec![Query::Eq("c".into(), "2".into()), Query::Eq("d".into(), "3".into())]),
            ])
        );
    }

    #[test]
    fn legacy_restrictions_become_or() {
        let json = r#"[{"schema_id":"s1","issuer_did":null},{"cred_def_id":"c1"}]"#;
        let query: Query = serde_json::from_str(json).unwrap();
        assert_eq!(
            query,
            Query::Or(vec![
                Query::Eq("schema_id".into(), "s1".into()),
                Query::Eq("cred_def_id".into(), "c1".into()),
            ])
        );
    }

    #[test]
    fn rejects_bad_operators() {
        assert!(serde_json::from_str::<Query>(r#"{"a":{"$gt":1}}"#).is_err());
        assert!(serde_json::from_str::<Query>(r#"{"a":{"$foo":"1"}}"#).is_err());
        assert!(serde_json::from_str::<Query>(r#"{"$and":{"a":"1"}}"#).is_err());
        assert!(serde_json::from_str::<Query>(r#""text""#).is_err());
    }

    #[test]
    fn serializes_back_to_wql() {
        let query = Query::And(vec![
            Query::Eq("a".into(), "1".into()),
            Query::In("b".into(), vec!["2".into()]),
        ]);
        let json = serde_json::to_value(&query).unwrap();
        assert_eq!(json, json!({"$and": [{"a": "1"}, {"b": {"$in": ["2"]}}]}));
        let back: Query = serde_json::from_value(json).unwrap();
        assert_eq!(back, query);
    }

    #[test]
    fn optimise_flattens() {
        let query = Query::And(vec![Query::Or(vec![Query::In("a".into(), vec!["1".into()])])]);
        assert_eq!(query.optimise(), Some(Query::Eq("a".into(), "1".into())));

        let query = Query::Not(Box::new(Query::Not(Box::new(Query::Eq("a".into(), "1".into())))));
        assert_eq!(query.optimise(), Some(Query::Eq("a".into(), "1".into())));

        assert_eq!(Query::And(vec![Query::Or(vec![])]).optimise(), None);

        let open = Query::Or(vec![Query::Eq("a".into(), "1".into()), Query::And(vec![])]);
        assert_eq!(open.optimise(), None);
    }

    #[test]
    fn empty_or_constrains_nothing() {
        let record = tags(&[("name", "Alice")]);
        let empty = Query::Or(vec![]);
        assert!(empty.matches(&record));

        let json = serde_json::to_value(&empty).unwrap();
        let back: Query = serde_json::from_value(json).unwrap();
        assert_eq!(back.matches(&record), empty.matches(&record));

        let restricted = Query::And(vec![Query::Eq("name".into(), "Bob".into()), Query::Or(vec![])]);
        assert!(!restricted.matches(&record));
        assert_eq!(restricted.optimise(), Some(Query::Eq("name".into(), "Bob".into())));
    }

    #[test]
    fn single_legacy_restriction_collapses() {
        let query: Query = serde_json::from_str(r#"[{"schema_name":"degree"}]"#).unwrap();
        assert_eq!(query, Query::Eq("schema_name".into(), "degree".into()));

        let query: Query = serde_json::from_str("[]").unwrap();
        assert_eq!(query, Query::default());
    }

    #[test]
    fn matches_tags() {
        let record = tags(&[("schema_name", "degree"), ("age", "25"), ("name", "Alice")]);

        assert!(Query::default().matches(&record));
        assert!(Query::Eq("schema_name".into(), "degree".into()).matches(&record));
        assert!(!Query::Neq("missing".into(), "x".into()).matches(&record));
        assert!(Query::Gte("age".into(), "18".into()).matches(&record));
        assert!(Query::Like("name".into(), "A%e".into()).matches(&record));
        assert!(Query::Like("name".into(), "_lice".into()).matches(&record));
        assert!(!Query::Like("name".into(), "B%".into()).matches(&record));
        assert!(Query::In("name".into(), vec!["Bob".into(), "Alice".into()]).matches(&record));
        assert!(Query::Not(Box::new(Query::Eq("name".into(), "Bob".into()))).matches(&record));
        assert!(!Query::Or(vec![Query::Eq("name".into(), "Bob".into())]).matches(&record));
    }

    #[test]
    fn like_handles_multiple_wildcards() {
        assert!(like("abcabc", "%bc%c"));
        assert!(like("", "%"));
        assert!(!like("abc", "ab"));
        assert!(like("abc", "a%%c"));
    }

    #[test]
    fn map_names_rewrites_keys() {
        let query = Query::Or(vec![Query::Eq("attr::First Name::value".into(), "A".into())]);
        let mapped = query.map_names(|n| n.replace(' ', "").to_lowercase());
        assert_eq!(mapped, Query::Or(vec![Query::Eq("attr::firstname::value".into(), "A".into())]));
    }
}
