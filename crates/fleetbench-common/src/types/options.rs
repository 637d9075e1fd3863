//! Provider-specific option bags
//!
//! Cluster providers, discovery mechanisms and test executors each accept an
//! open set of key/value options. The bag itself is opaque to the engine;
//! only the owning provider validates it against its recognized keys.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// Key/value options interpreted by exactly one provider, mechanism or executor
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OptionBag(BTreeMap<String, Value>);

impl OptionBag {
    /// Create an empty bag
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Insert or replace a value
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Raw value lookup
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Whether the bag has no entries
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over keys in sorted order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Reject any key not in `recognized`
    ///
    /// `owner` names the provider/mechanism for the error message.
    pub fn ensure_recognized(&self, owner: &str, recognized: &[&str]) -> Result<()> {
        let unknown: Vec<&str> = self
            .keys()
            .filter(|k| !recognized.contains(k))
            .collect();
        if unknown.is_empty() {
            return Ok(());
        }
        Err(Error::config_invalid_field(
            owner,
            "options",
            format!(
                "unrecognized option(s) {}; supported: {}",
                unknown.join(", "),
                recognized.join(", ")
            ),
        ))
    }

    /// String option
    pub fn string(&self, owner: &str, key: &str) -> Result<Option<String>> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(type_error(owner, key, "a string", other)),
        }
    }

    /// Unsigned integer option; numeric strings are accepted
    pub fn u32(&self, owner: &str, key: &str) -> Result<Option<u32>> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .map(Some)
                .ok_or_else(|| type_error(owner, key, "a non-negative integer", &Value::Number(n.clone()))),
            Some(Value::String(s)) => s
                .parse::<u32>()
                .map(Some)
                .map_err(|_| type_error(owner, key, "a non-negative integer", &Value::String(s.clone()))),
            Some(other) => Err(type_error(owner, key, "a non-negative integer", other)),
        }
    }

    /// Boolean option
    pub fn bool(&self, owner: &str, key: &str) -> Result<Option<bool>> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(other) => Err(type_error(owner, key, "a boolean", other)),
        }
    }

    /// List-of-strings option; a single string is treated as a one-element list
    pub fn string_list(&self, owner: &str, key: &str) -> Result<Vec<String>> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::String(s)) => Ok(vec![s.clone()]),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| match v {
                    Value::String(s) => Ok(s.clone()),
                    other => Err(type_error(owner, key, "a list of strings", other)),
                })
                .collect(),
            Some(other) => Err(type_error(owner, key, "a list of strings", other)),
        }
    }

    /// Map-of-strings option
    pub fn string_map(&self, owner: &str, key: &str) -> Result<BTreeMap<String, String>> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(BTreeMap::new()),
            Some(Value::Object(map)) => map
                .iter()
                .map(|(k, v)| match v {
                    Value::String(s) => Ok((k.clone(), s.clone())),
                    other => Err(type_error(owner, key, "a map of strings", other)),
                })
                .collect(),
            Some(other) => Err(type_error(owner, key, "a map of strings", other)),
        }
    }
}

impl FromIterator<(String, Value)> for OptionBag {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

fn type_error(owner: &str, key: &str, expected: &str, got: &Value) -> Error {
    Error::config_invalid_field(
        owner,
        format!("options.{key}"),
        format!("expected {expected}, got {got}"),
    )
}
