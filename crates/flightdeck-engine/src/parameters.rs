//! Typed key/value maps used for run inputs and working state.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ParameterError;

/// Serializable key/value map.
///
/// Used both for a run's immutable input parameters and for its mutable
/// working state. Values are stored as JSON so the whole map can be
/// persisted after every step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Parameters(BTreeMap<String, Value>);

impl Parameters {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with<T: Serialize + ?Sized>(mut self, key: &str, value: &T) -> Result<Self, ParameterError> {
        self.put(key, value)?;
        Ok(self)
    }

    /// Store a value under `key`, replacing any previous value.
    pub fn put<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> Result<(), ParameterError> {
        let value = serde_json::to_value(value).map_err(|e| ParameterError::Serialize {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        self.0.insert(key.to_string(), value);
        Ok(())
    }

    /// Read a value, `Ok(None)` when absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ParameterError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| ParameterError::InvalidType {
                    key: key.to_string(),
                    message: e.to_string(),
                }),
        }
    }

    /// Read a value that must be present.
    pub fn require<T: DeserializeOwned>(&self, key: &str) -> Result<T, ParameterError> {
        self.get(key)?
            .ok_or_else(|| ParameterError::Missing(key.to_string()))
    }

    /// Read a boolean flag, treating absence as `false`.
    pub fn flag(&self, key: &str) -> bool {
        matches!(self.0.get(key), Some(Value::Bool(true)))
    }

    /// Remove a key, returning whether it was present.
    pub fn remove(&mut self, key: &str) -> bool {
        self.0.remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over raw entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_put_and_get() {
        let mut params = Parameters::new();
        params.put("count", &3u32).unwrap();
        params.put("name", "bucket-a").unwrap();

        assert_eq!(params.get::<u32>("count").unwrap(), Some(3));
        assert_eq!(params.get::<String>("name").unwrap().as_deref(), Some("bucket-a"));
        assert_eq!(params.get::<u32>("absent").unwrap(), None);
    }

    #[test]
    fn test_require_missing() {
        let params = Parameters::new();
        let err = params.require::<Uuid>("workspace_id").unwrap_err();
        assert!(matches!(err, ParameterError::Missing(key) if key == "workspace_id"));
    }

    #[test]
    fn test_invalid_type() {
        let params = Parameters::new().with("count", "not-a-number").unwrap();
        let err = params.get::<u32>("count").unwrap_err();
        assert!(matches!(err, ParameterError::InvalidType { .. }));
    }

    #[test]
    fn test_flag_defaults_false() {
        let mut params = Parameters::new();
        assert!(!params.flag("marked"));
        params.put("marked", &true).unwrap();
        assert!(params.flag("marked"));
        assert!(params.remove("marked"));
        assert!(!params.flag("marked"));
    }

    #[test]
    fn test_structured_values_survive_json() {
        let id = Uuid::new_v4();
        let params = Parameters::new().with("ids", &vec![id]).unwrap();

        let json = serde_json::to_string(&params).unwrap();
        let parsed: Parameters = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.require::<Vec<Uuid>>("ids").unwrap(), vec![id]);
        assert_eq!(parsed, params);
    }
}
