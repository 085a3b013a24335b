//! Output extraction.
//!
//! Parses the engine's structured output payload (the `terraform output
//! -json` shape: `{name: {value, type, sensitive}}`) into an [`OutputSet`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::OutputParseError;

/// One output value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputValue {
    /// The value.
    pub value: serde_json::Value,
    /// Engine type description.
    #[serde(rename = "type", default, skip_serializing_if = "serde_json::Value::is_null")]
    pub value_type: serde_json::Value,
    /// Whether the value is sensitive.
    #[serde(default)]
    pub sensitive: bool,
}

/// Outputs of a successful apply, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutputSet {
    values: BTreeMap<String, OutputValue>,
}

impl OutputSet {
    /// Returns the output names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }

    /// Gets an output by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&OutputValue> {
        self.values.get(name)
    }

    /// Returns the number of outputs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if there are no outputs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the subset named in `names`; everything when `names` is empty.
    #[must_use]
    pub fn filtered(&self, names: &[String]) -> Self {
        if names.is_empty() {
            return self.clone();
        }
        Self {
            values: self
                .values
                .iter()
                .filter(|(name, _)| names.contains(name))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
        }
    }

    /// Returns the number of sensitive outputs.
    #[must_use]
    pub fn sensitive_count(&self) -> usize {
        self.values.values().filter(|v| v.sensitive).count()
    }
}

impl FromIterator<(String, OutputValue)> for OutputSet {
    fn from_iter<I: IntoIterator<Item = (String, OutputValue)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Parses engine output payloads.
#[derive(Debug, Default, Clone, Copy)]
pub struct OutputExtractor;

impl OutputExtractor {
    /// Creates a new extractor.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Parses a payload into an output set.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a JSON object of output
    /// entries.
    pub fn extract(&self, payload: &[u8]) -> Result<OutputSet, OutputParseError> {
        let raw: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| OutputParseError::new(format!("payload is not JSON: {e}")))?;

        let serde_json::Value::Object(entries) = raw else {
            return Err(OutputParseError::new("payload is not a JSON object"));
        };

        let mut values = BTreeMap::new();
        for (name, entry) in entries {
            if !entry.is_object() || entry.get("value").is_none() {
                return Err(OutputParseError::new(format!(
                    "output {name} has no value"
                )));
            }
            let value: OutputValue = serde_json::from_value(entry)
                .map_err(|e| OutputParseError::new(format!("output {name}: {e}")))?;
            values.insert(name, value);
        }

        let set = OutputSet { values };
        debug!(
            "Extracted {} outputs ({} sensitive)",
            set.len(),
            set.sensitive_count()
        );
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &str = r#"{
        "hello_world": {"sensitive": false, "type": "string", "value": "hey hey ya"},
        "db_password": {"sensitive": true, "type": "string", "value": "s3cr3t"}
    }"#;

    #[test]
    fn test_extract_outputs() {
        let set = OutputExtractor::new()
            .extract(PAYLOAD.as_bytes())
            .expect("valid payload");

        assert_eq!(set.names(), vec!["db_password", "hello_world"]);
        assert_eq!(set.sensitive_count(), 1);
        assert_eq!(
            set.get("hello_world").map(|v| v.value.clone()),
            Some(serde_json::json!("hey hey ya"))
        );
    }

    #[test]
    fn test_extract_empty_object() {
        let set = OutputExtractor::new().extract(b"{}").expect("empty is valid");
        assert!(set.is_empty());
    }

    #[test]
    fn test_extract_rejects_malformed() {
        let extractor = OutputExtractor::new();
        assert!(extractor.extract(b"").is_err());
        assert!(extractor.extract(b"[1, 2]").is_err());
        assert!(extractor.extract(br#"{"x": {"type": "string"}}"#).is_err());
        assert!(extractor.extract(br#"{"x": "bare"}"#).is_err());
    }

    #[test]
    fn test_filtered() {
        let set = OutputExtractor::new()
            .extract(PAYLOAD.as_bytes())
            .expect("valid payload");

        assert_eq!(set.filtered(&[]).len(), 2);
        assert_eq!(
            set.filtered(&[String::from("hello_world"), String::from("missing")])
                .names(),
            vec!["hello_world"]
        );
    }
}
