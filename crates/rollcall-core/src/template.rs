//! Face templates: fixed-length embedding vectors and their encodings.
//!
//! Templates reach the service as JSON arrays of numbers and are stored as
//! little-endian `f32` bytes. Anything else (placeholder strings, nested
//! arrays, NaN) is rejected at enrollment time.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TemplateError {
    #[error("template is empty")]
    Empty,
    #[error("template has {actual} values, expected {expected}")]
    WrongDimension { expected: usize, actual: usize },
    #[error("template value at index {0} is not finite")]
    NonFinite(usize),
    #[error("template is not a JSON array of numbers: {0}")]
    Malformed(String),
    #[error("template byte length {0} is not a multiple of 4")]
    BadByteLength(usize),
}

/// Face embedding vector (typically 128-dimensional for browser face models).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FaceTemplate {
    pub values: Vec<f32>,
}

impl FaceTemplate {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Compute Euclidean distance between two templates.
    ///
    /// Templates of different length are not comparable and are infinitely
    /// far apart.
    pub fn euclidean_distance(&self, other: &FaceTemplate) -> f32 {
        if self.values.len() != other.values.len() {
            return f32::INFINITY;
        }
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Check that the template is usable for enrollment in a deployment
    /// whose embedding model produces `expected_dim` values.
    pub fn validate(&self, expected_dim: usize) -> Result<(), TemplateError> {
        if self.values.is_empty() {
            return Err(TemplateError::Empty);
        }
        if self.values.len() != expected_dim {
            return Err(TemplateError::WrongDimension {
                expected: expected_dim,
                actual: self.values.len(),
            });
        }
        if let Some(idx) = self.values.iter().position(|v| !v.is_finite()) {
            return Err(TemplateError::NonFinite(idx));
        }
        Ok(())
    }

    /// Read a template from an already-decoded JSON value. Only a non-empty
    /// array of finite numbers is accepted; the dimension is checked at
    /// enrollment against the deployment's model.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, TemplateError> {
        let items = match value {
            serde_json::Value::Array(items) => items,
            other => {
                return Err(TemplateError::Malformed(format!(
                    "expected an array, got {}",
                    json_kind(other)
                )))
            }
        };
        if items.is_empty() {
            return Err(TemplateError::Empty);
        }
        let mut values = Vec::with_capacity(items.len());
        for (idx, item) in items.iter().enumerate() {
            let v = item.as_f64().ok_or_else(|| {
                TemplateError::Malformed(format!("value at index {idx} is {}", json_kind(item)))
            })?;
            let v = v as f32;
            if !v.is_finite() {
                return Err(TemplateError::NonFinite(idx));
            }
            values.push(v);
        }
        Ok(Self::new(values))
    }

    /// Parse a JSON document holding a template, e.g. a descriptor file.
    pub fn parse_json(raw: &str) -> Result<Self, TemplateError> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| TemplateError::Malformed(e.to_string()))?;
        Self::from_json(&value)
    }

    /// Little-endian `f32` encoding used at rest.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    pub fn from_le_bytes(bytes: &[u8]) -> Result<Self, TemplateError> {
        if bytes.is_empty() {
            return Err(TemplateError::Empty);
        }
        if bytes.len() % 4 != 0 {
            return Err(TemplateError::BadByteLength(bytes.len()));
        }
        let values = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(Self::new(values))
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance() {
        let a = FaceTemplate::new(vec![0.0, 0.0]);
        let b = FaceTemplate::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
        assert_eq!(a.euclidean_distance(&a), 0.0);
    }

    #[test]
    fn test_mismatched_length_is_infinitely_far() {
        let a = FaceTemplate::new(vec![0.0, 0.0]);
        let b = FaceTemplate::new(vec![0.0, 0.0, 0.0]);
        assert_eq!(a.euclidean_distance(&b), f32::INFINITY);
    }

    #[test]
    fn test_validate_dimension() {
        let t = FaceTemplate::new(vec![0.1; 4]);
        assert!(t.validate(4).is_ok());
        assert_eq!(
            t.validate(128),
            Err(TemplateError::WrongDimension { expected: 128, actual: 4 })
        );
        assert_eq!(FaceTemplate::new(vec![]).validate(4), Err(TemplateError::Empty));
    }

    #[test]
    fn test_validate_rejects_non_finite() {
        let t = FaceTemplate::new(vec![0.1, f32::NAN, 0.3]);
        assert_eq!(t.validate(3), Err(TemplateError::NonFinite(1)));
    }

    #[test]
    fn test_parse_json_rejects_placeholders() {
        for raw in ["\"sample_embedding_1\"", "[0.1, \"x\"]", "[[0.1], [0.2]]", "{}", "null"] {
            assert!(
                matches!(FaceTemplate::parse_json(raw), Err(TemplateError::Malformed(_))),
                "{raw} should be rejected"
            );
        }
        assert!(matches!(
            FaceTemplate::parse_json("[0.1,"),
            Err(TemplateError::Malformed(_))
        ));
        assert_eq!(FaceTemplate::parse_json("[]"), Err(TemplateError::Empty));
    }

    #[test]
    fn test_parse_json_accepts_numbers() {
        let t = FaceTemplate::parse_json("[0.5, -0.25, 1]").unwrap();
        assert_eq!(t.values, vec![0.5, -0.25, 1.0]);
    }

    #[test]
    fn test_from_json_rejects_out_of_range() {
        let value = serde_json::json!([0.1, 1e300]);
        assert_eq!(FaceTemplate::from_json(&value), Err(TemplateError::NonFinite(1)));
    }

    #[test]
    fn test_le_bytes() {
        let t = FaceTemplate::new(vec![1.5, -2.0, 0.0]);
        let bytes = t.to_le_bytes();
        assert_eq!(bytes.len(), 12);
        assert_eq!(FaceTemplate::from_le_bytes(&bytes).unwrap(), t);
        assert_eq!(
            FaceTemplate::from_le_bytes(&bytes[..5]),
            Err(TemplateError::BadByteLength(5))
        );
    }
}
