//! Points: one stored vector plus its metadata payload.
//!
//! Points are persisted one file per point so queries can load them lazily.
//! JSON `null` elements inside a vector deserialize to NaN instead of failing
//! the whole file, which lets write-time validation reject the point with an
//! error that names the offending id and element.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::store::payload::Payload;

/// One entity in a collection: a string id, a fixed-length vector, and a
/// schema-open payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Point {
    pub id: String,

    #[serde(deserialize_with = "vector_allowing_null")]
    pub vector: Vec<f32>,

    #[serde(default)]
    pub payload: Payload,
}

/// Deserializes a vector where `null` elements become NaN.
///
/// Validation later rejects non-finite elements by position, which gives a
/// far better error than serde's generic "invalid type: null".
fn vector_allowing_null<'de, D>(deserializer: D) -> Result<Vec<f32>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<Option<f32>> = Vec::deserialize(deserializer)?;
    Ok(raw.into_iter().map(|v| v.unwrap_or(f32::NAN)).collect())
}

impl Point {
    /// Creates a point with an empty payload.
    pub fn new(id: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            vector,
            payload: Payload::new(),
        }
    }

    /// Creates a point with a payload.
    pub fn with_payload(id: impl Into<String>, vector: Vec<f32>, payload: Payload) -> Self {
        Self {
            id: id.into(),
            vector,
            payload,
        }
    }

    /// Validates the vector against a collection's dimension.
    ///
    /// Checks the dimension first, then every element for finiteness. The
    /// returned error names this point's id and, for a bad element, its
    /// position in the vector.
    pub fn validate(&self, collection: &str, expected_dim: usize) -> StoreResult<()> {
        if self.vector.len() != expected_dim {
            return Err(StoreError::DimensionMismatch {
                id: self.id.clone(),
                collection: collection.to_string(),
                expected: expected_dim,
                actual: self.vector.len(),
            });
        }

        for (i, value) in self.vector.iter().enumerate() {
            if !value.is_finite() {
                return Err(StoreError::InvalidVectorElement {
                    id: self.id.clone(),
                    element: i,
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_point_passes() {
        let point = Point::new("p1", vec![1.0, 0.0, 0.0, 0.0]);
        assert!(point.validate("code", 4).is_ok());
    }

    #[test]
    fn test_dimension_mismatch_names_point() {
        let point = Point::new("p1", vec![1.0, 0.0]);
        let err = point.validate("code", 4).unwrap_err();
        assert!(err.to_string().contains("p1"));
        assert!(matches!(
            err,
            StoreError::DimensionMismatch {
                expected: 4,
                actual: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_null_element_deserializes_to_nan_and_fails_validation() {
        let json = json!({
            "id": "bad",
            "vector": [1.0, null, 0.0, 0.0],
            "payload": {}
        });

        let point: Point = serde_json::from_value(json).unwrap();
        assert!(point.vector[1].is_nan());

        let err = point.validate("code", 4).unwrap_err();
        assert!(err.to_string().contains("bad"));
        assert!(matches!(
            err,
            StoreError::InvalidVectorElement { element: 1, .. }
        ));
    }

    #[test]
    fn test_infinity_rejected() {
        let point = Point::new("inf", vec![1.0, f32::INFINITY, 0.0, 0.0]);
        assert!(matches!(
            point.validate("code", 4).unwrap_err(),
            StoreError::InvalidVectorElement { element: 1, .. }
        ));
    }

    #[test]
    fn test_serde_roundtrip_preserves_payload() {
        let mut payload = Payload::new();
        payload.insert("language".to_string(), json!("rust"));
        payload.insert("line_start".to_string(), json!(10));

        let point = Point::with_payload("p1", vec![0.5, 0.5], payload);
        let json = serde_json::to_string(&point).unwrap();
        let back: Point = serde_json::from_str(&json).unwrap();

        assert_eq!(back, point);
    }
}
