use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{ufc::VariationType, Str};

/// Enum representing values assigned to a subject as a result of feature flag evaluation.
///
/// # Serialization
///
/// When serialized to JSON, serialized as a two-field object with `type` and `value`. Type is one
/// of "STRING", "INTEGER", "NUMERIC", "BOOLEAN", or "JSON". Value is either string, number,
/// boolean, or arbitrary JSON value.
///
/// Example:
/// ```json
/// {"type":"JSON","value":{"hello":"world"}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentValue {
    /// A string value.
    String(Str),
    /// An integer value.
    Integer(i64),
    /// A numeric value (floating-point).
    Numeric(f64),
    /// A boolean value.
    Boolean(bool),
    /// Arbitrary JSON value.
    Json(Arc<serde_json::Value>),
}

impl AssignmentValue {
    /// Returns the assignment value as a string if it is of type String.
    ///
    /// # Examples
    /// ```
    /// # use eppo_client::ufc::AssignmentValue;
    /// let value = AssignmentValue::String("example".into());
    /// assert_eq!(value.as_str(), Some("example"));
    /// ```
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AssignmentValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the assignment value as an integer if it is of type Integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            AssignmentValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the assignment value as a float if it is of type Numeric.
    pub fn as_numeric(&self) -> Option<f64> {
        match self {
            AssignmentValue::Numeric(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the assignment value as a boolean if it is of type Boolean.
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            AssignmentValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the assignment value as JSON if it is of type Json.
    pub fn as_json(&self) -> Option<&Arc<serde_json::Value>> {
        match self {
            AssignmentValue::Json(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the variation type this value belongs to.
    pub fn variation_type(&self) -> VariationType {
        match self {
            AssignmentValue::String(_) => VariationType::String,
            AssignmentValue::Integer(_) => VariationType::Integer,
            AssignmentValue::Numeric(_) => VariationType::Numeric,
            AssignmentValue::Boolean(_) => VariationType::Boolean,
            AssignmentValue::Json(_) => VariationType::Json,
        }
    }
}
