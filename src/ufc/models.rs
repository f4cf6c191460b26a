use std::collections::HashMap;

use derive_more::From;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::AssignmentValue;
use crate::Str;

#[allow(missing_docs)]
pub type Timestamp = chrono::DateTime<chrono::Utc>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    /// Name of the environment.
    pub name: Str,
}

/// Canonical flag configuration. Every wire format decodes into this representation, so two
/// decoders given the same configuration must produce equal `Flag`s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Flag {
    pub key: Str,
    pub enabled: bool,
    pub variation_type: VariationType,
    pub variations: HashMap<Str, Variation>,
    pub allocations: Vec<Allocation>,
    pub total_shards: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<i64>,
}

/// Type of the variation.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum VariationType {
    String,
    Integer,
    Numeric,
    Boolean,
    Json,
}

impl VariationType {
    /// Numeric id used by the binary wire formats.
    pub fn wire_id(self) -> i32 {
        match self {
            VariationType::String => 1,
            VariationType::Integer => 2,
            VariationType::Numeric => 3,
            VariationType::Boolean => 4,
            VariationType::Json => 5,
        }
    }

    /// Inverse of [`VariationType::wire_id`].
    pub fn from_wire_id(id: i32) -> Option<VariationType> {
        Some(match id {
            1 => VariationType::String,
            2 => VariationType::Integer,
            3 => VariationType::Numeric,
            4 => VariationType::Boolean,
            5 => VariationType::Json,
            _ => return None,
        })
    }
}

/// Variation or condition value as it appears on the wire.
///
/// The wire does not say whether `3` is an integer or a float, or whether a string holds JSON.
/// That is decided by the flag's [`VariationType`] in [`Value::to_assignment_value`].
#[derive(Debug, Serialize, Deserialize, PartialEq, From, Clone)]
#[serde(untagged)]
pub enum Value {
    #[allow(missing_docs)]
    Boolean(bool),
    #[allow(missing_docs)]
    Number(f64),
    /// Plain string, or serialized JSON for `JSON` flags.
    String(Str),
}

impl Value {
    /// Read the value under the flag's declared type. `None` when the two disagree, including
    /// fractional numbers on `INTEGER` flags and strings that are not valid JSON on `JSON` flags.
    pub(crate) fn to_assignment_value(&self, ty: VariationType) -> Option<AssignmentValue> {
        match (ty, self) {
            (VariationType::String, Value::String(s)) => Some(AssignmentValue::String(s.clone())),
            (VariationType::Boolean, Value::Boolean(b)) => Some(AssignmentValue::Boolean(*b)),
            (VariationType::Numeric, Value::Number(n)) => Some(AssignmentValue::Numeric(*n)),
            (VariationType::Integer, Value::Number(n)) => {
                let truncated = *n as i64;
                (truncated as f64 == *n).then_some(AssignmentValue::Integer(truncated))
            }
            (VariationType::Json, Value::String(s)) => serde_json::from_str(s)
                .ok()
                .map(|json: serde_json::Value| AssignmentValue::Json(json.into())),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.into())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Variation {
    pub key: Str,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Allocation {
    pub key: Str,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub start_at: Option<Timestamp>,
    #[serde(default)]
    pub end_at: Option<Timestamp>,
    pub splits: Vec<Split>,
    #[serde(default = "default_do_log")]
    pub do_log: bool,
}

fn default_do_log() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, From)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Rule {
    pub conditions: Vec<Condition>,
}

/// Single test of a subject attribute against `value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Condition {
    pub operator: ConditionOperator,
    pub attribute: String,
    pub value: ConditionValue,
}

/// Condition operators.
///
/// Ordered comparisons (`GT`, `GTE`, `LT`, `LTE`) compare semantic versions when the condition
/// value parses as one, and numbers otherwise. An absent attribute never satisfies anything but
/// `IS_NULL`, so `NOT_ONE_OF` and `NOT_MATCHES` are false for it too.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[allow(missing_docs)]
pub enum ConditionOperator {
    /// Regex search against a string attribute.
    Matches,
    NotMatches,
    Gte,
    Gt,
    Lte,
    Lt,
    /// Case-sensitive membership in a list of strings.
    OneOf,
    NotOneOf,
    /// Condition value `true` requires the attribute to be absent or null, `false` requires it
    /// to be present.
    IsNull,
    /// Operator this version doesn't know about. Never matches.
    Unrecognized,
}

impl ConditionOperator {
    /// Wire name of the operator.
    pub fn as_str(self) -> &'static str {
        match self {
            ConditionOperator::Matches => "MATCHES",
            ConditionOperator::NotMatches => "NOT_MATCHES",
            ConditionOperator::Gte => "GTE",
            ConditionOperator::Gt => "GT",
            ConditionOperator::Lte => "LTE",
            ConditionOperator::Lt => "LT",
            ConditionOperator::OneOf => "ONE_OF",
            ConditionOperator::NotOneOf => "NOT_ONE_OF",
            ConditionOperator::IsNull => "IS_NULL",
            ConditionOperator::Unrecognized => "UNRECOGNIZED",
        }
    }

    /// Parse a wire name. Unknown names map to [`ConditionOperator::Unrecognized`].
    pub fn from_name(name: &str) -> ConditionOperator {
        match name {
            "MATCHES" => ConditionOperator::Matches,
            "NOT_MATCHES" => ConditionOperator::NotMatches,
            "GTE" => ConditionOperator::Gte,
            "GT" => ConditionOperator::Gt,
            "LTE" => ConditionOperator::Lte,
            "LT" => ConditionOperator::Lt,
            "ONE_OF" => ConditionOperator::OneOf,
            "NOT_ONE_OF" => ConditionOperator::NotOneOf,
            "IS_NULL" => ConditionOperator::IsNull,
            _ => ConditionOperator::Unrecognized,
        }
    }

    /// Numeric id used by the binary wire formats. `0` is never a valid operator.
    pub fn wire_id(self) -> i32 {
        match self {
            ConditionOperator::Matches => 1,
            ConditionOperator::NotMatches => 2,
            ConditionOperator::Gte => 3,
            ConditionOperator::Gt => 4,
            ConditionOperator::Lte => 5,
            ConditionOperator::Lt => 6,
            ConditionOperator::OneOf => 7,
            ConditionOperator::NotOneOf => 8,
            ConditionOperator::IsNull => 9,
            ConditionOperator::Unrecognized => 0,
        }
    }

    /// Inverse of [`ConditionOperator::wire_id`]. Unknown ids map to
    /// [`ConditionOperator::Unrecognized`].
    pub fn from_wire_id(id: i32) -> ConditionOperator {
        match id {
            1 => ConditionOperator::Matches,
            2 => ConditionOperator::NotMatches,
            3 => ConditionOperator::Gte,
            4 => ConditionOperator::Gt,
            5 => ConditionOperator::Lte,
            6 => ConditionOperator::Lt,
            7 => ConditionOperator::OneOf,
            8 => ConditionOperator::NotOneOf,
            9 => ConditionOperator::IsNull,
            _ => ConditionOperator::Unrecognized,
        }
    }
}

impl Serialize for ConditionOperator {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ConditionOperator {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(ConditionOperator::from_name(&name))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
#[allow(missing_docs)]
pub enum ConditionValue {
    Single(Value),
    // Only string arrays are currently supported.
    Multiple(Vec<String>),
}

impl<T: Into<Value>> From<T> for ConditionValue {
    fn from(value: T) -> Self {
        Self::Single(value.into())
    }
}
impl From<Vec<String>> for ConditionValue {
    fn from(value: Vec<String>) -> Self {
        Self::Multiple(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Split {
    #[serde(default)]
    pub shards: Vec<Shard>,
    pub variation_key: Str,
    #[serde(default)]
    pub extra_logging: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Shard {
    pub salt: String,
    pub ranges: Vec<ShardRange>,
}

/// Half-open range of shards `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct ShardRange {
    pub start: u32,
    pub end: u32,
}
impl ShardRange {
    pub(crate) fn contains(&self, v: u32) -> bool {
        self.start <= v && v < self.end
    }
}
