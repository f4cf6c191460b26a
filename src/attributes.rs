use std::collections::HashMap;

use derive_more::From;
use serde::{Deserialize, Serialize};

use crate::Str;

/// Type alias for a HashMap representing key-value pairs of attributes.
///
/// Keys are strings representing attribute names.
///
/// # Examples
/// ```
/// # use eppo_client::{Attributes, AttributeValue};
/// let attributes = [
///     ("age".to_owned(), 30.0.into()),
///     ("is_premium_member".to_owned(), true.into()),
///     ("username".to_owned(), "john_doe".into()),
/// ].into_iter().collect::<Attributes>();
/// ```
pub type Attributes = HashMap<String, AttributeValue>;

/// Enum representing possible values of an attribute for a subject.
///
/// Conveniently implements `From` conversions for `String`, `&str`, `f64`, and `bool` types.
///
/// Examples:
/// ```
/// # use eppo_client::AttributeValue;
/// let string_attr: AttributeValue = "example".into();
/// let number_attr: AttributeValue = 42.0.into();
/// let bool_attr: AttributeValue = true.into();
/// ```
#[derive(Debug, Serialize, Deserialize, PartialEq, PartialOrd, From, Clone)]
#[serde(untagged)]
pub enum AttributeValue {
    /// A string value.
    String(String),
    /// A numerical value.
    Number(f64),
    /// A boolean value.
    Boolean(bool),
    /// A null value or absence of value.
    Null,
}

impl AttributeValue {
    /// Return the string value, if this is a string attribute.
    pub fn as_str(&self) -> Option<&str> {
        if let AttributeValue::String(s) = self {
            Some(s.as_str())
        } else {
            None
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

/// `ContextAttributes` are subject attributes split by their semantics. This is the shape the
/// precomputed assignments endpoint expects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextAttributes {
    /// Numeric attributes are quantitative (e.g., real numbers) and define a scale.
    #[serde(rename = "numericAttributes", alias = "numeric", default)]
    pub numeric: HashMap<String, f64>,
    /// Categorical attributes are attributes that have a finite set of values that are not directly
    /// comparable (i.e., enumeration).
    #[serde(rename = "categoricalAttributes", alias = "categorical", default)]
    pub categorical: HashMap<String, Str>,
}

impl From<&Attributes> for ContextAttributes {
    fn from(value: &Attributes) -> Self {
        value
            .iter()
            .fold(ContextAttributes::default(), |mut acc, (key, value)| {
                match value {
                    AttributeValue::String(value) => {
                        acc.categorical.insert(key.clone(), value.into());
                    }
                    AttributeValue::Number(value) => {
                        acc.numeric.insert(key.clone(), *value);
                    }
                    AttributeValue::Boolean(value) => {
                        acc.categorical.insert(
                            key.clone(),
                            Str::from(if *value { "true" } else { "false" }),
                        );
                    }
                    AttributeValue::Null => {
                        // Nulls are missing values and are ignored.
                    }
                }
                acc
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_attributes_by_kind() {
        let attributes: Attributes = [
            ("age".to_owned(), 30.0.into()),
            ("country".to_owned(), "US".into()),
            ("premium".to_owned(), true.into()),
            ("missing".to_owned(), AttributeValue::Null),
        ]
        .into_iter()
        .collect();

        let context = ContextAttributes::from(&attributes);

        assert_eq!(context.numeric.get("age"), Some(&30.0));
        assert_eq!(context.categorical.get("country").map(|s| s.as_str()), Some("US"));
        assert_eq!(context.categorical.get("premium").map(|s| s.as_str()), Some("true"));
        assert!(!context.categorical.contains_key("missing"));
    }

    #[test]
    fn serializes_with_wire_field_names() {
        let context = ContextAttributes {
            numeric: [("age".to_owned(), 30.0)].into_iter().collect(),
            categorical: HashMap::new(),
        };
        assert_eq!(
            serde_json::to_string(&context).unwrap(),
            r#"{"numericAttributes":{"age":30.0},"categoricalAttributes":{}}"#
        );
    }
}
