use std::cmp::Ordering;

use regex::Regex;
use semver::Version;

use crate::{
    ufc::{Condition, ConditionOperator, ConditionValue, Rule, Value},
    AttributeValue, Attributes,
};

impl Rule {
    /// A rule matches when every one of its conditions matches. An empty rule always matches.
    pub(crate) fn eval(&self, attributes: &Attributes) -> bool {
        self.conditions
            .iter()
            .all(|condition| condition.eval(attributes))
    }
}

impl Condition {
    fn eval(&self, attributes: &Attributes) -> bool {
        self.operator
            .eval(attributes.get(&self.attribute), &self.value)
    }
}

impl ConditionOperator {
    /// Apply the operator to an attribute. Misconfigured conditions and attributes of the wrong
    /// kind never match.
    fn eval(&self, attribute: Option<&AttributeValue>, condition_value: &ConditionValue) -> bool {
        let outcome = match self {
            Self::Matches => regex_matches(attribute, condition_value),
            Self::NotMatches => regex_matches(attribute, condition_value).map(|m| !m),
            Self::OneOf => one_of(attribute, condition_value),
            Self::NotOneOf => one_of(attribute, condition_value).map(|m| !m),
            Self::IsNull => is_null(attribute, condition_value),
            Self::Gt => compare(attribute, condition_value).map(Ordering::is_gt),
            Self::Gte => compare(attribute, condition_value).map(Ordering::is_ge),
            Self::Lt => compare(attribute, condition_value).map(Ordering::is_lt),
            Self::Lte => compare(attribute, condition_value).map(Ordering::is_le),
            Self::Unrecognized => None,
        };
        outcome.unwrap_or(false)
    }
}

fn regex_matches(
    attribute: Option<&AttributeValue>,
    condition_value: &ConditionValue,
) -> Option<bool> {
    let Some(AttributeValue::String(subject)) = attribute else {
        return None;
    };
    let ConditionValue::Single(Value::String(pattern)) = condition_value else {
        return None;
    };
    let regex = Regex::new(pattern).ok()?;
    Some(regex.is_match(subject))
}

/// Numbers and booleans are compared by their string form (`42`, `true`).
fn one_of(attribute: Option<&AttributeValue>, condition_value: &ConditionValue) -> Option<bool> {
    let ConditionValue::Multiple(candidates) = condition_value else {
        return None;
    };
    let needle = match attribute? {
        AttributeValue::String(s) => s.clone(),
        AttributeValue::Number(n) => n.to_string(),
        AttributeValue::Boolean(b) => b.to_string(),
        AttributeValue::Null => return None,
    };
    Some(candidates.iter().any(|candidate| *candidate == needle))
}

fn is_null(attribute: Option<&AttributeValue>, condition_value: &ConditionValue) -> Option<bool> {
    let ConditionValue::Single(Value::Boolean(expect_null)) = condition_value else {
        return None;
    };
    let absent = matches!(attribute, None | Some(AttributeValue::Null));
    Some(absent == *expect_null)
}

/// Order `attribute` against the condition value.
///
/// When the condition value parses as a semantic version, the attribute must be one too.
/// Otherwise both sides are read as numbers, accepting numeric strings.
fn compare(
    attribute: Option<&AttributeValue>,
    condition_value: &ConditionValue,
) -> Option<Ordering> {
    let ConditionValue::Single(expected) = condition_value else {
        return None;
    };

    if let Value::String(s) = expected {
        if let Ok(expected_version) = Version::parse(s) {
            let AttributeValue::String(actual) = attribute? else {
                return None;
            };
            let actual_version = Version::parse(actual).ok()?;
            return Some(actual_version.cmp(&expected_version));
        }
    }

    let expected = match expected {
        Value::Number(n) => *n,
        Value::String(s) => s.parse::<f64>().ok()?,
        Value::Boolean(_) => return None,
    };
    let actual = match attribute? {
        AttributeValue::Number(n) => *n,
        AttributeValue::String(s) => s.parse::<f64>().ok()?,
        _ => return None,
    };
    actual.partial_cmp(&expected)
}
