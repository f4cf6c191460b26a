//! Protocol buffers encoding of flag configuration.
//!
//! Messages are declared with `prost` derives; `schema/flag_config.proto` holds the equivalent
//! `.proto` definition.
use std::collections::HashMap;

use chrono::DateTime;
use prost::Message;

use super::{DecodeError, FlagSource};
use crate::{
    ufc::{
        Allocation, Condition, ConditionOperator, ConditionValue, Flag, Rule, Shard, ShardRange,
        Split, Timestamp, Value, Variation, VariationType,
    },
    Str,
};

#[derive(Clone, PartialEq, Message)]
pub struct UniversalFlagConfigProto {
    #[prost(int64, optional, tag = "1")]
    pub created_at_ms: Option<i64>,
    #[prost(string, optional, tag = "2")]
    pub environment: Option<String>,
    #[prost(message, repeated, tag = "3")]
    pub flags: Vec<FlagProto>,
}

#[derive(Clone, PartialEq, Message)]
pub struct FlagProto {
    #[prost(string, tag = "1")]
    pub key: String,
    #[prost(bool, tag = "2")]
    pub enabled: bool,
    #[prost(int32, tag = "3")]
    pub variation_type: i32,
    #[prost(message, repeated, tag = "4")]
    pub variations: Vec<VariationProto>,
    #[prost(message, repeated, tag = "5")]
    pub allocations: Vec<AllocationProto>,
    #[prost(uint32, tag = "6")]
    pub total_shards: u32,
    #[prost(int64, optional, tag = "7")]
    pub entity_id: Option<i64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct VariationProto {
    #[prost(string, tag = "1")]
    pub key: String,
    #[prost(message, optional, tag = "2")]
    pub value: Option<ValueProto>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ValueProto {
    #[prost(oneof = "value_proto::Kind", tags = "1, 2, 3")]
    pub kind: Option<value_proto::Kind>,
}

pub mod value_proto {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Kind {
        #[prost(bool, tag = "1")]
        Boolean(bool),
        #[prost(double, tag = "2")]
        Number(f64),
        #[prost(string, tag = "3")]
        String(String),
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct AllocationProto {
    #[prost(string, tag = "1")]
    pub key: String,
    #[prost(message, repeated, tag = "2")]
    pub rules: Vec<RuleProto>,
    #[prost(int64, optional, tag = "3")]
    pub start_at_ms: Option<i64>,
    #[prost(int64, optional, tag = "4")]
    pub end_at_ms: Option<i64>,
    #[prost(message, repeated, tag = "5")]
    pub splits: Vec<SplitProto>,
    /// Absent means `true`.
    #[prost(bool, optional, tag = "6")]
    pub do_log: Option<bool>,
}

#[derive(Clone, PartialEq, Message)]
pub struct RuleProto {
    #[prost(message, repeated, tag = "1")]
    pub conditions: Vec<ConditionProto>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ConditionProto {
    #[prost(string, tag = "1")]
    pub attribute: String,
    #[prost(int32, tag = "2")]
    pub operator: i32,
    #[prost(message, optional, tag = "3")]
    pub value: Option<ConditionValueProto>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ConditionValueProto {
    #[prost(oneof = "condition_value_proto::Kind", tags = "1, 2")]
    pub kind: Option<condition_value_proto::Kind>,
}

pub mod condition_value_proto {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Kind {
        #[prost(message, tag = "1")]
        Single(super::ValueProto),
        #[prost(message, tag = "2")]
        Multiple(super::StringListProto),
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct StringListProto {
    #[prost(string, repeated, tag = "1")]
    pub values: Vec<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SplitProto {
    #[prost(string, tag = "1")]
    pub variation_key: String,
    #[prost(message, repeated, tag = "2")]
    pub shards: Vec<ShardProto>,
    #[prost(map = "string, string", tag = "3")]
    pub extra_logging: HashMap<String, String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ShardProto {
    #[prost(string, tag = "1")]
    pub salt: String,
    #[prost(message, repeated, tag = "2")]
    pub ranges: Vec<ShardRangeProto>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ShardRangeProto {
    #[prost(uint32, tag = "1")]
    pub start: u32,
    #[prost(uint32, tag = "2")]
    pub end: u32,
}

/// Protobuf-encoded configuration. The message is parsed upfront; conversion into [`Flag`]
/// happens per flag.
#[derive(Debug)]
pub struct ProtobufFlagSource {
    config: UniversalFlagConfigProto,
    created_at: Option<Timestamp>,
    index: HashMap<Str, usize>,
}

impl ProtobufFlagSource {
    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<ProtobufFlagSource, DecodeError> {
        let config = UniversalFlagConfigProto::decode(bytes)
            .map_err(|err| DecodeError::InvalidProtobuf(err.to_string()))?;
        let created_at = config.created_at_ms.map(timestamp_from_ms).transpose()?;
        let index = config
            .flags
            .iter()
            .enumerate()
            .map(|(i, flag)| (Str::from(flag.key.as_str()), i))
            .collect();
        Ok(ProtobufFlagSource {
            config,
            created_at,
            index,
        })
    }
}

impl FlagSource for ProtobufFlagSource {
    fn flag_count(&self) -> usize {
        self.index.len()
    }

    fn flag_keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.index.keys().map(|key| key.as_str())
    }

    fn decode_flag(&self, key: &str) -> Option<Result<Flag, DecodeError>> {
        let position = *self.index.get(key)?;
        Some(Flag::try_from(&self.config.flags[position]))
    }

    fn created_at(&self) -> Option<Timestamp> {
        self.created_at
    }

    fn environment(&self) -> Option<&str> {
        self.config.environment.as_deref()
    }
}

fn timestamp_from_ms(ms: i64) -> Result<Timestamp, DecodeError> {
    DateTime::from_timestamp_millis(ms).ok_or(DecodeError::InvalidTimestamp(ms))
}

impl TryFrom<&FlagProto> for Flag {
    type Error = DecodeError;

    fn try_from(proto: &FlagProto) -> Result<Flag, DecodeError> {
        let variation_type = VariationType::from_wire_id(proto.variation_type)
            .ok_or(DecodeError::UnknownVariationType(proto.variation_type))?;

        let variations = proto
            .variations
            .iter()
            .map(|variation| {
                let value = variation
                    .value
                    .as_ref()
                    .ok_or(DecodeError::MissingField("variation.value"))?;
                let variation = Variation {
                    key: variation.key.as_str().into(),
                    value: Value::try_from(value)?,
                };
                Ok((variation.key.clone(), variation))
            })
            .collect::<Result<_, DecodeError>>()?;

        let allocations = proto
            .allocations
            .iter()
            .map(Allocation::try_from)
            .collect::<Result<_, _>>()?;

        Ok(Flag {
            key: proto.key.as_str().into(),
            enabled: proto.enabled,
            variation_type,
            variations,
            allocations,
            total_shards: proto.total_shards,
            entity_id: proto.entity_id,
        })
    }
}

impl TryFrom<&ValueProto> for Value {
    type Error = DecodeError;

    fn try_from(proto: &ValueProto) -> Result<Value, DecodeError> {
        Ok(match &proto.kind {
            Some(value_proto::Kind::Boolean(b)) => Value::Boolean(*b),
            Some(value_proto::Kind::Number(n)) => Value::Number(*n),
            Some(value_proto::Kind::String(s)) => Value::String(s.as_str().into()),
            None => return Err(DecodeError::MissingField("value.kind")),
        })
    }
}

impl TryFrom<&AllocationProto> for Allocation {
    type Error = DecodeError;

    fn try_from(proto: &AllocationProto) -> Result<Allocation, DecodeError> {
        let rules = proto
            .rules
            .iter()
            .map(|rule| {
                let conditions = rule
                    .conditions
                    .iter()
                    .map(Condition::try_from)
                    .collect::<Result<_, _>>()?;
                Ok(Rule { conditions })
            })
            .collect::<Result<_, DecodeError>>()?;

        Ok(Allocation {
            key: proto.key.as_str().into(),
            rules,
            start_at: proto.start_at_ms.map(timestamp_from_ms).transpose()?,
            end_at: proto.end_at_ms.map(timestamp_from_ms).transpose()?,
            splits: proto.splits.iter().map(Split::from).collect(),
            do_log: proto.do_log.unwrap_or(true),
        })
    }
}

impl TryFrom<&ConditionProto> for Condition {
    type Error = DecodeError;

    fn try_from(proto: &ConditionProto) -> Result<Condition, DecodeError> {
        let value = match proto.value.as_ref().and_then(|v| v.kind.as_ref()) {
            Some(condition_value_proto::Kind::Single(value)) => {
                ConditionValue::Single(Value::try_from(value)?)
            }
            Some(condition_value_proto::Kind::Multiple(list)) => {
                ConditionValue::Multiple(list.values.clone())
            }
            None => return Err(DecodeError::MissingField("condition.value")),
        };
        Ok(Condition {
            attribute: proto.attribute.clone(),
            operator: ConditionOperator::from_wire_id(proto.operator),
            value,
        })
    }
}

impl From<&SplitProto> for Split {
    fn from(proto: &SplitProto) -> Split {
        Split {
            variation_key: proto.variation_key.as_str().into(),
            shards: proto
                .shards
                .iter()
                .map(|shard| Shard {
                    salt: shard.salt.clone(),
                    ranges: shard
                        .ranges
                        .iter()
                        .map(|range| ShardRange {
                            start: range.start,
                            end: range.end,
                        })
                        .collect(),
                })
                .collect(),
            extra_logging: proto.extra_logging.clone(),
        }
    }
}

impl From<&Value> for ValueProto {
    fn from(value: &Value) -> ValueProto {
        ValueProto {
            kind: Some(match value {
                Value::Boolean(b) => value_proto::Kind::Boolean(*b),
                Value::Number(n) => value_proto::Kind::Number(*n),
                Value::String(s) => value_proto::Kind::String(s.to_string()),
            }),
        }
    }
}

impl From<&Flag> for FlagProto {
    fn from(flag: &Flag) -> FlagProto {
        FlagProto {
            key: flag.key.to_string(),
            enabled: flag.enabled,
            variation_type: flag.variation_type.wire_id(),
            variations: flag
                .variations
                .values()
                .map(|variation| VariationProto {
                    key: variation.key.to_string(),
                    value: Some(ValueProto::from(&variation.value)),
                })
                .collect(),
            allocations: flag.allocations.iter().map(AllocationProto::from).collect(),
            total_shards: flag.total_shards,
            entity_id: flag.entity_id,
        }
    }
}

impl From<&Allocation> for AllocationProto {
    fn from(allocation: &Allocation) -> AllocationProto {
        AllocationProto {
            key: allocation.key.to_string(),
            rules: allocation
                .rules
                .iter()
                .map(|rule| RuleProto {
                    conditions: rule
                        .conditions
                        .iter()
                        .map(|condition| ConditionProto {
                            attribute: condition.attribute.clone(),
                            operator: condition.operator.wire_id(),
                            value: Some(ConditionValueProto {
                                kind: Some(match &condition.value {
                                    ConditionValue::Single(value) => {
                                        condition_value_proto::Kind::Single(value.into())
                                    }
                                    ConditionValue::Multiple(values) => {
                                        condition_value_proto::Kind::Multiple(StringListProto {
                                            values: values.clone(),
                                        })
                                    }
                                }),
                            }),
                        })
                        .collect(),
                })
                .collect(),
            start_at_ms: allocation.start_at.map(|t| t.timestamp_millis()),
            end_at_ms: allocation.end_at.map(|t| t.timestamp_millis()),
            splits: allocation
                .splits
                .iter()
                .map(|split| SplitProto {
                    variation_key: split.variation_key.to_string(),
                    shards: split
                        .shards
                        .iter()
                        .map(|shard| ShardProto {
                            salt: shard.salt.clone(),
                            ranges: shard
                                .ranges
                                .iter()
                                .map(|range| ShardRangeProto {
                                    start: range.start,
                                    end: range.end,
                                })
                                .collect(),
                        })
                        .collect(),
                    extra_logging: split.extra_logging.clone(),
                })
                .collect(),
            do_log: Some(allocation.do_log),
        }
    }
}

/// Encode flags as a protobuf configuration.
pub fn encode_protobuf(
    created_at: Option<Timestamp>,
    environment: Option<&str>,
    flags: &[Flag],
) -> Vec<u8> {
    UniversalFlagConfigProto {
        created_at_ms: created_at.map(|t| t.timestamp_millis()),
        environment: environment.map(str::to_owned),
        flags: flags.iter().map(FlagProto::from).collect(),
    }
    .encode_to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flag_proto() -> FlagProto {
        FlagProto {
            key: "kill-switch".into(),
            enabled: true,
            variation_type: VariationType::Boolean.wire_id(),
            variations: vec![VariationProto {
                key: "on".into(),
                value: Some(ValueProto {
                    kind: Some(value_proto::Kind::Boolean(true)),
                }),
            }],
            allocations: vec![AllocationProto {
                key: "everyone".into(),
                rules: vec![RuleProto {
                    conditions: vec![ConditionProto {
                        attribute: "plan".into(),
                        operator: 99,
                        value: Some(ConditionValueProto {
                            kind: Some(condition_value_proto::Kind::Single(ValueProto {
                                kind: Some(value_proto::Kind::String("pro".into())),
                            })),
                        }),
                    }],
                }],
                start_at_ms: None,
                end_at_ms: None,
                splits: vec![],
                do_log: None,
            }],
            total_shards: 10000,
            entity_id: None,
        }
    }

    #[test]
    fn unknown_operator_id_is_unrecognized() {
        let flag = Flag::try_from(&flag_proto()).unwrap();
        assert_eq!(
            flag.allocations[0].rules[0].conditions[0].operator,
            ConditionOperator::Unrecognized
        );
    }

    #[test]
    fn absent_do_log_defaults_to_true() {
        let flag = Flag::try_from(&flag_proto()).unwrap();
        assert!(flag.allocations[0].do_log);
    }

    #[test]
    fn unknown_variation_type_fails_flag() {
        let proto = FlagProto {
            variation_type: 17,
            ..flag_proto()
        };
        assert_eq!(
            Flag::try_from(&proto),
            Err(DecodeError::UnknownVariationType(17))
        );
    }

    #[test]
    fn missing_variation_value_fails_flag() {
        let mut proto = flag_proto();
        proto.variations[0].value = None;
        assert_eq!(
            Flag::try_from(&proto),
            Err(DecodeError::MissingField("variation.value"))
        );
    }

    #[test]
    fn source_indexes_flags_by_key() {
        let bytes = UniversalFlagConfigProto {
            created_at_ms: Some(1_713_382_853_716),
            environment: Some("Production".into()),
            flags: vec![flag_proto()],
        }
        .encode_to_vec();

        let source = ProtobufFlagSource::from_bytes(&bytes).unwrap();
        assert_eq!(source.flag_count(), 1);
        assert_eq!(source.environment(), Some("Production"));
        assert_eq!(
            source.created_at().map(|t| t.timestamp_millis()),
            Some(1_713_382_853_716)
        );
        assert!(source.decode_flag("kill-switch").unwrap().is_ok());
        assert!(source.decode_flag("other").is_none());
    }
}
