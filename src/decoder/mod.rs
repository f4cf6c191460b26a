//! Flag configuration decoding.
//!
//! A [`ConfigDecoder`] wraps one of the supported wire encodings and converts individual flags
//! into the canonical [`Flag`] model, either eagerly at construction
//! ([`Materialization::Prewarmed`]) or on first access ([`Materialization::Lazy`]).
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, PoisonError, RwLock},
};

use serde::{Deserialize, Serialize};

use crate::{
    ufc::{Flag, Timestamp},
    Str,
};

mod flatbuffer;
mod json;
mod protobuf;

pub use flatbuffer::{encode_flatbuffer, FlatbufferFlagSource};
pub use json::JsonFlagSource;
pub use protobuf::{encode_protobuf, ProtobufFlagSource};

/// Wire encodings understood by [`ConfigDecoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// Universal Flag Configuration JSON.
    Json,
    /// Protocol buffers.
    Protobuf,
    /// Flatbuffers.
    Flatbuffer,
}

/// When flags get converted into the canonical model.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Materialization {
    /// Convert every flag when the decoder is created.
    Prewarmed,
    /// Convert flags on first access and cache the result.
    #[default]
    Lazy,
}

/// Errors that can occur while decoding flag configuration.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
#[allow(missing_docs)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("invalid protobuf: {0}")]
    InvalidProtobuf(String),
    #[error("invalid flatbuffer: {0}")]
    InvalidFlatbuffer(String),
    #[error("unknown variation type id: {0}")]
    UnknownVariationType(i32),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("timestamp out of range: {0}")]
    InvalidTimestamp(i64),
}

/// Outcome of converting a single flag. Failures are cached just like successes.
pub type DecodedFlag = Result<Arc<Flag>, DecodeError>;

/// Read access to flags stored in some wire encoding.
pub trait FlagSource {
    /// Number of flags in the configuration, including ones that fail to decode.
    fn flag_count(&self) -> usize;

    /// Keys of every flag in the configuration.
    fn flag_keys(&self) -> impl Iterator<Item = &str> + '_;

    /// Convert the flag stored under `key`. Returns `None` if there is no such flag.
    fn decode_flag(&self, key: &str) -> Option<Result<Flag, DecodeError>>;

    /// Time the configuration was published.
    fn created_at(&self) -> Option<Timestamp>;

    /// Name of the environment the configuration belongs to.
    fn environment(&self) -> Option<&str>;
}

/// The closed set of supported sources.
enum WireConfig {
    Json(JsonFlagSource),
    Protobuf(ProtobufFlagSource),
    Flatbuffer(FlatbufferFlagSource),
}

impl WireConfig {
    fn parse(format: WireFormat, bytes: &Arc<[u8]>) -> Result<WireConfig, DecodeError> {
        Ok(match format {
            WireFormat::Json => WireConfig::Json(JsonFlagSource::from_bytes(bytes)?),
            WireFormat::Protobuf => WireConfig::Protobuf(ProtobufFlagSource::from_bytes(bytes)?),
            WireFormat::Flatbuffer => {
                WireConfig::Flatbuffer(FlatbufferFlagSource::from_bytes(bytes.clone())?)
            }
        })
    }
}

macro_rules! dispatch {
    ($self:expr, $source:ident => $body:expr) => {
        match $self {
            WireConfig::Json($source) => $body,
            WireConfig::Protobuf($source) => $body,
            WireConfig::Flatbuffer($source) => $body,
        }
    };
}

impl FlagSource for WireConfig {
    fn flag_count(&self) -> usize {
        dispatch!(self, s => s.flag_count())
    }

    fn flag_keys(&self) -> impl Iterator<Item = &str> + '_ {
        let keys: Box<dyn Iterator<Item = &str> + '_> = match self {
            WireConfig::Json(s) => Box::new(s.flag_keys()),
            WireConfig::Protobuf(s) => Box::new(s.flag_keys()),
            WireConfig::Flatbuffer(s) => Box::new(s.flag_keys()),
        };
        keys
    }

    fn decode_flag(&self, key: &str) -> Option<Result<Flag, DecodeError>> {
        dispatch!(self, s => s.decode_flag(key))
    }

    fn created_at(&self) -> Option<Timestamp> {
        dispatch!(self, s => s.created_at())
    }

    fn environment(&self) -> Option<&str> {
        dispatch!(self, s => s.environment())
    }
}

enum FlagCache {
    Prewarmed(HashMap<Str, DecodedFlag>),
    Lazy(RwLock<HashMap<Str, DecodedFlag>>),
}

/// Flag configuration in one of the supported wire formats.
///
/// `ConfigDecoder` is safe to share between threads. In lazy mode, concurrent lookups of the same
/// flag convert it at most once.
pub struct ConfigDecoder {
    format: WireFormat,
    bytes: Arc<[u8]>,
    source: WireConfig,
    flags: FlagCache,
    #[cfg(test)]
    decode_count: std::sync::atomic::AtomicUsize,
}

impl ConfigDecoder {
    /// Parse the configuration envelope. Individual flags are converted according to
    /// `materialization`.
    ///
    /// Fails only if the envelope itself cannot be read; broken flags are reported on access.
    pub fn new(
        format: WireFormat,
        bytes: impl Into<Arc<[u8]>>,
        materialization: Materialization,
    ) -> Result<ConfigDecoder, DecodeError> {
        let bytes = bytes.into();
        let source = WireConfig::parse(format, &bytes)?;

        let mut decoder = ConfigDecoder {
            format,
            bytes,
            source,
            flags: FlagCache::Lazy(RwLock::new(HashMap::new())),
            #[cfg(test)]
            decode_count: std::sync::atomic::AtomicUsize::new(0),
        };

        if materialization == Materialization::Prewarmed {
            let flags = decoder
                .source
                .flag_keys()
                .filter_map(|key| Some((Str::from(key), decoder.decode(key)?)))
                .collect();
            decoder.flags = FlagCache::Prewarmed(flags);
        }

        log::debug!(target: "eppo",
                    format:? = format,
                    flag_count = decoder.flag_count();
                    "loaded flag configuration");

        Ok(decoder)
    }

    /// Wire format of the underlying bytes.
    pub fn format(&self) -> WireFormat {
        self.format
    }

    /// Raw configuration bytes as received.
    pub fn wire_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Time the configuration was published.
    pub fn created_at(&self) -> Option<Timestamp> {
        self.source.created_at()
    }

    /// Name of the environment the configuration belongs to.
    pub fn environment(&self) -> Option<&str> {
        self.source.environment()
    }

    #[allow(missing_docs)]
    pub fn flag_count(&self) -> usize {
        self.source.flag_count()
    }

    #[allow(missing_docs)]
    pub fn all_flag_keys(&self) -> HashSet<Str> {
        self.source.flag_keys().map(Str::from).collect()
    }

    /// Find and convert the flag stored under `key`.
    ///
    /// Returns `None` if the configuration has no such flag and `Some(Err(_))` if the flag exists
    /// but could not be decoded.
    pub fn find_flag(&self, key: &str) -> Option<DecodedFlag> {
        match &self.flags {
            FlagCache::Prewarmed(flags) => flags.get(key).cloned(),
            FlagCache::Lazy(cache) => {
                if let Some(flag) = cache
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(key)
                {
                    return Some(flag.clone());
                }

                let mut cache = cache.write().unwrap_or_else(PoisonError::into_inner);
                // Another thread might have decoded the flag while we were waiting for the lock.
                if let Some(flag) = cache.get(key) {
                    return Some(flag.clone());
                }

                let flag = self.decode(key)?;
                cache.insert(key.into(), flag.clone());
                Some(flag)
            }
        }
    }

    /// Call `visitor` with every flag in the configuration. Flags that fail to decode are passed
    /// as `None`.
    ///
    /// Each call walks the whole configuration from the start.
    pub fn for_each_flag(&self, mut visitor: impl FnMut(&str, Option<&Flag>)) {
        for key in self.source.flag_keys() {
            let flag = self.find_flag(key);
            visitor(key, flag.as_ref().and_then(|f| f.as_deref().ok()));
        }
    }

    /// Iterate over all flags along with their decode outcome.
    pub fn flags(&self) -> impl Iterator<Item = (Str, DecodedFlag)> + '_ {
        self.source
            .flag_keys()
            .filter_map(|key| Some((Str::from(key), self.find_flag(key)?)))
    }

    fn decode(&self, key: &str) -> Option<DecodedFlag> {
        #[cfg(test)]
        self.decode_count
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        let result = self.source.decode_flag(key)?;
        Some(match result {
            Ok(flag) => Ok(Arc::new(flag)),
            Err(err) => {
                log::warn!(target: "eppo",
                           flag_key = key,
                           format:? = self.format;
                           "failed to decode flag: {err}");
                Err(err)
            }
        })
    }
}

impl std::fmt::Debug for ConfigDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigDecoder")
            .field("format", &self.format)
            .field("flag_count", &self.flag_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::{atomic::Ordering, Arc},
        thread,
    };

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::ufc::{
        Allocation, Condition, ConditionOperator, Rule, Shard, ShardRange, Split, Value,
        Variation, VariationType,
    };

    fn sample_flags() -> Vec<Flag> {
        vec![
            Flag {
                key: "checkout-flag".into(),
                enabled: true,
                variation_type: VariationType::String,
                variations: HashMap::from([
                    (
                        "control".into(),
                        Variation {
                            key: "control".into(),
                            value: "control".into(),
                        },
                    ),
                    (
                        "treatment".into(),
                        Variation {
                            key: "treatment".into(),
                            value: "treatment".into(),
                        },
                    ),
                ]),
                allocations: vec![
                    Allocation {
                        key: "internal".into(),
                        rules: vec![Rule {
                            conditions: vec![
                                Condition {
                                    attribute: "email".into(),
                                    operator: ConditionOperator::Matches,
                                    value: "@example\\.com$".into(),
                                },
                                Condition {
                                    attribute: "country".into(),
                                    operator: ConditionOperator::OneOf,
                                    value: vec!["US".to_owned(), "CA".to_owned()].into(),
                                },
                                Condition {
                                    attribute: "age".into(),
                                    operator: ConditionOperator::Unrecognized,
                                    value: 21.0.into(),
                                },
                                Condition {
                                    attribute: "beta".into(),
                                    operator: ConditionOperator::IsNull,
                                    value: false.into(),
                                },
                            ],
                        }],
                        start_at: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
                        end_at: Some(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()),
                        splits: vec![Split {
                            shards: vec![],
                            variation_key: "treatment".into(),
                            extra_logging: HashMap::from([(
                                "holdout".to_owned(),
                                "q3".to_owned(),
                            )]),
                        }],
                        do_log: false,
                    },
                    Allocation {
                        key: "experiment".into(),
                        rules: vec![],
                        start_at: None,
                        end_at: None,
                        splits: vec![
                            Split {
                                shards: vec![Shard {
                                    salt: "checkout-salt-36488".into(),
                                    ranges: vec![ShardRange {
                                        start: 0,
                                        end: 5000,
                                    }],
                                }],
                                variation_key: "control".into(),
                                extra_logging: HashMap::new(),
                            },
                            Split {
                                shards: vec![Shard {
                                    salt: "checkout-salt-36488".into(),
                                    ranges: vec![ShardRange {
                                        start: 5000,
                                        end: 10000,
                                    }],
                                }],
                                variation_key: "treatment".into(),
                                extra_logging: HashMap::new(),
                            },
                        ],
                        do_log: true,
                    },
                ],
                total_shards: 10000,
                entity_id: Some(42),
            },
            Flag {
                key: "price-multiplier".into(),
                enabled: false,
                variation_type: VariationType::Numeric,
                variations: HashMap::from([(
                    "double".into(),
                    Variation {
                        key: "double".into(),
                        value: Value::Number(2.0),
                    },
                )]),
                allocations: vec![Allocation {
                    key: "everyone".into(),
                    rules: vec![],
                    start_at: None,
                    end_at: None,
                    splits: vec![Split {
                        shards: vec![],
                        variation_key: "double".into(),
                        extra_logging: HashMap::new(),
                    }],
                    do_log: true,
                }],
                total_shards: 10000,
                entity_id: None,
            },
            Flag {
                key: "kill-switch".into(),
                enabled: true,
                variation_type: VariationType::Boolean,
                variations: HashMap::from([(
                    "on".into(),
                    Variation {
                        key: "on".into(),
                        value: Value::Boolean(true),
                    },
                )]),
                allocations: vec![],
                total_shards: 10000,
                entity_id: None,
            },
        ]
    }

    fn created_at() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 4, 17, 19, 40, 53).unwrap()
    }

    fn encode_json(flags: &[Flag]) -> Vec<u8> {
        let flags: serde_json::Map<String, serde_json::Value> = flags
            .iter()
            .map(|flag| (flag.key.to_string(), serde_json::to_value(flag).unwrap()))
            .collect();
        serde_json::to_vec(&serde_json::json!({
            "createdAt": created_at(),
            "environment": {"name": "Test"},
            "flags": flags,
        }))
        .unwrap()
    }

    fn encoded(format: WireFormat) -> Vec<u8> {
        let flags = sample_flags();
        match format {
            WireFormat::Json => encode_json(&flags),
            WireFormat::Protobuf => encode_protobuf(Some(created_at()), Some("Test"), &flags),
            WireFormat::Flatbuffer => encode_flatbuffer(Some(created_at()), Some("Test"), &flags),
        }
    }

    const FORMATS: [WireFormat; 3] = [
        WireFormat::Json,
        WireFormat::Protobuf,
        WireFormat::Flatbuffer,
    ];

    #[test]
    fn every_format_decodes_to_the_same_flags() {
        let expected: HashMap<Str, Flag> = sample_flags()
            .into_iter()
            .map(|flag| (flag.key.clone(), flag))
            .collect();

        for format in FORMATS {
            for materialization in [Materialization::Prewarmed, Materialization::Lazy] {
                let decoder = ConfigDecoder::new(format, encoded(format), materialization).unwrap();
                assert_eq!(decoder.flag_count(), 3, "{format:?}");
                assert_eq!(decoder.created_at(), Some(created_at()), "{format:?}");
                assert_eq!(decoder.environment(), Some("Test"), "{format:?}");

                let decoded: HashMap<Str, Flag> = decoder
                    .flags()
                    .map(|(key, flag)| (key, Flag::clone(&flag.unwrap())))
                    .collect();
                assert_eq!(decoded, expected, "{format:?} {materialization:?}");
            }
        }
    }

    #[test]
    fn find_flag_reports_missing_keys() {
        for format in FORMATS {
            let decoder =
                ConfigDecoder::new(format, encoded(format), Materialization::Lazy).unwrap();
            assert!(decoder.find_flag("no-such-flag").is_none());
            assert!(decoder.find_flag("kill-switch").unwrap().is_ok());
            assert_eq!(
                decoder.all_flag_keys(),
                HashSet::from([
                    Str::from("checkout-flag"),
                    Str::from("price-multiplier"),
                    Str::from("kill-switch"),
                ])
            );
        }
    }

    #[test]
    fn for_each_flag_is_restartable() {
        let decoder = ConfigDecoder::new(
            WireFormat::Protobuf,
            encoded(WireFormat::Protobuf),
            Materialization::Lazy,
        )
        .unwrap();

        for _ in 0..2 {
            let mut seen = Vec::new();
            decoder.for_each_flag(|key, flag| {
                assert_eq!(flag.map(|f| f.key.as_str()), Some(key));
                seen.push(key.to_owned());
            });
            seen.sort();
            assert_eq!(seen, ["checkout-flag", "kill-switch", "price-multiplier"]);
        }
    }

    #[test]
    fn prewarmed_decodes_everything_upfront() {
        let decoder = ConfigDecoder::new(
            WireFormat::Json,
            encoded(WireFormat::Json),
            Materialization::Prewarmed,
        )
        .unwrap();
        assert_eq!(decoder.decode_count.load(Ordering::Relaxed), 3);

        decoder.find_flag("checkout-flag");
        decoder.find_flag("no-such-flag");
        assert_eq!(decoder.decode_count.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn lazy_decodes_on_first_access_only() {
        let decoder = ConfigDecoder::new(
            WireFormat::Flatbuffer,
            encoded(WireFormat::Flatbuffer),
            Materialization::Lazy,
        )
        .unwrap();
        assert_eq!(decoder.decode_count.load(Ordering::Relaxed), 0);

        let first = decoder.find_flag("checkout-flag").unwrap().unwrap();
        let second = decoder.find_flag("checkout-flag").unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(decoder.decode_count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn concurrent_lazy_lookups_decode_once() {
        let decoder = Arc::new(
            ConfigDecoder::new(
                WireFormat::Protobuf,
                encoded(WireFormat::Protobuf),
                Materialization::Lazy,
            )
            .unwrap(),
        );

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let decoder = decoder.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        let flag = decoder.find_flag("checkout-flag").unwrap().unwrap();
                        assert_eq!(flag.key, "checkout-flag");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(decoder.decode_count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn broken_flag_does_not_affect_others() {
        let _ = env_logger::builder().is_test(true).try_init();

        let json = br#"{
            "createdAt": "2024-04-17T19:40:53.716Z",
            "environment": {"name": "Test"},
            "flags": {
                "broken": {"key": "broken", "enabled": "yes"},
                "empty": {
                    "key": "empty",
                    "enabled": true,
                    "variationType": "STRING",
                    "variations": {},
                    "allocations": [],
                    "totalShards": 10000
                }
            }
        }"#;

        for materialization in [Materialization::Prewarmed, Materialization::Lazy] {
            let decoder =
                ConfigDecoder::new(WireFormat::Json, json.to_vec(), materialization).unwrap();
            assert!(matches!(
                decoder.find_flag("broken"),
                Some(Err(DecodeError::InvalidJson(_)))
            ));
            assert!(decoder.find_flag("empty").unwrap().is_ok());

            let mut visited = HashMap::new();
            decoder.for_each_flag(|key, flag| {
                visited.insert(key.to_owned(), flag.is_some());
            });
            assert_eq!(
                visited,
                HashMap::from([("broken".to_owned(), false), ("empty".to_owned(), true)])
            );
        }
    }

    #[test]
    fn invalid_envelope_is_an_error() {
        assert!(matches!(
            ConfigDecoder::new(WireFormat::Json, b"not json".to_vec(), Materialization::Lazy),
            Err(DecodeError::InvalidJson(_))
        ));
        assert!(matches!(
            ConfigDecoder::new(
                WireFormat::Protobuf,
                vec![0xff, 0xff, 0xff],
                Materialization::Lazy
            ),
            Err(DecodeError::InvalidProtobuf(_))
        ));
        assert!(matches!(
            ConfigDecoder::new(
                WireFormat::Flatbuffer,
                vec![1, 2, 3],
                Materialization::Lazy
            ),
            Err(DecodeError::InvalidFlatbuffer(_))
        ));
    }

    #[test]
    fn keeps_wire_bytes() {
        let bytes = encoded(WireFormat::Protobuf);
        let decoder =
            ConfigDecoder::new(WireFormat::Protobuf, bytes.clone(), Materialization::Lazy)
                .unwrap();
        assert_eq!(decoder.format(), WireFormat::Protobuf);
        assert_eq!(decoder.wire_bytes(), bytes.as_slice());
    }
}
