//! Server-precomputed assignments for a single subject.
//!
//! The server evaluates every flag for one subject and ships the results, usually obfuscated:
//! flag keys are salted md5 hashes, and strings are base64. Decoding happens once per fetch; the
//! decoded configuration is immutable afterwards.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::{
    decoder::DecodeError,
    obfuscation::{hash_key, ObfuscationCodec},
    ufc::{AssignmentValue, Environment, Timestamp, VariationType},
    Attributes, Str,
};

/// Bootstrap envelope: `{version, precomputed: {subjectKey, subjectAttributes, fetchedAt,
/// response}}`, where `response` is the server response as a JSON-encoded string.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrecomputedConfigurationWire {
    #[allow(missing_docs)]
    pub version: u32,
    #[allow(missing_docs)]
    pub precomputed: PrecomputedWire,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct PrecomputedWire {
    pub subject_key: Str,
    #[serde(default)]
    pub subject_attributes: Attributes,
    #[serde(default)]
    pub fetched_at: Option<Timestamp>,
    pub response: String,
}

/// Body of the precomputed assignments response.
///
/// Flags are kept as untyped JSON so that one malformed flag is dropped on its own when the
/// response is decoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct PrecomputedResponse {
    pub flags: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub salt: Option<String>,
    pub format: Str,
    #[serde(default = "default_true")]
    pub obfuscated: bool,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    #[serde(default)]
    pub environment: Option<Environment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct PrecomputedFlagWire {
    #[serde(default)]
    pub allocation_key: Option<String>,
    #[serde(default)]
    pub variation_key: Option<String>,
    pub variation_type: VariationType,
    pub variation_value: serde_json::Value,
    #[serde(default)]
    pub extra_logging: Option<HashMap<String, String>>,
    #[serde(default = "default_true")]
    pub do_log: bool,
}

fn default_true() -> bool {
    true
}

/// A single precomputed assignment after de-obfuscation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedPrecomputedFlag {
    /// `None` if the subject is unallocated or the key failed to decode.
    pub allocation_key: Option<Str>,
    /// `None` if the subject is unallocated or the key failed to decode.
    pub variation_key: Option<Str>,
    #[allow(missing_docs)]
    pub variation_type: VariationType,
    #[allow(missing_docs)]
    pub variation_value: AssignmentValue,
    #[allow(missing_docs)]
    pub extra_logging: HashMap<String, String>,
    #[allow(missing_docs)]
    pub do_log: bool,
}

/// The subject the assignments were computed for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct PrecomputedSubject {
    pub subject_key: Str,
    pub subject_attributes: Attributes,
}

/// Decoded precomputed configuration.
///
/// Flags stay keyed by the key the server used (a salted hash when obfuscated); use
/// [`DecodedPrecomputedConfiguration::get_flag`] to look them up by the plain flag key.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedPrecomputedConfiguration {
    flags: HashMap<Str, DecodedPrecomputedFlag>,
    obfuscated: bool,
    /// Decoded salt. Empty for plain configurations.
    #[serde_as(as = "serde_with::base64::Base64")]
    salt: Vec<u8>,
    format: Str,
    config_fetched_at: Timestamp,
    #[serde(default)]
    config_published_at: Option<Timestamp>,
    #[serde(default)]
    environment: Option<Str>,
    subject: PrecomputedSubject,
}

impl PrecomputedConfigurationWire {
    /// Parse a bootstrap envelope.
    pub fn from_json(json: &str) -> Result<PrecomputedConfigurationWire, DecodeError> {
        serde_json::from_str(json).map_err(|err| DecodeError::InvalidJson(err.to_string()))
    }

    /// Decode the embedded response. `now` is used when the envelope has no `fetchedAt`.
    pub fn decode(&self, now: Timestamp) -> Result<DecodedPrecomputedConfiguration, DecodeError> {
        let response: PrecomputedResponse = serde_json::from_str(&self.precomputed.response)
            .map_err(|err| DecodeError::InvalidJson(err.to_string()))?;
        Ok(DecodedPrecomputedConfiguration::decode(
            response,
            PrecomputedSubject {
                subject_key: self.precomputed.subject_key.clone(),
                subject_attributes: self.precomputed.subject_attributes.clone(),
            },
            self.precomputed.fetched_at.unwrap_or(now),
        ))
    }
}

impl DecodedPrecomputedConfiguration {
    /// Decode a server response for `subject`.
    ///
    /// Decoding never fails as a whole. A flag whose value cannot be decoded is dropped; an
    /// allocation or variation key that cannot be decoded becomes `None`; undecodable
    /// extra-logging entries are dropped one by one.
    pub fn decode(
        response: PrecomputedResponse,
        subject: PrecomputedSubject,
        fetched_at: Timestamp,
    ) -> DecodedPrecomputedConfiguration {
        let codec = if response.obfuscated {
            let salt = response.salt.as_deref().unwrap_or_else(|| {
                log::warn!(target: "eppo", "obfuscated precomputed configuration has no salt");
                ""
            });
            ObfuscationCodec::from_wire_salt(salt)
        } else {
            ObfuscationCodec::Plain
        };

        let flags = response
            .flags
            .into_iter()
            .filter_map(|(key, flag)| {
                let decoded = decode_flag(&codec, &key, flag)?;
                Some((Str::from(key), decoded))
            })
            .collect();

        let salt = match codec {
            ObfuscationCodec::Plain => Vec::new(),
            ObfuscationCodec::Obfuscated { salt } => salt,
        };

        DecodedPrecomputedConfiguration {
            flags,
            obfuscated: response.obfuscated,
            salt,
            format: response.format,
            config_fetched_at: fetched_at,
            config_published_at: response.created_at,
            environment: response.environment.map(|env| env.name),
            subject,
        }
    }

    /// Find the assignment for `flag_key`.
    pub fn get_flag(&self, flag_key: &str) -> Option<&DecodedPrecomputedFlag> {
        if self.obfuscated {
            self.flags.get(hash_key(&self.salt, flag_key).as_str())
        } else {
            self.flags.get(flag_key)
        }
    }

    #[allow(missing_docs)]
    pub fn flag_count(&self) -> usize {
        self.flags.len()
    }

    /// Whether the server obfuscated this configuration.
    pub fn is_obfuscated(&self) -> bool {
        self.obfuscated
    }

    #[allow(missing_docs)]
    pub fn format(&self) -> &str {
        &self.format
    }

    #[allow(missing_docs)]
    pub fn config_fetched_at(&self) -> Timestamp {
        self.config_fetched_at
    }

    #[allow(missing_docs)]
    pub fn config_published_at(&self) -> Option<Timestamp> {
        self.config_published_at
    }

    #[allow(missing_docs)]
    pub fn environment(&self) -> Option<&str> {
        self.environment.as_deref()
    }

    #[allow(missing_docs)]
    pub fn subject(&self) -> &PrecomputedSubject {
        &self.subject
    }
}

fn decode_flag(
    codec: &ObfuscationCodec,
    key: &str,
    flag: serde_json::Value,
) -> Option<DecodedPrecomputedFlag> {
    let flag: PrecomputedFlagWire = match serde_json::from_value(flag) {
        Ok(flag) => flag,
        Err(err) => {
            log::warn!(target: "eppo",
                       flag_key = key,
                       err:display;
                       "dropping malformed precomputed flag");
            return None;
        }
    };

    let Some(variation_value) = codec.decode_value(flag.variation_type, &flag.variation_value)
    else {
        log::warn!(target: "eppo",
                   flag_key = key,
                   variation_type:? = flag.variation_type;
                   "dropping precomputed flag with undecodable value");
        return None;
    };

    let decode_key = |field: &str, value: Option<String>| -> Option<Str> {
        let value = value?;
        let decoded = codec.decode_str(&value);
        if decoded.is_none() {
            log::warn!(target: "eppo",
                       flag_key = key,
                       field;
                       "failed to decode precomputed flag field");
        }
        decoded.map(Str::from)
    };

    Some(DecodedPrecomputedFlag {
        allocation_key: decode_key("allocationKey", flag.allocation_key),
        variation_key: decode_key("variationKey", flag.variation_key),
        variation_type: flag.variation_type,
        variation_value,
        extra_logging: flag
            .extra_logging
            .map(|extra_logging| codec.decode_extra_logging(&extra_logging))
            .unwrap_or_default(),
        do_log: flag.do_log,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::*;
    use crate::obfuscation::encode_base64;

    const SALT: &str = "c2FsdA==";

    fn obfuscated_response(flags: serde_json::Value) -> PrecomputedResponse {
        serde_json::from_value(json!({
            "flags": flags,
            "salt": SALT,
            "format": "PRECOMPUTED",
            "obfuscated": true,
            "createdAt": "2024-11-18T14:23:39.456Z",
            "environment": {"name": "Test"},
        }))
        .unwrap()
    }

    fn subject() -> PrecomputedSubject {
        PrecomputedSubject {
            subject_key: "test-subject".into(),
            subject_attributes: Attributes::from([("plan".into(), "pro".into())]),
        }
    }

    fn hashed(flag_key: &str) -> String {
        hash_key(b"salt", flag_key)
    }

    fn fetched_at() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 11, 18, 14, 23, 40).unwrap()
    }

    #[test]
    fn decodes_obfuscated_flags() {
        let response = obfuscated_response(json!({
            hashed("string-flag"): {
                "allocationKey": encode_base64("allocation-123"),
                "variationKey": encode_base64("variation-123"),
                "variationType": "STRING",
                "variationValue": encode_base64("red"),
                "extraLogging": {
                    encode_base64("holdoutKey"): encode_base64("activeHoldout"),
                },
                "doLog": true,
            },
            hashed("json-flag"): {
                "allocationKey": encode_base64("allocation-json"),
                "variationKey": encode_base64("variation-json"),
                "variationType": "JSON",
                "variationValue": encode_base64(r#"{"key":"value","number":123}"#),
                "doLog": false,
            },
            hashed("integer-flag"): {
                "variationType": "INTEGER",
                "variationValue": "42",
                "doLog": true,
            },
            hashed("numeric-flag"): {
                "variationType": "NUMERIC",
                "variationValue": 2.5,
                "doLog": true,
            },
            hashed("boolean-flag"): {
                "variationType": "BOOLEAN",
                "variationValue": true,
                "doLog": true,
            },
        }));

        let config = DecodedPrecomputedConfiguration::decode(response, subject(), fetched_at());

        assert_eq!(config.flag_count(), 5);
        assert!(config.is_obfuscated());
        assert_eq!(config.environment(), Some("Test"));
        assert_eq!(config.format(), "PRECOMPUTED");
        assert!(config.config_published_at().is_some());

        let string_flag = config.get_flag("string-flag").unwrap();
        assert_eq!(
            string_flag.variation_value,
            AssignmentValue::String("red".into())
        );
        assert_eq!(
            string_flag.allocation_key.as_deref(),
            Some("allocation-123")
        );
        assert_eq!(string_flag.variation_key.as_deref(), Some("variation-123"));
        assert_eq!(
            string_flag.extra_logging,
            HashMap::from([("holdoutKey".to_owned(), "activeHoldout".to_owned())])
        );

        let json_flag = config.get_flag("json-flag").unwrap();
        assert_eq!(
            json_flag.variation_value,
            AssignmentValue::Json(Arc::new(json!({"key": "value", "number": 123})))
        );
        assert!(!json_flag.do_log);

        assert_eq!(
            config.get_flag("integer-flag").unwrap().variation_value,
            AssignmentValue::Integer(42)
        );
        assert_eq!(
            config.get_flag("numeric-flag").unwrap().variation_value,
            AssignmentValue::Numeric(2.5)
        );
        assert_eq!(
            config.get_flag("boolean-flag").unwrap().variation_value,
            AssignmentValue::Boolean(true)
        );
        assert!(config.get_flag("unknown-flag").is_none());
    }

    #[test]
    fn invalid_base64_keys_are_dropped() {
        let response = obfuscated_response(json!({
            hashed("string-flag"): {
                "allocationKey": "%%%",
                "variationKey": "%%%",
                "variationType": "STRING",
                "variationValue": encode_base64("red"),
                "extraLogging": {
                    "%%%": encode_base64("ignored"),
                    encode_base64("kept"): encode_base64("yes"),
                },
                "doLog": true,
            },
        }));

        let config = DecodedPrecomputedConfiguration::decode(response, subject(), fetched_at());
        let flag = config.get_flag("string-flag").unwrap();
        assert_eq!(flag.allocation_key, None);
        assert_eq!(flag.variation_key, None);
        assert_eq!(flag.variation_value, AssignmentValue::String("red".into()));
        assert_eq!(
            flag.extra_logging,
            HashMap::from([("kept".to_owned(), "yes".to_owned())])
        );
    }

    #[test]
    fn undecodable_value_drops_only_that_flag() {
        let _ = env_logger::builder().is_test(true).try_init();

        let response = obfuscated_response(json!({
            hashed("broken-flag"): {
                "variationType": "STRING",
                "variationValue": "%%%",
                "doLog": true,
            },
            hashed("wrong-type-flag"): {
                "variationType": "INTEGER",
                "variationValue": "forty-two",
                "doLog": true,
            },
            hashed("boolean-flag"): {
                "variationType": "BOOLEAN",
                "variationValue": "true",
                "doLog": true,
            },
        }));

        let config = DecodedPrecomputedConfiguration::decode(response, subject(), fetched_at());
        assert_eq!(config.flag_count(), 1);
        assert!(config.get_flag("broken-flag").is_none());
        assert!(config.get_flag("wrong-type-flag").is_none());
        assert_eq!(
            config.get_flag("boolean-flag").unwrap().variation_value,
            AssignmentValue::Boolean(true)
        );
    }

    #[test]
    fn plain_responses_use_identity_codec() {
        let response: PrecomputedResponse = serde_json::from_value(json!({
            "flags": {
                "string-flag": {
                    "allocationKey": "allocation-123",
                    "variationKey": "variation-123",
                    "variationType": "STRING",
                    "variationValue": "red",
                    "doLog": true,
                },
            },
            "format": "PRECOMPUTED",
            "obfuscated": false,
        }))
        .unwrap();

        let config = DecodedPrecomputedConfiguration::decode(response, subject(), fetched_at());
        assert!(!config.is_obfuscated());
        let flag = config.get_flag("string-flag").unwrap();
        assert_eq!(flag.variation_value, AssignmentValue::String("red".into()));
        assert_eq!(flag.allocation_key.as_deref(), Some("allocation-123"));
    }

    #[test]
    fn malformed_flag_drops_only_that_flag() {
        let _ = env_logger::builder().is_test(true).try_init();

        let response = json!({
            "flags": {
                hashed("string-flag"): {
                    "variationType": "STRING",
                    "variationValue": encode_base64("red"),
                },
                hashed("bandit-flag"): {
                    "allocationKey": 123,
                    "variationType": "BANDIT",
                    "variationValue": encode_base64("red"),
                },
            },
            "salt": SALT,
            "format": "PRECOMPUTED",
        })
        .to_string();
        let envelope = json!({
            "version": 1,
            "precomputed": {"subjectKey": "test-subject", "response": response},
        })
        .to_string();

        let config = PrecomputedConfigurationWire::from_json(&envelope)
            .unwrap()
            .decode(fetched_at())
            .unwrap();
        assert_eq!(config.flag_count(), 1);
        assert!(config.get_flag("bandit-flag").is_none());
        assert_eq!(
            config.get_flag("string-flag").unwrap().variation_value,
            AssignmentValue::String("red".into())
        );
    }

    #[test]
    fn decodes_bootstrap_envelope() {
        let response = json!({
            "flags": {
                hashed("string-flag"): {
                    "variationType": "STRING",
                    "variationValue": encode_base64("red"),
                },
            },
            "salt": SALT,
            "format": "PRECOMPUTED",
            "createdAt": "2024-11-18T14:23:39Z",
        })
        .to_string();
        let envelope = json!({
            "version": 1,
            "precomputed": {
                "subjectKey": "test-subject",
                "subjectAttributes": {"plan": "pro", "age": 30},
                "fetchedAt": "2024-11-18T14:23:39.456Z",
                "response": response,
            },
        })
        .to_string();

        let wire = PrecomputedConfigurationWire::from_json(&envelope).unwrap();
        assert_eq!(wire.version, 1);

        let config = wire.decode(fetched_at()).unwrap();
        assert_eq!(config.subject().subject_key, "test-subject");
        assert_eq!(
            config.subject().subject_attributes.get("age"),
            Some(&30.0.into())
        );
        assert_eq!(
            config.config_fetched_at(),
            Utc.timestamp_millis_opt(1_731_939_819_456).unwrap()
        );
        assert_eq!(
            config.config_published_at(),
            Some(Utc.with_ymd_and_hms(2024, 11, 18, 14, 23, 39).unwrap())
        );

        let flag = config.get_flag("string-flag").unwrap();
        // Obfuscated responses default to logging and have no keys unless the server sends them.
        assert!(flag.do_log);
        assert_eq!(flag.allocation_key, None);
    }

    #[test]
    fn invalid_response_string_is_an_error() {
        let wire = PrecomputedConfigurationWire {
            version: 1,
            precomputed: PrecomputedWire {
                subject_key: "test-subject".into(),
                subject_attributes: Attributes::new(),
                fetched_at: None,
                response: "not json".to_owned(),
            },
        };
        assert!(matches!(
            wire.decode(fetched_at()),
            Err(DecodeError::InvalidJson(_))
        ));
    }

    #[test]
    fn survives_serialization() {
        let response = obfuscated_response(json!({
            hashed("string-flag"): {
                "variationType": "STRING",
                "variationValue": encode_base64("red"),
                "doLog": true,
            },
        }));
        let config = DecodedPrecomputedConfiguration::decode(response, subject(), fetched_at());

        let json = serde_json::to_string(&config).unwrap();
        let restored: DecodedPrecomputedConfiguration = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, config);
        assert!(restored.get_flag("string-flag").is_some());
    }
}
