//! Decoding of obfuscated configuration values.
//!
//! Obfuscated configurations ship flag keys as salted md5 hashes and string values as base64.
//! Nothing in here fails loudly: a value that cannot be decoded is reported as `None` and the
//! caller drops the field or flag it belongs to.
use std::collections::HashMap;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::ufc::{AssignmentValue, VariationType};

/// Decode a base64 string into UTF-8 text. Returns `None` for malformed base64 or non-UTF-8
/// payloads.
pub fn decode_base64(encoded: &str) -> Option<String> {
    let bytes = STANDARD.decode(encoded).ok()?;
    String::from_utf8(bytes).ok()
}

/// Encode text as base64.
pub fn encode_base64(value: &str) -> String {
    STANDARD.encode(value)
}

/// Hash `key` with `salt` the way obfuscated configurations key their flags: lowercase hex md5 of
/// `salt` followed by `key`.
pub fn hash_key(salt: &[u8], key: &str) -> String {
    let mut ctx = md5::Context::new();
    ctx.consume(salt);
    ctx.consume(key.as_bytes());
    format!("{:x}", ctx.compute())
}

/// Codec for a single configuration. Obfuscated configurations carry their own salt, which is
/// decoded once when the configuration is decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObfuscationCodec {
    /// Keys and values are sent as-is.
    Plain,
    /// Keys are salted md5 hashes; strings are base64-encoded.
    Obfuscated {
        /// Decoded salt.
        salt: Vec<u8>,
    },
}

impl ObfuscationCodec {
    /// Build a codec for an obfuscated configuration from its wire salt.
    ///
    /// The salt is normally base64. A salt that is not valid base64 is used verbatim: lookups will
    /// then only succeed if the server hashed with the raw string.
    pub fn from_wire_salt(salt: &str) -> ObfuscationCodec {
        let salt = match STANDARD.decode(salt) {
            Ok(bytes) => bytes,
            Err(err) => {
                log::warn!(target: "eppo",
                           err:display;
                           "configuration salt is not valid base64, using it verbatim");
                salt.as_bytes().to_vec()
            }
        };
        ObfuscationCodec::Obfuscated { salt }
    }

    /// Whether this codec decodes obfuscated data.
    pub fn is_obfuscated(&self) -> bool {
        matches!(self, ObfuscationCodec::Obfuscated { .. })
    }

    /// Decode an allocation key, variation key, or extra-logging entry.
    pub fn decode_str(&self, value: &str) -> Option<String> {
        match self {
            ObfuscationCodec::Plain => Some(value.to_owned()),
            ObfuscationCodec::Obfuscated { .. } => decode_base64(value),
        }
    }

    /// Decode a variation value under the declared variation type.
    ///
    /// `STRING` and `JSON` values are base64-encoded when obfuscated. `BOOLEAN`, `INTEGER`, and
    /// `NUMERIC` values are JSON-native and may additionally be wrapped in quotes.
    pub fn decode_value(
        &self,
        variation_type: VariationType,
        value: &serde_json::Value,
    ) -> Option<AssignmentValue> {
        use serde_json::Value;

        match variation_type {
            VariationType::String => {
                let s = value.as_str()?;
                Some(AssignmentValue::String(self.decode_str(s)?.into()))
            }
            VariationType::Json => match value {
                Value::String(s) => {
                    let decoded = self.decode_str(s)?;
                    let parsed = serde_json::from_str(&decoded).ok()?;
                    Some(AssignmentValue::Json(Arc::new(parsed)))
                }
                // Plain configurations may inline JSON values.
                other if !self.is_obfuscated() => {
                    Some(AssignmentValue::Json(Arc::new(other.clone())))
                }
                _ => None,
            },
            VariationType::Boolean => match value {
                Value::Bool(b) => Some(AssignmentValue::Boolean(*b)),
                Value::String(s) => match unquote(s) {
                    "true" => Some(AssignmentValue::Boolean(true)),
                    "false" => Some(AssignmentValue::Boolean(false)),
                    _ => None,
                },
                _ => None,
            },
            VariationType::Integer => match value {
                Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        Some(AssignmentValue::Integer(i))
                    } else {
                        let f = n.as_f64()?;
                        whole_number(f).map(AssignmentValue::Integer)
                    }
                }
                Value::String(s) => {
                    let s = unquote(s);
                    match s.parse::<i64>() {
                        Ok(i) => Some(AssignmentValue::Integer(i)),
                        Err(_) => {
                            whole_number(s.parse::<f64>().ok()?).map(AssignmentValue::Integer)
                        }
                    }
                }
                _ => None,
            },
            VariationType::Numeric => match value {
                Value::Number(n) => Some(AssignmentValue::Numeric(n.as_f64()?)),
                Value::String(s) => {
                    let f = unquote(s).parse::<f64>().ok()?;
                    f.is_finite().then_some(AssignmentValue::Numeric(f))
                }
                _ => None,
            },
        }
    }

    /// Decode an extra-logging map. Entries whose key or value fail to decode are dropped
    /// individually.
    pub fn decode_extra_logging(
        &self,
        extra_logging: &HashMap<String, String>,
    ) -> HashMap<String, String> {
        extra_logging
            .iter()
            .filter_map(|(key, value)| {
                let decoded = self.decode_str(key).zip(self.decode_str(value));
                if decoded.is_none() {
                    log::warn!(target: "eppo",
                               key:display;
                               "dropping extra logging entry that failed to decode");
                }
                decoded
            })
            .collect()
    }
}

fn unquote(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(s)
}

fn whole_number(f: f64) -> Option<i64> {
    let i = f as i64;
    (i as f64 == f).then_some(i)
}
