use std::collections::HashMap;

use serde::Deserialize;
use serde_json::value::RawValue;

use super::{DecodeError, FlagSource};
use crate::{
    ufc::{Environment, Flag, Timestamp},
    Str,
};

/// Universal Flag Configuration JSON. The envelope is parsed upfront while individual flags stay
/// as raw JSON until requested.
#[derive(Debug)]
pub struct JsonFlagSource {
    created_at: Option<Timestamp>,
    environment: Option<Environment>,
    flags: HashMap<Str, Box<RawValue>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonEnvelope {
    #[serde(default)]
    created_at: Option<Timestamp>,
    #[serde(default)]
    environment: Option<Environment>,
    flags: HashMap<Str, Box<RawValue>>,
}

impl JsonFlagSource {
    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<JsonFlagSource, DecodeError> {
        let envelope: JsonEnvelope = serde_json::from_slice(bytes)
            .map_err(|err| DecodeError::InvalidJson(err.to_string()))?;
        Ok(JsonFlagSource {
            created_at: envelope.created_at,
            environment: envelope.environment,
            flags: envelope.flags,
        })
    }
}

impl FlagSource for JsonFlagSource {
    fn flag_count(&self) -> usize {
        self.flags.len()
    }

    fn flag_keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.flags.keys().map(|key| key.as_str())
    }

    fn decode_flag(&self, key: &str) -> Option<Result<Flag, DecodeError>> {
        let raw = self.flags.get(key)?;
        Some(
            serde_json::from_str::<Flag>(raw.get())
                .map_err(|err| DecodeError::InvalidJson(err.to_string())),
        )
    }

    fn created_at(&self) -> Option<Timestamp> {
        self.created_at
    }

    fn environment(&self) -> Option<&str> {
        self.environment.as_ref().map(|env| env.name.as_str())
    }
}
