use std::collections::HashSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::{
    decoder::{ConfigDecoder, DecodeError, Materialization, WireFormat},
    precomputed::DecodedPrecomputedConfiguration,
    ufc::Timestamp,
    Str,
};

/// Remote configuration for the eppo client. It's a central piece that defines client behavior.
///
/// A `Configuration` is immutable; refreshing replaces the whole snapshot.
#[derive(Debug)]
pub struct Configuration {
    /// Timestamp when configuration was fetched by the SDK.
    pub fetched_at: Timestamp,
    /// Flags configuration for local evaluation.
    pub flags: Option<ConfigDecoder>,
    /// Assignments precomputed by the server for a single subject.
    pub precomputed: Option<DecodedPrecomputedConfiguration>,
}

impl Configuration {
    #[allow(missing_docs)]
    pub fn new(
        fetched_at: Timestamp,
        flags: Option<ConfigDecoder>,
        precomputed: Option<DecodedPrecomputedConfiguration>,
    ) -> Configuration {
        Configuration {
            fetched_at,
            flags,
            precomputed,
        }
    }

    /// Configuration holding only flags, fetched now.
    pub fn from_flags(flags: ConfigDecoder) -> Configuration {
        Configuration::new(Utc::now(), Some(flags), None)
    }

    /// Configuration holding only precomputed assignments. `fetched_at` is taken from the
    /// precomputed configuration.
    pub fn from_precomputed(precomputed: DecodedPrecomputedConfiguration) -> Configuration {
        Configuration::new(precomputed.config_fetched_at(), None, Some(precomputed))
    }

    /// Get a set of all available flags. Note that this may return both disabled flags and flags
    /// with bad configuration.
    pub fn flag_keys(&self) -> HashSet<Str> {
        self.flags
            .as_ref()
            .map(ConfigDecoder::all_flag_keys)
            .unwrap_or_default()
    }

    /// Serialize configuration for the on-disk cache. Flags are stored as their original wire
    /// bytes; precomputed assignments are stored decoded.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&PersistedConfigurationRef {
            fetched_at: self.fetched_at,
            flags: self.flags.as_ref().map(|flags| PersistedFlagsRef {
                format: flags.format(),
                data: flags.wire_bytes(),
            }),
            precomputed: self.precomputed.as_ref(),
        })
    }

    /// Restore configuration written by [`Configuration::to_json`].
    pub fn from_json(
        bytes: &[u8],
        materialization: Materialization,
    ) -> Result<Configuration, DecodeError> {
        let persisted: PersistedConfiguration = serde_json::from_slice(bytes)
            .map_err(|err| DecodeError::InvalidJson(err.to_string()))?;
        let flags = persisted
            .flags
            .map(|flags| ConfigDecoder::new(flags.format, flags.data, materialization))
            .transpose()?;
        Ok(Configuration::new(
            persisted.fetched_at,
            flags,
            persisted.precomputed,
        ))
    }
}

#[serde_as]
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PersistedFlagsRef<'a> {
    format: WireFormat,
    #[serde_as(as = "serde_with::base64::Base64")]
    data: &'a [u8],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PersistedConfigurationRef<'a> {
    fetched_at: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    flags: Option<PersistedFlagsRef<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    precomputed: Option<&'a DecodedPrecomputedConfiguration>,
}

#[serde_as]
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedFlags {
    format: WireFormat,
    #[serde_as(as = "serde_with::base64::Base64")]
    data: Vec<u8>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedConfiguration {
    fetched_at: Timestamp,
    #[serde(default)]
    flags: Option<PersistedFlags>,
    #[serde(default)]
    precomputed: Option<DecodedPrecomputedConfiguration>,
}
