use std::collections::HashMap;

use serde::Serialize;

use crate::{Attributes, SdkMetadata, Str};

/// Represents an event capturing the assignment of a feature flag to a subject and its logging
/// details.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentEvent {
    /// The key of the feature flag being assigned.
    pub feature_flag: Str,
    /// The key of the allocation that the subject was assigned to. May be absent for precomputed
    /// assignments whose key failed to decode.
    pub allocation: Option<Str>,
    /// `"{feature_flag}-{allocation}"`, absent when the allocation is.
    pub experiment: Option<String>,
    /// The specific variation assigned to the subject.
    pub variation: Option<Str>,
    /// The key identifying the subject receiving the assignment.
    pub subject: Str,
    /// Custom attributes of the subject relevant to the assignment.
    pub subject_attributes: Attributes,
    /// The timestamp indicating when the assignment event occurred.
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Additional metadata such as SDK language and version.
    pub meta_data: EventMetaData,
    /// Additional user-defined logging fields for capturing extra information related to the
    /// assignment.
    #[serde(flatten)]
    pub extra_logging: HashMap<String, String>,
}

impl AssignmentEvent {
    pub(crate) fn experiment_key(flag_key: &str, allocation_key: Option<&str>) -> Option<String> {
        allocation_key.map(|allocation_key| format!("{flag_key}-{allocation_key}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct EventMetaData {
    pub sdk_name: &'static str,
    pub sdk_version: &'static str,
    pub core_version: &'static str,
    /// Whether the assignment came from an obfuscated configuration.
    pub obfuscated: bool,
}

impl EventMetaData {
    pub(crate) fn new(sdk: &SdkMetadata, obfuscated: bool) -> EventMetaData {
        EventMetaData {
            sdk_name: sdk.name,
            sdk_version: sdk.version,
            core_version: env!("CARGO_PKG_VERSION"),
            obfuscated,
        }
    }
}
