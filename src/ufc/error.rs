use serde::{Deserialize, Serialize};

use crate::ufc::VariationType;

/// Enum representing possible errors that can occur during flag evaluation.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum FlagEvaluationError {
    /// Configuration has not been fetched yet.
    #[error("configuration missing")]
    ConfigurationMissing,

    /// The active configuration has no entry for the flag key. For precomputed configurations
    /// this includes flags dropped while decoding the response.
    #[error("flag not found")]
    FlagNotFound,

    /// Flag is found in configuration but it is disabled.
    #[error("flag is disabled")]
    FlagDisabled,

    /// No allocation matched the subject. This causes the return of the default value.
    #[error("no allocation assigned")]
    NoAllocation,

    /// Requested flag has a different type than the one the caller expected.
    #[error("invalid flag type (expected: {expected:?}, found: {found:?})")]
    InvalidType {
        /// Expected type of the flag.
        expected: VariationType,
        /// Actual type of the flag.
        found: VariationType,
    },

    /// The flag's entry in the wire configuration (JSON, protobuf or flatbuffer) failed to decode
    /// into a [`Flag`](crate::ufc::Flag). Other flags in the same configuration are unaffected.
    #[error("error parsing configuration, try upgrading Eppo SDK")]
    ConfigurationParseError,

    /// Configuration is internally inconsistent (e.g., a split references an unknown variation).
    #[error("configuration error, try upgrading Eppo SDK")]
    ConfigurationError,
}

impl FlagEvaluationError {
    /// Return `true` if the error is a normal running condition and the default value should be
    /// returned silently.
    pub(crate) fn is_normal(self) -> bool {
        match self {
            FlagEvaluationError::ConfigurationMissing
            | FlagEvaluationError::FlagNotFound
            | FlagEvaluationError::FlagDisabled
            | FlagEvaluationError::NoAllocation => true,

            FlagEvaluationError::InvalidType { .. }
            | FlagEvaluationError::ConfigurationParseError
            | FlagEvaluationError::ConfigurationError => false,
        }
    }
}
