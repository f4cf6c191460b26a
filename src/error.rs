use std::sync::Arc;

use crate::{decoder::DecodeError, ufc::FlagEvaluationError};

/// Represents a result type for operations in the Eppo client.
///
/// This `Result` type is a standard Rust `Result` type where the error variant is defined by the
/// eppo-specific [`Error`] enum.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors that can occur in the Eppo client.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Error evaluating a flag.
    #[error(transparent)]
    FlagEvaluationError(#[from] FlagEvaluationError),

    /// Flag configuration could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Error talking to the configuration server.
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// The request was unauthorized, possibly due to an invalid API key.
    #[error("unauthorized, api_key is likely invalid")]
    Unauthorized,

    /// The poller was started outside of a Tokio runtime.
    #[error("poller must be started from within a tokio runtime")]
    NoRuntime,
}

/// Errors produced by the configuration transport.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum NetworkError {
    /// Base URL and query parameters did not form a valid URL.
    #[error("invalid base_url configuration")]
    InvalidUrl(#[source] url::ParseError),

    /// The request failed before a response was received, or the response could not be read.
    #[error("invalid response from server")]
    InvalidResponse(#[source] Arc<reqwest::Error>),

    /// The server responded with a non-2xx status.
    #[error("server responded with HTTP status {0}")]
    HttpError(u16),

    /// The response body was not a valid configuration.
    #[error("failed to decode server response: {0}")]
    Decoding(String),
}

impl From<reqwest::Error> for NetworkError {
    fn from(value: reqwest::Error) -> Self {
        if let Some(status) = value.status() {
            NetworkError::HttpError(status.as_u16())
        } else if value.is_decode() {
            NetworkError::Decoding(value.without_url().to_string())
        } else {
            NetworkError::InvalidResponse(Arc::new(value.without_url()))
        }
    }
}
