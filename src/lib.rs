//! Client-side evaluation core for Eppo, a next-generation feature flagging and experimentation
//! platform.
//!
//! # Overview
//!
//! [`Configuration`] is the heart of the crate. It is an immutable snapshot of everything the
//! server told us: a flag configuration for local evaluation
//! ([`ConfigDecoder`](decoder::ConfigDecoder)) and/or assignments precomputed by the server for a
//! single subject ([`DecodedPrecomputedConfiguration`](precomputed::DecodedPrecomputedConfiguration)).
//!
//! Flag configurations arrive in one of several [wire formats](decoder::WireFormat) (JSON,
//! protocol buffers, flatbuffers). The decoder either converts every flag upfront or lazily on
//! first use, see [`Materialization`](decoder::Materialization). Precomputed configurations may be
//! obfuscated; [`obfuscation`] holds the decoding rules.
//!
//! [`ConfigurationStore`](configuration_store::ConfigurationStore) is a thread-safe multi-reader
//! multi-writer in-memory manager for [`Configuration`]. Whenever configuration changes, it is
//! replaced completely and, if enabled, persisted to disk in the background. When a reader gets a
//! configuration, it receives a *snapshot* that is not affected by further writes.
//!
//! [`ConfigurationFetcher`](configuration_fetcher::ConfigurationFetcher) is an HTTP client that
//! knows how to fetch [`Configuration`] from the server, and [`Poller`](poller::Poller) refreshes
//! it periodically on a tokio runtime.
//!
//! [`eval`] module contains functions for flag evaluation. These functions return evaluation
//! results along with [`AssignmentEvent`]s; they do not log events automatically.
//!
//! [`Client`] ties everything together: it owns the store, fetches and polls configuration, and
//! passes assignment events through an [`AssignmentCache`](assignment_cache::AssignmentCache) to
//! the user-provided [`AssignmentLogger`].
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum.
//!
//! In production, it is recommended to ignore all errors, as feature flag evaluation should not be
//! critical enough to cause system crashes. However, the returned errors are valuable for debugging
//! and usually indicate that developer's attention is needed.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging
//! messages. Consider integrating a `log`-compatible logger implementation for better visibility
//! into SDK operations. All messages are logged under the `eppo` target.

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

pub mod assignment_cache;
pub mod configuration_fetcher;
pub mod configuration_store;
pub mod decoder;
pub mod eval;
pub mod events;
pub mod obfuscation;
pub mod persistence;
pub mod poller;
pub mod precomputed;
pub mod sharder;
pub mod ufc;

mod assignment_logger;
mod attributes;
mod client;
mod config;
mod configuration;
mod error;
mod sdk_metadata;
mod str;

pub use assignment_logger::AssignmentLogger;
pub use attributes::{AttributeValue, Attributes, ContextAttributes};
pub use client::Client;
pub use config::ClientConfig;
pub use configuration::Configuration;
pub use error::{Error, NetworkError, Result};
pub use events::AssignmentEvent;
pub use sdk_metadata::SdkMetadata;
pub use str::Str;
