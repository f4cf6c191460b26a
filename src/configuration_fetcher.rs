//! An HTTP client that fetches configuration from the server.
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use reqwest::{StatusCode, Url};
use serde::Serialize;

use crate::{
    decoder::{ConfigDecoder, Materialization, WireFormat},
    error::NetworkError,
    precomputed::{DecodedPrecomputedConfiguration, PrecomputedResponse, PrecomputedSubject},
    Attributes, Configuration, ContextAttributes, Error, Result, SdkMetadata, Str,
};

/// Connection settings for [`ConfigurationFetcher`].
#[derive(Debug, Clone)]
pub struct ConfigurationFetcherConfig {
    #[allow(missing_docs)]
    pub base_url: String,
    #[allow(missing_docs)]
    pub api_key: String,
    /// SDK name. Usually, language name.
    pub sdk_name: String,
    /// Version of SDK.
    pub sdk_version: String,
}

impl ConfigurationFetcherConfig {
    /// Settings for `api_key` against [`DEFAULT_BASE_URL`].
    pub fn new(api_key: impl Into<String>, sdk: SdkMetadata) -> ConfigurationFetcherConfig {
        ConfigurationFetcherConfig {
            base_url: DEFAULT_BASE_URL.to_owned(),
            api_key: api_key.into(),
            sdk_name: sdk.name.to_owned(),
            sdk_version: sdk.version.to_owned(),
        }
    }
}

/// Default server address.
pub const DEFAULT_BASE_URL: &str = "https://fs-edge-assignment.eppo.cloud";

const PRECOMPUTED_ENDPOINT: &str = "/assignments";
const UFC_ENDPOINT: &str = "/flag-config/v1/config";

#[derive(Serialize)]
struct PrecomputedRequest<'a> {
    subject_key: &'a str,
    subject_attributes: ContextAttributes,
}

/// A client that fetches Eppo configuration from the server.
pub struct ConfigurationFetcher {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::Client,
    config: ConfigurationFetcherConfig,
    /// If we receive a 401 Unauthorized error during a request, it means the API key is not
    /// valid. We cache this error so we don't issue additional requests to the server.
    unauthorized: AtomicBool,
}

impl ConfigurationFetcher {
    #[allow(missing_docs)]
    pub fn new(config: ConfigurationFetcherConfig) -> ConfigurationFetcher {
        ConfigurationFetcher {
            client: reqwest::Client::new(),
            config,
            unauthorized: AtomicBool::new(false),
        }
    }

    /// Request assignments the server precomputed for one subject.
    ///
    /// # Errors
    ///
    /// - [`Error::Unauthorized`] if the server rejected the API key (now or earlier).
    /// - [`Error::Network`] for transport failures, non-2xx statuses, and malformed bodies.
    pub async fn fetch_precomputed(
        &self,
        subject_key: &Str,
        subject_attributes: &Attributes,
    ) -> Result<Configuration> {
        let url = self.url(PRECOMPUTED_ENDPOINT)?;

        log::debug!(target: "eppo", subject_key:display; "fetching precomputed assignments");
        let response = self
            .client
            .post(url)
            .json(&PrecomputedRequest {
                subject_key,
                subject_attributes: subject_attributes.into(),
            })
            .send()
            .await
            .map_err(NetworkError::from)?;
        let response = self.check_status(response)?;

        let body: PrecomputedResponse = response.json().await.map_err(NetworkError::from)?;
        let precomputed = DecodedPrecomputedConfiguration::decode(
            body,
            PrecomputedSubject {
                subject_key: subject_key.clone(),
                subject_attributes: subject_attributes.clone(),
            },
            Utc::now(),
        );

        log::debug!(target: "eppo",
                    flag_count = precomputed.flag_count();
                    "successfully fetched precomputed assignments");
        Ok(Configuration::from_precomputed(precomputed))
    }

    /// Request the full flag configuration for local evaluation.
    ///
    /// # Errors
    ///
    /// Same as [`ConfigurationFetcher::fetch_precomputed`], plus [`Error::Decode`] if the body is
    /// not a flag configuration envelope.
    pub async fn fetch_flags(&self, materialization: Materialization) -> Result<Configuration> {
        let url = self.url(UFC_ENDPOINT)?;

        log::debug!(target: "eppo", "fetching UFC configuration");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(NetworkError::from)?;
        let response = self.check_status(response)?;

        let bytes = response.bytes().await.map_err(NetworkError::from)?;
        let flags = ConfigDecoder::new(WireFormat::Json, bytes.to_vec(), materialization)?;

        log::debug!(target: "eppo",
                    flag_count = flags.flag_count();
                    "successfully fetched UFC configuration");
        Ok(Configuration::from_flags(flags))
    }

    fn url(&self, endpoint: &str) -> Result<Url> {
        if self.unauthorized.load(Ordering::Relaxed) {
            return Err(Error::Unauthorized);
        }

        Url::parse_with_params(
            &format!("{}{}", self.config.base_url, endpoint),
            &[
                ("apiKey", &*self.config.api_key),
                ("sdkName", &*self.config.sdk_name),
                ("sdkVersion", &*self.config.sdk_version),
            ],
        )
        .map_err(|err| Error::from(NetworkError::InvalidUrl(err)))
    }

    fn check_status(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            log::warn!(target: "eppo", "client is not authorized. Check your API key");
            self.unauthorized.store(true, Ordering::Relaxed);
            return Err(Error::Unauthorized);
        }
        if !status.is_success() {
            log::warn!(target: "eppo",
                       status = status.as_u16();
                       "received non-200 response while fetching new configuration");
            return Err(NetworkError::HttpError(status.as_u16()).into());
        }
        Ok(response)
    }
}
