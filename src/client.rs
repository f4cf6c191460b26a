use std::sync::Arc;

use chrono::Utc;

use crate::{
    assignment_cache::{AssignmentCache, AssignmentCacheKey},
    configuration_fetcher::{ConfigurationFetcher, ConfigurationFetcherConfig},
    configuration_store::ConfigurationStore,
    decoder::Materialization,
    eval::{get_assignment, get_precomputed_assignment, Assignment},
    persistence::ConfigurationPersistence,
    poller::{FetchConfiguration, Poller},
    precomputed::PrecomputedConfigurationWire,
    ufc::{AssignmentValue, VariationType},
    AssignmentEvent, AssignmentLogger, Attributes, ClientConfig, Configuration, Result,
    SdkMetadata, Str,
};

/// A client for Eppo API.
///
/// In order to create a client instance, first create [`ClientConfig`].
///
/// With a subject configured, the client serves server-precomputed assignments through the typed
/// getters (e.g., [`Client::get_string_assignment`]). Without one, it fetches the full flag
/// configuration and evaluates flags locally with [`Client::get_flag_assignment`].
///
/// # Examples
/// ```
/// # use eppo_client::{Client, ClientConfig};
/// Client::new(ClientConfig::from_api_key("api-key"));
/// ```
pub struct Client<'a> {
    configuration_store: Arc<ConfigurationStore>,
    fetcher: Arc<ClientFetcher>,
    poller: Poller<ClientFetcher>,
    assignment_logger: Box<dyn AssignmentLogger + Send + Sync + 'a>,
    assignment_cache: Box<dyn AssignmentCache + Send + Sync + 'a>,
    sdk: SdkMetadata,
}

/// Fetches whatever the client is configured to serve.
struct ClientFetcher {
    fetcher: ConfigurationFetcher,
    subject: Option<(Str, Attributes)>,
    materialization: Materialization,
}

impl FetchConfiguration for ClientFetcher {
    async fn fetch_configuration(&self) -> Result<Configuration> {
        match &self.subject {
            Some((subject_key, subject_attributes)) => {
                self.fetcher
                    .fetch_precomputed(subject_key, subject_attributes)
                    .await
            }
            None => self.fetcher.fetch_flags(self.materialization).await,
        }
    }
}

impl<'a> Client<'a> {
    /// Create a new `Client` using the specified configuration.
    ///
    /// If a cache file is configured, a previously persisted configuration is restored
    /// immediately.
    ///
    /// ```
    /// # use eppo_client::{ClientConfig, Client};
    /// let client = Client::new(ClientConfig::from_api_key("api-key"));
    /// ```
    pub fn new(config: ClientConfig<'a>) -> Self {
        let mut store = ConfigurationStore::new().with_materialization(config.materialization);
        if let Some(path) = config.cache_file {
            match ConfigurationPersistence::new(path) {
                Ok(persistence) => store = store.with_persistence(persistence),
                Err(err) => {
                    log::warn!(target: "eppo",
                               err:display;
                               "failed to start persistence, configuration will not be cached");
                }
            }
        }
        if let Some(listener) = config.change_listener {
            store = store.with_change_listener(listener);
        }
        let configuration_store = Arc::new(store);
        configuration_store.load_initial_configuration();

        let fetcher = Arc::new(ClientFetcher {
            fetcher: ConfigurationFetcher::new(ConfigurationFetcherConfig {
                base_url: config.base_url,
                api_key: config.api_key,
                sdk_name: config.sdk.name.to_owned(),
                sdk_version: config.sdk.version.to_owned(),
            }),
            subject: config.subject,
            materialization: config.materialization,
        });

        let poller = Poller::new(fetcher.clone(), configuration_store.clone(), config.poller);

        Client {
            configuration_store,
            fetcher,
            poller,
            assignment_logger: config.assignment_logger,
            assignment_cache: config.assignment_cache,
            sdk: config.sdk,
        }
    }

    /// The store holding the active configuration.
    pub fn configuration_store(&self) -> &Arc<ConfigurationStore> {
        &self.configuration_store
    }

    /// Whether the client has a configuration to serve assignments from.
    pub fn is_initialized(&self) -> bool {
        self.configuration_store.is_initialized()
    }

    /// Replace the active configuration, e.g., with one built offline.
    pub fn set_configuration(&self, configuration: Configuration) {
        self.configuration_store
            .set_configuration(Arc::new(configuration));
    }

    /// Activate a precomputed configuration envelope produced by a server-side SDK.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`](crate::Error::Decode) if the envelope or its embedded response
    /// is not valid.
    pub fn bootstrap_precomputed(&self, envelope: &str) -> Result<()> {
        let precomputed = PrecomputedConfigurationWire::from_json(envelope)?.decode(Utc::now())?;
        self.set_configuration(Configuration::from_precomputed(precomputed));
        Ok(())
    }

    /// Fetch configuration once and make it active.
    ///
    /// # Errors
    ///
    /// - [`Error::Unauthorized`](crate::Error::Unauthorized) if the API key was rejected.
    /// - [`Error::Network`](crate::Error::Network) for transport failures.
    /// - [`Error::Decode`](crate::Error::Decode) if the flag configuration could not be decoded.
    pub async fn fetch_configuration(&self) -> Result<()> {
        let configuration = self.fetcher.fetch_configuration().await?;
        self.set_configuration(configuration);
        Ok(())
    }

    /// Start refreshing configuration in the background on the current tokio runtime. Returns
    /// `Ok(false)` if polling is already running.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRuntime`](crate::Error::NoRuntime) outside of a tokio runtime.
    pub fn start_polling(&self) -> Result<bool> {
        self.poller.start()
    }

    /// Stop background refresh.
    pub fn stop_polling(&self) {
        self.poller.stop()
    }

    /// Retrieves the precomputed assignment for `flag_key` as a string.
    ///
    /// Returns `default` if the configuration hasn't been fetched yet, the flag is unknown, or
    /// the flag is not a string flag.
    ///
    /// # Examples
    ///
    /// ```
    /// # fn test(client: &eppo_client::Client) {
    /// let color = client.get_string_assignment("banner-color", "blue");
    /// # }
    /// ```
    pub fn get_string_assignment(&self, flag_key: &str, default: impl Into<Str>) -> Str {
        self.get_precomputed_typed(flag_key, VariationType::String)
            .and_then(|value| match value {
                AssignmentValue::String(s) => Some(s),
                _ => None,
            })
            .unwrap_or_else(|| default.into())
    }

    /// Retrieves the precomputed assignment for `flag_key` as a boolean.
    ///
    /// Returns `default` under the same conditions as [`Client::get_string_assignment`].
    pub fn get_boolean_assignment(&self, flag_key: &str, default: bool) -> bool {
        self.get_precomputed_typed(flag_key, VariationType::Boolean)
            .and_then(|value| value.as_boolean())
            .unwrap_or(default)
    }

    /// Retrieves the precomputed assignment for `flag_key` as an integer.
    ///
    /// Returns `default` under the same conditions as [`Client::get_string_assignment`].
    pub fn get_integer_assignment(&self, flag_key: &str, default: i64) -> i64 {
        self.get_precomputed_typed(flag_key, VariationType::Integer)
            .and_then(|value| value.as_integer())
            .unwrap_or(default)
    }

    /// Retrieves the precomputed assignment for `flag_key` as a float.
    ///
    /// Returns `default` under the same conditions as [`Client::get_string_assignment`].
    pub fn get_numeric_assignment(&self, flag_key: &str, default: f64) -> f64 {
        self.get_precomputed_typed(flag_key, VariationType::Numeric)
            .and_then(|value| value.as_numeric())
            .unwrap_or(default)
    }

    /// Retrieves the precomputed assignment for `flag_key` as a JSON value.
    ///
    /// Returns `default` under the same conditions as [`Client::get_string_assignment`].
    pub fn get_json_assignment(
        &self,
        flag_key: &str,
        default: Arc<serde_json::Value>,
    ) -> Arc<serde_json::Value> {
        self.get_precomputed_typed(flag_key, VariationType::Json)
            .and_then(|value| value.as_json().cloned())
            .unwrap_or(default)
    }

    /// Evaluate `flag_key` locally for the given subject.
    ///
    /// The flag must have the same type as `default`. Returns `default` if the configuration
    /// hasn't been fetched yet, the flag is unknown or disabled, the subject is not eligible for
    /// any allocation, the flag has a different type, or its configuration is invalid.
    ///
    /// ```
    /// # use eppo_client::{Attributes, Client, ufc::AssignmentValue};
    /// # fn test(client: &Client) {
    /// let enabled = client.get_flag_assignment(
    ///     "kill-switch",
    ///     "user-1",
    ///     &Attributes::new(),
    ///     AssignmentValue::Boolean(false),
    /// );
    /// # }
    /// ```
    pub fn get_flag_assignment(
        &self,
        flag_key: &str,
        subject_key: &str,
        subject_attributes: &Attributes,
        default: AssignmentValue,
    ) -> AssignmentValue {
        let configuration = self.configuration_store.get_configuration();
        // Errors are logged by the evaluation and the caller falls back to its default.
        let assignment = get_assignment(
            configuration.as_deref(),
            flag_key,
            subject_key,
            subject_attributes,
            Some(default.variation_type()),
            Utc::now(),
            &self.sdk,
        );
        match assignment {
            Ok(Some(assignment)) => self.finish(assignment),
            Ok(None) | Err(_) => default,
        }
    }

    fn get_precomputed_typed(
        &self,
        flag_key: &str,
        expected_type: VariationType,
    ) -> Option<AssignmentValue> {
        let configuration = self.configuration_store.get_configuration();
        // Errors are logged by the evaluation and the caller falls back to its default.
        let assignment = get_precomputed_assignment(
            configuration.as_deref(),
            flag_key,
            Some(expected_type),
            Utc::now(),
            &self.sdk,
        )
        .ok()??;
        Some(self.finish(assignment))
    }

    fn finish(&self, assignment: Assignment) -> AssignmentValue {
        if let Some(event) = assignment.event {
            self.log_assignment(event);
        }
        assignment.value
    }

    fn log_assignment(&self, event: AssignmentEvent) {
        let key = AssignmentCacheKey {
            subject_key: event.subject.clone(),
            flag_key: event.feature_flag.clone(),
            allocation_key: event.allocation.clone(),
            variation_key: event.variation.clone(),
        };
        if !self.assignment_cache.should_log(&key) {
            return;
        }

        log::trace!(target: "eppo",
                    event:serde;
                    "logging assignment");
        self.assignment_logger.log_assignment(event);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::{
        assignment_cache::NoopAssignmentCache,
        decoder::{ConfigDecoder, WireFormat},
        precomputed::{DecodedPrecomputedConfiguration, PrecomputedResponse, PrecomputedSubject},
    };

    const UFC: &str = r#"{
        "flags": {
            "kill-switch": {
                "key": "kill-switch",
                "enabled": true,
                "variationType": "BOOLEAN",
                "variations": {"on": {"key": "on", "value": true}},
                "allocations": [
                    {"key": "rollout", "splits": [{"variationKey": "on", "shards": []}]}
                ],
                "totalShards": 10000
            }
        }
    }"#;

    fn precomputed_configuration() -> Configuration {
        let response: PrecomputedResponse = serde_json::from_value(json!({
            "flags": {
                "string-flag": {
                    "allocationKey": "allocation-1",
                    "variationKey": "red",
                    "variationType": "STRING",
                    "variationValue": "red",
                    "doLog": true,
                },
                "boolean-flag": {
                    "allocationKey": "allocation-2",
                    "variationKey": "on",
                    "variationType": "BOOLEAN",
                    "variationValue": true,
                    "doLog": true,
                },
                "integer-flag": {
                    "variationType": "INTEGER",
                    "variationValue": 42,
                    "doLog": false,
                },
                "numeric-flag": {
                    "variationType": "NUMERIC",
                    "variationValue": 2.5,
                    "doLog": false,
                },
                "json-flag": {
                    "variationType": "JSON",
                    "variationValue": {"hello": "world"},
                    "doLog": false,
                },
            },
            "format": "PRECOMPUTED",
            "obfuscated": false,
        }))
        .unwrap();
        Configuration::from_precomputed(DecodedPrecomputedConfiguration::decode(
            response,
            PrecomputedSubject {
                subject_key: "user-1".into(),
                subject_attributes: Attributes::new(),
            },
            Utc::now(),
        ))
    }

    fn recording_client<'a>(
        events: Arc<Mutex<Vec<AssignmentEvent>>>,
        config: ClientConfig<'a>,
    ) -> Client<'a> {
        config
            .assignment_logger(move |event| events.lock().unwrap().push(event))
            .to_client()
    }

    #[test]
    fn returns_defaults_while_no_configuration() {
        let _ = env_logger::builder().is_test(true).try_init();
        let client = ClientConfig::from_api_key("api-key").to_client();

        assert!(!client.is_initialized());
        assert_eq!(client.get_string_assignment("string-flag", "default"), "default");
        assert!(client.get_boolean_assignment("boolean-flag", true));
        assert_eq!(
            client.get_flag_assignment(
                "kill-switch",
                "user-1",
                &Attributes::new(),
                AssignmentValue::Boolean(false)
            ),
            AssignmentValue::Boolean(false)
        );
    }

    #[test]
    fn typed_getters_read_precomputed_assignments() {
        let client = ClientConfig::from_api_key("api-key").to_client();
        client.set_configuration(precomputed_configuration());

        assert_eq!(client.get_string_assignment("string-flag", "default"), "red");
        assert!(client.get_boolean_assignment("boolean-flag", false));
        assert_eq!(client.get_integer_assignment("integer-flag", 0), 42);
        assert_eq!(client.get_numeric_assignment("numeric-flag", 0.0), 2.5);
        assert_eq!(
            *client.get_json_assignment("json-flag", Arc::new(json!(null))),
            json!({"hello": "world"})
        );
        assert_eq!(client.get_integer_assignment("unknown-flag", 7), 7);
    }

    #[test]
    fn type_mismatch_returns_default_without_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
        let events = Arc::new(Mutex::new(Vec::new()));
        let client = recording_client(events.clone(), ClientConfig::from_api_key("api-key"));
        client.set_configuration(precomputed_configuration());

        assert_eq!(client.get_integer_assignment("string-flag", 7), 7);
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn deduplicates_logged_assignments() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let client = recording_client(events.clone(), ClientConfig::from_api_key("api-key"));
        client.set_configuration(precomputed_configuration());

        for _ in 0..3 {
            client.get_string_assignment("string-flag", "default");
        }
        client.get_boolean_assignment("boolean-flag", false);
        // doLog: false
        client.get_integer_assignment("integer-flag", 0);

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].feature_flag, "string-flag");
        assert_eq!(events[0].subject, "user-1");
        assert_eq!(events[1].feature_flag, "boolean-flag");
    }

    #[test]
    fn noop_cache_logs_every_assignment() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let client = recording_client(
            events.clone(),
            ClientConfig::from_api_key("api-key").assignment_cache(NoopAssignmentCache),
        );
        client.set_configuration(precomputed_configuration());

        client.get_string_assignment("string-flag", "default");
        client.get_string_assignment("string-flag", "default");
        assert_eq!(events.lock().unwrap().len(), 2);
    }

    #[test]
    fn evaluates_flags_locally() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let client = recording_client(events.clone(), ClientConfig::from_api_key("api-key"));
        client.set_configuration(Configuration::from_flags(
            ConfigDecoder::new(WireFormat::Json, UFC.as_bytes(), Materialization::Lazy).unwrap(),
        ));

        assert_eq!(
            client.get_flag_assignment(
                "kill-switch",
                "user-1",
                &Attributes::new(),
                AssignmentValue::Boolean(false)
            ),
            AssignmentValue::Boolean(true)
        );
        assert_eq!(
            client.get_flag_assignment(
                "missing-flag",
                "user-1",
                &Attributes::new(),
                AssignmentValue::Integer(3)
            ),
            AssignmentValue::Integer(3)
        );
        assert_eq!(events.lock().unwrap().len(), 1);
    }

    #[test]
    fn local_type_mismatch_returns_default_without_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
        let events = Arc::new(Mutex::new(Vec::new()));
        let client = recording_client(events.clone(), ClientConfig::from_api_key("api-key"));
        client.set_configuration(Configuration::from_flags(
            ConfigDecoder::new(WireFormat::Json, UFC.as_bytes(), Materialization::Lazy).unwrap(),
        ));

        assert_eq!(
            client.get_flag_assignment(
                "kill-switch",
                "user-1",
                &Attributes::new(),
                AssignmentValue::String("off".into())
            ),
            AssignmentValue::String("off".into())
        );
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn bootstraps_from_envelope() {
        let client = ClientConfig::from_api_key("api-key").to_client();
        let envelope = json!({
            "version": 1,
            "precomputed": {
                "subjectKey": "user-1",
                "subjectAttributes": {"plan": "pro"},
                "fetchedAt": "2024-11-18T14:23:40Z",
                "response": json!({
                    "flags": {
                        "string-flag": {
                            "variationType": "STRING",
                            "variationValue": "green",
                            "doLog": false,
                        },
                    },
                    "format": "PRECOMPUTED",
                    "obfuscated": false,
                }).to_string(),
            },
        });

        client.bootstrap_precomputed(&envelope.to_string()).unwrap();
        assert_eq!(client.get_string_assignment("string-flag", "default"), "green");
        assert!(client.bootstrap_precomputed("{}").is_err());
    }

    #[test]
    fn restores_cached_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("configuration.json");

        {
            let client = ClientConfig::from_api_key("api-key")
                .cache_file(&path)
                .to_client();
            client.set_configuration(precomputed_configuration());
            client.configuration_store().flush();
        }

        let changes = Arc::new(Mutex::new(0));
        let client = {
            let changes = changes.clone();
            ClientConfig::from_api_key("api-key")
                .cache_file(&path)
                .on_configuration_change(move |_| *changes.lock().unwrap() += 1)
                .to_client()
        };
        assert!(client.is_initialized());
        assert_eq!(*changes.lock().unwrap(), 1);
        assert_eq!(client.get_string_assignment("string-flag", "default"), "red");
    }

    #[tokio::test]
    async fn fetches_precomputed_configuration() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/assignments")
                    .query_param("apiKey", "api-key");
                then.status(200).json_body(json!({
                    "flags": {
                        "string-flag": {
                            "allocationKey": "allocation-1",
                            "variationKey": "blue",
                            "variationType": "STRING",
                            "variationValue": "blue",
                            "doLog": true,
                        },
                    },
                    "format": "PRECOMPUTED",
                    "obfuscated": false,
                }));
            })
            .await;

        let client = ClientConfig::from_api_key("api-key")
            .base_url(server.base_url())
            .subject("user-1", Attributes::new())
            .to_client();
        client.fetch_configuration().await.unwrap();

        mock.assert_async().await;
        assert_eq!(client.get_string_assignment("string-flag", "default"), "blue");
    }

    #[tokio::test]
    async fn fetches_flags_without_subject() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/flag-config/v1/config");
                then.status(200).body(UFC);
            })
            .await;

        let client = ClientConfig::from_api_key("api-key")
            .base_url(server.base_url())
            .to_client();
        client.fetch_configuration().await.unwrap();

        assert_eq!(
            client.get_flag_assignment(
                "kill-switch",
                "user-1",
                &Attributes::new(),
                AssignmentValue::Boolean(false)
            ),
            AssignmentValue::Boolean(true)
        );
    }

    #[tokio::test]
    async fn polling_lifecycle() {
        let client = ClientConfig::from_api_key("api-key").to_client();
        assert!(client.start_polling().unwrap());
        assert!(!client.start_polling().unwrap());
        client.stop_polling();
        assert!(client.start_polling().unwrap());
        client.stop_polling();
    }
}
