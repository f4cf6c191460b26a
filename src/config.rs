use std::{path::PathBuf, sync::Arc, time::Duration};

use crate::{
    assignment_cache::{AssignmentCache, InMemoryAssignmentCache},
    assignment_logger::NoopAssignmentLogger,
    configuration_fetcher::DEFAULT_BASE_URL,
    configuration_store::ChangeListener,
    decoder::Materialization,
    persistence::ConfigurationPersistence,
    poller::PollerConfig,
    AssignmentLogger, Attributes, Client, Configuration, SdkMetadata, Str,
};

/// Configuration for [`Client`].
///
/// # Examples
/// ```
/// # use eppo_client::ClientConfig;
/// let client = ClientConfig::from_api_key("api-key")
///     .subject("user-1", [("plan".to_owned(), "pro".into())].into_iter().collect())
///     .assignment_logger(|event| {
///         println!("{:?}", event);
///     })
///     .to_client();
/// ```
pub struct ClientConfig<'a> {
    pub(crate) api_key: String,
    pub(crate) base_url: String,
    pub(crate) subject: Option<(Str, Attributes)>,
    pub(crate) assignment_logger: Box<dyn AssignmentLogger + Send + Sync + 'a>,
    pub(crate) assignment_cache: Box<dyn AssignmentCache + Send + Sync + 'a>,
    pub(crate) poller: PollerConfig,
    pub(crate) cache_file: Option<PathBuf>,
    pub(crate) materialization: Materialization,
    pub(crate) change_listener: Option<ChangeListener>,
    pub(crate) sdk: SdkMetadata,
}

impl<'a> ClientConfig<'a> {
    /// Create a default Eppo configuration using the specified API key.
    ///
    /// ```
    /// # use eppo_client::ClientConfig;
    /// ClientConfig::from_api_key("api-key");
    /// ```
    pub fn from_api_key(api_key: impl Into<String>) -> Self {
        ClientConfig {
            api_key: api_key.into(),
            base_url: ClientConfig::DEFAULT_BASE_URL.to_owned(),
            subject: None,
            assignment_logger: Box::new(NoopAssignmentLogger),
            assignment_cache: Box::new(InMemoryAssignmentCache::new()),
            poller: PollerConfig::default(),
            cache_file: None,
            materialization: Materialization::default(),
            change_listener: None,
            sdk: SdkMetadata::default(),
        }
    }

    /// Default base URL for API calls.
    pub const DEFAULT_BASE_URL: &'static str = DEFAULT_BASE_URL;

    /// Override base URL for API calls. Clients should use the default setting in most cases.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Fetch precomputed assignments for this subject. Without a subject, the client fetches the
    /// full flag configuration and evaluates flags locally.
    pub fn subject(mut self, subject_key: impl Into<Str>, subject_attributes: Attributes) -> Self {
        self.subject = Some((subject_key.into(), subject_attributes));
        self
    }

    /// Set assignment logger to store variation assignments to your data warehouse.
    ///
    /// ```
    /// # use eppo_client::ClientConfig;
    /// let config = ClientConfig::from_api_key("api-key").assignment_logger(|event| {
    ///   println!("{:?}", event);
    /// });
    /// ```
    pub fn assignment_logger(
        mut self,
        assignment_logger: impl AssignmentLogger + Send + Sync + 'a,
    ) -> Self {
        self.assignment_logger = Box::new(assignment_logger);
        self
    }

    /// Replace the cache that deduplicates logged assignments. Defaults to an unbounded
    /// [`InMemoryAssignmentCache`].
    pub fn assignment_cache(
        mut self,
        assignment_cache: impl AssignmentCache + Send + Sync + 'a,
    ) -> Self {
        self.assignment_cache = Box::new(assignment_cache);
        self
    }

    #[allow(missing_docs)]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poller = self.poller.with_interval(interval);
        self
    }

    #[allow(missing_docs)]
    pub fn poll_jitter(mut self, jitter: Duration) -> Self {
        self.poller = self.poller.with_jitter(jitter);
        self
    }

    /// Persist configuration to `path` and restore it on startup.
    pub fn cache_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_file = Some(path.into());
        self
    }

    /// Persist configuration to the platform cache directory
    /// (`{cache dir}/eppo/configuration.json`). Does nothing on platforms without one.
    pub fn default_cache_file(mut self) -> Self {
        self.cache_file = ConfigurationPersistence::default_path();
        self
    }

    /// How fetched flag configurations convert their flags. See [`Materialization`].
    pub fn materialization(mut self, materialization: Materialization) -> Self {
        self.materialization = materialization;
        self
    }

    /// Called after every configuration the client accepts, including one restored from disk.
    pub fn on_configuration_change(
        mut self,
        listener: impl Fn(&Arc<Configuration>) + Send + Sync + 'static,
    ) -> Self {
        self.change_listener = Some(Box::new(listener));
        self
    }

    /// Identify the SDK wrapping this crate in requests and assignment events.
    pub fn sdk_metadata(mut self, sdk: SdkMetadata) -> Self {
        self.sdk = sdk;
        self
    }

    /// Create a new [`Client`] using the specified configuration.
    ///
    /// ```
    /// # use eppo_client::{ClientConfig, Client};
    /// let client: Client = ClientConfig::from_api_key("api-key").to_client();
    /// ```
    pub fn to_client(self) -> Client<'a> {
        Client::new(self)
    }
}
