//! A background task that periodically requests configuration from the server and stores it in a
//! configuration store.
use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use rand::{thread_rng, Rng};
use tokio::{runtime::Handle, task::JoinHandle};

use crate::{configuration_store::ConfigurationStore, Configuration, Error, Result};

/// Source of fresh configuration for [`Poller`].
pub trait FetchConfiguration: Send + Sync + 'static {
    /// Fetch a complete configuration snapshot.
    fn fetch_configuration(&self) -> impl Future<Output = Result<Configuration>> + Send;
}

/// Configuration for [`Poller`].
// Not implementing `Copy` as we may add non-copyable fields in the future.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Interval to wait between requests for configuration.
    ///
    /// Defaults to [`PollerConfig::DEFAULT_POLL_INTERVAL`].
    pub interval: Duration,
    /// Jitter applies a randomized duration to wait between requests for configuration. This helps
    /// to avoid multiple server instances synchronizing and producing spiky network load.
    ///
    /// Defaults to [`PollerConfig::DEFAULT_POLL_JITTER`].
    pub jitter: Duration,
}

impl PollerConfig {
    /// Default value for [`PollerConfig::interval`].
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
    /// Default value for [`PollerConfig::jitter`].
    pub const DEFAULT_POLL_JITTER: Duration = Duration::from_secs(3);

    /// Create a new `PollerConfig` using default configuration.
    pub fn new() -> PollerConfig {
        PollerConfig::default()
    }

    /// Update poll interval with `interval`.
    pub fn with_interval(mut self, interval: Duration) -> PollerConfig {
        self.interval = interval;
        self
    }

    /// Update poll interval jitter with `jitter`.
    pub fn with_jitter(mut self, jitter: Duration) -> PollerConfig {
        self.jitter = jitter;
        self
    }
}

impl Default for PollerConfig {
    fn default() -> PollerConfig {
        PollerConfig {
            interval: PollerConfig::DEFAULT_POLL_INTERVAL,
            jitter: PollerConfig::DEFAULT_POLL_JITTER,
        }
    }
}

struct RunningPoller {
    handle: JoinHandle<()>,
    /// Cleared on stop so that a fetch racing with `stop()` is not applied.
    active: Arc<AtomicBool>,
}

/// A configuration poller.
///
/// The poller waits `interval ± jitter`, fetches configuration with [`FetchConfiguration`], and
/// stores it in [`ConfigurationStore`]. Failed fetches are logged and retried on the next tick.
pub struct Poller<F> {
    fetcher: Arc<F>,
    store: Arc<ConfigurationStore>,
    config: PollerConfig,
    running: Mutex<Option<RunningPoller>>,
}

impl<F: FetchConfiguration> Poller<F> {
    #[allow(missing_docs)]
    pub fn new(fetcher: Arc<F>, store: Arc<ConfigurationStore>, config: PollerConfig) -> Poller<F> {
        Poller {
            fetcher,
            store,
            config,
            running: Mutex::new(None),
        }
    }

    /// Start polling on the current tokio runtime.
    ///
    /// Returns `Ok(false)` if the poller is already running.
    ///
    /// # Errors
    ///
    /// - [`Error::NoRuntime`] if called outside of a tokio runtime.
    pub fn start(&self) -> Result<bool> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
        {
            return Ok(false);
        }

        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;
        let active = Arc::new(AtomicBool::new(true));
        let handle = runtime.spawn(poll(
            self.fetcher.clone(),
            self.store.clone(),
            self.config.clone(),
            active.clone(),
        ));

        log::debug!(target: "eppo", "poller started");
        *running = Some(RunningPoller { handle, active });
        Ok(true)
    }

    /// Stop polling. Does nothing if the poller is not running.
    pub fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(running) = running {
            running.active.store(false, Ordering::SeqCst);
            running.handle.abort();
            log::debug!(target: "eppo", "poller stopped");
        }
    }

    /// Whether the polling task is alive.
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }
}

impl<F> Drop for Poller<F> {
    fn drop(&mut self) {
        let running = self
            .running
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(running) = running {
            running.active.store(false, Ordering::SeqCst);
            running.handle.abort();
        }
    }
}

async fn poll<F: FetchConfiguration>(
    fetcher: Arc<F>,
    store: Arc<ConfigurationStore>,
    config: PollerConfig,
    active: Arc<AtomicBool>,
) {
    loop {
        tokio::time::sleep(jitter(config.interval, config.jitter)).await;

        log::debug!(target: "eppo", "fetching new configuration");
        match fetcher.fetch_configuration().await {
            Ok(configuration) => {
                if !active.load(Ordering::SeqCst) {
                    return;
                }
                store.set_configuration(Arc::new(configuration));
            }
            Err(err) => {
                log::warn!(target: "eppo",
                           err:display;
                           "failed to fetch configuration, will retry on next poll");
            }
        }
    }
}

/// Apply randomized `jitter` to `interval` in either direction.
fn jitter(interval: Duration, jitter: Duration) -> Duration {
    let mut rng = thread_rng();
    let offset = rng.gen_range(Duration::ZERO..=jitter);
    if rng.gen_bool(0.5) {
        interval.saturating_add(offset)
    } else {
        interval.saturating_sub(offset)
    }
}
