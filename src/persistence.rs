//! Best-effort on-disk cache of the active configuration.
//!
//! Writes are handed to a single background thread so that setting a configuration never blocks
//! on disk I/O. Each write goes to a temporary file that is then renamed over the target, so
//! readers never observe a partially written file.
use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{mpsc, Arc},
};

use crate::{decoder::Materialization, Configuration};

enum Command {
    Write(Arc<Configuration>),
    Flush(mpsc::SyncSender<()>),
}

/// Handle to the persistence thread. Dropping the handle lets the thread finish queued writes and
/// exit.
pub struct ConfigurationPersistence {
    path: PathBuf,
    sender: mpsc::Sender<Command>,
}

impl ConfigurationPersistence {
    /// Default cache location: `{platform cache dir}/eppo/configuration.json`. Returns `None` on
    /// platforms without a cache directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::cache_dir().map(|dir| dir.join("eppo").join("configuration.json"))
    }

    /// Spawn the persistence thread writing to `path`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the thread could not be spawned.
    pub fn new(path: impl Into<PathBuf>) -> std::io::Result<ConfigurationPersistence> {
        let path = path.into();
        let (sender, receiver) = mpsc::channel::<Command>();

        {
            let path = path.clone();
            std::thread::Builder::new()
                .name("eppo-persistence".to_owned())
                .spawn(move || {
                    for command in receiver {
                        match command {
                            Command::Write(configuration) => {
                                if let Err(err) = write_atomically(&path, &configuration) {
                                    log::warn!(target: "eppo",
                                               path:? = path,
                                               err:display;
                                               "failed to persist configuration");
                                } else {
                                    log::debug!(target: "eppo",
                                                path:? = path;
                                                "persisted configuration");
                                }
                            }
                            Command::Flush(reply) => {
                                // The requester may have given up waiting.
                                let _ = reply.send(());
                            }
                        }
                    }
                    log::debug!(target: "eppo", "persistence thread exiting");
                })?;
        }

        Ok(ConfigurationPersistence { path, sender })
    }

    /// Path of the cache file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue `configuration` to be written. Never blocks; failures are logged.
    pub fn save(&self, configuration: Arc<Configuration>) {
        if self.sender.send(Command::Write(configuration)).is_err() {
            log::warn!(target: "eppo", "persistence thread is gone, configuration not persisted");
        }
    }

    /// Block until every write queued before this call has completed.
    pub fn flush(&self) {
        let (reply_sender, reply_receiver) = mpsc::sync_channel(1);
        if self.sender.send(Command::Flush(reply_sender)).is_ok() {
            let _ = reply_receiver.recv();
        }
    }

    /// Read the cached configuration. A missing or corrupt file yields `None`.
    pub fn load(&self, materialization: Materialization) -> Option<Configuration> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                log::debug!(target: "eppo", path:? = self.path; "no cached configuration");
                return None;
            }
            Err(err) => {
                log::warn!(target: "eppo",
                           path:? = self.path,
                           err:display;
                           "failed to read cached configuration");
                return None;
            }
        };

        match Configuration::from_json(&bytes, materialization) {
            Ok(configuration) => Some(configuration),
            Err(err) => {
                log::warn!(target: "eppo",
                           path:? = self.path,
                           err:display;
                           "ignoring corrupt cached configuration");
                None
            }
        }
    }
}

fn write_atomically(path: &Path, configuration: &Configuration) -> std::io::Result<()> {
    let json = configuration.to_json()?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    fs::write(&tmp_path, json)?;
    fs::rename(&tmp_path, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{ConfigDecoder, WireFormat};

    const UFC: &str = r#"{
        "flags": {
            "kill-switch": {
                "key": "kill-switch",
                "enabled": true,
                "variationType": "BOOLEAN",
                "variations": {"on": {"key": "on", "value": true}},
                "allocations": [],
                "totalShards": 10000
            }
        }
    }"#;

    fn configuration() -> Arc<Configuration> {
        Arc::new(Configuration::from_flags(
            ConfigDecoder::new(WireFormat::Json, UFC.as_bytes(), Materialization::Lazy).unwrap(),
        ))
    }

    #[test]
    fn writes_and_reads_back() {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = tempfile::tempdir().unwrap();
        let persistence =
            ConfigurationPersistence::new(dir.path().join("nested").join("configuration.json"))
                .unwrap();

        let configuration = configuration();
        persistence.save(configuration.clone());
        persistence.flush();

        let loaded = persistence.load(Materialization::Lazy).unwrap();
        assert_eq!(loaded.fetched_at, configuration.fetched_at);
        assert!(loaded.flag_keys().contains("kill-switch"));
        assert!(!dir.path().join("nested").join("configuration.json.tmp").exists());
    }

    #[test]
    fn rewriting_same_configuration_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("configuration.json");
        let persistence = ConfigurationPersistence::new(&path).unwrap();

        let configuration = configuration();
        persistence.save(configuration.clone());
        persistence.flush();
        let first = fs::read(&path).unwrap();

        persistence.save(configuration);
        persistence.flush();
        assert_eq!(fs::read(&path).unwrap(), first);
    }

    #[test]
    fn missing_or_corrupt_file_is_none() {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("configuration.json");
        let persistence = ConfigurationPersistence::new(&path).unwrap();

        assert!(persistence.load(Materialization::Lazy).is_none());

        fs::write(&path, b"{\"fetchedAt\": ").unwrap();
        assert!(persistence.load(Materialization::Lazy).is_none());
    }

    #[test]
    fn flush_without_writes_returns() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = ConfigurationPersistence::new(dir.path().join("c.json")).unwrap();
        persistence.flush();
        assert!(persistence.load(Materialization::Prewarmed).is_none());
    }

    #[test]
    fn write_failures_are_only_logged() {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = tempfile::tempdir().unwrap();
        // The parent "directory" is a regular file, so every write fails.
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"").unwrap();
        let persistence =
            ConfigurationPersistence::new(blocker.join("configuration.json")).unwrap();

        persistence.save(configuration());
        persistence.flush();
        assert!(persistence.load(Materialization::Lazy).is_none());

        // The thread survives the failure and keeps serving requests.
        persistence.flush();
    }
}
