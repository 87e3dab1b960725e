//! Persisted session state.
//!
//! Only three things survive a restart: the last server URL, the serialized
//! credentials blob and the id of the player registered for this device.
//! Where they are stored is up to the shell; [`JsonFileSettingsStore`] covers
//! the common case.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::auth::StoredCredentials;
use crate::error::{EnsembleError, EnsembleResult};

const SETTINGS_FILE: &str = "session.json";

/// State needed to reconnect silently on the next launch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedSession {
    pub server_url: Option<String>,
    pub credentials: Option<StoredCredentials>,
    pub local_player_id: Option<String>,
}

/// Storage backend for [`PersistedSession`].
pub trait SettingsStore: Send + Sync {
    /// Loads the persisted session; missing or unreadable state is the default.
    fn load(&self) -> PersistedSession;

    /// Replaces the persisted session.
    ///
    /// # Errors
    /// `Configuration` if the state cannot be written.
    fn save(&self, session: &PersistedSession) -> EnsembleResult<()>;
}

/// JSON file in an app data directory.
pub struct JsonFileSettingsStore {
    dir: PathBuf,
    /// Serializes writers within this process.
    write_lock: Mutex<()>,
}

impl JsonFileSettingsStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.dir.join(SETTINGS_FILE)
    }

    fn write_atomic(dir: &Path, contents: &str) -> std::io::Result<()> {
        std::fs::create_dir_all(dir)?;
        let temp_path = dir.join("session.json.tmp");
        std::fs::write(&temp_path, contents)?;
        std::fs::rename(&temp_path, dir.join(SETTINGS_FILE))
    }
}

impl SettingsStore for JsonFileSettingsStore {
    fn load(&self) -> PersistedSession {
        let path = self.path();
        match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                log::warn!("[Settings] Ignoring corrupt {}: {}", path.display(), e);
                PersistedSession::default()
            }),
            Err(_) => PersistedSession::default(),
        }
    }

    fn save(&self, session: &PersistedSession) -> EnsembleResult<()> {
        let _guard = self.write_lock.lock();
        let contents = serde_json::to_string_pretty(session)?;
        Self::write_atomic(&self.dir, &contents).map_err(|e| {
            EnsembleError::Configuration(format!(
                "Failed to write {}: {}",
                self.path().display(),
                e
            ))
        })
    }
}

/// In-memory store for tests and shells without persistence.
#[derive(Default)]
pub struct MemorySettingsStore {
    session: Mutex<PersistedSession>,
}

impl MemorySettingsStore {
    pub fn new(session: PersistedSession) -> Self {
        Self {
            session: Mutex::new(session),
        }
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> PersistedSession {
        self.session.lock().clone()
    }

    fn save(&self, session: &PersistedSession) -> EnsembleResult<()> {
        *self.session.lock() = session.clone();
        Ok(())
    }
}
