//! Persisted settings document and the per-surface read/write path
//!
//! Every surface reads the document directly (boot, focus, periodic poll) in
//! addition to listening on the bus. Reads never fail outward: a broken or
//! unreadable document falls back to the last good copy this surface saw,
//! then to the on-disk backup cache, then to the hardcoded defaults.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::SettingsSnapshot;
use crate::constants::paths;
use crate::error::ShellError;

pub trait SettingsStore: Send + Sync {
    /// Read the document. A missing or empty (`{}`) document is the default snapshot.
    fn load(&self) -> Result<SettingsSnapshot>;

    fn save(&self, snapshot: &SettingsSnapshot) -> Result<()>;
}

/// JSON document on disk
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `$SIS_SHELL_SETTINGS`, else `<config dir>/sis-shell/settings.json`
    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var(paths::SETTINGS_ENV)
            && !path.trim().is_empty()
        {
            return PathBuf::from(path);
        }
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(paths::APP_DIR);
        path.push(paths::SETTINGS_FILENAME);
        path
    }

    /// `<cache dir>/sis-shell/settings-cache.json`
    pub fn cache_path() -> PathBuf {
        let mut path = dirs::cache_dir().unwrap_or_else(std::env::temp_dir);
        path.push(paths::APP_DIR);
        path.push(paths::CACHE_FILENAME);
        path
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for JsonFileStore {
    fn load(&self) -> Result<SettingsSnapshot> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No settings document, using defaults");
            return Ok(SettingsSnapshot::default());
        }
        let contents = fs::read_to_string(&self.path)
            .context(format!("Failed to read settings from {}", self.path.display()))?;
        if contents.trim().is_empty() {
            return Ok(SettingsSnapshot::default());
        }
        SettingsSnapshot::from_json(&contents)
            .context(format!("Failed to parse settings in {}", self.path.display()))
    }

    fn save(&self, snapshot: &SettingsSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .context(format!("Failed to create settings directory: {}", parent.display()))?;
        }
        let contents = snapshot.to_json()?;
        // Other surfaces poll this file; never let them see a half-written document
        let tmp = self.path.with_extension(format!("json.{}.tmp", std::process::id()));
        fs::write(&tmp, contents)
            .context(format!("Failed to write settings to {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .context(format!("Failed to move settings into place at {}", self.path.display()))?;
        Ok(())
    }
}

/// Where a direct read ended up coming from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSource {
    Store,
    Memory,
    BackupCache,
    Default,
}

/// Per-surface access to the persisted document with the read fallback chain
pub struct SettingsSync {
    store: Box<dyn SettingsStore>,
    backup: Option<Box<dyn SettingsStore>>,
    last_good: Option<SettingsSnapshot>,
}

impl SettingsSync {
    pub fn new(store: Box<dyn SettingsStore>, backup: Option<Box<dyn SettingsStore>>) -> Self {
        Self {
            store,
            backup,
            last_good: None,
        }
    }

    /// Document at the default location with the default backup cache
    pub fn from_default_paths() -> Self {
        let store = JsonFileStore::new(JsonFileStore::default_path());
        info!(path = %store.path().display(), "Using settings document");
        Self::new(
            Box::new(store),
            Some(Box::new(JsonFileStore::new(JsonFileStore::cache_path()))),
        )
    }

    /// Direct read of the persisted snapshot. Never fails.
    pub fn read(&mut self) -> (SettingsSnapshot, ReadSource) {
        match self.store.load() {
            Ok(snapshot) => {
                self.remember(&snapshot);
                (snapshot, ReadSource::Store)
            }
            Err(e) => {
                let failure = ShellError::SettingsRead(format!("{e:#}"));
                if let Some(snapshot) = &self.last_good {
                    warn!(error = %failure, rev = snapshot.rev, "Using last good settings");
                    return (snapshot.clone(), ReadSource::Memory);
                }
                if let Some(backup) = &self.backup {
                    match backup.load() {
                        Ok(snapshot) => {
                            warn!(error = %failure, rev = snapshot.rev, "Using backup settings cache");
                            self.last_good = Some(snapshot.clone());
                            return (snapshot, ReadSource::BackupCache);
                        }
                        Err(cache_err) => {
                            debug!(error = ?cache_err, "Backup settings cache unreadable");
                        }
                    }
                }
                warn!(error = %failure, "Using default settings");
                (SettingsSnapshot::default(), ReadSource::Default)
            }
        }
    }

    /// Persist `snapshot` with a revision above every revision this surface
    /// knows about, including whatever is on disk right now. Returns the
    /// snapshot as written; the caller broadcasts and applies it.
    ///
    /// An unreadable document is only overwritten when a last good copy
    /// supplies the revision to build on. Without one the new revision could
    /// land below what running surfaces already applied.
    pub fn save(&mut self, mut snapshot: SettingsSnapshot, known_rev: Option<u64>) -> Result<SettingsSnapshot> {
        let on_disk = match self.store.load() {
            Ok(current) => current.rev,
            Err(e) if self.last_good.is_none() => {
                return Err(ShellError::SettingsWrite(format!(
                    "existing document is unreadable and no earlier revision is known: {e:#}"
                ))
                .into());
            }
            Err(e) => {
                warn!(error = ?e, "Overwriting unreadable settings document");
                0
            }
        };
        let remembered = self.last_good.as_ref().map_or(0, |s| s.rev);
        let base = on_disk.max(remembered).max(known_rev.unwrap_or(0));
        snapshot.rev = base
            .checked_add(1)
            .ok_or_else(|| ShellError::SettingsWrite(format!("revision counter exhausted at {base}")))?;

        self.store
            .save(&snapshot)
            .map_err(|e| ShellError::SettingsWrite(format!("{e:#}")))?;
        info!(rev = snapshot.rev, theme = ?snapshot.theme, "Saved settings");

        self.remember(&snapshot);
        Ok(snapshot)
    }

    fn remember(&mut self, snapshot: &SettingsSnapshot) {
        if self.last_good.as_ref() == Some(snapshot) {
            return;
        }
        if let Some(backup) = &self.backup
            && let Err(e) = backup.save(snapshot)
        {
            debug!(error = ?e, "Failed to refresh backup settings cache");
        }
        self.last_good = Some(snapshot.clone());
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Shared in-memory document; clones see the same document
    #[derive(Clone, Default)]
    pub struct MemoryStore {
        document: Arc<Mutex<Option<SettingsSnapshot>>>,
        failing: Arc<Mutex<bool>>,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with(snapshot: SettingsSnapshot) -> Self {
            let store = Self::default();
            *store.document.lock().unwrap() = Some(snapshot);
            store
        }

        pub fn set_failing(&self, failing: bool) {
            *self.failing.lock().unwrap() = failing;
        }

        pub fn current(&self) -> Option<SettingsSnapshot> {
            self.document.lock().unwrap().clone()
        }
    }

    impl SettingsStore for MemoryStore {
        fn load(&self) -> Result<SettingsSnapshot> {
            if *self.failing.lock().unwrap() {
                anyhow::bail!("store offline");
            }
            Ok(self.current().unwrap_or_default())
        }

        fn save(&self, snapshot: &SettingsSnapshot) -> Result<()> {
            if *self.failing.lock().unwrap() {
                anyhow::bail!("store offline");
            }
            *self.document.lock().unwrap() = Some(snapshot.clone());
            Ok(())
        }
    }
}
