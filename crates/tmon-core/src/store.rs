//! Persisted watch set.
//!
//! The in-memory set is authoritative for the running process. Every mutation
//! is written to the primary file and then copied to `<primary>.backup`;
//! write failures are logged and otherwise ignored.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use crate::{
    domain::MonitoredSet,
    ids::{is_monitored, normalize},
    Result,
};

/// Primary + backup JSON files holding a `MonitoredSet`.
#[derive(Clone, Debug)]
pub struct SettingsFiles {
    primary: PathBuf,
    backup: PathBuf,
}

impl SettingsFiles {
    pub fn new(primary: impl Into<PathBuf>) -> Self {
        let primary = primary.into();
        let mut backup = primary.clone().into_os_string();
        backup.push(".backup");
        Self {
            primary,
            backup: PathBuf::from(backup),
        }
    }

    pub fn primary(&self) -> &Path {
        &self.primary
    }

    pub fn backup(&self) -> &Path {
        &self.backup
    }

    /// Load the watch set. Never fails: a missing or corrupt primary falls back
    /// to the backup, and if that is unusable too the set starts empty.
    pub fn load(&self) -> MonitoredSet {
        match read_set(&self.primary) {
            Ok(Some(set)) => {
                tracing::info!(count = set.len(), path = %self.primary.display(), "loaded watch set");
                return set;
            }
            Ok(None) => {
                tracing::info!(path = %self.primary.display(), "no settings file, starting with an empty watch set");
                return MonitoredSet::new();
            }
            Err(e) => {
                tracing::error!(path = %self.primary.display(), error = %e, "failed to load settings");
            }
        }

        match read_set(&self.backup) {
            Ok(Some(set)) => {
                tracing::warn!(count = set.len(), path = %self.backup.display(), "recovered watch set from backup");
                set
            }
            Ok(None) => MonitoredSet::new(),
            Err(e) => {
                tracing::error!(path = %self.backup.display(), error = %e, "backup unusable, starting empty");
                MonitoredSet::new()
            }
        }
    }

    /// Best-effort save of `set` to primary, then backup.
    pub fn save(&self, set: &MonitoredSet) {
        match self.try_save(set) {
            Ok(()) => tracing::info!(count = set.len(), "watch set saved"),
            Err(e) => tracing::error!(path = %self.primary.display(), error = %e, "failed to save settings"),
        }
    }

    fn try_save(&self, set: &MonitoredSet) -> Result<()> {
        let txt = serde_json::to_string(set)?;
        if let Some(dir) = self.primary.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        fs::write(&self.primary, &txt)?;
        fs::write(&self.backup, &txt)?;
        Ok(())
    }
}

fn read_set(path: &Path) -> Result<Option<MonitoredSet>> {
    if !path.exists() {
        return Ok(None);
    }
    let txt = fs::read_to_string(path)?;
    let set: MonitoredSet = serde_json::from_str(&txt)?;
    Ok(Some(set))
}

/// The watch set plus its persistence.
pub struct MonitoredSetStore {
    files: SettingsFiles,
    set: Mutex<MonitoredSet>,
}

impl MonitoredSetStore {
    pub fn open(files: SettingsFiles) -> Self {
        let set = files.load();
        Self {
            files,
            set: Mutex::new(set),
        }
    }

    pub fn files(&self) -> &SettingsFiles {
        &self.files
    }

    /// Watch `id` under its canonical key. Returns `false` if it was already present.
    pub fn add(&self, id: &str) -> bool {
        let key = normalize(id);
        self.mutate(|set| set.insert(key, true).is_none())
    }

    /// Stop watching `id`.
    ///
    /// `id` is normalized first and only the exact canonical key is removed, so
    /// a legacy short-form key is NOT reachable from here; see `remove_key`.
    pub fn remove(&self, id: &str) -> bool {
        self.remove_key(&normalize(id))
    }

    /// Remove the stored key `key` verbatim.
    pub fn remove_key(&self, key: &str) -> bool {
        let removed = self.mutate(|set| set.remove(key).is_some());
        if removed {
            tracing::info!(chat_id = key, "stopped watching chat");
        }
        removed
    }

    /// Remove every key in `keys`, persisting once. Returns the keys actually removed.
    pub fn remove_keys(&self, keys: &[String]) -> Vec<String> {
        self.mutate(|set| {
            keys.iter()
                .filter(|k| set.remove(k.as_str()).is_some())
                .cloned()
                .collect::<Vec<_>>()
        })
    }

    /// Stored key matching `id` under any of its encodings.
    pub fn matched_key(&self, id: &str) -> Option<String> {
        let set = self.lock();
        is_monitored(&set, id)
    }

    pub fn is_watched(&self, id: &str) -> bool {
        self.matched_key(id).is_some()
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn snapshot(&self) -> MonitoredSet {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Apply `f` and persist if the set changed. The lock is held across the
    /// write so saves land in mutation order.
    fn mutate<T>(&self, f: impl FnOnce(&mut MonitoredSet) -> T) -> T {
        let mut set = self.lock();
        let before = set.len();
        let out = f(&mut set);
        if set.len() != before {
            self.files.save(&set);
        }
        out
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MonitoredSet> {
        // A poisoned guard still holds a consistent map: every mutation is a
        // single insert/remove.
        self.set.lock().unwrap_or_else(|e| e.into_inner())
    }
}
