//! Component H — Version State Store.
//!
//! Persists the "what's actually cached on disk right now" facts the Update
//! Service needs to decide whether to check for, download, or roll back a
//! runtime version: one `StateFile` per cache root, keyed by `(product,
//! backend, rid)`, written with the same atomic `tmp → rename` idiom
//! [`super::state`] already uses for the single-recipe case. The schema is
//! deliberately independent of [`super::recipe::LmcppToolchainState`] — that
//! type fingerprints *one* build's CMake args, this one tracks *which*
//! version of *which* backend is active, pending, or known-bad.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::LmcppResult;

const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct StateKey {
    pub product: String,
    pub backend: String,
    pub rid: String,
}

impl StateKey {
    pub fn new(product: impl Into<String>, backend: impl Into<String>, rid: impl Into<String>) -> Self {
        Self {
            product: product.into(),
            backend: backend.into(),
            rid: rid.into(),
        }
    }

    /// The flat string this key serializes to as a JSON map key — JSON object
    /// keys must be strings, so the tuple is joined rather than nested.
    fn as_map_key(&self) -> String {
        format!("{}|{}|{}", self.product, self.backend, self.rid)
    }
}

/// One entry in [`VersionState::previous_versions`]: a version that used to
/// be installed, evicted by a later `activate`, kept around so `rollback` has
/// somewhere to go.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PreviousVersionEntry {
    pub version: String,
    pub path: PathBuf,
    pub installed_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionState {
    /// Currently active version. Empty string means nothing has ever been
    /// activated for this key.
    #[serde(default)]
    pub installed_version: String,
    #[serde(default)]
    pub installed_path: Option<PathBuf>,
    /// From the last successful remote check.
    #[serde(default)]
    pub latest_known_version: Option<String>,
    #[serde(default = "epoch")]
    pub last_version_check: chrono::DateTime<chrono::Utc>,
    /// Downloading, or downloaded but not yet active.
    #[serde(default)]
    pub pending_version: Option<String>,
    #[serde(default)]
    pub pending_path: Option<PathBuf>,
    /// `true` once `pending_*` is fully downloaded and verified.
    #[serde(default)]
    pub update_ready: bool,
    /// Newest first. Bounded by `max_keep` on every `activate`.
    #[serde(default)]
    pub previous_versions: Vec<PreviousVersionEntry>,
    /// Versions that must never be re-attempted as an update.
    #[serde(default)]
    pub failed_versions: HashSet<String>,
}

impl Default for VersionState {
    fn default() -> Self {
        Self {
            installed_version: String::new(),
            installed_path: None,
            latest_known_version: None,
            last_version_check: epoch(),
            pending_version: None,
            pending_path: None,
            update_ready: false,
            previous_versions: Vec::new(),
            failed_versions: HashSet::new(),
        }
    }
}

impl VersionState {
    fn new(initial_version: impl Into<String>) -> Self {
        Self {
            installed_version: initial_version.into(),
            last_version_check: epoch(),
            ..Default::default()
        }
    }

    /// `UpdateAvailable ⇔ latest_known_version ≠ null ∧ latest_known_version
    /// ≠ installed_version (case-insensitive) ∧ latest_known_version ∉
    /// failed_versions`.
    pub fn update_available(&self) -> bool {
        match &self.latest_known_version {
            None => false,
            Some(latest) => {
                !latest.eq_ignore_ascii_case(&self.installed_version)
                    && !self
                        .failed_versions
                        .iter()
                        .any(|f| f.eq_ignore_ascii_case(latest))
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateFile {
    #[serde(rename = "schemaVersion", default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub entries: HashMap<String, VersionState>,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

fn epoch() -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::UNIX_EPOCH
}

fn now() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}

/// File-backed, process-shared store of [`VersionState`] entries, one file
/// per cache root (mirroring [`super::recipe::LmcppRecipe`]'s one-file-per-
/// version layout, but holding every key that root has ever tracked). All
/// mutating operations serialize through `&mut self` and persist the whole
/// file atomically; corrupt JSON on disk is treated as empty state rather
/// than surfacing a parse error, so a reader can never be poisoned by a
/// half-written file left behind by a crash.
pub struct VersionStateStore {
    path: PathBuf,
    file: StateFile,
}

impl VersionStateStore {
    pub const FILE_NAME: &'static str = "version_state.json";
    /// Used when no explicit `max_keep` is passed to `activate`/`cleanup`.
    pub const DEFAULT_MAX_VERSIONS_TO_KEEP: usize = 5;

    pub fn open(root_dir: &Path) -> LmcppResult<Self> {
        let path = root_dir.join(Self::FILE_NAME);
        let file = Self::load_or_empty(&path);
        Ok(Self { path, file })
    }

    /// Corrupt or unreadable JSON is treated as empty state rather than
    /// surfaced as an error — a reader must never be poisoned by a
    /// half-written file a crash left behind.
    fn load_or_empty(path: &Path) -> StateFile {
        std::fs::read(path)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or_default()
    }

    fn persist(&self) -> LmcppResult<()> {
        super::state::store(&self.path, &self.file)
    }

    pub fn get_or_create(&mut self, key: &StateKey, initial_version: impl Into<String>) -> LmcppResult<VersionState> {
        let map_key = key.as_map_key();
        if !self.file.entries.contains_key(&map_key) {
            self.file.entries.insert(map_key.clone(), VersionState::new(initial_version));
            self.persist()?;
        }
        Ok(self.file.entries.get(&map_key).cloned().unwrap_or_default())
    }

    pub fn get(&self, key: &StateKey) -> Option<&VersionState> {
        self.file.entries.get(&key.as_map_key())
    }

    /// Records where `version` actually landed on disk, but only while the
    /// entry still has no `installed_path` for that version — the very first
    /// install after `get_or_create` seeded a bare `VersionState::new`. This
    /// is what lets a later `activate` push this path into `previous_versions`
    /// instead of finding `None` and silently discarding history.
    pub fn record_installed_path(&mut self, key: &StateKey, version: &str, path: impl Into<PathBuf>) -> LmcppResult<()> {
        let path = path.into();
        self.mutate(key, |state| {
            if state.installed_version == version && state.installed_path.is_none() {
                state.installed_path = Some(path);
            }
        })
    }

    /// Full replace of the entry for `key`.
    pub fn update(&mut self, key: &StateKey, state: VersionState) -> LmcppResult<()> {
        self.file.entries.insert(key.as_map_key(), state);
        self.persist()
    }

    /// Applies `f` to the entry for `key` (creating a fresh one if absent)
    /// and persists the whole file.
    fn mutate(&mut self, key: &StateKey, f: impl FnOnce(&mut VersionState)) -> LmcppResult<()> {
        let entry = self.file.entries.entry(key.as_map_key()).or_default();
        f(entry);
        self.persist()
    }

    pub fn record_version_check(&mut self, key: &StateKey, latest: Option<String>) -> LmcppResult<()> {
        self.mutate(key, |state| {
            if let Some(latest) = latest {
                state.latest_known_version = Some(latest);
            }
            state.last_version_check = now();
        })
    }

    pub fn mark_pending(&mut self, key: &StateKey, version: impl Into<String>) -> LmcppResult<()> {
        let version = version.into();
        self.mutate(key, |state| {
            state.pending_version = Some(version);
            state.update_ready = false;
        })
    }

    pub fn clear_pending(&mut self, key: &StateKey) -> LmcppResult<()> {
        self.mutate(key, |state| {
            state.pending_version = None;
            state.pending_path = None;
            state.update_ready = false;
        })
    }

    pub fn mark_ready(&mut self, key: &StateKey, version: impl Into<String>, path: impl Into<PathBuf>) -> LmcppResult<()> {
        let version = version.into();
        let path = path.into();
        self.mutate(key, |state| {
            state.pending_version = None;
            state.update_ready = true;
            state.pending_path = Some(path);
            state.latest_known_version = Some(version);
        })
    }

    /// Requires `update_ready`; no-op otherwise. Prepends the currently
    /// installed `{version, path, installed_at}` to `previous_versions`,
    /// trims the list to `max_keep`, then promotes `pending_*` (or, absent an
    /// explicit `pending_version`, `latest_known_version` plus the path
    /// already recorded by `mark_ready`) into `installed_*`.
    pub fn activate(&mut self, key: &StateKey, max_keep: usize) -> LmcppResult<()> {
        self.mutate(key, |state| {
            if !state.update_ready {
                return;
            }
            let Some(new_path) = state.pending_path.clone() else {
                return;
            };
            let new_version = state
                .pending_version
                .clone()
                .or_else(|| state.latest_known_version.clone())
                .unwrap_or_default();

            if let Some(old_path) = state.installed_path.clone() {
                state.previous_versions.insert(
                    0,
                    PreviousVersionEntry {
                        version: state.installed_version.clone(),
                        path: old_path,
                        installed_at: now(),
                    },
                );
                state.previous_versions.truncate(max_keep);
            }

            state.installed_version = new_version;
            state.installed_path = Some(new_path);
            state.pending_version = None;
            state.pending_path = None;
            state.update_ready = false;
        })
    }

    /// Marks `failed_version` as never-retry, then falls back to the head of
    /// `previous_versions` if one exists. Returns the restored version, or
    /// `None` if there was no history to roll back to (a true no-op in that
    /// case, besides recording the failure).
    pub fn rollback(&mut self, key: &StateKey, failed_version: impl Into<String>) -> LmcppResult<Option<String>> {
        let failed_version = failed_version.into();
        let mut restored = None;
        self.mutate(key, |state| {
            state.failed_versions.insert(failed_version.clone());
            state.pending_version = None;
            state.pending_path = None;
            state.update_ready = false;
            if !state.previous_versions.is_empty() {
                let prev = state.previous_versions.remove(0);
                state.installed_version = prev.version.clone();
                state.installed_path = Some(prev.path);
                restored = Some(prev.version);
            }
        })?;
        Ok(restored)
    }

    /// `true` if this key has never been checked, or its last check is
    /// `interval` or older.
    pub fn is_check_due(&self, key: &StateKey, interval: chrono::Duration) -> bool {
        match self.get(key) {
            None => true,
            Some(state) => now() - state.last_version_check >= interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> StateKey {
        StateKey::new("llama_cpp", "cuda12", "linux-x64")
    }

    #[test]
    fn fresh_store_has_no_active_version() {
        let tmp = tempfile::tempdir().unwrap();
        let store = VersionStateStore::open(tmp.path()).unwrap();
        assert!(store.get(&key()).is_none());
        assert!(store.is_check_due(&key(), chrono::Duration::hours(24)));
    }

    #[test]
    fn get_or_create_sets_initial_version() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = VersionStateStore::open(tmp.path()).unwrap();
        let state = store.get_or_create(&key(), "b6097").unwrap();
        assert_eq!(state.installed_version, "b6097");
        // idempotent: second call doesn't reset an already-advanced entry.
        store.record_version_check(&key(), Some("b6099".into())).unwrap();
        let state = store.get_or_create(&key(), "b0000").unwrap();
        assert_eq!(state.installed_version, "b6097");
    }

    /// Property 2 (activation monotonicity): after `activate`,
    /// `installed_version` equals the prior `latest_known_version`,
    /// `update_ready` is false, and `previous_versions` grew by one.
    #[test]
    fn activate_promotes_pending_and_pushes_history() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = VersionStateStore::open(tmp.path()).unwrap();
        store.get_or_create(&key(), "b6090").unwrap();
        store.mutate_for_test(&key(), |s| s.installed_path = Some(PathBuf::from("/cache/b6090")));

        store.mark_ready(&key(), "b6097", "/cache/b6097").unwrap();
        store.activate(&key(), 5).unwrap();

        let state = store.get(&key()).unwrap();
        assert_eq!(state.installed_version, "b6097");
        assert_eq!(state.installed_path.as_deref(), Some(Path::new("/cache/b6097")));
        assert!(!state.update_ready);
        assert_eq!(state.previous_versions.len(), 1);
        assert_eq!(state.previous_versions[0].version, "b6090");
    }

    /// Exercises the production call order — `get_or_create` then
    /// `record_installed_path`, with no hand-seeded field — to confirm a
    /// first-ever install still produces history on the next `activate`.
    #[test]
    fn record_installed_path_lets_first_activate_push_history() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = VersionStateStore::open(tmp.path()).unwrap();
        store.get_or_create(&key(), "b6090").unwrap();
        store.record_installed_path(&key(), "b6090", "/cache/b6090").unwrap();

        store.mark_ready(&key(), "b6097", "/cache/b6097").unwrap();
        store.activate(&key(), 5).unwrap();

        let state = store.get(&key()).unwrap();
        assert_eq!(state.installed_version, "b6097");
        assert_eq!(state.previous_versions.len(), 1);
        assert_eq!(state.previous_versions[0].version, "b6090");
        assert_eq!(state.previous_versions[0].path, Path::new("/cache/b6090"));
    }

    #[test]
    fn record_installed_path_does_not_clobber_an_existing_path() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = VersionStateStore::open(tmp.path()).unwrap();
        store.get_or_create(&key(), "b6090").unwrap();
        store.record_installed_path(&key(), "b6090", "/cache/first").unwrap();
        store.record_installed_path(&key(), "b6090", "/cache/second").unwrap();

        assert_eq!(store.get(&key()).unwrap().installed_path.as_deref(), Some(Path::new("/cache/first")));
    }

    #[test]
    fn activate_trims_previous_versions_to_max_keep() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = VersionStateStore::open(tmp.path()).unwrap();
        store.get_or_create(&key(), "b0").unwrap();
        store.mutate_for_test(&key(), |s| s.installed_path = Some(PathBuf::from("/cache/b0")));

        for i in 1..=4 {
            store.mark_ready(&key(), format!("b{i}"), format!("/cache/b{i}")).unwrap();
            store.activate(&key(), 2).unwrap();
        }

        let state = store.get(&key()).unwrap();
        assert_eq!(state.installed_version, "b4");
        assert_eq!(state.previous_versions.len(), 2);
        assert_eq!(state.previous_versions[0].version, "b3");
        assert_eq!(state.previous_versions[1].version, "b2");
    }

    /// Property 3 (rollback correctness).
    #[test]
    fn rollback_restores_head_of_history_and_records_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = VersionStateStore::open(tmp.path()).unwrap();
        store.get_or_create(&key(), "b6090").unwrap();
        store.mutate_for_test(&key(), |s| s.installed_path = Some(PathBuf::from("/cache/b6090")));
        store.mark_ready(&key(), "b6097", "/cache/b6097").unwrap();
        store.activate(&key(), 5).unwrap();

        let restored = store.rollback(&key(), "b6097").unwrap();
        assert_eq!(restored.as_deref(), Some("b6090"));

        let state = store.get(&key()).unwrap();
        assert_eq!(state.installed_version, "b6090");
        assert!(state.failed_versions.contains("b6097"));
        assert!(state.previous_versions.is_empty());
    }

    #[test]
    fn rollback_without_history_is_a_no_op_but_still_records_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = VersionStateStore::open(tmp.path()).unwrap();
        store.get_or_create(&key(), "b6097").unwrap();
        let restored = store.rollback(&key(), "b6097").unwrap();
        assert_eq!(restored, None);
        assert_eq!(store.get(&key()).unwrap().installed_version, "b6097");
        assert!(store.get(&key()).unwrap().failed_versions.contains("b6097"));
    }

    #[test]
    fn activate_without_update_ready_is_a_no_op() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = VersionStateStore::open(tmp.path()).unwrap();
        store.get_or_create(&key(), "b6090").unwrap();
        store.activate(&key(), 5).unwrap();
        assert_eq!(store.get(&key()).unwrap().installed_version, "b6090");
    }

    #[test]
    fn reopening_persists_state_across_instances() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let mut store = VersionStateStore::open(tmp.path()).unwrap();
            store.get_or_create(&key(), "b6090").unwrap();
            store.mark_ready(&key(), "b6097", "/cache/b6097").unwrap();
            store.activate(&key(), 5).unwrap();
        }
        let store = VersionStateStore::open(tmp.path()).unwrap();
        assert_eq!(store.get(&key()).unwrap().installed_version, "b6097");
    }

    #[test]
    fn pending_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = VersionStateStore::open(tmp.path()).unwrap();
        store.mark_pending(&key(), "b6099").unwrap();
        assert_eq!(store.get(&key()).unwrap().pending_version.as_deref(), Some("b6099"));
        store.clear_pending(&key()).unwrap();
        assert!(store.get(&key()).unwrap().pending_version.is_none());
    }

    /// Property 4 (`update_available` law).
    #[test]
    fn update_available_law() {
        let mut state = VersionState::new("b6097");
        assert!(!state.update_available());

        state.latest_known_version = Some("B6097".into());
        assert!(!state.update_available(), "case-insensitive equality to installed means no update");

        state.latest_known_version = Some("b6099".into());
        assert!(state.update_available());

        state.failed_versions.insert("b6099".into());
        assert!(!state.update_available(), "a failed version is never offered again");
    }

    #[test]
    fn corrupt_state_file_is_treated_as_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(VersionStateStore::FILE_NAME);
        std::fs::write(&path, b"{ not json").unwrap();
        let store = VersionStateStore::open(tmp.path()).unwrap();
        assert!(store.get(&key()).is_none());
    }

    #[test]
    fn is_check_due_respects_interval() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = VersionStateStore::open(tmp.path()).unwrap();
        store.record_version_check(&key(), Some("b6097".into())).unwrap();
        assert!(!store.is_check_due(&key(), chrono::Duration::hours(24)));
        assert!(store.is_check_due(&key(), chrono::Duration::zero()));
    }

    // Test-only convenience: direct field mutation without the activate/
    // mark_ready/rollback business rules, used to seed a pre-existing
    // `installed_path` the way a prior `activate` call would have.
    #[cfg(test)]
    impl VersionStateStore {
        fn mutate_for_test(&mut self, key: &StateKey, f: impl FnOnce(&mut VersionState)) {
            self.mutate(key, f).unwrap();
        }
    }
}
