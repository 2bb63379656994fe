use super::{StateError, StateResult, StateSnapshot, StateStore};
use log::{error, info};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// State file used when none is configured.
pub const DEFAULT_STATE_FILE: &str = ".state.json";

/// State store backed by one pretty-printed JSON file.
///
/// Saves go through a sibling temp file and a rename so a crash mid-write
/// leaves the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct JsonFileStateStore {
    path: PathBuf,
}

impl JsonFileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> StateResult<Option<StateSnapshot>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StateError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        if text.trim().is_empty() {
            return Ok(Some(StateSnapshot::default()));
        }
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|source| StateError::Corrupt {
                path: self.path.clone(),
                source,
            })
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl StateStore for JsonFileStateStore {
    fn load(&self) -> StateResult<StateSnapshot> {
        let snapshot = self.read()?;
        info!(
            "event=state_load module=state status=ok path={} found={}",
            self.path.display(),
            snapshot.is_some()
        );
        Ok(snapshot.unwrap_or_default())
    }

    fn load_required(&self) -> StateResult<StateSnapshot> {
        self.read()?
            .ok_or_else(|| StateError::Missing(self.path.clone()))
    }

    fn save(&self, snapshot: &StateSnapshot) -> StateResult<()> {
        let mut text = serde_json::to_string_pretty(snapshot).map_err(StateError::Encode)?;
        text.push('\n');

        let temp_path = self.temp_path();
        let result = fs::write(&temp_path, text).and_then(|()| fs::rename(&temp_path, &self.path));
        match result {
            Ok(()) => {
                info!(
                    "event=state_save module=state status=ok path={} databases={} pages={}",
                    self.path.display(),
                    snapshot.databases.len(),
                    snapshot.pages.ids.len()
                );
                Ok(())
            }
            Err(source) => {
                error!(
                    "event=state_save module=state status=error path={} error={}",
                    self.path.display(),
                    source
                );
                Err(StateError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::JsonFileStateStore;
    use crate::model::resource::ResourceKind;
    use crate::state::{StateError, StateStore};
    use uuid::Uuid;

    #[test]
    fn absent_file_loads_as_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStateStore::new(dir.path().join("state.json"));

        let snapshot = store.load().unwrap();
        assert!(snapshot.databases.is_empty());
        assert!(!snapshot.pages.created);
        assert!(matches!(store.load_required(), Err(StateError::Missing(_))));
    }

    #[test]
    fn save_then_load_returns_same_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStateStore::new(dir.path().join("state.json"));
        let id = Uuid::new_v4();

        let mut snapshot = store.load().unwrap();
        snapshot.record(ResourceKind::Database, "Night Desk — Tasks", id);
        store.save(&snapshot).unwrap();

        let reloaded = store.load_required().unwrap();
        assert_eq!(reloaded, snapshot);
        assert!(!dir.path().join("state.json.tmp").exists());
    }

    #[test]
    fn write_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStateStore::new(dir.path().join("missing").join("state.json"));

        let err = store.save(&Default::default()).unwrap_err();
        assert!(matches!(err, StateError::Io { .. }));
    }

    #[test]
    fn corrupt_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = JsonFileStateStore::new(path).load().unwrap_err();
        assert!(matches!(err, StateError::Corrupt { .. }));
    }
}
