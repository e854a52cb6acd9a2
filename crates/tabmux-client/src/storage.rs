//! Persistence of finished recordings.
//!
//! Recordings are stored as asciicast files at `<root>/<tabId>/<name>.cast`.
//! The default root is `<data-dir>/tabmux/recordings`.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use std::time::SystemTime;

use tabmux_core::{MuxError, MuxResult};

const CAST_EXTENSION: &str = "cast";
const MAX_NAME_LEN: usize = 128;

/// A stored recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingInfo {
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    pub modified: SystemTime,
}

/// Where finished recordings go.
pub trait RecordingStore: Send {
    /// Store a new recording. Fails if `name` is already taken for the tab.
    fn save(&mut self, tab_id: &str, name: &str, cast: &str) -> MuxResult<()>;
    /// Recordings of a tab, newest first. Unknown tabs have none.
    fn list(&self, tab_id: &str) -> MuxResult<Vec<RecordingInfo>>;
    fn load(&self, tab_id: &str, name: &str) -> MuxResult<String>;
    fn delete(&mut self, tab_id: &str, name: &str) -> MuxResult<()>;
}

/// Check that a tab id or recording name is a plain file name.
pub fn validate_name(name: &str) -> MuxResult<()> {
    let ok = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(MuxError::InvalidName(name.to_string()))
    }
}

/// File-backed recording store.
#[derive(Debug, Clone)]
pub struct FsRecordingStore {
    root: PathBuf,
}

impl FsRecordingStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store under `<data-dir>/tabmux/recordings`.
    pub fn default_location() -> MuxResult<Self> {
        let data = dirs::data_dir()
            .ok_or_else(|| MuxError::Other("cannot determine data directory".into()))?;
        Ok(Self::new(data.join("tabmux").join("recordings")))
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    /// Tabs that have a recordings directory, sorted.
    pub fn tabs(&self) -> MuxResult<Vec<String>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut tabs = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if validate_name(name).is_ok() {
                    tabs.push(name.to_string());
                }
            }
        }
        tabs.sort();
        Ok(tabs)
    }

    /// Path of a recording file. Both components are validated.
    pub fn path_of(&self, tab_id: &str, name: &str) -> MuxResult<PathBuf> {
        validate_name(tab_id)?;
        validate_name(name)?;
        Ok(self
            .root
            .join(tab_id)
            .join(format!("{name}.{CAST_EXTENSION}")))
    }

    fn tab_dir(&self, tab_id: &str) -> MuxResult<PathBuf> {
        validate_name(tab_id)?;
        Ok(self.root.join(tab_id))
    }
}

fn persistence(action: &str, target: &std::path::Path, err: std::io::Error) -> MuxError {
    MuxError::Persistence(format!("{action} {}: {err}", target.display()))
}

impl RecordingStore for FsRecordingStore {
    fn save(&mut self, tab_id: &str, name: &str, cast: &str) -> MuxResult<()> {
        let path = self.path_of(tab_id, name)?;
        let dir = self.tab_dir(tab_id)?;
        fs::create_dir_all(&dir).map_err(|e| persistence("create", &dir, e))?;
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => MuxError::Persistence(format!(
                    "recording '{name}' already exists for tab '{tab_id}'"
                )),
                _ => persistence("create", &path, e),
            })?;
        file.write_all(cast.as_bytes())
            .map_err(|e| persistence("write", &path, e))?;
        tracing::debug!(path = %path.display(), bytes = cast.len(), "recording saved");
        Ok(())
    }

    fn list(&self, tab_id: &str) -> MuxResult<Vec<RecordingInfo>> {
        let dir = self.tab_dir(tab_id)?;
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut recordings = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(CAST_EXTENSION) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match fs::metadata(&path) {
                Ok(meta) => recordings.push(RecordingInfo {
                    name: name.to_string(),
                    size: meta.len(),
                    modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                }),
                Err(e) => {
                    tracing::warn!("skipping unreadable recording '{}': {}", name, e);
                }
            }
        }
        recordings.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.name.cmp(&a.name)));
        Ok(recordings)
    }

    fn load(&self, tab_id: &str, name: &str) -> MuxResult<String> {
        let path = self.path_of(tab_id, name)?;
        if !path.exists() {
            return Err(MuxError::Persistence(format!("no recording '{name}' for tab '{tab_id}'")));
        }
        fs::read_to_string(&path).map_err(|e| persistence("read", &path, e))
    }

    fn delete(&mut self, tab_id: &str, name: &str) -> MuxResult<()> {
        let path = self.path_of(tab_id, name)?;
        if !path.exists() {
            return Err(MuxError::Persistence(format!("no recording '{name}' for tab '{tab_id}'")));
        }
        fs::remove_file(&path).map_err(|e| persistence("remove", &path, e))
    }
}


#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::time::Duration;

    use super::*;

    const CAST: &str = "{\"version\":2,\"width\":80,\"height\":24}\n[1.0,\"o\",\"hi\"]\n";

    #[test]
    fn names_are_validated() {
        for ok in ["rec-1700000000000", "tab_1", "build.log"] {
            assert!(validate_name(ok).is_ok(), "{ok}");
        }
        for bad in ["", "..", ".hidden", "a/b", "a\\b", "sp ace", &"x".repeat(129)] {
            assert!(matches!(validate_name(bad), Err(MuxError::InvalidName(_))), "{bad}");
        }
    }

    #[test]
    fn save_load_delete() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = FsRecordingStore::new(tmp.path());

        store.save("t1", "first", CAST).unwrap();
        assert!(tmp.path().join("t1").join("first.cast").is_file());
        assert_eq!(store.load("t1", "first").unwrap(), CAST);
        assert_eq!(store.tabs().unwrap(), vec!["t1".to_string()]);

        store.delete("t1", "first").unwrap();
        assert!(store.load("t1", "first").is_err());
        assert!(store.delete("t1", "first").is_err());
    }

    #[test]
    fn save_never_overwrites() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = FsRecordingStore::new(tmp.path());
        store.save("t1", "rec", CAST).unwrap();
        let err = store.save("t1", "rec", "replacement").unwrap_err();
        assert!(matches!(err, MuxError::Persistence(ref m) if m.contains("already exists")), "{err}");
        assert_eq!(store.load("t1", "rec").unwrap(), CAST);
    }

    #[test]
    fn traversal_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = FsRecordingStore::new(tmp.path().join("root"));
        assert!(store.save("t1", "../escape", CAST).is_err());
        assert!(store.save("..", "x", CAST).is_err());
        assert!(!tmp.path().join("escape.cast").exists());
    }

    #[test]
    fn list_is_newest_first() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = FsRecordingStore::new(tmp.path());
        store.save("t1", "old", CAST).unwrap();
        store.save("t1", "new", CAST).unwrap();
        fs::write(tmp.path().join("t1").join("notes.txt"), "ignored").unwrap();

        let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        File::options()
            .write(true)
            .open(store.path_of("t1", "old").unwrap())
            .unwrap()
            .set_modified(base)
            .unwrap();
        File::options()
            .write(true)
            .open(store.path_of("t1", "new").unwrap())
            .unwrap()
            .set_modified(base + Duration::from_secs(60))
            .unwrap();

        let names: Vec<_> = store.list("t1").unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["new", "old"]);
        assert_eq!(store.list("t1").unwrap()[0].size, CAST.len() as u64);
    }

    #[test]
    fn missing_directory_lists_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsRecordingStore::new(tmp.path().join("absent"));
        assert!(store.list("t1").unwrap().is_empty());
        assert!(store.tabs().unwrap().is_empty());
    }

    #[test]
    fn unwritable_root_is_a_persistence_error() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("occupied");
        fs::write(&file, "").unwrap();
        let mut store = FsRecordingStore::new(&file);
        assert!(matches!(
            store.save("t1", "rec", CAST),
            Err(MuxError::Persistence(_))
        ));
    }
}
