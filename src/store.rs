use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};

use crate::bracket::{Bracket, MatchTree};
use crate::error::{BracketError, BracketResult};
use crate::types::{TournamentState, RECORD_FILE_NAME};
use crate::voting::VoteBook;

/// Everything one commit writes: the build record, the live tree, the
/// tournament state and the votes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TournamentRecord {
    pub bracket: Bracket,
    pub tree: MatchTree,
    pub state: TournamentState,
    #[serde(default)]
    pub votes: VoteBook,
}

/// Durable home of a [`TournamentRecord`]. `save` either persists the whole
/// record or fails leaving the previous one readable.
pub trait Persistence: Send {
    fn load(&self) -> BracketResult<Option<TournamentRecord>>;
    fn save(&mut self, record: &TournamentRecord) -> BracketResult<()>;
    fn describe(&self) -> String;
}

#[derive(Default)]
pub struct MemoryStore {
    record: Option<TournamentRecord>,
    fail_saves: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Make every following `save` fail, for exercising abort paths.
    pub fn failing() -> Self {
        MemoryStore {
            record: None,
            fail_saves: true,
        }
    }

    pub fn with_record(record: TournamentRecord) -> Self {
        MemoryStore {
            record: Some(record),
            fail_saves: false,
        }
    }
}

impl Persistence for MemoryStore {
    fn load(&self) -> BracketResult<Option<TournamentRecord>> {
        Ok(self.record.clone())
    }

    fn save(&mut self, record: &TournamentRecord) -> BracketResult<()> {
        if self.fail_saves {
            return Err(BracketError::Storage("memory store is read-only".to_string()));
        }
        self.record = Some(record.clone());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Pretty JSON on disk, replaced via a temp file and rename.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonFileStore { path: path.into() }
    }

    pub fn in_dir(dir: &Path) -> Self {
        JsonFileStore::new(dir.join(RECORD_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| RECORD_FILE_NAME.into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl Persistence for JsonFileStore {
    fn load(&self) -> BracketResult<Option<TournamentRecord>> {
        if !self.path.is_file() {
            return Ok(None);
        }
        let data = fs::read_to_string(&self.path)
            .map_err(|e| BracketError::Storage(format!("read {}: {e}", self.path.display())))?;
        let record = serde_json::from_str::<TournamentRecord>(&data)
            .map_err(|e| BracketError::Storage(format!("parse {}: {e}", self.path.display())))?;
        Ok(Some(record))
    }

    fn save(&mut self, record: &TournamentRecord) -> BracketResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    BracketError::Storage(format!("create {}: {e}", parent.display()))
                })?;
            }
        }
        let payload = serde_json::to_string_pretty(record)
            .map_err(|e| BracketError::Storage(e.to_string()))?;
        let tmp = self.temp_path();
        if let Err(e) = write_synced(&tmp, payload.as_bytes()) {
            let _ = fs::remove_file(&tmp);
            return Err(BracketError::Storage(format!("write {}: {e}", tmp.display())));
        }
        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(BracketError::Storage(format!(
                "replace {}: {e}",
                self.path.display()
            )));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Data is on disk before the rename makes it visible.
fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bracket::build;
    use crate::round_engine::initialize;
    use crate::types::Entrant;

    fn sample_record() -> TournamentRecord {
        let entrants: Vec<Entrant> = (0..8).map(|i| Entrant::new(2000 + i, 80.0 - i as f64)).collect();
        let bracket = build(&entrants, 8).unwrap();
        let (tree, state) = initialize(&bracket);
        let mut votes = VoteBook::new();
        votes.record(1, "voter-1", 2000, chrono::Utc::now());
        TournamentRecord {
            bracket,
            tree,
            state,
            votes,
        }
    }

    #[test]
    fn file_store_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::in_dir(dir.path());
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn file_store_persists_the_whole_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonFileStore::in_dir(&dir.path().join("nested"));
        let record = sample_record();
        store.save(&record).unwrap();

        let reopened = JsonFileStore::in_dir(&dir.path().join("nested"));
        let loaded = reopened.load().unwrap().unwrap();
        assert_eq!(loaded, record);
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn file_store_reports_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::in_dir(dir.path());
        fs::write(store.path(), "{ not json").unwrap();
        assert!(matches!(store.load(), Err(BracketError::Storage(_))));
    }

    #[test]
    fn saving_again_replaces_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonFileStore::in_dir(dir.path());
        let mut record = sample_record();
        store.save(&record).unwrap();
        record.state.version = 7;
        store.save(&record).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.state.version, 7);
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn failed_replace_cleans_up_the_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("occupied");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("keep"), "x").unwrap();
        let mut store = JsonFileStore::new(&target);

        assert!(matches!(store.save(&sample_record()), Err(BracketError::Storage(_))));
        assert!(!store.temp_path().exists());
        assert!(target.join("keep").is_file());
    }

    #[test]
    fn failing_memory_store_keeps_nothing() {
        let mut store = MemoryStore::failing();
        assert!(store.save(&sample_record()).is_err());
        assert_eq!(store.load().unwrap(), None);
    }
}
