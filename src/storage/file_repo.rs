//! File-backed delta repository
//!
//! The whole repository (delta log plus references) lives in one MessagePack
//! file. Every mutation writes a complete new image to a temporary file in
//! the same directory and renames it over the old one, so readers only ever
//! see the state before or after a write.

use crate::core::{RealmError, Result};
use crate::delta::repo::DeltaLog;
use crate::delta::{Delta, DeltaId, DeltaRepo, DeltaSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

pub const REPO_FILE_NAME: &str = "deltas.repo";
const REPO_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct RepoImage {
    version: u32,
    deltas: Vec<Delta>,
    refs: BTreeMap<String, DeltaId>,
}

pub struct FileDeltaRepo {
    path: PathBuf,
    log: DeltaLog,
}

impl FileDeltaRepo {
    /// Open the repository stored in `dir`, creating the directory if needed
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|e| {
            RealmError::Io(format!("Failed to create repository directory: {}", e))
        })?;

        let path = dir.join(REPO_FILE_NAME);
        let log = if path.exists() {
            Self::read_image(&path)?
        } else {
            DeltaLog::default()
        };

        debug!(path = %path.display(), deltas = log.deltas().len(), "opened delta repository");
        Ok(Self { path, log })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Named references and the deltas they point at
    pub fn refs(&self) -> &BTreeMap<String, DeltaId> {
        self.log.refs()
    }

    fn read_image(path: &Path) -> Result<DeltaLog> {
        let data = fs::read(path)
            .map_err(|e| RealmError::Io(format!("Failed to read delta repository: {}", e)))?;
        let image: RepoImage = rmp_serde::from_slice(&data).map_err(|e| {
            RealmError::Serialization(format!("Failed to deserialize delta repository: {}", e))
        })?;

        if image.version != REPO_FORMAT_VERSION {
            return Err(RealmError::DeltaRepo(format!(
                "unsupported repository format version {}",
                image.version
            )));
        }

        DeltaLog::from_parts(image.deltas, image.refs)
    }

    fn write_image(&self, log: &DeltaLog) -> Result<()> {
        let image = RepoImage {
            version: REPO_FORMAT_VERSION,
            deltas: log.deltas().to_vec(),
            refs: log.refs().clone(),
        };
        let serialized = rmp_serde::to_vec_named(&image).map_err(|e| {
            RealmError::Serialization(format!("Failed to serialize delta repository: {}", e))
        })?;

        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp = NamedTempFile::new_in(dir)
            .map_err(|e| RealmError::Io(format!("Failed to create temp file: {}", e)))?;
        temp.write_all(&serialized)
            .map_err(|e| RealmError::Io(format!("Failed to write delta repository: {}", e)))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| RealmError::Io(format!("Failed to sync delta repository: {}", e)))?;
        temp.persist(&self.path)
            .map_err(|e| RealmError::Io(format!("Failed to replace delta repository: {}", e)))?;
        Ok(())
    }

    /// Run `change` against a copy of the log and keep it only if the new
    /// image reached disk.
    fn commit_change<F>(&mut self, change: F) -> Result<()>
    where
        F: FnOnce(&mut DeltaLog) -> Result<()>,
    {
        let mut next = self.log.clone();
        change(&mut next)?;
        self.write_image(&next)?;
        self.log = next;
        Ok(())
    }
}

impl DeltaRepo for FileDeltaRepo {
    fn write_delta(&mut self, delta: &Delta) -> Result<()> {
        self.commit_change(|log| log.append(delta.clone()))
    }

    fn update_delta_ref(&mut self, name: &str, id: &DeltaId) -> Result<()> {
        self.commit_change(|log| log.set_ref(name, id))
    }

    fn get_delta_ref(&self, name: &str) -> Result<Option<DeltaId>> {
        Ok(self.log.get_ref(name).cloned())
    }

    fn load_delta(&self, id: &DeltaId) -> Result<Option<Delta>> {
        Ok(self.log.get(id).cloned())
    }

    fn history(&self) -> Result<Vec<Delta>> {
        Ok(self.log.deltas().to_vec())
    }

    fn write_delta_set(&mut self, deltas: &DeltaSet, ref_name: &str) -> Result<()> {
        self.commit_change(|log| log.append_set(deltas, ref_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::{DeltaCommand, HEAD_REF};
    use tempfile::TempDir;

    fn delta(id: &str) -> Delta {
        Delta::with_id(id, vec![DeltaCommand::CreateModule { name: id.to_string() }])
    }

    #[test]
    fn test_reopen_restores_state() {
        let temp_dir = TempDir::new().unwrap();
        let first = delta("a");

        {
            let mut repo = FileDeltaRepo::open(temp_dir.path()).unwrap();
            repo.write_delta(&first).unwrap();
            repo.write_delta(&delta("b")).unwrap();
            repo.update_delta_ref(HEAD_REF, &"b".into()).unwrap();
        }

        let repo = FileDeltaRepo::open(temp_dir.path()).unwrap();
        assert_eq!(repo.get_delta_ref(HEAD_REF).unwrap(), Some("b".into()));
        assert_eq!(repo.history().unwrap().len(), 2);
        assert_eq!(repo.load_delta(&"a".into()).unwrap(), Some(first));
    }

    #[test]
    fn test_failed_set_leaves_no_trace() {
        let temp_dir = TempDir::new().unwrap();
        let mut repo = FileDeltaRepo::open(temp_dir.path()).unwrap();
        repo.write_delta(&delta("a")).unwrap();

        // "a" is a duplicate, so the whole set is refused
        let set = DeltaSet::new(vec![delta("b"), delta("a")]);
        assert!(repo.write_delta_set(&set, HEAD_REF).is_err());

        assert!(repo.load_delta(&"b".into()).unwrap().is_none());
        let reopened = FileDeltaRepo::open(temp_dir.path()).unwrap();
        assert_eq!(reopened.history().unwrap().len(), 1);
        assert_eq!(reopened.get_delta_ref(HEAD_REF).unwrap(), None);
    }

    #[test]
    fn test_corrupt_file_reported() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join(REPO_FILE_NAME), b"not msgpack").unwrap();

        assert!(matches!(
            FileDeltaRepo::open(temp_dir.path()),
            Err(RealmError::Serialization(_))
        ));
    }
}
