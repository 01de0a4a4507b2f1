//! Durable checkpoint of `(Corpus, CoverageMap)` (`spec.md` §4.7).

use crate::corpus::Corpus;
use crate::coverage::CoverageMap;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

/// Bumped whenever the on-disk layout changes in a way that isn't
/// round-trip compatible. `load` refuses any other value outright.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SessionStateFile {
    schema_version: u32,
    corpus: Vec<Vec<u8>>,
    coverage: Vec<((u64, u64), u64)>,
}

/// The persistable pair the orchestrator owns exclusively.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub corpus: Corpus,
    pub coverage: CoverageMap,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a checkpoint if `path` exists; otherwise returns empty state.
    /// Refuses (rather than silently discarding) a state file with an
    /// unrecognized schema version or that fails to deserialize.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let bytes = std::fs::read(path)?;
        let file: SessionStateFile =
            bincode::deserialize(&bytes).map_err(|source| Error::StateCorrupt {
                path: path.to_path_buf(),
                source,
            })?;
        if file.schema_version != CURRENT_SCHEMA_VERSION {
            return Err(Error::StateSchemaMismatch {
                path: path.to_path_buf(),
                found: file.schema_version,
                expected: CURRENT_SCHEMA_VERSION,
            });
        }
        Ok(Self {
            corpus: Corpus::from_samples(file.corpus),
            coverage: CoverageMap::from_pairs(file.coverage),
        })
    }

    /// Serializes to `path` atomically: write to a temp sibling, fsync,
    /// rename over the destination.
    pub fn save_atomically(&self, path: &Path) -> Result<()> {
        let file = SessionStateFile {
            schema_version: CURRENT_SCHEMA_VERSION,
            corpus: self.corpus.iter().cloned().collect(),
            coverage: self.coverage.to_pairs(),
        };
        let bytes = bincode::serialize(&file).expect("in-memory state always serializes");

        let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
        let mut tmp = match dir {
            Some(dir) => tempfile::NamedTempFile::new_in(dir)?,
            None => tempfile::NamedTempFile::new()?,
        };
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.bin");

        let mut state = SessionState::new();
        state.corpus.put(b"seed one".to_vec());
        state.corpus.put(b"seed two".to_vec());
        state.coverage.observe((1, 2));
        state.coverage.observe((3, 4));

        state.save_atomically(&path).unwrap();
        let loaded = SessionState::load_or_default(&path).unwrap();

        assert_eq!(loaded.corpus.len(), state.corpus.len());
        assert_eq!(loaded.coverage.size(), state.coverage.size());
        for sample in state.corpus.iter() {
            assert!(loaded.corpus.contains(sample));
        }
    }

    #[test]
    fn missing_file_is_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let state = SessionState::load_or_default(&dir.path().join("missing.bin")).unwrap();
        assert_eq!(state.corpus.len(), 0);
        assert_eq!(state.coverage.size(), 0);
    }

    #[test]
    fn rejects_unknown_schema_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.bin");
        let bogus = SessionStateFile {
            schema_version: CURRENT_SCHEMA_VERSION + 1,
            corpus: vec![],
            coverage: vec![],
        };
        std::fs::write(&path, bincode::serialize(&bogus).unwrap()).unwrap();

        let err = SessionState::load_or_default(&path).unwrap_err();
        assert!(matches!(err, Error::StateSchemaMismatch { .. }));
    }

    #[test]
    fn rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.bin");
        std::fs::write(&path, b"not a valid bincode payload at all, hopefully").unwrap();

        let err = SessionState::load_or_default(&path);
        assert!(err.is_err());
    }
}
