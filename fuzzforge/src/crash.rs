//! Crash directory (`spec.md` §4.8).
//!
//! A flat directory, one file per distinct crashing input, named with the
//! lowercase hex SHA-256 of its bytes. Presence-based dedup via
//! `O_CREAT|O_EXCL`-equivalent (`create_new`).

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct CrashDirectory {
    dir: PathBuf,
}

impl CrashDirectory {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn fingerprint(bytes: &[u8]) -> String {
        let digest = Sha256::digest(bytes);
        hex_lower(&digest)
    }

    pub fn path_for(&self, bytes: &[u8]) -> PathBuf {
        self.dir.join(Self::fingerprint(bytes))
    }

    /// Writes `bytes` under its fingerprint if no such file exists yet.
    /// Returns `true` if this call actually created the file (i.e. this was
    /// a genuinely new crash, not a duplicate).
    pub fn record(&self, bytes: &[u8]) -> Result<bool> {
        let path = self.path_for(bytes);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(bytes).map_err(|source| Error::CrashWrite {
                    path: path.clone(),
                    source,
                })?;
                file.sync_all().ok();
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(source) => Err(Error::CrashWrite { path, source }),
        }
    }

    pub fn iter(&self) -> Result<impl Iterator<Item = PathBuf>> {
        let entries = std::fs::read_dir(&self.dir)?;
        Ok(entries.filter_map(|e| e.ok()).map(|e| e.path()))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn hex_lower(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn record_is_idempotent_and_content_is_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let crashes = CrashDirectory::open(dir.path()).unwrap();

        assert!(crashes.record(b"COBRA!!!").unwrap());
        assert!(!crashes.record(b"COBRA!!!").unwrap());

        let path = crashes.path_for(b"COBRA!!!");
        assert_eq!(std::fs::read(path).unwrap(), b"COBRA!!!");
    }

    #[test]
    fn filenames_are_lowercase_hex_sha256() {
        let dir = tempfile::tempdir().unwrap();
        let crashes = CrashDirectory::open(dir.path()).unwrap();
        crashes.record(b"hello").unwrap();

        let expected = CrashDirectory::fingerprint(b"hello");
        assert_eq!(expected.len(), 64);
        assert!(expected.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

        let files: Vec<_> = crashes.iter().unwrap().collect();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].file_name().unwrap().to_str().unwrap(), expected);
    }

    #[test]
    fn dedup_holds_regardless_of_caller_count() {
        let dir = tempfile::tempdir().unwrap();
        let crashes = CrashDirectory::open(dir.path()).unwrap();
        let mut created = 0;
        for _ in 0..8 {
            if crashes.record(b"always the same crash").unwrap() {
                created += 1;
            }
        }
        assert_eq!(created, 1);
        assert_eq!(crashes.iter().unwrap().count(), 1);
    }
}
