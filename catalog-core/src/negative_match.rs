//! Negative-match store: an append-only file of `(md5, md5)` pairs, memoized in RAM,
//! excluded from positive search results.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::error::NegativeMatchError;

pub struct NegativeMatchStore {
    path: PathBuf,
    file: File,
    /// md5 -> the other md5s it has been marked a negative match of. Built from disk on
    /// open; `is_match` checks both `(a, b)` and `(b, a)` independently rather than
    /// assuming this map was constructed symmetrically, as defense against a future bug
    /// in `load`.
    pairs: HashMap<String, Vec<String>>,
}

impl NegativeMatchStore {
    /// Opens (creating if absent) `<index-dir>/neg.dat`.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let pairs = Self::load(&path)?;
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file, pairs })
    }

    fn load(path: &Path) -> io::Result<HashMap<String, Vec<String>>> {
        let mut pairs: HashMap<String, Vec<String>> = HashMap::new();
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(pairs),
            Err(e) => return Err(e),
        };

        for line in BufReader::new(file).lines() {
            let line = line?;
            let Some((a, b)) = line.split_once(',') else { continue };
            pairs.entry(a.to_string()).or_default().push(b.to_string());
            pairs.entry(b.to_string()).or_default().push(a.to_string());
        }
        Ok(pairs)
    }

    /// `true` iff `(a, b)` is already a negative match, checked in both directions
    /// independently.
    pub fn is_match(&self, a: &str, b: &str) -> bool {
        self.pairs.get(a).is_some_and(|others| others.iter().any(|o| o == b))
            || self.pairs.get(b).is_some_and(|others| others.iter().any(|o| o == a))
    }

    /// Records `(a, b)` as a negative match. Refuses when `a == b` or the pair is
    /// already present. Appends to disk *before* mutating the in-memory map, so a crash
    /// between the two never yields a phantom in-memory-only entry.
    pub fn add(&mut self, a: &str, b: &str) -> Result<(), NegativeMatchError> {
        if a == b {
            return Err(NegativeMatchError::IdenticalMd5);
        }
        if self.is_match(a, b) {
            return Err(NegativeMatchError::AlreadyPresent);
        }

        writeln!(self.file, "{a},{b}")?;
        self.file.flush()?;

        self.pairs.entry(a.to_string()).or_default().push(b.to_string());
        self.pairs.entry(b.to_string()).or_default().push(a.to_string());
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(test)]
    fn reopen(path: impl Into<PathBuf>) -> io::Result<Self> {
        Self::open(path)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn symmetric_lookup() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = NegativeMatchStore::open(tmp.path().join("neg.dat")).unwrap();
        store.add("aaaa", "bbbb").unwrap();
        assert!(store.is_match("aaaa", "bbbb"));
        assert!(store.is_match("bbbb", "aaaa"));
        assert!(!store.is_match("aaaa", "cccc"));
    }

    #[test]
    fn rejects_identical_md5() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = NegativeMatchStore::open(tmp.path().join("neg.dat")).unwrap();
        assert_eq!(Err(NegativeMatchError::IdenticalMd5), store.add("aaaa", "aaaa"));
    }

    #[test]
    fn rejects_duplicate_pair() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = NegativeMatchStore::open(tmp.path().join("neg.dat")).unwrap();
        store.add("aaaa", "bbbb").unwrap();
        assert_eq!(Err(NegativeMatchError::AlreadyPresent), store.add("bbbb", "aaaa"));
    }

    #[test]
    fn persists_across_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("neg.dat");
        {
            let mut store = NegativeMatchStore::open(&path).unwrap();
            store.add("aaaa", "bbbb").unwrap();
        }
        let reopened = NegativeMatchStore::reopen(&path).unwrap();
        assert!(reopened.is_match("aaaa", "bbbb"));
    }
}
