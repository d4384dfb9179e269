use std::fmt;
use std::path::Path;

use crate::fingerprint::hamming::Hamming;

/// Identifies a single [`MediaRecord`] within a catalog. `0` is reserved to mean
/// "no id" and is never assigned by [`crate::record::store::RecordStore::next_id`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MediaId(u32);

impl MediaId {
    pub const NONE: MediaId = MediaId(0);

    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for MediaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u32> for MediaId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<MediaId> for u32 {
    fn from(value: MediaId) -> Self {
        value.0
    }
}

/// The kind of a single record. Represented as a bitmask (see [`KindMask`]) whenever a
/// query needs to target several kinds at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Kind {
    Image = 0b001,
    Video = 0b010,
    /// Reserved: no audio fingerprinting is implemented yet, but the bit is carved out so
    /// the on-disk `type` column and the query bitmask never need to be widened.
    Audio = 0b100,
}

impl Kind {
    pub const fn bit(self) -> u8 {
        self as u8
    }

    pub fn from_db(value: i64) -> Option<Self> {
        match value {
            0b001 => Some(Kind::Image),
            0b010 => Some(Kind::Video),
            0b100 => Some(Kind::Audio),
            _ => None,
        }
    }
}

/// A set of [`Kind`]s, used by queries that may target more than one kind at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindMask(u8);

impl KindMask {
    pub const ALL: KindMask = KindMask(0b111);

    pub const fn none() -> Self {
        Self(0)
    }

    pub const fn of(kind: Kind) -> Self {
        Self(kind.bit())
    }

    pub const fn with(self, kind: Kind) -> Self {
        Self(self.0 | kind.bit())
    }

    pub const fn contains(self, kind: Kind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub const fn raw(self) -> u8 {
        self.0
    }
}

impl From<Kind> for KindMask {
    fn from(kind: Kind) -> Self {
        KindMask::of(kind)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RelPathError {
    #[error("path is not valid UTF-8")]
    NotUtf8,
    #[error("path is empty")]
    Empty,
    #[error("path is absolute")]
    Absolute,
    #[error("path contains a doubled slash")]
    DoubledSlash,
}

/// A catalog-relative path: UTF-8, relative, never empty, and never containing `//`. May
/// additionally encode an archive member as `archive:member`, the convention used for
/// paths inside a zip/cbz.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct RelPath(String);

impl RelPath {
    pub fn new(path: impl Into<String>) -> Result<Self, RelPathError> {
        let path = path.into();
        if path.is_empty() {
            return Err(RelPathError::Empty);
        }
        if path.starts_with('/') {
            return Err(RelPathError::Absolute);
        }
        if path.contains("//") {
            return Err(RelPathError::DoubledSlash);
        }
        Ok(Self(path))
    }

    pub fn from_path(path: &Path) -> Result<Self, RelPathError> {
        let s = path.to_str().ok_or(RelPathError::NotUtf8)?;
        Self::new(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `true` iff this path names an entry inside an archive, encoded as
    /// `archive:member`.
    pub fn is_archive_member(&self) -> bool {
        self.archive_colon().is_some()
    }

    fn archive_colon(&self) -> Option<usize> {
        // The member part is everything after the *first* colon: an archive path itself
        // never contains a colon, so the first one always separates the archive from the
        // member.
        self.0.find(':')
    }

    /// The immediate container of this path: the text before the last `/` before the
    /// member separator when archived (i.e. the directory *inside* the archive, or the
    /// archive path itself if the member is at the archive's root), the parent directory
    /// otherwise. Used by `filter_parent` to decide whether two candidates "share a
    /// container".
    pub fn container(&self) -> &str {
        if let Some(colon) = self.archive_colon() {
            let (archive, member) = (&self.0[..colon], &self.0[colon + 1..]);
            match member.rfind('/') {
                Some(slash) => &self.0[..colon + 1 + slash],
                None => archive,
            }
        } else {
            match self.0.rfind('/') {
                Some(slash) => &self.0[..slash],
                None => "",
            }
        }
    }

    /// `true` when `self` names a path inside (or equal to, with a trailing separator
    /// boundary) the directory named by `prefix`.
    pub fn starts_with(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl fmt::Display for RelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RelPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A single catalogued media item. Derived attributes (color descriptor, jpeg-quality
/// estimate, ...) are not part of this type — they are computed on demand by the
/// fingerprint primitives from the file itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRecord {
    pub id: MediaId,
    pub kind: Kind,
    pub rel_path: RelPath,
    pub width: u32,
    pub height: u32,
    pub md5: String,
    pub dct_hash: Hamming,
}

impl MediaRecord {
    /// Builds a record not yet assigned an id; [`crate::catalog::Catalog::add`] assigns
    /// one via [`crate::record::store::RecordStore::next_id`].
    pub fn new_unassigned(
        kind: Kind,
        rel_path: RelPath,
        width: u32,
        height: u32,
        md5: impl Into<String>,
        dct_hash: Hamming,
    ) -> Self {
        Self {
            id: MediaId::NONE,
            kind,
            rel_path,
            width,
            height,
            md5: md5.into(),
            dct_hash,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rejects_empty() {
        assert_eq!(Err(RelPathError::Empty), RelPath::new(""));
    }

    #[test]
    fn rejects_absolute() {
        assert_eq!(Err(RelPathError::Absolute), RelPath::new("/a/b"));
    }

    #[test]
    fn rejects_doubled_slash() {
        assert_eq!(Err(RelPathError::DoubledSlash), RelPath::new("a//b"));
    }

    #[test]
    fn container_of_plain_path() {
        let p = RelPath::new("dir/sub/a.jpg").unwrap();
        assert_eq!("dir/sub", p.container());
    }

    #[test]
    fn container_of_root_path() {
        let p = RelPath::new("a.jpg").unwrap();
        assert_eq!("", p.container());
    }

    #[test]
    fn container_of_archive_member() {
        let p = RelPath::new("comic.cbz:page01.jpg").unwrap();
        assert!(p.is_archive_member());
        assert_eq!("comic.cbz", p.container());
    }

    #[test]
    fn container_of_archive_member_with_subdir() {
        let p = RelPath::new("comic.cbz:dir/page01.jpg").unwrap();
        assert!(p.is_archive_member());
        assert_eq!("comic.cbz:dir", p.container());
    }
}
