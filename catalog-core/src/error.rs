//! Typed error enums at every module boundary, one `#[derive(thiserror::Error)]` enum per
//! subsystem, composed with `#[from]` at call sites: small, local error types instead of
//! one crate-wide catch-all.

use thiserror::Error;

use crate::record::RelPathError;

/// Fatal: the durable record store refused to open, a transaction could not commit, or a
/// query against it failed outright.
#[derive(Debug, Error)]
pub enum RecordStoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("path is not unique: {0}")]
    DuplicatePath(String),
    #[error("invalid path: {0}")]
    InvalidPath(#[from] RelPathError),
}

/// A failure inside one index's durable store or its sidecar files.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt sidecar file: {0}")]
    CorruptSidecar(String),
}

/// Input-rejected: a negative-match pair that cannot be recorded.
#[derive(Debug, Error)]
pub enum NegativeMatchError {
    #[error("a value cannot be a negative match of itself")]
    IdenticalMd5,
    #[error("this pair is already a negative match")]
    AlreadyPresent,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PartialEq for NegativeMatchError {
    fn eq(&self, other: &Self) -> bool {
        matches!(
            (self, other),
            (Self::IdenticalMd5, Self::IdenticalMd5) | (Self::AlreadyPresent, Self::AlreadyPresent)
        )
    }
}
impl Eq for NegativeMatchError {}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("unknown algo id: {0}")]
    UnknownAlgo(u8),
    #[error("mergeGroups and expandGroups are mutually exclusive")]
    InvalidParams,
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    RecordStore(#[from] RecordStoreError),
}

/// Errors surfaced by [`crate::catalog::Catalog`]'s public operations. Fatal variants
/// abort the operation and roll back any open transaction; the operation-aborted variants
/// (`WriteLockHeld`, `DeleteReservedId`, `DestinationExists`, `ArchiveMember`) are reported
/// but never corrupt state.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error(transparent)]
    RecordStore(#[from] RecordStoreError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Search(#[from] SearchError),
    #[error("negative-match error: {0}")]
    NegativeMatch(#[from] NegativeMatchError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("another process is writing to this catalog")]
    WriteLockHeld,
    #[error("id 0 is reserved and cannot be removed")]
    DeleteReservedId,
    #[error("destination already exists: {0}")]
    DestinationExists(String),
    #[error("cannot move or rename an archive member in place: {0}")]
    ArchiveMember(String),
    #[error("source is neither a directory nor an archive file: {0}")]
    NotDirOrArchive(String),
    #[error("cannot rename an archive into a non-archive name (or vice versa): {0}")]
    ArchiveKindMismatch(String),
    #[error("path escapes the catalog root: {0}")]
    EscapesRoot(String),
    #[error("the catalog is closed")]
    Closed,
}
