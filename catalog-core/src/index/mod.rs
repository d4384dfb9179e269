//! The index family: a capability set implemented by every concrete index — a plain
//! trait object carried by the catalog's registry, which maps an algo-id to the concrete
//! index instance.

pub mod bktree;
pub mod color;
pub mod dct_image;
pub mod video;

use std::collections::HashSet;
use std::path::Path;

use crate::error::IndexError;
use crate::record::{MediaId, MediaRecord};
use crate::search::SearchParams;

pub use color::ColorIndex;
pub use dct_image::DctImageIndex;
pub use video::VideoIndex;

pub type AlgoId = u8;
pub type StoreId = u32;

pub const ALGO_DCT_IMAGE: AlgoId = 1;
pub const ALGO_COLOR: AlgoId = 2;
pub const ALGO_VIDEO: AlgoId = 3;

/// store 0 is the record store itself; every index here keeps its own store.
pub const STORE_DCT_IMAGE: StoreId = 1;
pub const STORE_COLOR: StoreId = 2;
pub const STORE_VIDEO: StoreId = 3;

/// A contiguous run of temporally matching frames between a video needle and a video
/// candidate, `None` for every non-video index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchRange {
    pub src_in: u32,
    pub dst_in: u32,
    pub len: u32,
}

/// A single candidate hit returned by [`Index::find`], sorted ascending by `score`
/// (lower is better).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Match {
    pub media_id: MediaId,
    pub score: f64,
    pub range: Option<MatchRange>,
}

impl Match {
    pub fn new(media_id: MediaId, score: f64) -> Self {
        Self { media_id, score, range: None }
    }

    pub fn with_range(media_id: MediaId, score: f64, range: MatchRange) -> Self {
        Self { media_id, score, range: Some(range) }
    }
}

/// The capability set every concrete index implements. A `Box<dyn Index>` is what the
/// catalog and the search pipeline actually hold, keyed by algo-id in the catalog's
/// registry.
pub trait Index: Send + Sync {
    fn database_id(&self) -> StoreId;
    fn id(&self) -> AlgoId;

    /// One-shot schema install for this index's own store.
    fn create_tables(&self, conn: &mut rusqlite::Connection) -> Result<(), IndexError>;

    /// Builds the in-memory structure from durable state (and, for the video index, the
    /// sidecar directory at `data_dir`). `cache_dir` is scratch space the index may use
    /// for its own intermediate files.
    fn load(
        &mut self,
        conn: &mut rusqlite::Connection,
        cache_dir: &Path,
        data_dir: &Path,
    ) -> Result<(), IndexError>;

    /// Persists any in-memory mutation back to durable storage.
    fn save(&mut self, conn: &mut rusqlite::Connection, cache_dir: &Path) -> Result<(), IndexError>;

    /// Durable insert.
    fn add_records(
        &self,
        conn: &mut rusqlite::Connection,
        records: &[MediaRecord],
    ) -> Result<(), IndexError>;

    /// In-memory insert, to be called only after `add_records`'s durable write
    /// committed.
    fn add(&mut self, records: &[MediaRecord]);

    /// Durable delete.
    fn remove_records(
        &self,
        conn: &mut rusqlite::Connection,
        ids: &[MediaId],
    ) -> Result<(), IndexError>;

    /// In-memory delete.
    fn remove(&mut self, ids: &[MediaId]);

    /// Candidate hits for `needle`, sorted ascending by score. The index may
    /// over-approximate; the search pipeline caps to `params.max_matches` after its own
    /// sort.
    fn find(&self, needle: &MediaRecord, params: &SearchParams) -> Vec<Match>;

    /// Produces a restricted view of this index whose `find` only returns candidates
    /// whose id is in `ids`. `None` means "unsupported; search the full index instead".
    fn slice(&self, ids: &HashSet<MediaId>) -> Option<Box<dyn Index>>;

    fn memory_usage(&self) -> usize;
    fn is_loaded(&self) -> bool;

    /// Downcast hook so the catalog's `HashMap<AlgoId, Box<dyn Index>>` registry can reach
    /// a concrete index's own methods (e.g. `ColorIndex::set_descriptor`) when the generic
    /// capability set isn't enough.
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}
