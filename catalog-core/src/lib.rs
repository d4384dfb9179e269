//! The catalog + index subsystem of a perceptual-similarity media search engine: the
//! durable record store, the pluggable index family, the video fingerprint sidecar store,
//! the negative-match store, the concurrent search pipeline, and the catalog façade that
//! ties them together.
//!
//! Everything durable or concurrent lives here; `catalog-cli` only wires up argument
//! parsing and logging on top of this crate's public API.

pub mod catalog;
pub mod error;
pub mod fingerprint;
pub mod index;
pub mod negative_match;
pub mod record;
pub mod search;
pub mod video_store;
pub mod work_queue;

pub use catalog::Catalog;
pub use error::{CatalogError, IndexError, NegativeMatchError, RecordStoreError, SearchError};
pub use record::{Kind, KindMask, MediaId, MediaRecord, RelPath};
pub use search::{Group, SearchParams};
