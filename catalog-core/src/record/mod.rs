//! Record store: the durable `media-id -> MediaRecord` mapping plus secondary lookups by
//! path, content-hash and kind.

pub mod model;
pub mod store;

pub use model::{Kind, KindMask, MediaId, MediaRecord, RelPath, RelPathError};
pub use store::{escape_like, RecordStore};
