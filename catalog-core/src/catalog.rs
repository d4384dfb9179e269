//! The catalog façade: owns the record store, the index family, their per-store sqlite
//! connections, the video sidecar directory and the negative-match store, and serializes
//! every mutation behind a process-local read/write lock plus a cross-process advisory
//! lock file, built from `std::sync` plus `fs2`'s advisory file locking.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use fs2::FileExt;
use rusqlite::Connection;

use crate::error::{CatalogError, IndexError, RecordStoreError};
use crate::fingerprint::ColorDescriptor;
use crate::index::{
    AlgoId, ColorIndex, DctImageIndex, Index, StoreId, VideoIndex, ALGO_COLOR,
    ALGO_DCT_IMAGE, ALGO_VIDEO, STORE_COLOR, STORE_DCT_IMAGE, STORE_VIDEO,
};
use crate::record::{Kind, KindMask, MediaId, MediaRecord, RecordStore, RelPath};
use crate::search::Search;
use crate::negative_match::NegativeMatchStore;
use crate::video_store::{VideoFingerprints, VideoStore};

/// Name of the hidden directory under the catalog root holding every durable file.
const INDEX_DIR_NAME: &str = ".catalog-index";

pub struct Catalog {
    root: PathBuf,
    index_dir: PathBuf,
    cache_dir: PathBuf,
    video_dir: PathBuf,
    write_lock_path: PathBuf,
    pub(crate) record_store: RwLock<RecordStore>,
    pub(crate) indices: RwLock<HashMap<AlgoId, Box<dyn Index>>>,
    store_conns: HashMap<StoreId, Mutex<Connection>>,
    pub(crate) negative_match: RwLock<NegativeMatchStore>,
}

/// Holds the cross-process advisory lock for the lifetime of one mutating operation.
struct WriteLockGuard(File);

impl Drop for WriteLockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.0);
    }
}

impl Catalog {
    /// Opens (creating, if absent) the catalog rooted at `root`. Every durable file lives
    /// under `root/.catalog-index`; media files themselves live directly under `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let root = root.as_ref().to_path_buf();
        let index_dir = root.join(INDEX_DIR_NAME);
        fs::create_dir_all(&index_dir)?;

        let cache_dir = index_dir.join("cache");
        let video_dir = index_dir.join("video");
        fs::create_dir_all(&video_dir)?;

        let record_store = RecordStore::open(index_dir.join("index.db"))?;

        let mut indices: HashMap<AlgoId, Box<dyn Index>> = HashMap::new();
        indices.insert(ALGO_DCT_IMAGE, Box::new(DctImageIndex::new()));
        indices.insert(ALGO_COLOR, Box::new(ColorIndex::new()));
        indices.insert(ALGO_VIDEO, Box::new(VideoIndex::new()));

        let mut store_conns = HashMap::new();
        store_conns.insert(
            STORE_DCT_IMAGE,
            Mutex::new(Connection::open(index_dir.join("algo1.db")).map_err(IndexError::from)?),
        );
        store_conns.insert(
            STORE_COLOR,
            Mutex::new(Connection::open(index_dir.join("algo2.db")).map_err(IndexError::from)?),
        );
        store_conns.insert(
            STORE_VIDEO,
            Mutex::new(Connection::open(index_dir.join("algo3.db")).map_err(IndexError::from)?),
        );

        // Every index's schema must exist before the first `add`, which writes through
        // `add_records` directly and never goes through `load` (that only happens lazily,
        // on first search). Without this, a fresh catalog's first `add` would fail with
        // "no such table" if no search had run yet.
        for idx in indices.values() {
            let mut conn = store_conns
                .get(&idx.database_id())
                .expect("every index owns a per-store connection")
                .lock()
                .unwrap();
            idx.create_tables(&mut conn).map_err(CatalogError::from)?;
        }

        let negative_match = NegativeMatchStore::open(index_dir.join("neg.dat"))?;

        Ok(Self {
            write_lock_path: index_dir.join("write.lock"),
            root,
            index_dir,
            cache_dir,
            video_dir,
            record_store: RwLock::new(record_store),
            indices: RwLock::new(indices),
            store_conns,
            negative_match: RwLock::new(negative_match),
        })
    }

    /// Closes the catalog. Every durable write so far is already committed; consuming
    /// `self` here expresses the closed state as a dropped/consumed handle, rather than a
    /// flag checked on every call.
    pub fn close(self) {}

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn search(&self) -> Search<'_> {
        Search::new(self)
    }

    pub fn count(&self, mask: KindMask) -> Result<u64, CatalogError> {
        Ok(self.record_store.read().unwrap().count(mask)?)
    }

    pub fn media_with_id(&self, id: MediaId) -> Result<Option<MediaRecord>, CatalogError> {
        Ok(self.record_store.read().unwrap().by_id(id)?)
    }

    pub fn media_with_path(&self, path: &str) -> Result<Option<MediaRecord>, CatalogError> {
        Ok(self.record_store.read().unwrap().by_path(path)?)
    }

    pub fn media_with_md5(&self, md5: &str) -> Result<Vec<MediaRecord>, CatalogError> {
        Ok(self.record_store.read().unwrap().by_md5(md5)?)
    }

    pub fn media_of_kind(&self, mask: KindMask) -> Result<Vec<MediaRecord>, CatalogError> {
        Ok(self.record_store.read().unwrap().by_kind(mask)?)
    }

    /// Assigns consecutive ids to every record, inserts them into the record store, feeds
    /// each index's durable store, persists any supplied video fingerprints, and finally
    /// updates each index's in-memory structure. Durable writes commit before in-memory
    /// ones, so a crash mid-`add` never leaves an index holding a reference the record
    /// store doesn't know about.
    ///
    /// `video_fingerprints[i]` is the frame-hash sequence for `records[i]`, or `None` for
    /// non-video records and videos indexed without frame data up front.
    pub fn add(
        &self,
        mut records: Vec<MediaRecord>,
        video_fingerprints: Vec<Option<VideoFingerprints>>,
    ) -> Result<Vec<MediaId>, CatalogError> {
        assert_eq!(records.len(), video_fingerprints.len());

        let mut rs = self.record_store.write().unwrap();
        let _lock = self.acquire_write_lock()?;

        let mut next = rs.next_id()?;
        let mut ids = Vec::with_capacity(records.len());
        for r in records.iter_mut() {
            r.id = MediaId::new(next);
            ids.push(r.id);
            next += 1;
        }

        rs.insert_batch(&records)?;

        {
            let mut indices = self.indices.write().unwrap();
            for idx in indices.values_mut() {
                let mut conn = self.conn_for(idx.database_id()).lock().unwrap();
                idx.add_records(&mut conn, &records)?;
            }
        }

        let sidecars = VideoStore::new(&self.video_dir);
        for (r, fp) in records.iter().zip(video_fingerprints.iter()) {
            if let Some(fp) = fp {
                sidecars.save(r.id, fp)?;
            }
        }

        {
            let mut indices = self.indices.write().unwrap();
            for idx in indices.values_mut() {
                idx.add(&records);
            }
        }

        drop(rs);
        self.touch_last_added()?;
        Ok(ids)
    }

    /// Removes `ids` from the record store, every index's durable and in-memory state,
    /// and deletes any video sidecars. `id 0` is reserved and rejected outright.
    pub fn remove(&self, ids: &[MediaId]) -> Result<HashSet<MediaId>, CatalogError> {
        if ids.contains(&MediaId::NONE) {
            return Err(CatalogError::DeleteReservedId);
        }

        let mut rs = self.record_store.write().unwrap();
        let _lock = self.acquire_write_lock()?;

        let deleted = rs.delete(ids)?;

        {
            let mut indices = self.indices.write().unwrap();
            for idx in indices.values_mut() {
                let mut conn = self.conn_for(idx.database_id()).lock().unwrap();
                idx.remove_records(&mut conn, ids)?;
            }
        }

        let sidecars = VideoStore::new(&self.video_dir);
        for id in &deleted {
            sidecars.delete(*id)?;
        }

        {
            let mut indices = self.indices.write().unwrap();
            for idx in indices.values_mut() {
                idx.remove(ids);
            }
        }

        Ok(deleted)
    }

    /// Point-updates a batch of `(id, new path)` pairs under the write lock.
    pub fn update_paths(&self, pairs: &[(MediaId, RelPath)]) -> Result<(), CatalogError> {
        let mut rs = self.record_store.write().unwrap();
        let _lock = self.acquire_write_lock()?;
        rs.update_paths(pairs)?;
        Ok(())
    }

    /// Compacts the record store and removes orphaned video sidecars.
    pub fn vacuum(&self) -> Result<(), CatalogError> {
        let mut rs = self.record_store.write().unwrap();
        let _lock = self.acquire_write_lock()?;
        rs.vacuum()?;

        let valid_ids: HashSet<MediaId> =
            rs.by_kind(KindMask::of(Kind::Video))?.into_iter().map(|r| r.id).collect();
        VideoStore::new(&self.video_dir).vacuum(&valid_ids)?;
        Ok(())
    }

    /// Moves the file for `id` into `dest_dir` (keeping its filename) and updates its
    /// path; archive members cannot be moved in place.
    pub fn move_record(&self, id: MediaId, dest_dir: &str) -> Result<(), CatalogError> {
        let Some(record) = self.media_with_id(id)? else { return Ok(()) };
        if record.rel_path.is_archive_member() {
            return Err(CatalogError::ArchiveMember(record.rel_path.to_string()));
        }

        let file_name = Path::new(record.rel_path.as_str())
            .file_name()
            .ok_or_else(|| CatalogError::NotDirOrArchive(record.rel_path.to_string()))?;
        let new_rel = format!("{}/{}", dest_dir.trim_end_matches('/'), file_name.to_string_lossy());

        self.rename_on_disk(record.rel_path.as_str(), &new_rel)?;
        let new_rel = RelPath::new(new_rel).map_err(RecordStoreError::from)?;
        self.update_paths(&[(id, new_rel)])?;
        Ok(())
    }

    /// Renames the file for `id` in place, keeping its directory.
    pub fn rename(&self, id: MediaId, new_name: &str) -> Result<(), CatalogError> {
        let Some(record) = self.media_with_id(id)? else { return Ok(()) };
        if record.rel_path.is_archive_member() {
            return Err(CatalogError::ArchiveMember(record.rel_path.to_string()));
        }

        let parent = record.rel_path.container();
        let new_rel = if parent.is_empty() { new_name.to_string() } else { format!("{parent}/{new_name}") };

        self.rename_on_disk(record.rel_path.as_str(), &new_rel)?;
        let new_rel = RelPath::new(new_rel).map_err(RecordStoreError::from)?;
        self.update_paths(&[(id, new_rel)])?;
        Ok(())
    }

    /// Moves a directory or archive file from `src` to `dst` and rewrites the path of
    /// every record nested under it in one transaction. The `LIKE` prefix is built with
    /// [`crate::record::escape_like`] plus a trailing `/%`/`:%` so `src` itself never
    /// partially matches an unrelated sibling whose name happens to start with the same
    /// characters.
    pub fn move_dir(&self, src: &str, dst: &str) -> Result<(), CatalogError> {
        let old_abs = self.root.join(src);
        let new_abs = self.root.join(dst);

        if !old_abs.starts_with(&self.root) || !new_abs.starts_with(&self.root) {
            return Err(CatalogError::EscapesRoot(dst.to_string()));
        }

        let is_archive = old_abs.is_file() && looks_like_archive(src);
        let is_dir = old_abs.is_dir();
        if !is_archive && !is_dir {
            return Err(CatalogError::NotDirOrArchive(src.to_string()));
        }
        if is_archive && !looks_like_archive(dst) {
            return Err(CatalogError::ArchiveKindMismatch(dst.to_string()));
        }
        if new_abs.exists() {
            return Err(CatalogError::DestinationExists(dst.to_string()));
        }

        fs::rename(&old_abs, &new_abs)?;

        let mut rs = self.record_store.write().unwrap();
        let _lock = self.acquire_write_lock()?;

        let suffix = if is_archive { ":%" } else { "/%" };
        let pattern = format!("{}{}", crate::record::escape_like(src), suffix);
        let matches = rs.by_path_like(&pattern)?;

        let mut pairs = Vec::with_capacity(matches.len());
        for m in &matches {
            let rest = &m.rel_path.as_str()[src.len()..];
            let new_rel = RelPath::new(format!("{dst}{rest}")).map_err(RecordStoreError::from)?;
            pairs.push((m.id, new_rel));
        }
        rs.update_paths(&pairs)?;
        Ok(())
    }

    pub fn add_negative_match(&self, a: &str, b: &str) -> Result<(), CatalogError> {
        let mut neg = self.negative_match.write().unwrap();
        let _lock = self.acquire_write_lock()?;
        neg.add(a, b)?;
        Ok(())
    }

    pub fn is_negative_match(&self, a: &str, b: &str) -> bool {
        self.negative_match.read().unwrap().is_match(a, b)
    }

    /// Supplies the color descriptor for an already-catalogued record and flushes it to
    /// the color index's own store. A no-op if `id` was never added. The descriptor itself
    /// is computed by whatever external collaborator decodes the image; this only carries
    /// it into the catalog.
    pub fn set_color_descriptor(&self, id: MediaId, descriptor: ColorDescriptor) -> Result<(), CatalogError> {
        self.ensure_loaded(ALGO_COLOR)?;

        let _lock = self.acquire_write_lock()?;
        let mut indices = self.indices.write().unwrap();
        let idx = indices.get_mut(&ALGO_COLOR).expect("algo color is always registered");
        let store = idx.database_id();

        let color = idx
            .as_any_mut()
            .downcast_mut::<ColorIndex>()
            .expect("algo color always maps to a ColorIndex");
        color.set_descriptor(id, descriptor);

        let mut conn = self.conn_for(store).lock().unwrap();
        idx.save(&mut conn, &self.cache_dir)?;
        Ok(())
    }

    /// Double-checked lazy load: a cheap read-lock check first, then a write-locked load
    /// only if the index truly isn't loaded yet.
    pub(crate) fn ensure_loaded(&self, algo: AlgoId) -> Result<(), crate::error::SearchError> {
        {
            let indices = self.indices.read().unwrap();
            if indices.get(&algo).map(|i| i.is_loaded()).unwrap_or(false) {
                return Ok(());
            }
        }

        let mut indices = self.indices.write().unwrap();
        let idx = indices
            .get_mut(&algo)
            .ok_or(crate::error::SearchError::UnknownAlgo(algo))?;
        if idx.is_loaded() {
            return Ok(());
        }

        let mut conn = self.conn_for(idx.database_id()).lock().unwrap();
        idx.load(&mut conn, &self.cache_dir, &self.video_dir)?;
        Ok(())
    }

    fn conn_for(&self, store: StoreId) -> &Mutex<Connection> {
        self.store_conns.get(&store).expect("every index owns a per-store connection")
    }

    fn rename_on_disk(&self, old_rel: &str, new_rel: &str) -> Result<(), CatalogError> {
        let old_abs = self.root.join(old_rel);
        let new_abs = self.root.join(new_rel);
        if new_abs.exists() {
            return Err(CatalogError::DestinationExists(new_rel.to_string()));
        }
        fs::rename(&old_abs, &new_abs)?;
        Ok(())
    }

    fn touch_last_added(&self) -> Result<(), CatalogError> {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        fs::write(self.index_dir.join("last-added.txt"), now.as_secs().to_string())?;
        Ok(())
    }

    fn acquire_write_lock(&self) -> Result<WriteLockGuard, CatalogError> {
        let file = OpenOptions::new().create(true).write(true).open(&self.write_lock_path)?;
        file.try_lock_exclusive().map_err(|_| CatalogError::WriteLockHeld)?;
        Ok(WriteLockGuard(file))
    }
}

/// `true` when `path`'s extension names a known archive format. `move_dir` rejects
/// turning a zip/cbz into a plain directory name or vice versa. This mirrors an
/// extension check rather than the `archive:member` colon convention `RelPath` uses —
/// `path` here is a real filesystem name, not a catalog-relative member path.
fn looks_like_archive(path: &str) -> bool {
    const ARCHIVE_EXTENSIONS: [&str; 3] = ["zip", "cbz", "cbr"];
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| ARCHIVE_EXTENSIONS.iter().any(|a| a.eq_ignore_ascii_case(ext)))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fingerprint::Hamming;

    fn img(path: &str, md5: &str, dct: u64) -> MediaRecord {
        MediaRecord::new_unassigned(Kind::Image, RelPath::new(path).unwrap(), 10, 10, md5, Hamming::from_bits(dct))
    }

    #[test]
    fn add_assigns_ids_and_is_findable_by_path() {
        let tmp = tempfile::tempdir().unwrap();
        let cat = Catalog::open(tmp.path()).unwrap();
        let ids = cat.add(vec![img("a.jpg", "aaa", 0)], vec![None]).unwrap();
        assert_eq!(1, ids.len());
        let found = cat.media_with_path("a.jpg").unwrap().unwrap();
        assert_eq!(ids[0], found.id);
    }

    #[test]
    fn remove_rejects_reserved_id() {
        let tmp = tempfile::tempdir().unwrap();
        let cat = Catalog::open(tmp.path()).unwrap();
        let err = cat.remove(&[MediaId::NONE]);
        assert!(matches!(err, Err(CatalogError::DeleteReservedId)));
    }

    #[test]
    fn remove_deletes_from_record_store() {
        let tmp = tempfile::tempdir().unwrap();
        let cat = Catalog::open(tmp.path()).unwrap();
        let ids = cat.add(vec![img("a.jpg", "aaa", 0)], vec![None]).unwrap();
        let deleted = cat.remove(&ids).unwrap();
        assert_eq!(1, deleted.len());
        assert!(cat.media_with_id(ids[0]).unwrap().is_none());
    }

    #[test]
    fn concurrent_writers_see_write_lock_held() {
        let tmp = tempfile::tempdir().unwrap();
        let cat = Catalog::open(tmp.path()).unwrap();
        let _rs_guard = cat.record_store.write().unwrap();
        let _lock = cat.acquire_write_lock().unwrap();
        let second = cat.acquire_write_lock();
        assert!(matches!(second, Err(CatalogError::WriteLockHeld)));
    }

    #[test]
    fn exact_duplicates_found_via_md5_search() {
        let tmp = tempfile::tempdir().unwrap();
        let cat = Catalog::open(tmp.path()).unwrap();
        cat.add(vec![img("a.jpg", "same", 0), img("b.jpg", "same", 0), img("c.jpg", "diff", 0)], vec![None; 3])
            .unwrap();

        let groups = cat.search().dups_by_md5(crate::search::SearchParams::default()).unwrap();
        assert_eq!(1, groups.len());
        assert_eq!("a.jpg", groups[0].needle.rel_path.as_str());
        assert_eq!(1, groups[0].hits.len());
        assert_eq!("b.jpg", groups[0].hits[0].record.rel_path.as_str());
    }

    #[test]
    fn near_duplicate_found_via_dct_threshold() {
        let tmp = tempfile::tempdir().unwrap();
        let cat = Catalog::open(tmp.path()).unwrap();
        cat.add(
            vec![img("a.jpg", "aaa", 0b0000), img("b.jpg", "bbb", 0b0011)],
            vec![None, None],
        )
        .unwrap();

        let params = crate::search::SearchParams::new(ALGO_DCT_IMAGE).with_dct_thresh(2);
        let groups = cat.search().similar(params).unwrap();
        let a_group = groups.iter().find(|g| g.needle.rel_path.as_str() == "a.jpg").unwrap();
        assert_eq!(1, a_group.hits.len());
        assert_eq!("b.jpg", a_group.hits[0].record.rel_path.as_str());
    }

    #[test]
    fn set_color_descriptor_is_reachable_through_the_public_api() {
        let tmp = tempfile::tempdir().unwrap();
        let cat = Catalog::open(tmp.path()).unwrap();
        let ids = cat
            .add(vec![img("a.jpg", "aaa", 0), img("b.jpg", "bbb", 0), img("c.jpg", "ccc", 0)], vec![None; 3])
            .unwrap();

        cat.set_color_descriptor(ids[0], ColorDescriptor::from_histogram(vec![([255, 0, 0], 1)])).unwrap();
        cat.set_color_descriptor(ids[1], ColorDescriptor::from_histogram(vec![([250, 5, 5], 1)])).unwrap();
        cat.set_color_descriptor(ids[2], ColorDescriptor::from_histogram(vec![([0, 0, 255], 1)])).unwrap();

        let needle = cat.media_with_id(ids[0]).unwrap().unwrap();
        let params = crate::search::SearchParams::new(ALGO_COLOR).with_color_thresh(20.0);
        let group = cat.search().similar_to(&needle, params).unwrap();
        let hits: HashSet<MediaId> = group.hits.iter().map(|h| h.record.id).collect();
        assert_eq!(HashSet::from([ids[1]]), hits);
    }

    #[test]
    fn negative_match_suppresses_a_positive_hit() {
        let tmp = tempfile::tempdir().unwrap();
        let cat = Catalog::open(tmp.path()).unwrap();
        cat.add(
            vec![img("a.jpg", "aaa", 0b0000), img("b.jpg", "bbb", 0b0001)],
            vec![None, None],
        )
        .unwrap();
        cat.add_negative_match("aaa", "bbb").unwrap();

        let params = crate::search::SearchParams::new(ALGO_DCT_IMAGE)
            .with_dct_thresh(2)
            .with_negative_match(true);
        let groups = cat.search().similar(params).unwrap();
        assert!(groups.iter().all(|g| g.needle.rel_path.as_str() != "a.jpg"));
    }

    #[test]
    fn move_dir_rewrites_paths_of_nested_records() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("dir")).unwrap();
        fs::write(tmp.path().join("dir/a.jpg"), b"x").unwrap();
        let cat = Catalog::open(tmp.path()).unwrap();
        cat.add(vec![img("dir/a.jpg", "aaa", 0)], vec![None]).unwrap();

        cat.move_dir("dir", "moved").unwrap();

        assert!(cat.media_with_path("dir/a.jpg").unwrap().is_none());
        assert!(cat.media_with_path("moved/a.jpg").unwrap().is_some());
        assert!(tmp.path().join("moved/a.jpg").is_file());
    }

    #[test]
    fn move_dir_rejects_turning_an_archive_into_a_plain_name() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("comic.cbz"), b"x").unwrap();
        let cat = Catalog::open(tmp.path()).unwrap();

        let err = cat.move_dir("comic.cbz", "comic_renamed");
        assert!(matches!(err, Err(CatalogError::ArchiveKindMismatch(_))));
        assert!(tmp.path().join("comic.cbz").is_file());
    }
}
