//! `DctImageIndex` (algo id 1): two structures kept in sync over the same 64-bit DCT
//! hashes — a `hash_by_id` table giving O(1) direct lookup of any catalogued record's
//! hash, and a [`BkTree`] giving a bounded Hamming search over the whole set without a
//! full linear scan. See `hash_of` for the former and `find` for the latter.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use rusqlite::params;

use crate::error::IndexError;
use crate::fingerprint::hamming::Hamming;
use crate::index::bktree::BkTree;
use crate::index::{AlgoId, Index, Match, StoreId, ALGO_DCT_IMAGE, STORE_DCT_IMAGE};
use crate::record::{MediaId, MediaRecord};
use crate::search::SearchParams;

pub struct DctImageIndex {
    tree: BkTree<MediaId>,
    hash_by_id: HashMap<MediaId, Hamming>,
    loaded: bool,
}

impl DctImageIndex {
    pub fn new() -> Self {
        Self { tree: BkTree::new(), hash_by_id: HashMap::new(), loaded: false }
    }

    /// Direct lookup of a catalogued record's hash, independent of the bounded-search
    /// structure `find` walks.
    pub fn hash_of(&self, id: MediaId) -> Option<Hamming> {
        self.hash_by_id.get(&id).copied()
    }
}

impl Default for DctImageIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl Index for DctImageIndex {
    fn database_id(&self) -> StoreId {
        STORE_DCT_IMAGE
    }

    fn id(&self) -> AlgoId {
        ALGO_DCT_IMAGE
    }

    fn create_tables(&self, conn: &mut rusqlite::Connection) -> Result<(), IndexError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS dct_hash (
                media_id INTEGER PRIMARY KEY NOT NULL,
                hash INTEGER NOT NULL
            );",
        )?;
        Ok(())
    }

    fn load(
        &mut self,
        conn: &mut rusqlite::Connection,
        _cache_dir: &Path,
        _data_dir: &Path,
    ) -> Result<(), IndexError> {
        self.create_tables(conn)?;
        let mut stmt = conn.prepare("SELECT media_id, hash FROM dct_hash")?;
        let rows = stmt.query_map([], |row| {
            let id: i64 = row.get(0)?;
            let hash: i64 = row.get(1)?;
            Ok((MediaId::new(id as u32), Hamming::from_bits(hash as u64)))
        })?;

        let mut tree = BkTree::new();
        let mut hash_by_id = HashMap::new();
        for row in rows {
            let (id, hash) = row?;
            tree.insert(hash, id);
            hash_by_id.insert(id, hash);
        }
        drop(stmt);

        self.tree = tree;
        self.hash_by_id = hash_by_id;
        self.loaded = true;
        Ok(())
    }

    fn save(&mut self, _conn: &mut rusqlite::Connection, _cache_dir: &Path) -> Result<(), IndexError> {
        // `add_records`/`remove_records` already keep the durable table in sync with
        // every mutation, so there is nothing buffered here to flush.
        Ok(())
    }

    fn add_records(
        &self,
        conn: &mut rusqlite::Connection,
        records: &[MediaRecord],
    ) -> Result<(), IndexError> {
        let tx = conn.transaction()?;
        {
            let mut stmt =
                tx.prepare("INSERT OR REPLACE INTO dct_hash (media_id, hash) VALUES (?1, ?2)")?;
            for r in records {
                stmt.execute(params![r.id.get(), r.dct_hash.bits() as i64])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn add(&mut self, records: &[MediaRecord]) {
        for r in records {
            self.tree.insert(r.dct_hash, r.id);
            self.hash_by_id.insert(r.id, r.dct_hash);
        }
    }

    fn remove_records(
        &self,
        conn: &mut rusqlite::Connection,
        ids: &[MediaId],
    ) -> Result<(), IndexError> {
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("DELETE FROM dct_hash WHERE media_id = ?1")?;
            for id in ids {
                stmt.execute([id.get()])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn remove(&mut self, ids: &[MediaId]) {
        let ids: HashSet<MediaId> = ids.iter().copied().collect();
        self.tree.remove_where(|v| ids.contains(v));
        self.hash_by_id.retain(|id, _| !ids.contains(id));
    }

    fn find(&self, needle: &MediaRecord, params: &SearchParams) -> Vec<Match> {
        let mut hits = Vec::new();
        self.tree.find_within(needle.dct_hash, params.dct_thresh, |hash, id| {
            hits.push(Match::new(*id, needle.dct_hash.distance_to(hash) as f64));
        });
        hits
    }

    fn slice(&self, ids: &HashSet<MediaId>) -> Option<Box<dyn Index>> {
        let mut sliced = BkTree::new();
        self.tree.for_each(|hash, id| {
            if ids.contains(id) {
                sliced.insert(hash, *id);
            }
        });
        let hash_by_id = self.hash_by_id.iter().filter(|(id, _)| ids.contains(id)).map(|(id, h)| (*id, *h)).collect();
        Some(Box::new(DctImageIndex { tree: sliced, hash_by_id, loaded: true }))
    }

    fn memory_usage(&self) -> usize {
        self.tree.memory_usage() + self.hash_by_id.len() * std::mem::size_of::<(MediaId, Hamming)>()
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::record::{Kind, RelPath};

    fn rec(id: u32, hash: u64) -> MediaRecord {
        MediaRecord {
            id: MediaId::new(id),
            kind: Kind::Image,
            rel_path: RelPath::new(format!("{id}.jpg")).unwrap(),
            width: 1,
            height: 1,
            md5: String::new(),
            dct_hash: Hamming::from_bits(hash),
        }
    }

    #[test]
    fn find_within_threshold() {
        let mut idx = DctImageIndex::new();
        idx.add(&[rec(1, 0b0000), rec(2, 0b0011), rec(3, 0b1111)]);

        let needle = rec(99, 0b0000);
        let params = SearchParams::new(ALGO_DCT_IMAGE).with_dct_thresh(2);
        let mut hits: Vec<MediaId> = idx.find(&needle, &params).into_iter().map(|m| m.media_id).collect();
        hits.sort();
        assert_eq!(vec![MediaId::new(1), MediaId::new(2)], hits);
    }

    #[test]
    fn remove_excludes_from_future_finds() {
        let mut idx = DctImageIndex::new();
        idx.add(&[rec(1, 0), rec(2, 0)]);
        idx.remove(&[MediaId::new(1)]);

        let needle = rec(99, 0);
        let params = SearchParams::new(ALGO_DCT_IMAGE).with_dct_thresh(0);
        let hits: Vec<MediaId> = idx.find(&needle, &params).into_iter().map(|m| m.media_id).collect();
        assert_eq!(vec![MediaId::new(2)], hits);
    }

    #[test]
    fn hash_of_looks_up_by_id_independent_of_find() {
        let mut idx = DctImageIndex::new();
        idx.add(&[rec(1, 0b0101), rec(2, 0b1010)]);
        assert_eq!(Some(Hamming::from_bits(0b0101)), idx.hash_of(MediaId::new(1)));
        assert_eq!(None, idx.hash_of(MediaId::new(99)));

        idx.remove(&[MediaId::new(1)]);
        assert_eq!(None, idx.hash_of(MediaId::new(1)));
    }

    #[test]
    fn slice_restricts_to_id_set() {
        let mut idx = DctImageIndex::new();
        idx.add(&[rec(1, 0), rec(2, 0), rec(3, 0)]);
        let sliced = idx.slice(&HashSet::from([MediaId::new(1), MediaId::new(3)])).unwrap();

        let needle = rec(99, 0);
        let params = SearchParams::new(ALGO_DCT_IMAGE).with_dct_thresh(0);
        let mut hits: Vec<MediaId> = sliced.find(&needle, &params).into_iter().map(|m| m.media_id).collect();
        hits.sort();
        assert_eq!(vec![MediaId::new(1), MediaId::new(3)], hits);
    }
}
