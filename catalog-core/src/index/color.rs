//! `ColorIndex` (algo id 2): a brute-force scan of color descriptors with an early-out
//! once the running distance exceeds `params.color_thresh`.
//!
//! The color descriptor is a *derived* attribute: it is never persisted in the record
//! store, so this index owns the only durable copy, keyed by media id, in its own store.
//! `Index::add`/`add_records` register an empty descriptor for every new record (the
//! descriptor itself is supplied out-of-band, by whatever external collaborator decodes
//! the image, via `Catalog::set_color_descriptor` calling [`ColorIndex::set_descriptor`]
//! and then flushing through `save`) so the index's `count` still tracks the record store
//! 1:1 even before a descriptor has been supplied.

use std::collections::HashSet;
use std::path::Path;

use rusqlite::params;

use crate::error::IndexError;
use crate::fingerprint::color::{ColorDescriptor, WeightedColor};
use crate::index::{AlgoId, Index, Match, StoreId, ALGO_COLOR, STORE_COLOR};
use crate::record::{MediaId, MediaRecord};
use crate::search::SearchParams;

pub struct ColorIndex {
    entries: Vec<(MediaId, ColorDescriptor)>,
    loaded: bool,
}

impl ColorIndex {
    pub fn new() -> Self {
        Self { entries: Vec::new(), loaded: false }
    }

    /// Supplies (or replaces) the descriptor for an already-added record. A no-op if
    /// `id` was never added.
    pub fn set_descriptor(&mut self, id: MediaId, descriptor: ColorDescriptor) {
        if let Some(entry) = self.entries.iter_mut().find(|(eid, _)| *eid == id) {
            entry.1 = descriptor;
        }
    }

    fn encode(descriptor: &ColorDescriptor) -> String {
        descriptor
            .colors()
            .iter()
            .map(|c| format!("{},{},{},{}", c.rgb[0], c.rgb[1], c.rgb[2], c.weight))
            .collect::<Vec<_>>()
            .join(";")
    }

    fn decode(raw: &str) -> ColorDescriptor {
        let colors = raw
            .split(';')
            .filter(|s| !s.is_empty())
            .filter_map(|part| {
                let mut it = part.split(',');
                let r: u8 = it.next()?.parse().ok()?;
                let g: u8 = it.next()?.parse().ok()?;
                let b: u8 = it.next()?.parse().ok()?;
                let weight: f32 = it.next()?.parse().ok()?;
                Some(WeightedColor { rgb: [r, g, b], weight })
            })
            .collect();
        ColorDescriptor::from_weighted(colors)
    }
}

impl Default for ColorIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl Index for ColorIndex {
    fn database_id(&self) -> StoreId {
        STORE_COLOR
    }

    fn id(&self) -> AlgoId {
        ALGO_COLOR
    }

    fn create_tables(&self, conn: &mut rusqlite::Connection) -> Result<(), IndexError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS color_descriptor (
                media_id INTEGER PRIMARY KEY NOT NULL,
                colors TEXT NOT NULL
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
        let mut stmt = conn.prepare("SELECT media_id, colors FROM color_descriptor")?;
        let rows = stmt.query_map([], |row| {
            let id: i64 = row.get(0)?;
            let colors: String = row.get(1)?;
            Ok((MediaId::new(id as u32), colors))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, raw) = row?;
            entries.push((id, Self::decode(&raw)));
        }
        drop(stmt);

        self.entries = entries;
        self.loaded = true;
        Ok(())
    }

    fn save(&mut self, conn: &mut rusqlite::Connection, _cache_dir: &Path) -> Result<(), IndexError> {
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO color_descriptor (media_id, colors) VALUES (?1, ?2)",
            )?;
            for (id, descriptor) in &self.entries {
                stmt.execute(params![id.get(), Self::encode(descriptor)])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn add_records(
        &self,
        conn: &mut rusqlite::Connection,
        records: &[MediaRecord],
    ) -> Result<(), IndexError> {
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO color_descriptor (media_id, colors) VALUES (?1, ?2)",
            )?;
            for r in records {
                stmt.execute(params![r.id.get(), ""])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn add(&mut self, records: &[MediaRecord]) {
        for r in records {
            self.entries.push((r.id, ColorDescriptor::default()));
        }
    }

    fn remove_records(
        &self,
        conn: &mut rusqlite::Connection,
        ids: &[MediaId],
    ) -> Result<(), IndexError> {
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("DELETE FROM color_descriptor WHERE media_id = ?1")?;
            for id in ids {
                stmt.execute([id.get()])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn remove(&mut self, ids: &[MediaId]) {
        let ids: HashSet<MediaId> = ids.iter().copied().collect();
        self.entries.retain(|(id, _)| !ids.contains(id));
    }

    fn find(&self, needle: &MediaRecord, params: &SearchParams) -> Vec<Match> {
        let Some((_, needle_descriptor)) = self.entries.iter().find(|(id, _)| *id == needle.id)
        else {
            return Vec::new();
        };

        let mut hits = Vec::new();
        for (id, descriptor) in &self.entries {
            if *id == needle.id {
                continue;
            }
            let distance = needle_descriptor.distance_to(descriptor);
            if distance <= params.color_thresh {
                hits.push(Match::new(*id, distance as f64));
            }
        }
        hits
    }

    fn slice(&self, ids: &HashSet<MediaId>) -> Option<Box<dyn Index>> {
        let entries = self.entries.iter().filter(|(id, _)| ids.contains(id)).cloned().collect();
        Some(Box::new(ColorIndex { entries, loaded: true }))
    }

    fn memory_usage(&self) -> usize {
        self.entries.iter().map(|(_, d)| d.colors().len() * std::mem::size_of::<WeightedColor>()).sum()
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

    fn rec(id: u32) -> MediaRecord {
        MediaRecord {
            id: MediaId::new(id),
            kind: Kind::Image,
            rel_path: RelPath::new(format!("{id}.jpg")).unwrap(),
            width: 1,
            height: 1,
            md5: String::new(),
            dct_hash: crate::fingerprint::Hamming::from_bits(0),
        }
    }

    #[test]
    fn encode_decode_round_trips() {
        let d = ColorDescriptor::from_histogram(vec![([255, 0, 0], 3), ([0, 255, 0], 1)]);
        let encoded = ColorIndex::encode(&d);
        let decoded = ColorIndex::decode(&encoded);
        assert_eq!(d, decoded);
    }

    #[test]
    fn find_applies_color_thresh() {
        let mut idx = ColorIndex::new();
        idx.add(&[rec(1), rec(2), rec(3)]);
        idx.set_descriptor(MediaId::new(1), ColorDescriptor::from_histogram(vec![([255, 0, 0], 1)]));
        idx.set_descriptor(MediaId::new(2), ColorDescriptor::from_histogram(vec![([250, 5, 5], 1)]));
        idx.set_descriptor(MediaId::new(3), ColorDescriptor::from_histogram(vec![([0, 0, 255], 1)]));

        let needle = rec(1);
        let params = SearchParams::new(ALGO_COLOR).with_color_thresh(20.0);
        let hits: Vec<MediaId> = idx.find(&needle, &params).into_iter().map(|m| m.media_id).collect();
        assert_eq!(vec![MediaId::new(2)], hits);
    }
}
