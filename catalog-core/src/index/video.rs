//! `VideoIndex` (algo id 3): holds one [`VideoFingerprints`] sequence per video id.
//! `find` against a video needle computes the longest run of temporally consecutive
//! matching frames; `find` against an image needle returns the single best frame hit per
//! video.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::error::IndexError;
use crate::fingerprint::hamming::Distance;
use crate::index::{AlgoId, Index, Match, MatchRange, StoreId, ALGO_VIDEO, STORE_VIDEO};
use crate::record::{Kind, MediaId, MediaRecord};
use crate::search::SearchParams;
use crate::video_store::{FrameHash, VideoFingerprints, VideoStore};

pub struct VideoIndex {
    entries: HashMap<MediaId, VideoFingerprints>,
    data_dir: PathBuf,
    loaded: bool,
}

impl VideoIndex {
    pub fn new() -> Self {
        Self { entries: HashMap::new(), data_dir: PathBuf::new(), loaded: false }
    }

    fn find_video_needle(&self, needle: &MediaRecord, params: &SearchParams) -> Vec<Match> {
        let Some(needle_fp) = self.entries.get(&needle.id) else { return Vec::new() };

        let mut hits = Vec::new();
        for (&id, fp) in &self.entries {
            if id == needle.id {
                continue;
            }
            if let Some((src_in, dst_in, len)) =
                longest_matching_run(&needle_fp.frames, &fp.frames, params.dct_thresh)
            {
                // lower score is better; a longer run is a stronger match.
                let score = -(len as f64);
                hits.push(Match::with_range(id, score, MatchRange { src_in, dst_in, len }));
            }
        }
        hits
    }

    fn find_image_needle(&self, needle: &MediaRecord, params: &SearchParams) -> Vec<Match> {
        let mut hits = Vec::new();
        for (&id, fp) in &self.entries {
            if id == needle.id {
                continue;
            }
            if let Some(best) = fp.frames.iter().map(|f| needle.dct_hash.distance_to(f.hash)).min() {
                if best <= params.dct_thresh {
                    hits.push(Match::new(id, best as f64));
                }
            }
        }
        hits
    }
}

impl Default for VideoIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Longest contiguous run of frames `k` where
/// `needle[i+k].hash` is within `thresh` of `cand[j+k].hash`, found via the same DP used
/// for longest-common-substring with a thresholded equality test instead of exact
/// equality. Returns `(needle frame-no at run start, candidate frame-no at run start,
/// run length)`.
fn longest_matching_run(
    needle: &[FrameHash],
    cand: &[FrameHash],
    thresh: Distance,
) -> Option<(u32, u32, u32)> {
    if needle.is_empty() || cand.is_empty() {
        return None;
    }

    let (n, m) = (needle.len(), cand.len());
    let mut dp = vec![vec![0u32; m + 1]; n + 1];
    let mut best_len = 0u32;
    let mut best_i = 0usize;
    let mut best_j = 0usize;

    for i in 1..=n {
        for j in 1..=m {
            if needle[i - 1].hash.distance_to(cand[j - 1].hash) <= thresh {
                dp[i][j] = dp[i - 1][j - 1] + 1;
                if dp[i][j] > best_len {
                    best_len = dp[i][j];
                    best_i = i - best_len as usize;
                    best_j = j - best_len as usize;
                }
            }
        }
    }

    if best_len == 0 {
        None
    } else {
        Some((needle[best_i].frame_no, cand[best_j].frame_no, best_len))
    }
}

impl Index for VideoIndex {
    fn database_id(&self) -> StoreId {
        STORE_VIDEO
    }

    fn id(&self) -> AlgoId {
        ALGO_VIDEO
    }

    fn create_tables(&self, conn: &mut rusqlite::Connection) -> Result<(), IndexError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS video_index (media_id INTEGER PRIMARY KEY NOT NULL);",
        )?;
        Ok(())
    }

    fn load(
        &mut self,
        conn: &mut rusqlite::Connection,
        _cache_dir: &Path,
        data_dir: &Path,
    ) -> Result<(), IndexError> {
        self.create_tables(conn)?;
        self.data_dir = data_dir.to_path_buf();
        let sidecars = VideoStore::new(&self.data_dir);

        let ids: Vec<MediaId> = {
            let mut stmt = conn.prepare("SELECT media_id FROM video_index")?;
            let rows = stmt.query_map([], |row| {
                let id: i64 = row.get(0)?;
                Ok(MediaId::new(id as u32))
            })?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        let mut entries = HashMap::new();
        for id in ids {
            if let Some(fp) = sidecars.load(id)? {
                entries.insert(id, fp);
            }
        }
        self.entries = entries;
        self.loaded = true;
        Ok(())
    }

    fn save(&mut self, _conn: &mut rusqlite::Connection, _cache_dir: &Path) -> Result<(), IndexError> {
        Ok(())
    }

    fn add_records(
        &self,
        conn: &mut rusqlite::Connection,
        records: &[MediaRecord],
    ) -> Result<(), IndexError> {
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("INSERT OR REPLACE INTO video_index (media_id) VALUES (?1)")?;
            for r in records.iter().filter(|r| r.kind == Kind::Video) {
                stmt.execute([r.id.get()])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn add(&mut self, records: &[MediaRecord]) {
        let sidecars = VideoStore::new(&self.data_dir);
        for r in records.iter().filter(|r| r.kind == Kind::Video) {
            if let Ok(Some(fp)) = sidecars.load(r.id) {
                self.entries.insert(r.id, fp);
            }
        }
    }

    fn remove_records(
        &self,
        conn: &mut rusqlite::Connection,
        ids: &[MediaId],
    ) -> Result<(), IndexError> {
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("DELETE FROM video_index WHERE media_id = ?1")?;
            for id in ids {
                stmt.execute([id.get()])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn remove(&mut self, ids: &[MediaId]) {
        for id in ids {
            self.entries.remove(id);
        }
    }

    fn find(&self, needle: &MediaRecord, params: &SearchParams) -> Vec<Match> {
        match needle.kind {
            Kind::Video => self.find_video_needle(needle, params),
            _ => self.find_image_needle(needle, params),
        }
    }

    fn slice(&self, ids: &HashSet<MediaId>) -> Option<Box<dyn Index>> {
        let entries =
            self.entries.iter().filter(|(id, _)| ids.contains(id)).map(|(id, fp)| (*id, fp.clone())).collect();
        Some(Box::new(VideoIndex { entries, data_dir: self.data_dir.clone(), loaded: true }))
    }

    fn memory_usage(&self) -> usize {
        self.entries.values().map(|fp| fp.frames.len() * std::mem::size_of::<FrameHash>()).sum()
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
    use crate::fingerprint::Hamming;
    use crate::record::RelPath;

    fn video_rec(id: u32) -> MediaRecord {
        MediaRecord {
            id: MediaId::new(id),
            kind: Kind::Video,
            rel_path: RelPath::new(format!("{id}.mp4")).unwrap(),
            width: 1,
            height: 1,
            md5: String::new(),
            dct_hash: Hamming::from_bits(0),
        }
    }

    fn frames(hashes: &[u64]) -> VideoFingerprints {
        VideoFingerprints {
            frames: hashes
                .iter()
                .enumerate()
                .map(|(i, h)| FrameHash { hash: Hamming::from_bits(*h), frame_no: i as u32 })
                .collect(),
            metadata: None,
        }
    }

    fn index_with(entries: Vec<(MediaId, VideoFingerprints)>) -> VideoIndex {
        VideoIndex { entries: entries.into_iter().collect(), data_dir: PathBuf::new(), loaded: true }
    }

    #[test]
    fn finds_longest_consecutive_run() {
        let idx = index_with(vec![
            (MediaId::new(1), frames(&[1, 2, 3, 4, 99])),
            (MediaId::new(2), frames(&[0, 1, 2, 3, 4])),
        ]);

        let needle = video_rec(1);
        let params = SearchParams::new(ALGO_VIDEO).with_dct_thresh(0);
        let hits = idx.find(&needle, &params);

        assert_eq!(1, hits.len());
        assert_eq!(MediaId::new(2), hits[0].media_id);
        let range = hits[0].range.unwrap();
        assert_eq!(4, range.len);
    }

    #[test]
    fn image_needle_returns_best_frame_per_video() {
        let idx = index_with(vec![(MediaId::new(1), frames(&[0b1111, 0b0000, 0b1010]))]);

        let mut needle = video_rec(99);
        needle.kind = Kind::Image;
        needle.dct_hash = Hamming::from_bits(0b0000);

        let params = SearchParams::new(ALGO_VIDEO).with_dct_thresh(1);
        let hits = idx.find(&needle, &params);
        assert_eq!(1, hits.len());
        assert_eq!(MediaId::new(1), hits[0].media_id);
        assert_eq!(0.0, hits[0].score);
    }

    #[test]
    fn no_run_when_nothing_matches() {
        let idx = index_with(vec![(MediaId::new(1), frames(&[0b1111])), (MediaId::new(2), frames(&[0b0000]))]);
        let needle = video_rec(1);
        let params = SearchParams::new(ALGO_VIDEO).with_dct_thresh(0);
        assert!(idx.find(&needle, &params).is_empty());
    }
}
