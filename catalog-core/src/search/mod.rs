//! The search pipeline: a parallel fan-out of one index lookup per haystack record,
//! followed by per-group and cross-group filtering, generalized over an arbitrary
//! [`crate::index::Index`].

pub mod params;

use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Instant;

use rayon::prelude::*;

use crate::catalog::Catalog;
use crate::error::SearchError;
use crate::index::{Index, MatchRange};
use crate::negative_match::NegativeMatchStore;
use crate::record::{MediaId, MediaRecord};
use crate::work_queue::WorkQueue;

pub use params::SearchParams;

/// Bits describing how a hit relates to its group's needle, computed only by
/// [`Search::similar_to`]. Exact-md5 and larger-dimensions are the two flags derivable
/// from [`MediaRecord`] alone; a compression-quality/file-size comparison needs data this
/// subsystem does not model, so those bits are left at `false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MatchFlags {
    pub exact_md5: bool,
    pub bigger_dimensions: bool,
}

/// A single candidate in a [`Group`], paired with the score and (for the video index)
/// matching frame range the index returned.
#[derive(Debug, Clone)]
pub struct Hit {
    pub record: MediaRecord,
    pub score: f64,
    pub range: Option<MatchRange>,
    pub flags: MatchFlags,
}

/// One needle plus its surviving candidate hits: the needle, then zero or more
/// candidates ordered by score.
#[derive(Debug, Clone)]
pub struct Group {
    pub needle: MediaRecord,
    pub hits: Vec<Hit>,
}

/// Borrows a [`Catalog`] for the duration of one or more queries. Construct via
/// [`Catalog::search`].
pub struct Search<'a> {
    catalog: &'a Catalog,
}

impl<'a> Search<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    /// Runs `params.algo` against every record of `params.query_types` (or, when
    /// `params.in_set`, only `params.set`), one needle per haystack record, fanned out
    /// across a rayon thread pool.
    pub fn similar(&self, params: SearchParams) -> Result<Vec<Group>, SearchError> {
        if !params.validate() {
            return Err(SearchError::InvalidParams);
        }
        self.catalog.ensure_loaded(params.algo)?;

        let rs = self.catalog.record_store.read().unwrap();
        let haystack: Vec<MediaRecord> = if params.in_set {
            params
                .set
                .as_ref()
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .filter_map(|id| rs.by_id(id).ok().flatten())
                .collect()
        } else {
            rs.by_kind(params.query_types)?
        };

        drop(rs);
        let id_map: HashMap<MediaId, MediaRecord> =
            haystack.iter().map(|r| (r.id, r.clone())).collect();

        let indices = self.catalog.indices.read().unwrap();
        let full_index =
            indices.get(&params.algo).ok_or(SearchError::UnknownAlgo(params.algo))?;

        let ids: HashSet<MediaId> = id_map.keys().copied().collect();
        let sliced = if params.in_set { full_index.slice(&ids) } else { None };
        let index: &dyn Index = sliced.as_deref().unwrap_or_else(|| full_index.as_ref());

        let scanned = AtomicU64::new(0);
        let progress_start = Instant::now();
        let last_logged = AtomicU64::new(0);
        let total = haystack.len() as u64;

        // Indexed parallel map: rayon hands each haystack record its own output slot by
        // construction, so concurrent `find` calls never race on a shared accumulator.
        // Every candidate hydrates from `id_map` alone (built from the same haystack
        // fetch), so no connection-backed store needs to cross the thread boundary.
        let groups: Vec<Group> = haystack
            .par_iter()
            .filter_map(|needle| {
                let hits = search_index(index, needle, &params, &id_map);
                let mut group = Group { needle: needle.clone(), hits };
                let done = scanned.fetch_add(1, Ordering::Relaxed) + 1;
                maybe_log_progress(&params, done, total, progress_start, &last_logged);
                filter_match(&params, &mut group, &self.catalog.negative_match).then_some(group)
            })
            .collect();

        Ok(filter_matches(&params, groups))
    }

    /// Runs `params.algo` against a single `needle` not necessarily present in the
    /// catalog, annotating each hit with [`MatchFlags`].
    pub fn similar_to(&self, needle: &MediaRecord, params: SearchParams) -> Result<Group, SearchError> {
        self.catalog.ensure_loaded(params.algo)?;

        let rs = self.catalog.record_store.read().unwrap();
        let indices = self.catalog.indices.read().unwrap();
        let index = indices.get(&params.algo).ok_or(SearchError::UnknownAlgo(params.algo))?;

        let mut candidates = index.find(needle, &params);
        candidates.sort_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal));
        candidates.truncate(params.max_matches);

        let mut hits = Vec::with_capacity(candidates.len());
        for m in candidates {
            if params.filter_self && m.media_id == needle.id {
                continue;
            }
            let record = match rs.by_id(m.media_id)? {
                Some(r) => r,
                None => {
                    log::warn!("search: index returned stale media id {}", m.media_id);
                    continue;
                }
            };
            let flags = MatchFlags {
                exact_md5: needle.md5 == record.md5,
                bigger_dimensions: (record.width as u64 * record.height as u64)
                    > (needle.width as u64 * needle.height as u64),
            };
            hits.push(Hit { record, score: m.score, range: m.range, flags });
        }

        let mut group = Group { needle: needle.clone(), hits };
        if !filter_match(&params, &mut group, &self.catalog.negative_match) {
            group.hits.clear();
        }
        Ok(group)
    }

    /// Buckets every record of `params.query_types` by exact md5, one group per bucket
    /// with more than one member. Scanned single-threaded via a [`WorkQueue`] rather than
    /// a data-parallel map: the hot path here is the hashmap insert, not per-item work
    /// worth fanning out.
    pub fn dups_by_md5(&self, params: SearchParams) -> Result<Vec<Group>, SearchError> {
        let rs = self.catalog.record_store.read().unwrap();
        let haystack = rs.by_kind(params.query_types)?;
        let queue = WorkQueue::new(haystack);

        let mut buckets: HashMap<String, Vec<MediaRecord>> = HashMap::new();
        while let Some(r) = queue.next() {
            buckets.entry(r.md5.clone()).or_default().push(r.clone());
        }

        let mut groups = Vec::new();
        for (_, mut recs) in buckets {
            if recs.len() < 2 {
                continue;
            }
            recs.sort_by(|a, b| a.rel_path.as_str().cmp(b.rel_path.as_str()));
            let needle = recs.remove(0);
            let hits: Vec<Hit> = recs
                .into_iter()
                .map(|r| Hit { record: r, score: 0.0, range: None, flags: MatchFlags::default() })
                .collect();
            if hits.len() > params.min_matches {
                groups.push(Group { needle, hits });
            }
        }

        groups.sort_by(|a, b| a.needle.rel_path.as_str().cmp(b.needle.rel_path.as_str()));
        Ok(groups)
    }
}

/// Logs "`done`/`total` scanned" at most once per `params.progress_interval`, and only
/// when `params.verbose` is set — purely diagnostic, never part of the result.
/// `last_logged` holds the millisecond offset (since `start`) of the last emitted line so
/// concurrent workers don't all log the same tick.
fn maybe_log_progress(
    params: &SearchParams,
    done: u64,
    total: u64,
    start: Instant,
    last_logged: &AtomicU64,
) {
    let Some(interval) = params.progress_interval else { return };
    if !params.verbose || interval.is_zero() {
        return;
    }

    let elapsed_ms = start.elapsed().as_millis() as u64;
    let interval_ms = interval.as_millis().max(1) as u64;
    let tick = elapsed_ms / interval_ms;
    let prev = last_logged.load(Ordering::Relaxed);
    if tick > prev && last_logged.compare_exchange(prev, tick, Ordering::Relaxed, Ordering::Relaxed).is_ok() {
        log::info!("search: {done}/{total} scanned");
    }
}

/// Runs one index lookup, sorts ascending by score, caps to `max_matches`, drops the
/// needle itself when `filter_self`, and hydrates each surviving [`crate::index::Match`]
/// into a full [`MediaRecord`] from `id_map` (built from the same haystack fetch the
/// index was queried against). A candidate id absent from `id_map` means the index
/// briefly outlived a record that has since been removed; that hit is logged and dropped
/// rather than failing the whole query.
fn search_index(
    index: &dyn Index,
    needle: &MediaRecord,
    params: &SearchParams,
    id_map: &HashMap<MediaId, MediaRecord>,
) -> Vec<Hit> {
    let mut candidates = index.find(needle, params);
    candidates.sort_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal));
    candidates.truncate(params.max_matches);

    let mut hits = Vec::with_capacity(candidates.len());
    for m in candidates {
        if params.filter_self && m.media_id == needle.id {
            continue;
        }

        let Some(record) = id_map.get(&m.media_id) else {
            log::warn!("search: index returned stale media id {}", m.media_id);
            continue;
        };

        hits.push(Hit { record: record.clone(), score: m.score, range: m.range, flags: MatchFlags::default() });
    }
    hits
}

/// Per-group filtering: negative-match suppression, path include/exclude, same-container
/// exclusion, then the `min_matches` cutoff. Returns `false` when the group should be
/// dropped entirely.
fn filter_match(params: &SearchParams, group: &mut Group, negative_match: &RwLock<NegativeMatchStore>) -> bool {
    if params.negative_match {
        let neg = negative_match.read().unwrap();
        group.hits.retain(|h| !neg.is_match(&group.needle.md5, &h.record.md5));
    }

    if let Some(prefix) = &params.path {
        group.hits.retain(|h| {
            let starts = h.record.rel_path.starts_with(prefix);
            if params.in_path {
                starts
            } else {
                !starts
            }
        });
    }

    if params.filter_parent {
        let needle_container = group.needle.rel_path.container().to_string();
        group.hits.retain(|h| h.record.rel_path.container() != needle_container);
    }

    group.hits.len() > params.min_matches
}

/// Cross-group filtering: dedup groups whose member sets coincide, then apply exactly one
/// of `merge_groups` (union all transitively linked groups) or `expand_groups` (split an
/// N-way group into N pairwise groups), and finally order by needle path for
/// deterministic output.
fn filter_matches(params: &SearchParams, mut groups: Vec<Group>) -> Vec<Group> {
    if params.filter_groups {
        let mut seen = HashSet::new();
        groups.retain(|g| {
            let mut ids: Vec<MediaId> =
                std::iter::once(g.needle.id).chain(g.hits.iter().map(|h| h.record.id)).collect();
            ids.sort();
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            ids.hash(&mut hasher);
            seen.insert(hasher.finish())
        });
    }

    if params.merge_groups {
        groups = merge_groups(groups);
    } else if params.expand_groups {
        groups = expand_groups(groups);
    }

    groups.sort_by(|a, b| a.needle.rel_path.as_str().cmp(b.needle.rel_path.as_str()));
    groups
}

/// Splits every `needle + [hit_1..hit_n]` group into `n` pairwise `needle + [hit_i]`
/// groups.
fn expand_groups(groups: Vec<Group>) -> Vec<Group> {
    let mut out = Vec::new();
    for g in groups {
        for hit in g.hits {
            out.push(Group { needle: g.needle.clone(), hits: vec![hit] });
        }
    }
    out
}

/// Unions every group transitively linked by a shared media id into one group, via a
/// union-find over media ids. The lexicographically-first path in each resulting
/// equivalence class becomes the merged group's needle.
fn merge_groups(groups: Vec<Group>) -> Vec<Group> {
    let mut parent: HashMap<MediaId, MediaId> = HashMap::new();
    let mut records: HashMap<MediaId, MediaRecord> = HashMap::new();

    fn find(parent: &mut HashMap<MediaId, MediaId>, x: MediaId) -> MediaId {
        let p = *parent.get(&x).unwrap_or(&x);
        if p == x {
            x
        } else {
            let root = find(parent, p);
            parent.insert(x, root);
            root
        }
    }

    fn union(parent: &mut HashMap<MediaId, MediaId>, a: MediaId, b: MediaId) {
        let (ra, rb) = (find(parent, a), find(parent, b));
        if ra != rb {
            parent.insert(ra, rb);
        }
    }

    for g in &groups {
        records.insert(g.needle.id, g.needle.clone());
        parent.entry(g.needle.id).or_insert(g.needle.id);
        for h in &g.hits {
            records.insert(h.record.id, h.record.clone());
            parent.entry(h.record.id).or_insert(h.record.id);
            union(&mut parent, g.needle.id, h.record.id);
        }
    }

    let mut classes: HashMap<MediaId, Vec<MediaId>> = HashMap::new();
    let ids: Vec<MediaId> = records.keys().copied().collect();
    for id in ids {
        let root = find(&mut parent, id);
        classes.entry(root).or_default().push(id);
    }

    let mut out = Vec::with_capacity(classes.len());
    for (_, mut ids) in classes {
        ids.sort_by(|a, b| records[a].rel_path.as_str().cmp(records[b].rel_path.as_str()));
        let needle_id = ids.remove(0);
        let needle = records[&needle_id].clone();
        let hits = ids
            .into_iter()
            .map(|id| Hit {
                record: records[&id].clone(),
                score: 0.0,
                range: None,
                flags: MatchFlags::default(),
            })
            .collect();
        out.push(Group { needle, hits });
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fingerprint::Hamming;
    use crate::record::{Kind, RelPath};

    fn rec(id: u32, path: &str, md5: &str) -> MediaRecord {
        MediaRecord {
            id: MediaId::new(id),
            kind: Kind::Image,
            rel_path: RelPath::new(path).unwrap(),
            width: 100,
            height: 100,
            md5: md5.to_string(),
            dct_hash: Hamming::from_bits(0),
        }
    }

    fn hit(r: MediaRecord) -> Hit {
        Hit { record: r, score: 0.0, range: None, flags: MatchFlags::default() }
    }

    #[test]
    fn expand_groups_splits_into_pairs() {
        let groups = vec![Group {
            needle: rec(1, "a.jpg", "x"),
            hits: vec![hit(rec(2, "b.jpg", "y")), hit(rec(3, "c.jpg", "z"))],
        }];
        let expanded = expand_groups(groups);
        assert_eq!(2, expanded.len());
        assert!(expanded.iter().all(|g| g.hits.len() == 1));
    }

    #[test]
    fn merge_groups_unions_transitively_linked_members() {
        let groups = vec![
            Group { needle: rec(1, "a.jpg", "x"), hits: vec![hit(rec(2, "b.jpg", "y"))] },
            Group { needle: rec(2, "b.jpg", "y"), hits: vec![hit(rec(3, "c.jpg", "z"))] },
        ];
        let merged = merge_groups(groups);
        assert_eq!(1, merged.len());
        assert_eq!(2, merged[0].hits.len());
        assert_eq!("a.jpg", merged[0].needle.rel_path.as_str());
    }

    #[test]
    fn progress_is_silent_without_verbose_or_interval() {
        let last_logged = AtomicU64::new(0);
        let start = Instant::now();

        // neither flag set: never advances `last_logged`, regardless of how much time
        // has passed or how many items were scanned.
        let quiet = SearchParams::new(crate::index::ALGO_DCT_IMAGE);
        maybe_log_progress(&quiet, 1, 10, start, &last_logged);
        assert_eq!(0, last_logged.load(Ordering::Relaxed));

        let verbose_no_interval = quiet.clone().with_verbose(true);
        maybe_log_progress(&verbose_no_interval, 1, 10, start, &last_logged);
        assert_eq!(0, last_logged.load(Ordering::Relaxed));
    }

    #[test]
    fn progress_logs_at_most_once_per_tick() {
        let last_logged = AtomicU64::new(0);
        let start = Instant::now() - std::time::Duration::from_millis(250);
        let params = SearchParams::new(crate::index::ALGO_DCT_IMAGE)
            .with_verbose(true)
            .with_progress_interval(std::time::Duration::from_millis(100));

        maybe_log_progress(&params, 1, 10, start, &last_logged);
        let first_tick = last_logged.load(Ordering::Relaxed);
        assert!(first_tick > 0);

        // a second call within the same tick must not advance `last_logged` again.
        maybe_log_progress(&params, 2, 10, start, &last_logged);
        assert_eq!(first_tick, last_logged.load(Ordering::Relaxed));
    }

    #[test]
    fn similar_rejects_mutually_exclusive_merge_and_expand() {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = crate::catalog::Catalog::open(tmp.path()).unwrap();
        let params = SearchParams {
            merge_groups: true,
            expand_groups: true,
            ..SearchParams::new(crate::index::ALGO_DCT_IMAGE)
        };
        let err = catalog.search().similar(params);
        assert!(matches!(err, Err(SearchError::InvalidParams)));
    }

    #[test]
    fn min_matches_drops_small_groups() {
        let params = SearchParams::new(crate::index::ALGO_DCT_IMAGE).with_min_matches(1);
        let mut group = Group { needle: rec(1, "a.jpg", "x"), hits: vec![hit(rec(2, "b.jpg", "y"))] };
        let neg = RwLock::new(NegativeMatchStore::open(
            tempfile::tempdir().unwrap().path().join("neg.dat"),
        ).unwrap());
        assert!(!filter_match(&params, &mut group, &neg));
    }
}
