//! `SearchParams`: the configuration carried through a single query.

use std::collections::HashSet;

use crate::fingerprint::hamming::Distance;
use crate::index::AlgoId;
use crate::record::{KindMask, MediaId};

/// Recognized options and their effects. Built with [`SearchParams::new`] plus the
/// `with_*` setters.
#[derive(Debug, Clone)]
pub struct SearchParams {
    pub algo: AlgoId,
    pub query_types: KindMask,
    pub in_set: bool,
    pub set: Option<HashSet<MediaId>>,
    pub dct_thresh: Distance,
    /// Maximum [`crate::fingerprint::ColorDescriptor::distance_to`] for a `ColorIndex`
    /// candidate to be a hit, the same way `dct_thresh` bounds the DCT index.
    pub color_thresh: f32,
    pub max_matches: usize,
    pub min_matches: usize,
    pub filter_self: bool,
    pub filter_parent: bool,
    pub filter_groups: bool,
    pub merge_groups: bool,
    pub expand_groups: bool,
    pub negative_match: bool,
    pub path: Option<String>,
    pub in_path: bool,
    pub template_match: bool,
    pub mirror_mask: u32,
    pub verbose: bool,
    pub progress_interval: Option<std::time::Duration>,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            algo: crate::index::ALGO_DCT_IMAGE,
            query_types: KindMask::ALL,
            in_set: false,
            set: None,
            dct_thresh: 8,
            color_thresh: 20.0,
            max_matches: usize::MAX,
            min_matches: 0,
            filter_self: true,
            filter_parent: false,
            filter_groups: false,
            merge_groups: false,
            expand_groups: false,
            negative_match: false,
            path: None,
            in_path: true,
            template_match: false,
            mirror_mask: 0,
            verbose: false,
            progress_interval: None,
        }
    }
}

impl SearchParams {
    pub fn new(algo: AlgoId) -> Self {
        Self { algo, ..Self::default() }
    }

    pub fn with_set(mut self, set: HashSet<MediaId>) -> Self {
        self.in_set = true;
        self.set = Some(set);
        self
    }

    pub fn with_dct_thresh(mut self, thresh: Distance) -> Self {
        self.dct_thresh = thresh;
        self
    }

    pub fn with_color_thresh(mut self, thresh: f32) -> Self {
        self.color_thresh = thresh;
        self
    }

    pub fn with_max_matches(mut self, max: usize) -> Self {
        self.max_matches = max;
        self
    }

    pub fn with_min_matches(mut self, min: usize) -> Self {
        self.min_matches = min;
        self
    }

    pub fn with_filter_self(mut self, filter: bool) -> Self {
        self.filter_self = filter;
        self
    }

    pub fn with_filter_parent(mut self, filter: bool) -> Self {
        self.filter_parent = filter;
        self
    }

    pub fn with_filter_groups(mut self, filter: bool) -> Self {
        self.filter_groups = filter;
        self
    }

    pub fn with_negative_match(mut self, enabled: bool) -> Self {
        self.negative_match = enabled;
        self
    }

    pub fn with_path(mut self, path: impl Into<String>, in_path: bool) -> Self {
        self.path = Some(path.into());
        self.in_path = in_path;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// How often `Search::similar` logs a "N/M scanned" progress line while fanning out
    /// over a large haystack. Diagnostic only — affects logging, nothing about the
    /// result.
    pub fn with_progress_interval(mut self, interval: std::time::Duration) -> Self {
        self.progress_interval = Some(interval);
        self
    }

    /// `merge_groups`/`expand_groups` are mutually exclusive; asserts that invariant
    /// when both are requested.
    pub fn validate(&self) -> bool {
        !(self.merge_groups && self.expand_groups)
    }
}
