//! A generic in-memory BK-tree keyed by [`Hamming`] distance.
//!
//! Arena-of-nodes design backed by a plain `Vec<BkNode<V>>`: durability comes from the
//! owning index's own `rusqlite` store, loaded wholesale into this arena on `load()` and
//! flushed back on `save()`. Removal tombstones a node's value (`value = None`) rather
//! than restructuring children, since BK-tree child links are keyed by hash distance and
//! are valid regardless of which nodes are still "live".

use std::collections::HashMap;

use crate::fingerprint::hamming::{Distance, Hamming};

struct BkNode<V> {
    hash: Hamming,
    value: Option<V>,
    children: HashMap<Distance, usize>,
}

pub struct BkTree<V> {
    nodes: Vec<BkNode<V>>,
    root: Option<usize>,
    live: usize,
}

impl<V: Clone> BkTree<V> {
    pub fn new() -> Self {
        Self { nodes: Vec::new(), root: None, live: 0 }
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn insert(&mut self, hash: Hamming, value: V) {
        let new_idx = self.nodes.len();
        self.nodes.push(BkNode { hash, value: Some(value), children: HashMap::new() });
        self.live += 1;

        let Some(root) = self.root else {
            self.root = Some(new_idx);
            return;
        };

        let mut cur = root;
        loop {
            let dist = self.nodes[cur].hash.distance_to(hash);
            if let Some(&child) = self.nodes[cur].children.get(&dist) {
                cur = child;
            } else {
                self.nodes[cur].children.insert(dist, new_idx);
                break;
            }
        }
    }

    /// Visits every live `(hash, value)` whose distance to `needle` is `<= within`.
    pub fn find_within<F>(&self, needle: Hamming, within: Distance, mut visit: F)
    where
        F: FnMut(Hamming, &V),
    {
        let Some(root) = self.root else { return };
        let mut stack = vec![root];
        while let Some(cur) = stack.pop() {
            let node = &self.nodes[cur];
            let dist = node.hash.distance_to(needle);
            if dist <= within {
                if let Some(value) = &node.value {
                    visit(node.hash, value);
                }
            }

            let lo = dist.saturating_sub(within);
            let hi = dist.saturating_add(within);
            for i in lo..=hi {
                if let Some(&child) = node.children.get(&i) {
                    stack.push(child);
                }
            }
        }
    }

    /// Tombstones every live value for which `pred` returns `true`.
    pub fn remove_where<F>(&mut self, mut pred: F)
    where
        F: FnMut(&V) -> bool,
    {
        for node in &mut self.nodes {
            if node.value.as_ref().is_some_and(|v| pred(v)) {
                node.value = None;
                self.live -= 1;
            }
        }
    }

    pub fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(Hamming, &V),
    {
        for node in &self.nodes {
            if let Some(value) = &node.value {
                visit(node.hash, value);
            }
        }
    }

    /// Rough resident size: one arena slot per node ever inserted (tombstones included),
    /// matching `Index::memory_usage`'s "bytes" contract loosely rather than precisely.
    pub fn memory_usage(&self) -> usize {
        self.nodes.len() * std::mem::size_of::<BkNode<V>>()
    }
}

impl<V: Clone> Default for BkTree<V> {
    fn default() -> Self {
        Self::new()
    }
}
