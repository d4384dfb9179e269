//! A fetch-and-add work queue: each caller atomically claims the next item. Used by
//! [`crate::search`] wherever a single sequential scan is a better fit than a
//! data-parallel map, e.g. the md5-bucketing pass behind `dups_by_md5`.

use std::sync::atomic::{AtomicUsize, Ordering};

pub struct WorkQueue<T> {
    work: Vec<T>,
    next: AtomicUsize,
}

impl<T> WorkQueue<T> {
    pub fn new(work: Vec<T>) -> Self {
        Self { work, next: AtomicUsize::new(0) }
    }

    pub fn next(&self) -> Option<&T> {
        let cur = self.next.fetch_add(1, Ordering::SeqCst);
        self.work.get(cur)
    }
}
