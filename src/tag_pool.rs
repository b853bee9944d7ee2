//! Reusable delivery-tag allocator for outbound links.
//!
//! Long-lived consumers would otherwise mint an ever-growing sequence of
//! tags. Tags the peer has settled are checked back in and handed out again
//! before the counter advances. The cache is bounded; excess tags are simply
//! forgotten.

use std::collections::HashSet;

use bytes::Bytes;

/// Upper bound on the number of settled tags kept for reuse.
pub const MAX_CACHED_TAGS: usize = 1024;

/// Per-consumer delivery-tag allocator.
#[derive(Debug, Default)]
pub struct TagPool {
    next_tag: u64,
    cache: HashSet<Bytes>,
}

impl TagPool {
    /// Create an empty pool.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Take a tag, preferring a previously settled one.
    ///
    /// Fresh tags are the lowercase hex rendering of a monotonic counter.
    pub fn checkout(&mut self) -> Bytes {
        if let Some(tag) = self.cache.iter().next().cloned() {
            self.cache.remove(&tag);
            return tag;
        }
        let tag = Bytes::from(format!("{:x}", self.next_tag));
        self.next_tag += 1;
        tag
    }

    /// Return a settled tag to the pool. Ignored once the pool is full.
    pub fn checkin(&mut self, tag: Bytes) {
        if self.cache.len() < MAX_CACHED_TAGS {
            self.cache.insert(tag);
        }
    }

    /// Number of tags waiting for reuse.
    #[must_use]
    pub fn cached(&self) -> usize { self.cache.len() }

    /// Number of fresh tags minted so far.
    #[must_use]
    pub fn minted(&self) -> u64 { self.next_tag }
}
