//! In-memory tier: a bounded LRU of loaded previews plus the recycling pool.
//!
//! Both live behind one lock so a buffer can never be claimed by two
//! workers. Anything leaving the index goes through [`MemoryTier::retire`],
//! which hands the buffer to the pool if no consumer still holds it.

use std::num::NonZeroUsize;
use std::sync::Arc;

use image::RgbaImage;
use lru::LruCache;

use super::pool::RecyclePool;
use crate::state::data::{CacheKey, PreviewSize, UserId};

pub struct MemoryTier {
    index: LruCache<CacheKey, Arc<RgbaImage>>,
    pool: RecyclePool,
}

impl MemoryTier {
    pub fn new(entries: usize, recycle_capacity: usize) -> Self {
        let cap = NonZeroUsize::new(entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            index: LruCache::new(cap),
            pool: RecyclePool::new(recycle_capacity),
        }
    }

    pub fn lookup(&mut self, key: &CacheKey) -> Option<Arc<RgbaImage>> {
        self.index.get(key).cloned()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.index.contains(key)
    }

    /// Insert a loaded preview. A replaced or LRU-evicted entry is retired.
    pub fn publish(&mut self, key: CacheKey, image: Arc<RgbaImage>) {
        if let Some((_, old)) = self.index.push(key, image) {
            self.retire(old);
        }
    }

    /// Drop the entry for `key`, if any
    pub fn evict(&mut self, key: &CacheKey) -> bool {
        match self.index.pop(key) {
            Some(image) => {
                self.retire(image);
                true
            }
            None => false,
        }
    }

    /// Drop every entry of `package` for `user`, returns how many went
    pub fn evict_package(&mut self, package: &str, user: UserId) -> usize {
        let keys: Vec<CacheKey> = self
            .index
            .iter()
            .filter(|(key, _)| key.package() == package && key.user == user)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &keys {
            self.evict(key);
        }
        keys.len()
    }

    /// Empty the index, e.g. under memory pressure
    pub fn trim(&mut self) -> usize {
        let mut dropped = 0;
        while let Some((_, image)) = self.index.pop_lru() {
            self.retire(image);
            dropped += 1;
        }
        dropped
    }

    /// Claim a render target of the requested size
    pub fn take_buffer(&mut self, size: PreviewSize) -> Option<RgbaImage> {
        self.pool.take(size.width, size.height)
    }

    pub fn give_back(&mut self, buffer: RgbaImage) {
        self.pool.put(buffer);
    }

    fn retire(&mut self, image: Arc<RgbaImage>) {
        // Still shown somewhere: let the consumer drop it.
        if let Ok(buffer) = Arc::try_unwrap(image) {
            self.pool.put(buffer);
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn pooled(&self) -> usize {
        self.pool.len()
    }
}
