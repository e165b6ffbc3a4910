use std::collections::HashMap;

use parking_lot::RwLock;

use super::{CacheItem, CacheKey};

/// In-process tier. Synchronous: lookups never suspend the request.
pub trait MemoryTier: Send + Sync {
    fn get(&self, key: &CacheKey) -> Option<CacheItem>;
    fn set(&self, key: CacheKey, item: CacheItem);
}

/// Picks the memory tier once, at construction.
pub fn memory_tier(enabled: bool) -> Box<dyn MemoryTier> {
    if enabled {
        Box::new(MemoryCache::default())
    } else {
        Box::new(NullCache)
    }
}

/// Unbounded map kept for the lifetime of the process.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<CacheKey, CacheItem>>,
}

impl MemoryCache {
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl MemoryTier for MemoryCache {
    fn get(&self, key: &CacheKey) -> Option<CacheItem> {
        self.entries.read().get(key).cloned()
    }

    fn set(&self, key: CacheKey, item: CacheItem) {
        self.entries.write().insert(key, item);
    }
}

/// Always misses, drops every write.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCache;

impl MemoryTier for NullCache {
    fn get(&self, _key: &CacheKey) -> Option<CacheItem> {
        None
    }

    fn set(&self, _key: CacheKey, _item: CacheItem) {}
}
