mod cache;
mod hash;
mod storage;

pub use cache::{
    Cache, CacheItem, CacheKey, CacheOptions, CachedHeaders, DurableTier, MemoryCache,
    MemoryTier, NullCache, memory_tier,
};
pub use hash::digest;
pub use storage::{CacheStats, FilesystemCache, TempFile};
