pub mod memory;

use std::{
    collections::BTreeMap,
    ffi::OsString,
    future::Future,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use bytes::Bytes;
use tracing::debug;

use crate::storage::FilesystemCache;

pub use memory::{MemoryCache, MemoryTier, NullCache, memory_tier};

/// Header name -> value, one value per (lowercased) name.
pub type CachedHeaders = BTreeMap<String, String>;

/// Location of a cache entry: the absolute path of its body file.
///
/// The headers live next to it in `<key>.headers`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(PathBuf);

impl CacheKey {
    pub fn from_path(path: PathBuf) -> Self {
        Self(path)
    }

    pub fn body_path(&self) -> &Path {
        &self.0
    }

    pub fn headers_path(&self) -> PathBuf {
        let mut name = OsString::from(self.0.as_os_str());
        name.push(".headers");
        PathBuf::from(name)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// A stored response. Replaced wholesale on `set`, never edited in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheItem {
    pub headers: CachedHeaders,
    pub body: Bytes,
}

impl CacheItem {
    pub fn new(headers: CachedHeaders, body: impl Into<Bytes>) -> Self {
        Self {
            headers,
            body: body.into(),
        }
    }

    /// Builds the header mapping from `(name, value)` pairs.
    ///
    /// Names are lowercased and a repeated name keeps its last value.
    pub fn collect_headers<'a, I>(pairs: I) -> CachedHeaders
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        pairs
            .into_iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value.to_string()))
            .collect()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }
}

/// The durable tier behind the facade. Owns key derivation.
// Uses explicit `impl Future + Send` to satisfy auto-trait bounds without #[allow]
pub trait DurableTier: Send + Sync {
    fn create_key(&self, url: &str) -> CacheKey;
    fn get(&self, key: &CacheKey) -> impl Future<Output = Result<Option<CacheItem>>> + Send;
    fn set(&self, key: &CacheKey, item: &CacheItem) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Debug, Clone)]
pub struct CacheOptions {
    pub root: PathBuf,
    pub use_mem_cache: bool,
}

/// Memory tier in front of a durable tier.
///
/// Reads go memory first and promote durable hits into memory. Writes go to
/// memory first, then to the durable tier, whose errors reach the caller.
pub struct Cache<D = FilesystemCache> {
    memory: Box<dyn MemoryTier>,
    durable: D,
}

impl Cache<FilesystemCache> {
    pub async fn open(options: CacheOptions) -> Result<Self> {
        let durable = FilesystemCache::open(&options.root)
            .await
            .context("opening filesystem cache")?;
        Ok(Self::with_tiers(memory_tier(options.use_mem_cache), durable))
    }
}

impl<D: DurableTier> Cache<D> {
    pub fn with_tiers(memory: Box<dyn MemoryTier>, durable: D) -> Self {
        Self { memory, durable }
    }

    pub fn create_cache_key(&self, url: &str) -> CacheKey {
        self.durable.create_key(url)
    }

    pub async fn get(&self, key: &CacheKey) -> Result<Option<CacheItem>> {
        if let Some(item) = self.memory.get(key) {
            return Ok(Some(item));
        }

        let item = self.durable.get(key).await?;
        if let Some(item) = &item {
            debug!(key = %key, "promoting durable hit into memory");
            self.memory.set(key.clone(), item.clone());
        }
        Ok(item)
    }

    pub async fn set(&self, key: &CacheKey, item: CacheItem) -> Result<()> {
        self.memory.set(key.clone(), item.clone());
        self.durable.set(key, &item).await
    }

    pub fn durable(&self) -> &D {
        &self.durable
    }
}
