use serde::Deserialize;
use std::path::{Path, PathBuf};

use capillary_adapter::CacheOptions;

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Directory holding `<digest>` / `<digest>.headers` pairs
    #[serde(default = "default_cache_root")]
    pub root: PathBuf,
    /// Keep an in-process copy of every entry in front of the filesystem
    #[serde(default = "default_memory")]
    pub memory: bool,
    /// Answer misses with 404 instead of contacting the registry
    #[serde(default)]
    pub cached_only: bool,
}

impl CacheConfig {
    pub fn normalize_paths(&mut self, base_dir: &Path) {
        if self.root.is_relative() {
            self.root = base_dir.join(&self.root);
        }
    }

    pub fn options(&self) -> CacheOptions {
        CacheOptions {
            root: self.root.clone(),
            use_mem_cache: self.memory,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: default_cache_root(),
            memory: default_memory(),
            cached_only: false,
        }
    }
}

fn default_cache_root() -> PathBuf {
    PathBuf::from(".bench-reg")
}

fn default_memory() -> bool {
    true
}
