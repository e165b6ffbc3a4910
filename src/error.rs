use thiserror::Error;

/// Failures the proxy raises itself, as opposed to I/O errors bubbling up
/// from the cache or the network.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("upstream request to {url} failed: {reason}")]
    Upstream { url: String, reason: String },
    #[error("cache entry for {url} is missing right after it was written")]
    CacheNotPopulated { url: String },
}
