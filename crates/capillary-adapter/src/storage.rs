use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::{
    fs::{self, File, OpenOptions},
    io::AsyncWriteExt,
};
use tracing::{debug, warn};

use crate::cache::{CacheItem, CacheKey, CachedHeaders, DurableTier};
use crate::hash::digest;

const HEADERS_SUFFIX: &str = ".headers";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Durable tier: one `<digest>` body file and one `<digest>.headers` JSON
/// file per entry, flat under `root`.
#[derive(Debug, Clone)]
pub struct FilesystemCache {
    root: PathBuf,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: u64,
    pub total_bytes: u64,
}

impl FilesystemCache {
    /// Resolves `root` to an absolute path and creates it if needed.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = std::path::absolute(root.as_ref())
            .with_context(|| format!("resolving cache root {}", root.as_ref().display()))?;
        fs::create_dir_all(&root)
            .await
            .with_context(|| format!("creating cache root {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Counts complete entries (body and headers both present).
    pub async fn stats(&self) -> Result<CacheStats> {
        let mut stats = CacheStats::default();
        let mut dir = fs::read_dir(&self.root)
            .await
            .with_context(|| format!("listing cache root {}", self.root.display()))?;

        while let Some(entry) = dir
            .next_entry()
            .await
            .with_context(|| format!("listing cache root {}", self.root.display()))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.ends_with(HEADERS_SUFFIX) || name.contains(".tmp-") {
                continue;
            }

            let key = CacheKey::from_path(entry.path());
            let headers_meta = match fs::metadata(key.headers_path()).await {
                Ok(meta) => meta,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(anyhow::Error::from(e)
                        .context(format!("reading metadata {}", key.headers_path().display())));
                }
            };
            let body_meta = entry
                .metadata()
                .await
                .with_context(|| format!("reading metadata {}", key))?;

            stats.entries += 1;
            stats.total_bytes += body_meta.len() + headers_meta.len();
        }

        Ok(stats)
    }
}

impl DurableTier for FilesystemCache {
    fn create_key(&self, url: &str) -> CacheKey {
        CacheKey::from_path(self.root.join(digest(url)))
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<CacheItem>> {
        let body = match fs::read(key.body_path()).await {
            Ok(body) => body,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(
                    anyhow::Error::from(e).context(format!("reading cached body {}", key))
                );
            }
        };

        let headers_path = key.headers_path();
        let raw = match fs::read(&headers_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(key = %key, "cached body has no headers file, treating as miss");
                return Ok(None);
            }
            Err(e) => {
                return Err(anyhow::Error::from(e)
                    .context(format!("reading cached headers {}", headers_path.display())));
            }
        };

        match serde_json::from_slice::<CachedHeaders>(&raw) {
            Ok(headers) => Ok(Some(CacheItem {
                headers,
                body: Bytes::from(body),
            })),
            Err(err) => {
                warn!(
                    error = %err,
                    path = %headers_path.display(),
                    "corrupt cached headers, treating as miss"
                );
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &CacheKey, item: &CacheItem) -> Result<()> {
        let headers = serde_json::to_vec(&item.headers).context("encoding cached headers")?;
        // Body first: a crash before the headers land leaves a miss, not a
        // body paired with stale headers.
        write_file(key.body_path(), &item.body).await?;
        write_file(&key.headers_path(), &headers).await
    }
}

async fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    let mut temp = TempFile::create(path).await?;
    if let Err(err) = temp.file_mut().write_all(data).await {
        let tmp_path = temp.tmp_path.clone();
        temp.rollback().await?;
        return Err(anyhow::Error::from(err)
            .context(format!("writing temp file {}", tmp_path.display())));
    }
    temp.commit().await
}

/// A sibling temp file that is renamed over its final path on commit.
pub struct TempFile {
    tmp_path: PathBuf,
    final_path: PathBuf,
    file: File,
}

impl TempFile {
    pub async fn create(final_path: &Path) -> Result<Self> {
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating cache dir {}", parent.display()))?;
        }

        let tmp_path = temp_path_for(final_path);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)
            .await
            .with_context(|| format!("creating temp file {}", tmp_path.display()))?;

        Ok(Self {
            tmp_path,
            final_path: final_path.to_path_buf(),
            file,
        })
    }

    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    pub async fn commit(self) -> Result<()> {
        let Self {
            tmp_path,
            final_path,
            mut file,
        } = self;

        file.flush()
            .await
            .with_context(|| format!("flushing {}", tmp_path.display()))?;
        drop(file);

        fs::rename(&tmp_path, &final_path).await.with_context(|| {
            format!(
                "moving {} to {}",
                tmp_path.display(),
                final_path.display()
            )
        })
    }

    pub async fn rollback(self) -> Result<()> {
        let Self { tmp_path, file, .. } = self;
        drop(file);
        match fs::remove_file(&tmp_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(anyhow::Error::from(e)
                .context(format!("removing temp file {}", tmp_path.display()))),
        }
    }
}

fn temp_path_for(final_path: &Path) -> PathBuf {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let pid = std::process::id();
    let seq = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_name = match final_path.file_name().and_then(|s| s.to_str()) {
        Some(name) => format!("{name}.tmp-{pid}-{timestamp}-{seq}"),
        None => format!("tmp-{pid}-{timestamp}-{seq}"),
    };
    final_path.with_file_name(tmp_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json_item(body: &'static str) -> CacheItem {
        let mut headers = CachedHeaders::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        headers.insert("etag".to_string(), "\"abc\"".to_string());
        CacheItem::new(headers, body)
    }

    #[tokio::test]
    async fn test_open_creates_root_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("nested").join(".bench-reg");

        assert!(!root.exists());
        let cache = FilesystemCache::open(&root).await.unwrap();
        assert!(root.is_dir());
        assert_eq!(cache.root(), root.as_path());
    }

    #[tokio::test]
    async fn test_open_succeeds_if_directory_exists() {
        let temp_dir = tempfile::tempdir().unwrap();
        FilesystemCache::open(temp_dir.path()).await.unwrap();
        FilesystemCache::open(temp_dir.path()).await.unwrap();
    }

    #[tokio::test]
    async fn test_open_fails_when_root_is_a_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file = temp_dir.path().join("occupied");
        fs::write(&file, b"x").await.unwrap();

        assert!(FilesystemCache::open(&file).await.is_err());
    }

    #[tokio::test]
    async fn test_create_key_joins_root_and_digest() {
        let temp_dir = tempfile::tempdir().unwrap();
        let cache = FilesystemCache::open(temp_dir.path()).await.unwrap();

        let url = "https://registry.npmjs.org/lodash";
        let key = cache.create_key(url);
        assert_eq!(key.body_path(), temp_dir.path().join(digest(url)));
        assert_eq!(
            key.headers_path(),
            temp_dir.path().join(format!("{}.headers", digest(url)))
        );
        assert_eq!(key, cache.create_key(url));
    }

    #[tokio::test]
    async fn test_get_returns_none_for_missing_entry() {
        let temp_dir = tempfile::tempdir().unwrap();
        let cache = FilesystemCache::open(temp_dir.path()).await.unwrap();

        let key = cache.create_key("https://jsr.io/@std/path/meta.json");
        assert!(cache.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_then_get_round_trips() {
        let temp_dir = tempfile::tempdir().unwrap();
        let cache = FilesystemCache::open(temp_dir.path()).await.unwrap();

        let key = cache.create_key("https://registry.npmjs.org/lodash");
        cache.set(&key, &json_item(r#"{"name":"lodash"}"#)).await.unwrap();

        let item = cache.get(&key).await.unwrap().unwrap();
        assert_eq!(item, json_item(r#"{"name":"lodash"}"#));
        assert_eq!(item.content_type(), Some("application/json"));
    }

    #[tokio::test]
    async fn test_set_writes_two_sibling_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        let cache = FilesystemCache::open(temp_dir.path()).await.unwrap();

        let key = cache.create_key("https://registry.npmjs.org/lodash");
        cache.set(&key, &json_item("body")).await.unwrap();

        assert_eq!(fs::read(key.body_path()).await.unwrap(), b"body");
        let raw = fs::read_to_string(key.headers_path()).await.unwrap();
        let decoded: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(decoded["content-type"], "application/json");
        assert_eq!(decoded["etag"], "\"abc\"");

        let mut names = Vec::new();
        let mut dir = fs::read_dir(temp_dir.path()).await.unwrap();
        while let Some(entry) = dir.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names.len(), 2, "no temp files left behind: {names:?}");
    }

    #[tokio::test]
    async fn test_set_twice_is_idempotent() {
        let temp_dir = tempfile::tempdir().unwrap();
        let cache = FilesystemCache::open(temp_dir.path()).await.unwrap();

        let key = cache.create_key("https://registry.npmjs.org/react");
        cache.set(&key, &json_item("{}")).await.unwrap();
        let once = cache.get(&key).await.unwrap();
        cache.set(&key, &json_item("{}")).await.unwrap();
        let twice = cache.get(&key).await.unwrap();
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn test_binary_body_is_preserved() {
        let temp_dir = tempfile::tempdir().unwrap();
        let cache = FilesystemCache::open(temp_dir.path()).await.unwrap();

        let body: Vec<u8> = (0..=255u8).collect();
        let mut headers = CachedHeaders::new();
        headers.insert(
            "content-type".to_string(),
            "application/octet-stream".to_string(),
        );
        let key = cache.create_key("https://registry.npmjs.org/lodash/-/lodash-4.17.21.tgz");
        cache
            .set(&key, &CacheItem::new(headers, body.clone()))
            .await
            .unwrap();

        let item = cache.get(&key).await.unwrap().unwrap();
        assert_eq!(item.body.as_ref(), body.as_slice());
    }

    #[tokio::test]
    async fn test_missing_headers_file_is_a_miss() {
        let temp_dir = tempfile::tempdir().unwrap();
        let cache = FilesystemCache::open(temp_dir.path()).await.unwrap();

        let key = cache.create_key("https://registry.npmjs.org/lodash");
        fs::write(key.body_path(), b"orphan body").await.unwrap();

        assert!(cache.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_headers_file_is_a_miss() {
        let temp_dir = tempfile::tempdir().unwrap();
        let cache = FilesystemCache::open(temp_dir.path()).await.unwrap();

        let key = cache.create_key("https://registry.npmjs.org/lodash");
        fs::write(key.body_path(), b"body").await.unwrap();
        fs::write(key.headers_path(), b"{not json").await.unwrap();
        assert!(cache.get(&key).await.unwrap().is_none());

        fs::write(key.headers_path(), b"[1, 2, 3]").await.unwrap();
        assert!(cache.get(&key).await.unwrap().is_none());

        fs::write(key.headers_path(), [0xff, 0xfe, 0x00]).await.unwrap();
        assert!(cache.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unreadable_body_is_an_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let cache = FilesystemCache::open(temp_dir.path()).await.unwrap();

        // A directory where the body file should be cannot be read as a file.
        let key = cache.create_key("https://registry.npmjs.org/lodash");
        fs::create_dir_all(key.body_path()).await.unwrap();

        assert!(cache.get(&key).await.is_err());
    }

    #[tokio::test]
    async fn test_stats_counts_complete_entries() {
        let temp_dir = tempfile::tempdir().unwrap();
        let cache = FilesystemCache::open(temp_dir.path()).await.unwrap();

        assert_eq!(cache.stats().await.unwrap(), CacheStats::default());

        let a = cache.create_key("https://registry.npmjs.org/a");
        let b = cache.create_key("https://registry.npmjs.org/b");
        cache.set(&a, &json_item("aaaa")).await.unwrap();
        cache.set(&b, &json_item("bb")).await.unwrap();

        // Orphan body without headers is not an entry.
        let orphan = cache.create_key("https://registry.npmjs.org/orphan");
        fs::write(orphan.body_path(), b"zzz").await.unwrap();

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.entries, 2);
        let headers_len = serde_json::to_vec(&json_item("").headers).unwrap().len() as u64;
        assert_eq!(stats.total_bytes, 4 + 2 + 2 * headers_len);
    }

    #[tokio::test]
    async fn test_rollback_removes_temp_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let final_path = temp_dir.path().join("entry");

        let temp_file = TempFile::create(&final_path).await.unwrap();
        let tmp_path = temp_file.tmp_path.clone();
        assert!(tmp_path.exists());
        temp_file.rollback().await.unwrap();

        assert!(!tmp_path.exists());
        assert!(!final_path.exists());
    }

    #[tokio::test]
    async fn test_commit_moves_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let final_path = temp_dir.path().join("entry");

        let mut temp_file = TempFile::create(&final_path).await.unwrap();
        temp_file.file_mut().write_all(b"data").await.unwrap();
        let tmp_path = temp_file.tmp_path.clone();
        temp_file.commit().await.unwrap();

        assert!(!tmp_path.exists());
        assert_eq!(fs::read(&final_path).await.unwrap(), b"data");
    }

    #[test]
    fn test_temp_path_generation() {
        let final_path = PathBuf::from("cache/abc123");
        let first = temp_path_for(&final_path);
        let second = temp_path_for(&final_path);
        assert!(
            first
                .file_name()
                .unwrap()
                .to_str()
                .unwrap()
                .starts_with("abc123.tmp-")
        );
        assert_ne!(first, second);
    }
}
