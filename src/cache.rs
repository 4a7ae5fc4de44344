//! Versioned offline copy of the web player's shell assets.
//!
//! Storage is a directory of named buckets. Each bucket holds an
//! `index.json` mapping request URLs to body files. Install fills the
//! bucket for the current version, fetch serves from any bucket before
//! going to the network, and activate removes every bucket left over from
//! older versions.
use anyhow::{Context, Result};
use log::{debug, info};
use reqwest::Url;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;

use crate::config::CacheConfig;

const INDEX_FILE: &str = "index.json";
const STAGING_PREFIX: &str = ".staging-";

/// Network side of the cache.
pub trait AssetFetcher: Send + Sync {
    fn fetch(&self, url: &Url) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl AssetFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>> {
        let response = self.client.get(url.clone()).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

/// Root directory holding every bucket.
#[derive(Debug, Clone)]
pub struct CacheStorage {
    root: PathBuf,
}

impl CacheStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn bucket_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Names of all committed buckets, sorted.
    pub async fn keys(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(STAGING_PREFIX) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    pub async fn has(&self, name: &str) -> bool {
        tokio::fs::metadata(self.bucket_dir(name).join(INDEX_FILE))
            .await
            .is_ok()
    }

    pub async fn open(&self, name: &str) -> Result<CacheBucket> {
        CacheBucket::load(self.bucket_dir(name)).await
    }

    pub async fn delete(&self, name: &str) -> Result<bool> {
        match tokio::fs::remove_dir_all(self.bucket_dir(name)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Look `url` up across every bucket.
    pub async fn match_url(&self, url: &Url) -> Result<Option<Vec<u8>>> {
        for name in self.keys().await? {
            let bucket = self.open(&name).await?;
            if let Some(body) = bucket.get(url).await? {
                return Ok(Some(body));
            }
        }
        Ok(None)
    }

    /// Write `entries` into a fresh bucket `name`, replacing any existing
    /// one. The bucket only appears once every body is on disk.
    async fn commit(&self, name: &str, entries: Vec<(Url, Vec<u8>)>) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        let staging = self.root.join(format!("{}{}", STAGING_PREFIX, name));
        let _ = tokio::fs::remove_dir_all(&staging).await;

        tokio::fs::create_dir_all(&staging).await?;
        let mut bucket = CacheBucket::load(staging.clone()).await?;
        for (url, body) in entries {
            bucket.put(&url, &body).await?;
        }
        bucket.save_index().await?;

        self.delete(name).await?;
        tokio::fs::rename(&staging, self.bucket_dir(name))
            .await
            .with_context(|| format!("committing cache bucket {}", name))?;
        Ok(())
    }
}

pub struct CacheBucket {
    dir: PathBuf,
    index: BTreeMap<String, String>,
}

impl CacheBucket {
    async fn load(dir: PathBuf) -> Result<Self> {
        let index = match tokio::fs::read(dir.join(INDEX_FILE)).await {
            Ok(raw) => serde_json::from_slice(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { dir, index })
    }

    pub fn urls(&self) -> impl Iterator<Item = &str> {
        self.index.keys().map(String::as_str)
    }

    pub async fn get(&self, url: &Url) -> Result<Option<Vec<u8>>> {
        match self.index.get(url.as_str()) {
            Some(file) => Ok(Some(tokio::fs::read(self.dir.join(file)).await?)),
            None => Ok(None),
        }
    }

    async fn put(&mut self, url: &Url, body: &[u8]) -> Result<()> {
        // Overwrites keep their file so later entries never collide with it
        let file = match self.index.get(url.as_str()) {
            Some(file) => file.clone(),
            None => format!("entry-{}.bin", self.index.len()),
        };
        tokio::fs::write(self.dir.join(&file), body).await?;
        self.index.insert(url.to_string(), file);
        Ok(())
    }

    async fn save_index(&self) -> Result<()> {
        let raw = serde_json::to_vec_pretty(&self.index)?;
        tokio::fs::write(self.dir.join(INDEX_FILE), raw).await?;
        Ok(())
    }
}

pub struct OfflineCache<F> {
    storage: CacheStorage,
    name: String,
    assets: Vec<String>,
    base_url: Url,
    fetcher: F,
}

impl<F: AssetFetcher> OfflineCache<F> {
    pub fn new(
        storage: CacheStorage,
        name: impl Into<String>,
        assets: Vec<String>,
        base_url: &str,
        fetcher: F,
    ) -> Result<Self> {
        let base_url =
            Url::parse(base_url).with_context(|| format!("invalid base URL {}", base_url))?;
        Ok(Self {
            storage,
            name: name.into(),
            assets,
            base_url,
            fetcher,
        })
    }

    pub fn from_config(config: &CacheConfig, fetcher: F) -> Result<Self> {
        let base_url = config
            .shell_base_url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("cache.shell_base_url is not set"))?;
        Self::new(
            CacheStorage::new(config.storage_root()),
            config.name.clone(),
            config.assets.clone(),
            base_url,
            fetcher,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn storage(&self) -> &CacheStorage {
        &self.storage
    }

    pub fn resolve(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("cannot resolve {} against {}", path, self.base_url))
    }

    /// Download every manifest asset into the current bucket. Any failed
    /// download fails the whole install and leaves storage untouched, as
    /// does a manifest listing the same URL twice.
    pub async fn install(&self) -> Result<()> {
        let mut entries: Vec<(Url, Vec<u8>)> = Vec::with_capacity(self.assets.len());
        for path in &self.assets {
            let url = self.resolve(path)?;
            if entries.iter().any(|(seen, _)| *seen == url) {
                anyhow::bail!("duplicate cache asset {}", url);
            }
            let body = self
                .fetcher
                .fetch(&url)
                .await
                .with_context(|| format!("fetching {}", url))?;
            debug!("Fetched {} ({} bytes)", url, body.len());
            entries.push((url, body));
        }

        self.storage.commit(&self.name, entries).await?;
        info!("Installed {} assets into cache {}", self.assets.len(), self.name);
        Ok(())
    }

    /// Cached body if any bucket has it, otherwise straight from the
    /// network. Network responses are not written back.
    pub async fn fetch(&self, path: &str) -> Result<Vec<u8>> {
        let url = self.resolve(path)?;
        if let Some(body) = self.storage.match_url(&url).await? {
            debug!("Cache hit for {}", url);
            return Ok(body);
        }
        debug!("Cache miss for {}", url);
        self.fetcher.fetch(&url).await
    }

    /// Delete every bucket whose name is not the current version. Returns
    /// the deleted names.
    pub async fn activate(&self) -> Result<Vec<String>> {
        let mut deleted = Vec::new();
        for name in self.storage.keys().await? {
            if name != self.name && self.storage.delete(&name).await? {
                info!("Deleted stale cache {}", name);
                deleted.push(name);
            }
        }
        Ok(deleted)
    }

    /// Install followed by activate.
    pub async fn register(&self) -> Result<String> {
        self.install().await?;
        self.activate().await?;
        Ok(self.name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const BASE: &str = "https://radio.test/app/";

    #[derive(Default)]
    struct FakeFetcher {
        bodies: HashMap<String, Vec<u8>>,
        calls: Arc<AtomicUsize>,
    }

    impl FakeFetcher {
        fn serving(paths: &[&str]) -> Self {
            let mut bodies = HashMap::new();
            for path in paths {
                let url = Url::parse(BASE).unwrap().join(path).unwrap();
                bodies.insert(url.to_string(), format!("body of {}", path).into_bytes());
            }
            Self {
                bodies,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl AssetFetcher for FakeFetcher {
        async fn fetch(&self, url: &Url) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.bodies
                .get(url.as_str())
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("404 {}", url))
        }
    }

    fn assets() -> Vec<String> {
        ["./", "./index.html", "./style.css"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn cache(root: &Path, name: &str, fetcher: FakeFetcher) -> OfflineCache<FakeFetcher> {
        OfflineCache::new(CacheStorage::new(root), name, assets(), BASE, fetcher).unwrap()
    }

    #[tokio::test]
    async fn test_install_then_fetch_serves_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = FakeFetcher::serving(&["./", "./index.html", "./style.css"]);
        let calls = fetcher.calls.clone();
        let cache = cache(dir.path(), "mufique-radio-v1", fetcher);

        cache.install().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(cache.storage().keys().await.unwrap(), vec!["mufique-radio-v1"]);

        let body = cache.fetch("./style.css").await.unwrap();
        assert_eq!(body, b"body of ./style.css");
        let root = cache.fetch("./").await.unwrap();
        assert_eq!(root, b"body of ./");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fetch_miss_passes_through_without_caching() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher =
            FakeFetcher::serving(&["./", "./index.html", "./style.css", "./live.json"]);
        let calls = fetcher.calls.clone();
        let cache = cache(dir.path(), "mufique-radio-v1", fetcher);
        cache.install().await.unwrap();

        assert_eq!(cache.fetch("./live.json").await.unwrap(), b"body of ./live.json");
        assert_eq!(cache.fetch("./live.json").await.unwrap(), b"body of ./live.json");
        assert_eq!(calls.load(Ordering::SeqCst), 5);

        let bucket = cache.storage().open("mufique-radio-v1").await.unwrap();
        assert_eq!(bucket.urls().count(), 3);
    }

    #[tokio::test]
    async fn test_install_fails_when_any_asset_fails() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(
            dir.path(),
            "mufique-radio-v1",
            FakeFetcher::serving(&["./", "./index.html"]),
        );

        assert!(cache.install().await.is_err());
        assert!(cache.storage().keys().await.unwrap().is_empty());
        assert!(!cache.storage().has("mufique-radio-v1").await);
    }

    #[tokio::test]
    async fn test_failed_reinstall_keeps_previous_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let good = cache(
            dir.path(),
            "mufique-radio-v1",
            FakeFetcher::serving(&["./", "./index.html", "./style.css"]),
        );
        good.install().await.unwrap();

        let broken = cache(dir.path(), "mufique-radio-v1", FakeFetcher::serving(&["./"]));
        assert!(broken.install().await.is_err());
        assert!(broken.storage().has("mufique-radio-v1").await);
        assert_eq!(
            good.fetch("./index.html").await.unwrap(),
            b"body of ./index.html"
        );
    }

    #[tokio::test]
    async fn test_activate_deletes_every_other_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let all = ["./", "./index.html", "./style.css"];
        for old in ["mufique-radio-v0", "other-cache"] {
            cache(dir.path(), old, FakeFetcher::serving(&all))
                .install()
                .await
                .unwrap();
        }

        let current = cache(dir.path(), "mufique-radio-v1", FakeFetcher::serving(&all));
        current.install().await.unwrap();
        let deleted = current.activate().await.unwrap();

        assert_eq!(deleted, vec!["mufique-radio-v0", "other-cache"]);
        assert_eq!(
            current.storage().keys().await.unwrap(),
            vec!["mufique-radio-v1"]
        );

        // Nothing left to remove the second time
        assert!(current.activate().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_install_rejects_duplicate_assets() {
        let dir = tempfile::tempdir().unwrap();
        let assets = ["./a.css", "./a.css", "./b.js"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let cache = OfflineCache::new(
            CacheStorage::new(dir.path()),
            "mufique-radio-v1",
            assets,
            BASE,
            FakeFetcher::serving(&["./a.css", "./b.js"]),
        )
        .unwrap();

        assert!(cache.install().await.is_err());
        assert!(cache.storage().keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rewritten_entry_keeps_its_own_body() {
        let dir = tempfile::tempdir().unwrap();
        let base = Url::parse(BASE).unwrap();
        let a = base.join("./a.css").unwrap();
        let b = base.join("./b.js").unwrap();

        let mut bucket = CacheBucket::load(dir.path().to_path_buf()).await.unwrap();
        bucket.put(&a, b"old a").await.unwrap();
        bucket.put(&a, b"new a").await.unwrap();
        bucket.put(&b, b"b").await.unwrap();

        assert_eq!(bucket.get(&a).await.unwrap().unwrap(), b"new a");
        assert_eq!(bucket.get(&b).await.unwrap().unwrap(), b"b");
    }

    #[tokio::test]
    async fn test_open_missing_bucket_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let storage = CacheStorage::new(dir.path());

        let bucket = storage.open("missing").await.unwrap();
        assert_eq!(bucket.urls().count(), 0);
        assert!(storage.keys().await.unwrap().is_empty());
        assert!(!dir.path().join("missing").exists());
    }

    #[tokio::test]
    async fn test_keys_on_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let storage = CacheStorage::new(dir.path().join("absent"));
        assert!(storage.keys().await.unwrap().is_empty());
    }

    #[test]
    fn test_resolve_relative_paths() {
        let cache = cache(
            Path::new("/nonexistent"),
            "v1",
            FakeFetcher::default(),
        );
        assert_eq!(cache.resolve("./").unwrap().as_str(), "https://radio.test/app/");
        assert_eq!(
            cache.resolve("./manifest.json").unwrap().as_str(),
            "https://radio.test/app/manifest.json"
        );
    }
}
