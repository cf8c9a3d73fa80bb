//! Versioned on-disk asset cache.
//!
//! One versioned cache name maps to one directory under the cache root.
//! `install` pre-populates a fixed asset list, `activate` deletes stale
//! versioned directories, and steady-state `fetch` serves cache-first with
//! network fallback, populating the cache off the response path so the caller
//! never waits on a disk write.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::transport::{OutboundRequest, Transport, TransportResponse};

/// What a missed request falls back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// A page navigation; falls back to the configured offline page.
    Navigation,
    /// An image; falls back to the configured placeholder asset.
    Image,
    /// Anything else; no fallback.
    Other,
}

/// A request routed through the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRequest {
    /// Target URL.
    pub url: String,
    /// HTTP method; only GET responses are ever stored.
    pub method: String,
    /// Fallback classification.
    pub kind: RequestKind,
}

impl CacheRequest {
    /// A page navigation request.
    #[must_use]
    pub fn navigation(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            kind: RequestKind::Navigation,
        }
    }

    /// An image request.
    #[must_use]
    pub fn image(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            kind: RequestKind::Image,
        }
    }

    /// A plain asset request.
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            kind: RequestKind::Other,
        }
    }
}

mod body_b64 {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}

/// A stored response and its metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL this entry answers.
    pub url: String,
    /// Request method this entry answers.
    pub method: String,
    /// Response status.
    pub status: u16,
    /// Response headers.
    pub headers: Vec<(String, String)>,
    /// Response body.
    #[serde(with = "body_b64")]
    pub body: Vec<u8>,
    /// When the response was fetched.
    pub fetched_at: DateTime<Utc>,
}

impl CacheEntry {
    fn from_response(request: &CacheRequest, response: &TransportResponse) -> Self {
        Self {
            url: request.url.clone(),
            method: request.method.clone(),
            status: response.status,
            headers: response.headers.clone(),
            body: response.body.to_vec(),
            fetched_at: Utc::now(),
        }
    }
}

/// How [`AssetCache::fetch`] satisfied a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Served from the cache.
    Cached(CacheEntry),
    /// Served fresh from the network.
    Network(CacheEntry),
    /// Cache and network both missed; served the configured fallback.
    OfflineFallback(CacheEntry),
    /// Cache and network both missed and no fallback applies.
    Unavailable,
}

impl FetchOutcome {
    /// The entry served, if any.
    #[must_use]
    pub const fn entry(&self) -> Option<&CacheEntry> {
        match self {
            Self::Cached(entry) | Self::Network(entry) | Self::OfflineFallback(entry) => {
                Some(entry)
            }
            Self::Unavailable => None,
        }
    }
}

/// Versioned read-through asset cache.
pub struct AssetCache {
    root: PathBuf,
    name: String,
    precache: Vec<String>,
    offline_page: Option<String>,
    image_placeholder: Option<String>,
    origin: Option<Url>,
    transport: Arc<dyn Transport>,
    writes: Arc<Mutex<JoinSet<()>>>,
}

impl AssetCache {
    /// Creates a cache rooted at `root` for the configured version.
    ///
    /// `origin` gates which absolute URLs may be cached; relative URLs are
    /// always considered same-origin.
    #[must_use]
    pub fn new(
        config: &CacheConfig,
        root: impl Into<PathBuf>,
        origin: Option<Url>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            root: root.into(),
            name: config.cache_name(),
            precache: config.precache.clone(),
            offline_page: config.offline_page.clone(),
            image_placeholder: config.image_placeholder.clone(),
            origin,
            transport,
            writes: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    /// The versioned cache name, e.g. `outpost-v1.0.0`.
    #[must_use]
    pub fn cache_name(&self) -> &str {
        &self.name
    }

    fn dir(&self) -> PathBuf {
        self.root.join(&self.name)
    }

    /// Filename for a request key. The URL-safe alphabet keeps arbitrary
    /// URLs out of the path namespace.
    fn entry_path(dir: &Path, method: &str, url: &str) -> PathBuf {
        let key = URL_SAFE_NO_PAD.encode(format!("{method} {url}"));
        dir.join(format!("{key}.json"))
    }

    /// Pre-populates the cache with the configured asset list.
    ///
    /// Mirrors install semantics: every asset must fetch successfully or the
    /// install fails as a whole.
    ///
    /// # Errors
    ///
    /// Returns an error if any asset cannot be fetched with a 2xx or stored.
    pub async fn install(&self) -> Result<usize> {
        tokio::fs::create_dir_all(self.dir()).await?;
        for url in &self.precache {
            let response = self.transport.send(OutboundRequest::get(url.clone())).await?;
            if !response.is_success() {
                return Err(Error::Rejected(response.status));
            }
            let request = CacheRequest::get(url.clone());
            write_entry(&self.dir(), &CacheEntry::from_response(&request, &response))?;
        }
        log::info!("cache {} installed {} assets", self.name, self.precache.len());
        Ok(self.precache.len())
    }

    /// Deletes every sibling cache directory whose name differs from the
    /// current versioned name. Deletion errors are logged and skipped.
    ///
    /// Returns the names of the caches that were deleted.
    ///
    /// # Errors
    ///
    /// Returns an error only if the cache root itself cannot be read or the
    /// current cache directory cannot be created.
    pub async fn activate(&self) -> Result<Vec<String>> {
        tokio::fs::create_dir_all(self.dir()).await?;

        let mut deleted = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == self.name || !entry.path().is_dir() {
                continue;
            }
            match tokio::fs::remove_dir_all(entry.path()).await {
                Ok(()) => {
                    log::info!("deleted old cache {name}");
                    deleted.push(name);
                }
                // Fail open: a cache that will not delete is only wasted disk.
                Err(e) => log::warn!("could not delete old cache {name}: {e}"),
            }
        }
        Ok(deleted)
    }

    /// Looks up a stored entry without touching the network.
    pub async fn lookup(&self, method: &str, url: &str) -> Option<CacheEntry> {
        let path = Self::entry_path(&self.dir(), method, url);
        let contents = tokio::fs::read_to_string(&path).await.ok()?;
        match serde_json::from_str(&contents) {
            Ok(entry) => Some(entry),
            Err(e) => {
                log::warn!("dropping unreadable cache entry {}: {e}", path.display());
                None
            }
        }
    }

    /// Serves a request cache-first, falling back to the network and then to
    /// the configured offline assets. Never a hard failure.
    pub async fn fetch(&self, request: &CacheRequest) -> FetchOutcome {
        if let Some(entry) = self.lookup(&request.method, &request.url).await {
            return FetchOutcome::Cached(entry);
        }

        let outbound = OutboundRequest {
            url: request.url.clone(),
            method: request.method.clone(),
            headers: Vec::new(),
            body: None,
        };
        match self.transport.send(outbound).await {
            Ok(response) => {
                let entry = CacheEntry::from_response(request, &response);
                if response.is_success() && self.cacheable(&request.url) {
                    self.spawn_store(entry.clone()).await;
                }
                FetchOutcome::Network(entry)
            }
            Err(e) => {
                log::debug!("network miss for {}: {e}", request.url);
                self.fallback(request).await
            }
        }
    }

    /// Awaits all pending cache writes. Used by tests and graceful shutdown.
    pub async fn quiesce(&self) {
        let mut writes = self.writes.lock().await;
        while writes.join_next().await.is_some() {}
    }

    /// Only same-origin responses are stored; relative URLs qualify by
    /// construction.
    fn cacheable(&self, url: &str) -> bool {
        let Ok(absolute) = Url::parse(url) else {
            return true;
        };
        self.origin.as_ref().is_some_and(|origin| {
            absolute.scheme() == origin.scheme()
                && absolute.host_str() == origin.host_str()
                && absolute.port_or_known_default() == origin.port_or_known_default()
        })
    }

    /// Queues the entry write off the response path.
    async fn spawn_store(&self, entry: CacheEntry) {
        let dir = self.dir();
        self.writes.lock().await.spawn(async move {
            if let Err(e) = write_entry(&dir, &entry) {
                log::warn!("cache write for {} failed: {e}", entry.url);
            }
        });
    }

    async fn fallback(&self, request: &CacheRequest) -> FetchOutcome {
        let fallback_url = match request.kind {
            RequestKind::Navigation => self.offline_page.as_deref(),
            RequestKind::Image => self.image_placeholder.as_deref(),
            RequestKind::Other => None,
        };
        match fallback_url {
            Some(url) => match self.lookup("GET", url).await {
                Some(entry) => FetchOutcome::OfflineFallback(entry),
                None => FetchOutcome::Unavailable,
            },
            None => FetchOutcome::Unavailable,
        }
    }
}

/// Writes one entry atomically (write tmp + fsync + rename).
fn write_entry(dir: &Path, entry: &CacheEntry) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let path = AssetCache::entry_path(dir, &entry.method, &entry.url);
    let json = serde_json::to_string(entry).map_err(|e| Error::Storage(e.to_string()))?;

    let tmp_path = path.with_extension("json.tmp");
    let mut file = std::fs::File::create(&tmp_path)?;
    use std::io::Write;
    file.write_all(json.as_bytes())?;
    file.sync_all()?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}
