//! Configuration for the sync engine.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Offline queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of queued actions; enqueue past this fails loudly.
    pub max_queued: usize,
    /// Age in seconds after which a queued action is dropped during replay.
    /// `None` keeps actions forever.
    pub max_age_secs: Option<u64>,
    /// Number of actions replayed concurrently per pass.
    pub concurrent_replays: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queued: 1000,
            max_age_secs: Some(7 * 24 * 60 * 60),
            concurrent_replays: 4,
        }
    }
}

impl QueueConfig {
    /// Sets the queue capacity.
    #[must_use]
    pub const fn with_max_queued(mut self, max: usize) -> Self {
        self.max_queued = max;
        self
    }

    /// Sets the action expiry age in seconds (`None` disables expiry).
    #[must_use]
    pub const fn with_max_age_secs(mut self, secs: Option<u64>) -> Self {
        self.max_age_secs = secs;
        self
    }

    /// Sets the replay concurrency.
    #[must_use]
    pub const fn with_concurrent_replays(mut self, n: usize) -> Self {
        self.concurrent_replays = n;
        self
    }
}

/// Versioned asset cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache name prefix, combined with the version into the cache key.
    pub name: String,
    /// Asset-set version; bumping it triggers a fresh install + activate.
    pub version: String,
    /// Assets fetched and stored during `install`.
    pub precache: Vec<String>,
    /// Page served for navigation requests when both cache and network miss.
    pub offline_page: Option<String>,
    /// Asset served for image requests when both cache and network miss.
    pub image_placeholder: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: "outpost".to_string(),
            version: "1.0.0".to_string(),
            precache: Vec::new(),
            offline_page: None,
            image_placeholder: None,
        }
    }
}

impl CacheConfig {
    /// The versioned cache name, e.g. `outpost-v1.0.0`.
    #[must_use]
    pub fn cache_name(&self) -> String {
        format!("{}-v{}", self.name, self.version)
    }

    /// Sets the asset-set version.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Sets the list of assets to precache during install.
    #[must_use]
    pub fn with_precache(mut self, assets: Vec<String>) -> Self {
        self.precache = assets;
        self
    }

    /// Sets the offline fallback page URL.
    #[must_use]
    pub fn with_offline_page(mut self, url: impl Into<String>) -> Self {
        self.offline_page = Some(url.into());
        self
    }

    /// Sets the image placeholder URL.
    #[must_use]
    pub fn with_image_placeholder(mut self, url: impl Into<String>) -> Self {
        self.image_placeholder = Some(url.into());
        self
    }
}

/// Server endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL that relative action/asset URLs resolve against.
    pub base_url: Option<String>,
    /// CSRF token sent as `X-CSRFToken` on API calls that require it.
    pub csrf_token: Option<String>,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            csrf_token: None,
            request_timeout_secs: 30,
        }
    }
}

impl ApiConfig {
    /// Sets the API base URL.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the CSRF token.
    #[must_use]
    pub fn with_csrf_token(mut self, token: impl Into<String>) -> Self {
        self.csrf_token = Some(token.into());
        self
    }
}

/// Local storage locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Directory holding the queue file and the cache root.
    pub data_dir: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Returns the default data directory.
///
/// Uses `STATE_DIRECTORY` (set by systemd when `StateDirectory=` is
/// configured), falling back to `$XDG_DATA_HOME/outpost` for interactive use.
#[must_use]
pub fn default_data_dir() -> PathBuf {
    if let Ok(state_dir) = std::env::var("STATE_DIRECTORY") {
        PathBuf::from(state_dir)
    } else {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("outpost")
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Offline queue settings.
    pub queue: QueueConfig,
    /// Asset cache settings.
    pub cache: CacheConfig,
    /// Server endpoint settings.
    pub api: ApiConfig,
    /// Storage locations.
    pub paths: PathConfig,
}

impl SyncConfig {
    /// Creates a config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &std::path::Path) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents)
            .map_err(|e| crate::Error::Config(format!("{}: {e}", path.display())))
    }

    /// Path of the durable queue file.
    #[must_use]
    pub fn queue_path(&self) -> PathBuf {
        self.paths.data_dir.join("queue.json")
    }

    /// Root directory holding the versioned cache directories.
    #[must_use]
    pub fn cache_root(&self) -> PathBuf {
        self.paths.data_dir.join("caches")
    }
}
