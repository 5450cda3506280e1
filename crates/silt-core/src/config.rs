use crate::index::IndexSpec;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for opening a database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database name; also the process-wide memoization key for `connect`
    pub name: String,

    /// Application schema version, recorded in the `_meta` table
    #[serde(default = "default_version")]
    pub version: String,

    /// Human-readable description, recorded in the `_meta` table
    #[serde(default)]
    pub description: String,

    /// Size hint carried from the open parameters; unused by SQLite
    /// Default: -1
    #[serde(default = "default_size")]
    pub size: i64,

    /// Path to the database file
    /// Default: `{name}.db` in the working directory
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Open an in-memory database instead of a file (testing)
    #[serde(default)]
    pub in_memory: bool,

    /// Enable WAL mode
    /// Default: true
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,

    /// Collections created eagerly on open
    #[serde(default)]
    pub collections: Vec<CollectionConfig>,

    /// Change feed tuning
    #[serde(default)]
    pub feed: FeedConfig,
}

fn default_version() -> String {
    "1".to_string()
}

fn default_size() -> i64 {
    -1
}

fn default_wal_mode() -> bool {
    true
}

impl DatabaseConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: default_version(),
            description: String::new(),
            size: default_size(),
            path: None,
            in_memory: false,
            wal_mode: default_wal_mode(),
            collections: Vec::new(),
            feed: FeedConfig::default(),
        }
    }

    /// Open an in-memory database (testing)
    pub fn in_memory(name: impl Into<String>) -> Self {
        let mut cfg = Self::new(name);
        cfg.in_memory = true;
        cfg
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_collection(mut self, collection: CollectionConfig) -> Self {
        self.collections.push(collection);
        self
    }

    pub fn with_feed(mut self, feed: FeedConfig) -> Self {
        self.feed = feed;
        self
    }

    /// Resolved database file path (`{name}.db` unless overridden)
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}.db", self.name)))
    }
}

/// A collection declared up front, with its secondary indexes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub name: String,

    #[serde(default)]
    pub indexes: Vec<IndexSpec>,
}

impl CollectionConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            indexes: Vec::new(),
        }
    }

    pub fn with_index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }
}

/// Tuning for the change feed poll loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Idle backoff for the first `fast_poll_limit` empty polls (milliseconds)
    /// Default: 250
    #[serde(default = "default_fast_backoff_ms")]
    pub fast_backoff_ms: u64,

    /// Number of empty polls served at the fast cadence
    /// Default: 10
    #[serde(default = "default_fast_poll_limit")]
    pub fast_poll_limit: u32,

    /// Idle backoff through `mid_poll_limit` empty polls (milliseconds)
    /// Default: 1000
    #[serde(default = "default_mid_backoff_ms")]
    pub mid_backoff_ms: u64,

    /// Number of empty polls served at or below the mid cadence
    /// Default: 60
    #[serde(default = "default_mid_poll_limit")]
    pub mid_poll_limit: u32,

    /// Idle backoff beyond `mid_poll_limit` empty polls (milliseconds)
    /// Default: 2000
    #[serde(default = "default_slow_backoff_ms")]
    pub slow_backoff_ms: u64,

    /// Backoff after a subscriber callback error (milliseconds)
    /// Default: 10000
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
}

fn default_fast_backoff_ms() -> u64 {
    250
}

fn default_fast_poll_limit() -> u32 {
    10
}

fn default_mid_backoff_ms() -> u64 {
    1000
}

fn default_mid_poll_limit() -> u32 {
    60
}

fn default_slow_backoff_ms() -> u64 {
    2000
}

fn default_error_backoff_ms() -> u64 {
    10_000
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            fast_backoff_ms: default_fast_backoff_ms(),
            fast_poll_limit: default_fast_poll_limit(),
            mid_backoff_ms: default_mid_backoff_ms(),
            mid_poll_limit: default_mid_poll_limit(),
            slow_backoff_ms: default_slow_backoff_ms(),
            error_backoff_ms: default_error_backoff_ms(),
        }
    }
}

impl FeedConfig {
    pub fn with_error_backoff_ms(mut self, ms: u64) -> Self {
        self.error_backoff_ms = ms;
        self
    }

    /// Idle sleep for the given number of consecutive empty polls.
    pub fn idle_backoff(&self, empty_polls: u32) -> Duration {
        let ms = if empty_polls <= self.fast_poll_limit {
            self.fast_backoff_ms
        } else if empty_polls <= self.mid_poll_limit {
            self.mid_backoff_ms
        } else {
            self.slow_backoff_ms
        };
        Duration::from_millis(ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}
