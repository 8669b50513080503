//! Loader Configuration
//!
//! Configuration for archive indexing and resolver caching, loaded from a
//! `modfed.toml` file:
//!
//! ```toml
//! [nested]
//! prefix = "META-INF/lib/"
//! suffix = ".jar"
//! policy = "skip"        # or "fail"
//! max_depth = 1
//!
//! [extraction]
//! temp_dir = "/var/tmp/modfed"
//!
//! [cache]
//! miss_capacity = 16384
//! ```
//!
//! Every section and key is optional. A few settings can also be overridden
//! through the environment (`MODFED_MISS_CACHE_SIZE`, `MODFED_NESTED_POLICY`,
//! `MODFED_TEMP_DIR`), see [`LoaderConfig::with_env_overrides`].

use std::io;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

/// Default prefix of bundled archives inside a module archive.
pub const DEFAULT_NESTED_PREFIX: &str = "META-INF/lib/";

/// Default suffix of bundled archives inside a module archive.
pub const DEFAULT_NESTED_SUFFIX: &str = ".jar";

/// Default capacity of the negative (miss) cache.
pub const DEFAULT_MISS_CAPACITY: usize = 16384;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error while reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Invalid configuration in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// What to do with a bundled archive that cannot be read.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub enum NestedArchivePolicy {
    /// Log a warning and index the module without that nested archive.
    #[default]
    #[serde(rename = "skip")]
    SkipBadNestedEntry,
    /// Fail construction of the whole module.
    #[serde(rename = "fail")]
    FailModule,
}

impl NestedArchivePolicy {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "skip" | "skip_bad_nested_entry" => Some(Self::SkipBadNestedEntry),
            "fail" | "fail_module" => Some(Self::FailModule),
            _ => None,
        }
    }
}

/// The `[nested]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NestedConfig {
    /// Directory prefix that marks an entry as a bundled archive.
    pub prefix: String,
    /// File suffix that marks an entry as a bundled archive.
    pub suffix: String,
    pub policy: NestedArchivePolicy,
    /// How many levels of bundling are followed. `0` disables nested
    /// archives entirely; `1` follows archives bundled in the outer archive.
    pub max_depth: usize,
}

impl Default for NestedConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_NESTED_PREFIX.to_string(),
            suffix: DEFAULT_NESTED_SUFFIX.to_string(),
            policy: NestedArchivePolicy::default(),
            max_depth: 1,
        }
    }
}

impl NestedConfig {
    /// Check whether an archive entry is a bundled archive.
    pub fn matches(&self, entry: &str) -> bool {
        entry.len() > self.prefix.len() + self.suffix.len()
            && entry.starts_with(&self.prefix)
            && entry.ends_with(&self.suffix)
    }
}

/// The `[extraction]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Parent directory for ephemeral extraction storage.
    /// Defaults to the system temporary directory.
    pub temp_dir: Option<PathBuf>,
}

/// The `[cache]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of remembered misses.
    pub miss_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            miss_capacity: DEFAULT_MISS_CAPACITY,
        }
    }
}

impl CacheConfig {
    pub fn miss_capacity(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.miss_capacity).unwrap_or(NonZeroUsize::MIN)
    }
}

/// Complete loader configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub nested: NestedConfig,
    pub extraction: ExtractionConfig,
    pub cache: CacheConfig,
}

impl LoaderConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse configuration from TOML content.
    pub fn parse_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Apply `MODFED_*` environment overrides.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(raw) = lookup("MODFED_MISS_CACHE_SIZE") {
            match raw.parse::<usize>().ok().filter(|n| *n > 0) {
                Some(n) => self.cache.miss_capacity = n,
                None => warn!(target: "modfed::config", value = %raw, "Ignoring invalid MODFED_MISS_CACHE_SIZE"),
            }
        }
        if let Some(raw) = lookup("MODFED_NESTED_POLICY") {
            match NestedArchivePolicy::parse(&raw) {
                Some(policy) => self.nested.policy = policy,
                None => warn!(target: "modfed::config", value = %raw, "Ignoring invalid MODFED_NESTED_POLICY"),
            }
        }
        if let Some(raw) = lookup("MODFED_TEMP_DIR") {
            if raw.is_empty() {
                warn!(target: "modfed::config", "Ignoring empty MODFED_TEMP_DIR");
            } else {
                self.extraction.temp_dir = Some(PathBuf::from(raw));
            }
        }
        self
    }
}
