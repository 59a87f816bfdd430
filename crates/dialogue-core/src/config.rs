//! Engine configuration file.
//!
//! ```toml
//! [dispatch]
//! workers = 3
//! max_retries = 2
//! base_delay_ms = 1000
//! max_delay_ms = 4000
//! split_sentences = true
//! fallback = "sequential"
//!
//! [cache]
//! enabled = true
//! dir = "/tmp/dialogue-cache"
//!
//! [assembly]
//! sample_rate = 24000
//! stereo = true
//! gap_ms = 250
//! normalization = { mode = "loudness", target = -16.0 }
//! ```
//!
//! Every field is optional and falls back to its default.

use crate::assembler::AssemblyOptions;
use crate::backend::FallbackPolicy;
use crate::dispatcher::{DispatchOptions, RetryPolicy};
use crate::error::{DialogueError, DialogueResult};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Upper bound on concurrent backend workers
pub const MAX_WORKERS: usize = 64;

/// `[dispatch]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSection {
    /// Concurrent backend workers
    pub workers: usize,
    /// Retries per backend after the first attempt
    pub max_retries: u32,
    /// First retry delay in milliseconds
    pub base_delay_ms: u64,
    /// Maximum retry delay in milliseconds
    pub max_delay_ms: u64,
    /// Synthesize sentences separately
    pub split_sentences: bool,
    /// Backend fallback policy
    pub fallback: FallbackPolicy,
}

impl Default for DispatchSection {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            workers: crate::DEFAULT_WORKERS,
            max_retries: retry.max_retries,
            base_delay_ms: u64::try_from(retry.base_delay.as_millis()).unwrap_or(u64::MAX),
            max_delay_ms: u64::try_from(retry.max_delay.as_millis()).unwrap_or(u64::MAX),
            split_sentences: true,
            fallback: FallbackPolicy::default(),
        }
    }
}

/// `[cache]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    /// Use a disk cache
    pub enabled: bool,
    /// Cache directory; the platform cache directory when unset
    pub dir: Option<PathBuf>,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Dispatcher settings
    pub dispatch: DispatchSection,
    /// Cache settings
    pub cache: CacheSection,
    /// Mixdown settings
    pub assembly: AssemblyOptions,
}

impl EngineConfig {
    /// Parse a TOML configuration document
    ///
    /// # Errors
    ///
    /// Returns a configuration error for invalid TOML or invalid values.
    pub fn from_toml_str(source: &str) -> DialogueResult<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML configuration file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is invalid.
    pub fn load<P: AsRef<Path>>(path: P) -> DialogueResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| DialogueError::file(format!("Failed to read {}: {e}", path.display())))?;
        let config = Self::from_toml_str(&source)?;
        info!("Loaded engine configuration from {}", path.display());
        Ok(config)
    }

    /// Load the platform config file if it exists, defaults otherwise
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but is invalid.
    pub fn load_or_default() -> DialogueResult<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(path),
            _ => {
                debug!("No engine configuration file, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Platform location of `config.toml`
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("ai", "Dialogue", "dialogue").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Serialize to TOML
    ///
    /// # Errors
    ///
    /// Returns a configuration error if serialization fails.
    pub fn to_toml_string(&self) -> DialogueResult<String> {
        toml::to_string_pretty(self).map_err(|e| DialogueError::configuration(format!("Cannot serialize config: {e}")))
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns a configuration error describing the first invalid value.
    pub fn validate(&self) -> DialogueResult<()> {
        if self.dispatch.workers == 0 || self.dispatch.workers > MAX_WORKERS {
            return Err(DialogueError::configuration(format!(
                "Workers must be between 1 and {MAX_WORKERS}, got {}",
                self.dispatch.workers
            )));
        }
        if self.dispatch.max_retries > 10 {
            return Err(DialogueError::configuration(format!(
                "At most 10 retries are allowed, got {}",
                self.dispatch.max_retries
            )));
        }
        if self.dispatch.base_delay_ms > self.dispatch.max_delay_ms {
            return Err(DialogueError::configuration(format!(
                "base_delay_ms ({}) exceeds max_delay_ms ({})",
                self.dispatch.base_delay_ms, self.dispatch.max_delay_ms
            )));
        }
        self.assembly.validate()
    }

    /// Dispatcher options derived from this configuration
    #[must_use]
    pub fn dispatch_options(&self) -> DispatchOptions {
        DispatchOptions {
            workers: self.dispatch.workers,
            retry: RetryPolicy {
                max_retries: self.dispatch.max_retries,
                base_delay: Duration::from_millis(self.dispatch.base_delay_ms),
                max_delay: Duration::from_millis(self.dispatch.max_delay_ms),
            },
            split_sentences: self.dispatch.split_sentences,
            sample_rate: self.assembly.sample_rate,
        }
    }

    /// Cache directory to use, if caching is enabled
    #[must_use]
    pub fn cache_dir(&self) -> Option<PathBuf> {
        if !self.cache.enabled {
            return None;
        }
        self.cache.dir.clone().or_else(crate::cache::DiskCache::default_dir)
    }
}
