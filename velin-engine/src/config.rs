//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Preview engine configuration
///
/// Every field has a sensible default so the host editor can construct the
/// engine with `EngineConfig::default()` and override selectively, or load
/// the whole struct from its settings file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Worker threads per unit of available parallelism
    #[serde(default = "default_worker_multiplier")]
    pub worker_multiplier: usize,

    /// Maximum number of rendered fragments kept in the block cache
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    #[serde(default)]
    pub debounce: DebounceConfig,

    /// Upper bound on speculative pre-renders per cursor/scroll event
    #[serde(default = "default_max_predictions")]
    pub max_predictions: usize,

    /// Queue depth beyond which low-priority queued tasks are shed
    #[serde(default = "default_queue_overload_limit")]
    pub queue_overload_limit: usize,

    /// Per-generation completion deadline before the engine reports
    /// "incomplete, showing partial" to the presenter
    #[serde(default = "default_completion_deadline_ms")]
    pub completion_deadline_ms: u64,

    /// Whether the presentation layer has an accelerated view available.
    /// Supplied by the host's capability detection; the engine does no
    /// probing of its own. Accelerated presenters receive whole-document
    /// HTML, software presenters receive per-block deltas.
    #[serde(default)]
    pub accelerated: bool,
}

fn default_worker_multiplier() -> usize {
    2
}

fn default_cache_capacity() -> usize {
    crate::cache::DEFAULT_CACHE_CAPACITY
}

fn default_max_predictions() -> usize {
    3
}

fn default_queue_overload_limit() -> usize {
    256
}

fn default_completion_deadline_ms() -> u64 {
    2_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            worker_multiplier: default_worker_multiplier(),
            cache_capacity: default_cache_capacity(),
            debounce: DebounceConfig::default(),
            max_predictions: default_max_predictions(),
            queue_overload_limit: default_queue_overload_limit(),
            completion_deadline_ms: default_completion_deadline_ms(),
            accelerated: false,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject degenerate values before they reach the engine
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_multiplier == 0 {
            return Err(ConfigError::Invalid(
                "worker_multiplier must be at least 1".to_string(),
            ));
        }
        if self.cache_capacity == 0 {
            return Err(ConfigError::Invalid(
                "cache_capacity must be at least 1".to_string(),
            ));
        }
        self.debounce.validate()
    }

    pub fn completion_deadline(&self) -> Duration {
        Duration::from_millis(self.completion_deadline_ms)
    }
}

/// Debounce quiescence window configuration
///
/// The window adapts to document size: small documents get the short end,
/// very large documents the long end, everything else the base value. All
/// values are clamped to `[min_window_ms, max_window_ms]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebounceConfig {
    #[serde(default = "default_base_window_ms")]
    pub base_window_ms: u64,

    #[serde(default = "default_min_window_ms")]
    pub min_window_ms: u64,

    #[serde(default = "default_max_window_ms")]
    pub max_window_ms: u64,

    /// Documents at or below this size use the minimum window
    #[serde(default = "default_small_doc_bytes")]
    pub small_doc_bytes: usize,

    /// Documents at or above this size use the maximum window
    #[serde(default = "default_large_doc_bytes")]
    pub large_doc_bytes: usize,
}

fn default_base_window_ms() -> u64 {
    500
}

fn default_min_window_ms() -> u64 {
    150
}

fn default_max_window_ms() -> u64 {
    1_500
}

fn default_small_doc_bytes() -> usize {
    4 * 1024
}

fn default_large_doc_bytes() -> usize {
    256 * 1024
}

impl Default for DebounceConfig {
    fn default() -> Self {
        DebounceConfig {
            base_window_ms: default_base_window_ms(),
            min_window_ms: default_min_window_ms(),
            max_window_ms: default_max_window_ms(),
            small_doc_bytes: default_small_doc_bytes(),
            large_doc_bytes: default_large_doc_bytes(),
        }
    }
}

impl DebounceConfig {
    /// Quiescence window for a document of the given size
    pub fn window_for(&self, doc_bytes: usize) -> Duration {
        let ms = if doc_bytes <= self.small_doc_bytes {
            self.min_window_ms
        } else if doc_bytes >= self.large_doc_bytes {
            self.max_window_ms
        } else {
            self.base_window_ms
        };
        Duration::from_millis(ms.clamp(self.min_window_ms, self.max_window_ms))
    }

    /// Fixed window of `ms` milliseconds, useful for tests and hosts that
    /// do not want adaptation
    pub fn fixed(ms: u64) -> Self {
        DebounceConfig {
            base_window_ms: ms,
            min_window_ms: ms,
            max_window_ms: ms,
            small_doc_bytes: 0,
            large_doc_bytes: usize::MAX,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.min_window_ms > self.max_window_ms {
            return Err(ConfigError::Invalid(format!(
                "debounce min_window_ms ({}) exceeds max_window_ms ({})",
                self.min_window_ms, self.max_window_ms
            )));
        }
        if self.small_doc_bytes > self.large_doc_bytes {
            return Err(ConfigError::Invalid(format!(
                "debounce small_doc_bytes ({}) exceeds large_doc_bytes ({})",
                self.small_doc_bytes, self.large_doc_bytes
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();

        assert_eq!(config.worker_multiplier, 2);
        assert_eq!(config.cache_capacity, 100);
        assert_eq!(config.max_predictions, 3);
        assert_eq!(config.debounce.base_window_ms, 500);
        assert!(!config.accelerated);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_adaptive_window() {
        let debounce = DebounceConfig::default();

        assert_eq!(debounce.window_for(100), Duration::from_millis(150));
        assert_eq!(debounce.window_for(64 * 1024), Duration::from_millis(500));
        assert_eq!(
            debounce.window_for(1024 * 1024),
            Duration::from_millis(1_500)
        );
    }

    #[test]
    fn test_fixed_window() {
        let debounce = DebounceConfig::fixed(40);

        assert_eq!(debounce.window_for(0), Duration::from_millis(40));
        assert_eq!(debounce.window_for(10_000_000), Duration::from_millis(40));
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "cache_capacity: 16\naccelerated: true\ndebounce:\n  base_window_ms: 250"
        )
        .unwrap();

        let config = EngineConfig::from_file(file.path()).unwrap();

        assert_eq!(config.cache_capacity, 16);
        assert!(config.accelerated);
        assert_eq!(config.debounce.base_window_ms, 250);
        // Unspecified fields fall back to defaults.
        assert_eq!(config.worker_multiplier, 2);
    }

    #[test]
    fn test_validation_rejects_degenerate_values() {
        let mut config = EngineConfig::default();
        config.cache_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.debounce.min_window_ms = 2_000;
        config.debounce.max_window_ms = 100;
        assert!(config.validate().is_err());
    }
}
