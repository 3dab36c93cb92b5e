//! Engine Configuration Module
//!
//! Cache capacities, disk location, channel sizes and gate defaults for the
//! theme manager. Loaded from `SWATCHBOOK_*` environment variables with
//! defaults suitable for a desktop client.

use std::path::PathBuf;
use std::time::Duration;

use swatchbook_core::{ConfigError, SwatchbookResult};
use swatchbook_pipeline::StageConfig;
use swatchbook_storage::EvictionPolicy;

// ============================================================================
// ENGINE CONFIGURATION
// ============================================================================

/// Configuration for [`crate::CachingThemeManager`] and the reference
/// pipelines it is usually wired to.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    // ========================================================================
    // Cache tiers
    // ========================================================================
    /// Maximum swatches kept in memory. `None` means unbounded.
    pub swatch_memory_capacity: Option<usize>,

    /// Maximum computed themes kept in memory. `None` means unbounded.
    pub theme_memory_capacity: Option<usize>,

    /// Directory holding the LMDB environment.
    pub cache_dir: PathBuf,

    /// LMDB map size in megabytes.
    pub lmdb_map_size_mb: usize,

    /// Disk entries older than this are pruned at startup.
    pub disk_ttl: Option<Duration>,

    // ========================================================================
    // Channels and workers
    // ========================================================================
    /// Capacity of the manager's theme broadcast channel.
    pub theme_channel_capacity: usize,

    /// Concurrent computations per reference stage.
    pub stage_concurrency: usize,

    /// Output sink and feed capacity per reference stage.
    pub stage_output_capacity: usize,

    // ========================================================================
    // Feature gate and logging
    // ========================================================================
    /// Initial value of the "theme item detail" toggle.
    pub theme_item_detail: bool,

    /// Initial value of the "theme playback" toggle.
    pub theme_playback: bool,

    /// Emit logs as JSON lines.
    pub json_logs: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            swatch_memory_capacity: Some(512),
            theme_memory_capacity: Some(2048),
            cache_dir: std::env::temp_dir().join("swatchbook"),
            lmdb_map_size_mb: 64,
            disk_ttl: None,

            theme_channel_capacity: 256,
            stage_concurrency: 4,
            stage_output_capacity: 64,

            theme_item_detail: true,
            theme_playback: true,
            json_logs: false,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "on"))
}

/// `0` or `unbounded` disables the capacity limit.
fn env_capacity(key: &str, default: Option<usize>) -> Option<usize> {
    match std::env::var(key) {
        Ok(s) if s.trim().eq_ignore_ascii_case("unbounded") => None,
        Ok(s) => match s.trim().parse::<usize>() {
            Ok(0) => None,
            Ok(n) => Some(n),
            Err(_) => default,
        },
        Err(_) => default,
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create EngineConfig from environment variables.
    ///
    /// Environment variables:
    /// - `SWATCHBOOK_SWATCH_MEMORY_CAPACITY`: swatches in memory, `0`/`unbounded` for no limit (default: 512)
    /// - `SWATCHBOOK_THEME_MEMORY_CAPACITY`: themes in memory, `0`/`unbounded` for no limit (default: 2048)
    /// - `SWATCHBOOK_CACHE_DIR`: LMDB directory (default: `$TMPDIR/swatchbook`)
    /// - `SWATCHBOOK_LMDB_MAP_SIZE_MB`: LMDB map size (default: 64)
    /// - `SWATCHBOOK_DISK_TTL_SECS`: prune disk entries older than this at startup (default: off)
    /// - `SWATCHBOOK_THEME_CHANNEL_CAPACITY`: theme broadcast capacity (default: 256)
    /// - `SWATCHBOOK_STAGE_CONCURRENCY`: computations per stage (default: 4)
    /// - `SWATCHBOOK_STAGE_OUTPUT_CAPACITY`: stage sink capacity (default: 64)
    /// - `SWATCHBOOK_THEME_ITEM_DETAIL`, `SWATCHBOOK_THEME_PLAYBACK`: gate toggles (default: true)
    /// - `SWATCHBOOK_LOG_JSON`: "true" for JSON logs (default: false)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            swatch_memory_capacity: env_capacity(
                "SWATCHBOOK_SWATCH_MEMORY_CAPACITY",
                defaults.swatch_memory_capacity,
            ),
            theme_memory_capacity: env_capacity(
                "SWATCHBOOK_THEME_MEMORY_CAPACITY",
                defaults.theme_memory_capacity,
            ),
            cache_dir: std::env::var("SWATCHBOOK_CACHE_DIR")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            lmdb_map_size_mb: env_parse("SWATCHBOOK_LMDB_MAP_SIZE_MB")
                .unwrap_or(defaults.lmdb_map_size_mb),
            disk_ttl: env_parse::<u64>("SWATCHBOOK_DISK_TTL_SECS")
                .map(Duration::from_secs)
                .or(defaults.disk_ttl),
            theme_channel_capacity: env_parse("SWATCHBOOK_THEME_CHANNEL_CAPACITY")
                .unwrap_or(defaults.theme_channel_capacity),
            stage_concurrency: env_parse("SWATCHBOOK_STAGE_CONCURRENCY")
                .unwrap_or(defaults.stage_concurrency),
            stage_output_capacity: env_parse("SWATCHBOOK_STAGE_OUTPUT_CAPACITY")
                .unwrap_or(defaults.stage_output_capacity),
            theme_item_detail: env_bool("SWATCHBOOK_THEME_ITEM_DETAIL")
                .unwrap_or(defaults.theme_item_detail),
            theme_playback: env_bool("SWATCHBOOK_THEME_PLAYBACK")
                .unwrap_or(defaults.theme_playback),
            json_logs: env_bool("SWATCHBOOK_LOG_JSON").unwrap_or(defaults.json_logs),
        }
    }

    pub fn with_swatch_capacity(mut self, capacity: Option<usize>) -> Self {
        self.swatch_memory_capacity = capacity;
        self
    }

    pub fn with_theme_capacity(mut self, capacity: Option<usize>) -> Self {
        self.theme_memory_capacity = capacity;
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    pub fn with_disk_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.disk_ttl = ttl;
        self
    }

    pub fn with_theme_channel_capacity(mut self, capacity: usize) -> Self {
        self.theme_channel_capacity = capacity;
        self
    }

    pub fn with_stage_concurrency(mut self, concurrency: usize) -> Self {
        self.stage_concurrency = concurrency;
        self
    }

    pub fn with_gate(mut self, theme_item_detail: bool, theme_playback: bool) -> Self {
        self.theme_item_detail = theme_item_detail;
        self.theme_playback = theme_playback;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> SwatchbookResult<()> {
        fn positive(field: &str, value: usize) -> Result<(), ConfigError> {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: value.to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
            Ok(())
        }

        if let Some(n) = self.swatch_memory_capacity {
            positive("swatch_memory_capacity", n)?;
        }
        if let Some(n) = self.theme_memory_capacity {
            positive("theme_memory_capacity", n)?;
        }
        positive("lmdb_map_size_mb", self.lmdb_map_size_mb)?;
        positive("theme_channel_capacity", self.theme_channel_capacity)?;
        positive("stage_concurrency", self.stage_concurrency)?;
        positive("stage_output_capacity", self.stage_output_capacity)?;

        if self.disk_ttl.is_some_and(|ttl| ttl.is_zero()) {
            return Err(ConfigError::InvalidValue {
                field: "disk_ttl".to_string(),
                value: "0s".to_string(),
                reason: "use None to disable pruning".to_string(),
            }
            .into());
        }

        if self.cache_dir.as_os_str().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "cache_dir".to_string(),
            }
            .into());
        }

        Ok(())
    }

    pub fn swatch_policy(&self) -> EvictionPolicy {
        EvictionPolicy {
            max_entries: self.swatch_memory_capacity,
        }
    }

    pub fn theme_policy(&self) -> EvictionPolicy {
        EvictionPolicy {
            max_entries: self.theme_memory_capacity,
        }
    }

    pub fn stage_config(&self) -> StageConfig {
        StageConfig {
            max_concurrency: self.stage_concurrency,
            output_capacity: self.stage_output_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swatchbook_core::SwatchbookError;

    struct EnvVarGuard {
        key: &'static str,
        original: Option<String>,
    }

    impl EnvVarGuard {
        fn set(key: &'static str, value: Option<&str>) -> Self {
            let original = std::env::var(key).ok();
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
            Self { key, original }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            match self.original.as_deref() {
                Some(v) => std::env::set_var(self.key, v),
                None => std::env::remove_var(self.key),
            }
        }
    }

    #[test]
    fn test_default_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.theme_channel_capacity, 256);
        assert!(config.theme_item_detail && config.theme_playback);
    }

    #[test]
    fn test_validate_rejects_zero_capacities() {
        let config = EngineConfig::default().with_theme_channel_capacity(0);
        let err = config.validate().unwrap_err();
        match err {
            SwatchbookError::Config(ConfigError::InvalidValue { field, .. }) => {
                assert_eq!(field, "theme_channel_capacity");
            }
            other => panic!("unexpected error: {:?}", other),
        }

        assert!(EngineConfig::default()
            .with_swatch_capacity(Some(0))
            .validate()
            .is_err());
        assert!(EngineConfig::default()
            .with_stage_concurrency(0)
            .validate()
            .is_err());
        assert!(EngineConfig::default()
            .with_swatch_capacity(None)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_ttl_and_empty_dir() {
        assert!(EngineConfig::default()
            .with_disk_ttl(Some(Duration::ZERO))
            .validate()
            .is_err());

        let err = EngineConfig::default()
            .with_cache_dir("")
            .validate()
            .unwrap_err();
        assert!(matches!(
            err,
            SwatchbookError::Config(ConfigError::MissingRequired { .. })
        ));
    }

    #[test]
    fn test_from_env_honours_variables() {
        let _capacity = EnvVarGuard::set("SWATCHBOOK_THEME_CHANNEL_CAPACITY", Some("32"));
        let _swatches = EnvVarGuard::set("SWATCHBOOK_SWATCH_MEMORY_CAPACITY", Some("unbounded"));
        let _themes = EnvVarGuard::set("SWATCHBOOK_THEME_MEMORY_CAPACITY", Some("10"));
        let _ttl = EnvVarGuard::set("SWATCHBOOK_DISK_TTL_SECS", Some("3600"));
        let _dir = EnvVarGuard::set("SWATCHBOOK_CACHE_DIR", Some("/var/cache/swatchbook"));
        let _playback = EnvVarGuard::set("SWATCHBOOK_THEME_PLAYBACK", Some("false"));
        let _garbage = EnvVarGuard::set("SWATCHBOOK_STAGE_CONCURRENCY", Some("many"));

        let config = EngineConfig::from_env();
        assert_eq!(config.theme_channel_capacity, 32);
        assert_eq!(config.swatch_memory_capacity, None);
        assert_eq!(config.theme_memory_capacity, Some(10));
        assert_eq!(config.disk_ttl, Some(Duration::from_secs(3600)));
        assert_eq!(config.cache_dir, PathBuf::from("/var/cache/swatchbook"));
        assert!(!config.theme_playback);
        // Unparseable values fall back to the default.
        assert_eq!(config.stage_concurrency, 4);
    }

    #[test]
    fn test_policies_follow_capacities() {
        let config = EngineConfig::default()
            .with_swatch_capacity(Some(3))
            .with_theme_capacity(None);
        assert_eq!(config.swatch_policy(), EvictionPolicy::bounded(3));
        assert_eq!(config.theme_policy(), EvictionPolicy::unbounded());
        assert_eq!(config.stage_config().max_concurrency, 4);
    }
}
