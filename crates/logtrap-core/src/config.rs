//! Configuration types for logtrap.
//!
//! [`Config::load`] reads `~/.config/logtrap/config.toml`, creating it with
//! hardcoded defaults if it does not yet exist. [`Config::defaults`] returns
//! the same defaults without touching the filesystem (useful in tests).

use serde::Deserialize;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Embedded defaults
// ---------------------------------------------------------------------------

const DEFAULT_CONFIG: &str = r#"
[capture]
enabled                = true
buffer_flush_threshold = 1000
per_severity_cap       = 300

[resolver]
skip_exact    = []
skip_prefixes = []

[persist]
dir                   = "logs"
prefix                = "logtrap"
timestamp_format      = "%Y-%m-%d %H:%M:%S%.3f"
file_timestamp_format = "%Y%m%d-%H%M%S"
write_all      = true
write_warnings = true
write_errors   = true
max_files     = 10
max_total_mb  = 50
max_age_hours = 72
"#;

// ---------------------------------------------------------------------------
// Public config types
// ---------------------------------------------------------------------------

/// Top-level configuration, loaded from `~/.config/logtrap/config.toml`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub persist: PersistConfig,
}

/// `[capture]` section of `config.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    /// Master switch; when false, start_intercepting is a no-op.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Pending-buffer size that triggers an automatic fold.
    #[serde(default = "default_buffer_flush_threshold")]
    pub buffer_flush_threshold: usize,
    /// Maximum records held per severity before FIFO eviction.
    #[serde(default = "default_per_severity_cap")]
    pub per_severity_cap: usize,
}

fn default_enabled() -> bool { true }
fn default_buffer_flush_threshold() -> usize { 1000 }
fn default_per_severity_cap() -> usize { 300 }

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            buffer_flush_threshold: default_buffer_flush_threshold(),
            per_severity_cap: default_per_severity_cap(),
        }
    }
}

/// `[resolver]` section: operator-taught wrapper layers the source resolver
/// sees through.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ResolverConfig {
    /// Exact symbols that are never the source; skip one frame and retry.
    #[serde(default)]
    pub skip_exact: Vec<String>,
    /// Symbol prefixes whose whole consecutive run is skipped.
    #[serde(default)]
    pub skip_prefixes: Vec<String>,
}

/// `[persist]` section of `config.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct PersistConfig {
    /// Log directory; created on start if missing.
    #[serde(default = "default_dir")]
    pub dir: PathBuf,
    /// Filename prefix for log files and the retention sweep.
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// chrono format string for record titles.
    #[serde(default = "default_timestamp_format")]
    pub timestamp_format: String,
    /// chrono format string for the timestamp embedded in filenames.
    #[serde(default = "default_file_timestamp_format")]
    pub file_timestamp_format: String,
    #[serde(default = "default_write_toggle")]
    pub write_all: bool,
    #[serde(default = "default_write_toggle")]
    pub write_warnings: bool,
    #[serde(default = "default_write_toggle")]
    pub write_errors: bool,
    /// Retention: maximum file count; <= 0 disables the check.
    #[serde(default = "default_max_files")]
    pub max_files: i64,
    /// Retention: total size budget in MB; <= 0 disables the check.
    #[serde(default = "default_max_total_mb")]
    pub max_total_mb: i64,
    /// Retention: maximum file age in hours; <= 0 disables the check.
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: i64,
}

fn default_dir() -> PathBuf { PathBuf::from("logs") }
fn default_prefix() -> String { "logtrap".to_string() }
fn default_timestamp_format() -> String { "%Y-%m-%d %H:%M:%S%.3f".to_string() }
fn default_file_timestamp_format() -> String { "%Y%m%d-%H%M%S".to_string() }
fn default_write_toggle() -> bool { true }
fn default_max_files() -> i64 { 10 }
fn default_max_total_mb() -> i64 { 50 }
fn default_max_age_hours() -> i64 { 72 }

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            dir: default_dir(),
            prefix: default_prefix(),
            timestamp_format: default_timestamp_format(),
            file_timestamp_format: default_file_timestamp_format(),
            write_all: default_write_toggle(),
            write_warnings: default_write_toggle(),
            write_errors: default_write_toggle(),
            max_files: default_max_files(),
            max_total_mb: default_max_total_mb(),
            max_age_hours: default_max_age_hours(),
        }
    }
}

impl Config {
    /// Load from `~/.config/logtrap/config.toml`, layered on top of the
    /// built-in defaults. Creates the file with defaults if it does not
    /// exist.
    pub fn load() -> anyhow::Result<Self> {
        let path = config_path();

        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, DEFAULT_CONFIG.trim_start())?;
        }

        config::Config::builder()
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Toml))
            .add_source(config::File::from(path.as_path()).required(false))
            .build()?
            .try_deserialize()
            .map_err(Into::into)
    }

    /// Return the built-in defaults without touching the filesystem.
    pub fn defaults() -> Self {
        config::Config::builder()
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Toml))
            .build()
            .expect("built-in default config must be valid TOML")
            .try_deserialize()
            .expect("built-in default config must deserialize correctly")
    }

    /// Path of the persisted suppression-rule file, beside the config file.
    pub fn silence_path() -> PathBuf {
        config_dir().join("silence.toml")
    }
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".to_string()))
                .join(".config")
        })
        .join("logtrap")
}

fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_load() {
        let cfg = Config::defaults();
        assert!(cfg.capture.enabled);
        assert_eq!(cfg.capture.buffer_flush_threshold, 1000);
        assert_eq!(cfg.capture.per_severity_cap, 300);
        assert_eq!(cfg.persist.prefix, "logtrap");
        assert_eq!(cfg.persist.max_files, 10);
        assert!(cfg.resolver.skip_exact.is_empty());
    }

    #[test]
    fn partial_section_fills_missing_keys() {
        let cfg: Config = config::Config::builder()
            .add_source(config::File::from_str(
                "[capture]\nper_severity_cap = 5\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(cfg.capture.per_severity_cap, 5);
        assert_eq!(cfg.capture.buffer_flush_threshold, 1000);
        assert!(cfg.persist.write_errors);
    }
}
