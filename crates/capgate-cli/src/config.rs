//! Configuration – reads/writes `~/.capgate/config.toml` and validates it
//! into runtime [`Settings`] before anything is dispatched.

use capgate_kernel::CompositionStrategy;
use capgate_scheduler::{BusinessHours, SchedulingStrategy};
use capgate_types::FileCap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("failed to write config at {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Allowed execution window, in hours of the day at a fixed UTC offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessHoursConfig {
    pub start_hour: u32,
    pub end_hour: u32,
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

/// Persisted user configuration stored in `~/.capgate/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Identity the shell dispatches as.
    #[serde(default = "default_identity")]
    pub identity: String,

    /// Capabilities the session starts with, e.g. `"write(/notes)"`.
    #[serde(default = "default_grants")]
    pub grants: Vec<String>,

    /// `immediate`, `delayed` or `bounded-fifo`.
    #[serde(default = "default_scheduling_strategy")]
    pub scheduling_strategy: String,

    /// Concurrency bound for `bounded-fifo`.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// How the session context is combined with runtime grants:
    /// `merge`, `override` or `intersect-capabilities`.
    #[serde(default = "default_composition_strategy")]
    pub composition_strategy: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_hours: Option<BusinessHoursConfig>,

    /// Move out-of-window schedules to the next opening instead of
    /// rejecting them.
    #[serde(default)]
    pub defer_to_next_window: bool,

    #[serde(default = "default_dispatch_timeout_ms")]
    pub dispatch_timeout_ms: u64,

    /// Dispatches buffered per reactor before callers wait for room.
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,

    /// How long finished operations stay listed.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

fn default_identity() -> String {
    "operator".to_string()
}
fn default_grants() -> Vec<String> {
    vec!["write(/notes)".to_string()]
}
fn default_scheduling_strategy() -> String {
    "delayed".to_string()
}
fn default_max_concurrent() -> usize {
    4
}
fn default_composition_strategy() -> String {
    "merge".to_string()
}
fn default_dispatch_timeout_ms() -> u64 {
    5_000
}
fn default_mailbox_capacity() -> usize {
    64
}
fn default_retention_secs() -> u64 {
    3_600
}
fn default_cleanup_interval_secs() -> u64 {
    60
}

impl Default for Config {
    fn default() -> Self {
        Self {
            identity: default_identity(),
            grants: default_grants(),
            scheduling_strategy: default_scheduling_strategy(),
            max_concurrent: default_max_concurrent(),
            composition_strategy: default_composition_strategy(),
            business_hours: None,
            defer_to_next_window: false,
            dispatch_timeout_ms: default_dispatch_timeout_ms(),
            mailbox_capacity: default_mailbox_capacity(),
            retention_secs: default_retention_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Validation
// ─────────────────────────────────────────────────────────────────────────────

/// A validated [`Config`].
#[derive(Debug, Clone)]
pub struct Settings {
    pub identity: String,
    pub grants: Vec<FileCap>,
    pub strategy: SchedulingStrategy,
    pub composition: CompositionStrategy,
    pub business_hours: Option<BusinessHours>,
    pub defer_to_next_window: bool,
    pub dispatch_timeout: Duration,
    pub mailbox_capacity: usize,
    pub retention: Duration,
    pub cleanup_interval: Duration,
}

impl Config {
    /// Check every field and convert to [`Settings`].
    pub fn validate(&self) -> Result<Settings, ConfigError> {
        let invalid = |msg: String| ConfigError::Invalid(msg);

        if self.identity.trim().is_empty() {
            return Err(invalid("identity must not be empty".to_string()));
        }
        if self.max_concurrent == 0 {
            return Err(invalid("max_concurrent must be at least 1".to_string()));
        }
        let strategy =
            SchedulingStrategy::from_config(&self.scheduling_strategy, self.max_concurrent)
                .map_err(|e| invalid(e.to_string()))?;
        let composition: CompositionStrategy = self
            .composition_strategy
            .parse()
            .map_err(|e: capgate_kernel::UnknownStrategy| invalid(e.to_string()))?;

        let business_hours = self
            .business_hours
            .as_ref()
            .map(|bh| {
                BusinessHours::new(bh.start_hour, bh.end_hour)
                    .and_then(|h| h.with_utc_offset(bh.utc_offset_minutes))
                    .map_err(|e| invalid(e.to_string()))
            })
            .transpose()?;

        if self.dispatch_timeout_ms == 0 {
            return Err(invalid("dispatch_timeout_ms must be positive".to_string()));
        }
        if self.mailbox_capacity == 0 {
            return Err(invalid("mailbox_capacity must be at least 1".to_string()));
        }
        if self.cleanup_interval_secs == 0 {
            return Err(invalid("cleanup_interval_secs must be positive".to_string()));
        }

        let grants = self
            .grants
            .iter()
            .map(|g| g.parse::<FileCap>().map_err(|e| invalid(format!("grant '{g}': {e}"))))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Settings {
            identity: self.identity.clone(),
            grants,
            strategy,
            composition,
            business_hours,
            defer_to_next_window: self.defer_to_next_window,
            dispatch_timeout: Duration::from_millis(self.dispatch_timeout_ms),
            mailbox_capacity: self.mailbox_capacity,
            retention: Duration::from_secs(self.retention_secs),
            cleanup_interval: Duration::from_secs(self.cleanup_interval_secs),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Load / save
// ─────────────────────────────────────────────────────────────────────────────

/// Return the path to `~/.capgate/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".capgate").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, ConfigError> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut cfg: Config = toml::from_str(&raw)?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `CAPGATE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `CAPGATE_IDENTITY` | `identity` |
/// | `CAPGATE_SCHEDULING_STRATEGY` | `scheduling_strategy` |
/// | `CAPGATE_MAX_CONCURRENT` | `max_concurrent` |
/// | `CAPGATE_COMPOSITION_STRATEGY` | `composition_strategy` |
/// | `CAPGATE_DISPATCH_TIMEOUT_MS` | `dispatch_timeout_ms` |
/// | `CAPGATE_RETENTION_SECS` | `retention_secs` |
///
/// Unparseable numbers are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("CAPGATE_IDENTITY") {
        cfg.identity = v;
    }
    if let Ok(v) = std::env::var("CAPGATE_SCHEDULING_STRATEGY") {
        cfg.scheduling_strategy = v;
    }
    if let Ok(v) = std::env::var("CAPGATE_MAX_CONCURRENT")
        && let Ok(n) = v.parse()
    {
        cfg.max_concurrent = n;
    }
    if let Ok(v) = std::env::var("CAPGATE_COMPOSITION_STRATEGY") {
        cfg.composition_strategy = v;
    }
    if let Ok(v) = std::env::var("CAPGATE_DISPATCH_TIMEOUT_MS")
        && let Ok(ms) = v.parse()
    {
        cfg.dispatch_timeout_ms = ms;
    }
    if let Ok(v) = std::env::var("CAPGATE_RETENTION_SECS")
        && let Ok(secs) = v.parse()
    {
        cfg.retention_secs = secs;
    }
}

/// Save the config to disk, creating `~/.capgate/` if necessary.
pub fn save(cfg: &Config) -> Result<(), ConfigError> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_err)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(write_err)?;
        }
    }
    let raw = toml::to_string_pretty(cfg)?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(write_err)?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(write_err)?;
    Ok(())
}
