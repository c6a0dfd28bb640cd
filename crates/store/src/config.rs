// Store configuration: `$FOLIO_CONFIG`, else `~/.folio/config.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::store::StoreSettings;

pub const CONFIG_ENV: &str = "FOLIO_CONFIG";

/// Root directory for Folio state: `~/.folio/`.
pub fn global_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".folio"))
}

/// `$FOLIO_CONFIG` if set, else `~/.folio/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .or_else(|| global_dir().map(|d| d.join("config.toml")))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite file. Defaults to `~/.folio/wiki.db`.
    pub database_path: Option<PathBuf>,
    /// Keep the database in memory and rely on the snapshot alone.
    pub in_memory: bool,
    /// Defaults to `<database_path>.sql.gz`.
    pub snapshot_path: Option<PathBuf>,
    pub maintenance: MaintenanceConfig,
    pub sessions: SessionConfig,
    pub tasks: TaskConfig,
    pub similarity: SimilarityConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            in_memory: false,
            snapshot_path: None,
            maintenance: MaintenanceConfig::default(),
            sessions: SessionConfig::default(),
            tasks: TaskConfig::default(),
            similarity: SimilarityConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Load from [`config_path`]. A missing file yields defaults; a file
    /// that exists but does not parse is an error.
    pub fn load() -> Result<Self, ConfigError> {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Save to a specific path (creates parent directories).
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigError::Io)?;
        }
        let contents = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, contents).map_err(ConfigError::Io)
    }

    pub fn resolved_database_path(&self) -> Option<PathBuf> {
        self.database_path.clone().or_else(|| global_dir().map(|d| d.join("wiki.db")))
    }

    /// The explicit snapshot path, else one beside the database file.
    pub fn resolved_snapshot_path(&self) -> Option<PathBuf> {
        self.snapshot_path.clone().or_else(|| {
            self.resolved_database_path().map(|db| {
                let mut name = db.into_os_string();
                name.push(".sql.gz");
                PathBuf::from(name)
            })
        })
    }

    pub fn to_settings(&self) -> StoreSettings {
        StoreSettings {
            session_retention: chrono::Duration::days(i64::from(self.sessions.retention_days)),
            max_similar: self.similarity.max_similar,
        }
    }
}

/// Compaction timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub check_interval_sec: u64,
    /// Required idle time since the last page modification.
    pub quiet_period_sec: u64,
    pub min_dump_interval_sec: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self { check_interval_sec: 120, quiet_period_sec: 3, min_dump_interval_sec: 10 }
    }
}

impl MaintenanceConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_sec.max(1))
    }

    pub fn quiet_period(&self) -> Duration {
        Duration::from_secs(self.quiet_period_sec)
    }

    pub fn min_dump_interval(&self) -> Duration {
        Duration::from_secs(self.min_dump_interval_sec)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    pub retention_days: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { retention_days: 5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TaskConfig {
    pub queue_capacity: usize,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self { queue_capacity: 256 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SimilarityConfig {
    pub max_similar: usize,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self { max_similar: 5 }
    }
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Serialize(toml::ser::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "config I/O error: {e}"),
            Self::Parse(e) => write!(f, "config parse error: {e}"),
            Self::Serialize(e) => write!(f, "config serialize error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}
