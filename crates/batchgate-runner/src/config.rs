use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use batchgate_core::{parse_logical_now, RelativeOffset};
use batchgate_notify::NotifierConfig;
use batchgate_storage::{JsonFileStore, StateStore};
use batchgate_storage_sqlite::SqliteStore;
use chrono::{Local, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::Fatal;

/// Raw configuration as written by the operator. Required values are
/// optional here so that their absence is reported through [`Fatal`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub config_directory: Option<String>,
    #[serde(default)]
    pub logs_directory: Option<String>,
    #[serde(default)]
    pub run_interval: Option<String>,
    #[serde(default)]
    pub today: Option<String>,
    #[serde(default)]
    pub flags: Flags,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default, skip_serializing_if = "NotifierConfig::is_empty")]
    pub notifier: NotifierConfig,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Flags {
    #[serde(default)]
    pub allow_dynamic_tasks: bool,
    /// Sent along with every resume signal.
    #[serde(default)]
    pub iteration_custom_headers: BTreeMap<String, String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Json,
    Sqlite,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// File stem of the state document inside `config_directory`.
    #[serde(default = "default_document")]
    pub document: String,
}

fn default_document() -> String {
    "cron_config".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { backend: StorageBackend::default(), document: default_document() }
    }
}

/// Validated configuration for one invocation.
#[derive(Clone, Debug)]
pub struct Settings {
    pub config_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub run_interval: RelativeOffset,
    /// Logical "now" of this invocation.
    pub now: NaiveDateTime,
    /// Logical run date; names the day's audit log.
    pub today: NaiveDate,
    /// True when `today` was given explicitly (deterministic replay).
    pub pinned: bool,
    pub flags: Flags,
    pub storage: StorageConfig,
    pub notifier: NotifierConfig,
}

impl Config {
    pub fn default_for(root: &Path) -> Self {
        Self {
            config_directory: Some(root.join("state").display().to_string()),
            logs_directory: Some(root.join("logs").display().to_string()),
            run_interval: Some("-24 hours".to_string()),
            today: None,
            flags: Flags::default(),
            storage: StorageConfig::default(),
            notifier: NotifierConfig::default(),
        }
    }

    /// Reads TOML, or YAML when the extension is `.yaml`/`.yml`.
    pub fn load_from(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let cfg = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&s).with_context(|| format!("parse {}", path.display()))?,
            _ => toml::from_str(&s).with_context(|| format!("parse {}", path.display()))?,
        };
        Ok(cfg)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let s = toml::to_string_pretty(self).with_context(|| "serialize toml")?;
        std::fs::write(path, s).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    pub fn default_path(dir: &Path) -> PathBuf {
        dir.join("batchgate.toml")
    }

    /// Checks directories, interval and date, creating the directories if
    /// needed. Every failure here is fatal for the invocation.
    pub fn validate(&self) -> Result<Settings, Fatal> {
        let logs_dir = ensure_dir("logs_directory", self.logs_directory.as_deref())?;
        let config_dir = ensure_dir("config_directory", self.config_directory.as_deref())?;

        let raw_interval = self.run_interval.as_deref().ok_or(Fatal::MissingSetting("run_interval"))?;
        let run_interval =
            RelativeOffset::parse(raw_interval).map_err(|_| Fatal::InvalidInterval(raw_interval.to_string()))?;

        let (now, pinned) = match self.today.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => (parse_logical_now(raw).map_err(|_| Fatal::InvalidToday(raw.to_string()))?, true),
            None => (wall_clock(), false),
        };

        Ok(Settings {
            config_dir,
            logs_dir,
            run_interval,
            now,
            today: now.date(),
            pinned,
            flags: self.flags.clone(),
            storage: self.storage.clone(),
            notifier: self.notifier.clone(),
        })
    }

    /// Best-effort location of the audit log, for reporting fatal errors.
    pub fn logs_dir_hint(&self) -> Option<PathBuf> {
        let raw = self.logs_directory.as_deref()?.trim();
        let dir = PathBuf::from(shellexpand::tilde(raw).to_string());
        (!raw.is_empty() && dir.is_dir()).then_some(dir)
    }
}

impl Settings {
    pub fn open_store(&self) -> Result<Box<dyn StateStore>, Fatal> {
        let name = &self.storage.document;
        match self.storage.backend {
            StorageBackend::Json => Ok(Box::new(JsonFileStore::new(&self.config_dir, name))),
            StorageBackend::Sqlite => {
                let path = self.config_dir.join(format!("{name}.db"));
                let store = SqliteStore::open(&path, name)
                    .map_err(|cause| Fatal::Store { store: path.display().to_string(), cause })?;
                Ok(Box::new(store))
            }
        }
    }

    /// Timestamp for an audit line: the pinned logical time, else the clock.
    pub fn stamp(&self) -> NaiveDateTime {
        if self.pinned {
            self.now
        } else {
            wall_clock()
        }
    }
}

fn wall_clock() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

fn ensure_dir(name: &'static str, raw: Option<&str>) -> Result<PathBuf, Fatal> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty()).ok_or(Fatal::MissingSetting(name))?;
    let dir = PathBuf::from(shellexpand::tilde(raw).to_string());
    std::fs::create_dir_all(&dir).map_err(|source| Fatal::Directory { name, path: dir.clone(), source })?;
    Ok(dir)
}
