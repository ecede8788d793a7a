//! Global configuration parsing, validation, and instance record loading.
//!
//! The supervisor reads one TOML file (`GlobalConfig`). Instance records
//! come from inline `[[instances]]` tables and, optionally, from a
//! directory of per-instance JSON files.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::models::instance::{ExecutionSpec, RestartPolicy};
use crate::{AppError, Result};

/// File extension recognised by [`load_instance_dir`].
pub const INSTANCE_FILE_EXTENSION: &str = "json";

fn default_true() -> bool {
    true
}

fn default_update_interval_ms() -> u64 {
    2000
}

fn default_ipc_name() -> String {
    "procwarden".into()
}

fn default_console_capacity() -> usize {
    1000
}

fn default_stop_grace_seconds() -> u64 {
    60
}

fn default_kill_grace_seconds() -> u64 {
    5
}

/// Opaque monitoring settings consumed by an external resource poller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct MonitoringConfig {
    /// Whether CPU/RAM sampling is enabled for this instance.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Sampling interval.
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            update_interval_ms: default_update_interval_ms(),
        }
    }
}

/// One managed instance as described by configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct InstanceConfig {
    /// Unique identifier used to route commands.
    pub id: String,
    /// Display name; defaults to `id` when blank.
    #[serde(default)]
    pub name: String,
    /// Start the instance during registry initialization.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Launch settings.
    #[serde(flatten)]
    pub execution: ExecutionSpec,
    /// Crash recovery settings.
    #[serde(default)]
    pub restart: RestartPolicy,
    /// Resource monitoring settings.
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

impl InstanceConfig {
    /// Build a record with default execution and restart settings.
    #[must_use]
    pub fn new(id: impl Into<String>, execution: ExecutionSpec) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            enabled: true,
            execution,
            restart: RestartPolicy::default(),
            monitoring: MonitoringConfig::default(),
        }
    }

    /// Disabled sample record written into a fresh instance directory.
    #[must_use]
    pub fn example() -> Self {
        let execution = ExecutionSpec {
            working_directory: PathBuf::from("./apps/example"),
            archive: Some("application.jar".into()),
            pre_args: vec!["-Xmx2G".into(), "-Xms512M".into()],
            post_args: vec!["--port=8080".into()],
            ..ExecutionSpec::default()
        };
        let mut config = Self::new("example", execution);
        config.name = "Example Application".into();
        config.enabled = false;
        config.restart.scheduled_restarts = vec!["0 0 3 * * ?".into()];
        config
    }

    /// Fill derived defaults and reject records without an id.
    fn normalize(&mut self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(AppError::Config("instance record missing id".into()));
        }
        if self.name.trim().is_empty() {
            self.name.clone_from(&self.id);
        }
        Ok(())
    }
}

/// Grace periods applied when stopping a process.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ShutdownConfig {
    /// Wait after the graceful termination request.
    #[serde(default = "default_stop_grace_seconds")]
    pub stop_grace_seconds: u64,
    /// Wait after the forceful kill.
    #[serde(default = "default_kill_grace_seconds")]
    pub kill_grace_seconds: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            stop_grace_seconds: default_stop_grace_seconds(),
            kill_grace_seconds: default_kill_grace_seconds(),
        }
    }
}

/// Global configuration parsed from `procwarden.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Directory of per-instance JSON records.
    #[serde(default)]
    pub instances_dir: Option<PathBuf>,
    /// Named pipe / Unix socket identifier for the control server.
    #[serde(default = "default_ipc_name")]
    pub ipc_name: String,
    /// Console lines retained per instance.
    #[serde(default = "default_console_capacity")]
    pub console_capacity: usize,
    /// Stop grace periods.
    #[serde(default)]
    pub shutdown: ShutdownConfig,
    /// Inline instance records.
    #[serde(default)]
    pub instances: Vec<InstanceConfig>,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Graceful-stop wait.
    #[must_use]
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown.stop_grace_seconds)
    }

    /// Forceful-kill wait.
    #[must_use]
    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown.kill_grace_seconds)
    }

    /// Inline records followed by records from `instances_dir`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the combined set contains duplicate
    /// ids, or `AppError::Io` if the instance directory cannot be scanned.
    pub fn all_instances(&self) -> Result<Vec<InstanceConfig>> {
        let mut records = self.instances.clone();
        if let Some(ref dir) = self.instances_dir {
            records.extend(load_instance_dir(dir)?);
        }
        ensure_unique_ids(&records)?;
        Ok(records)
    }

    fn validate(&mut self) -> Result<()> {
        if self.console_capacity == 0 {
            return Err(AppError::Config(
                "console_capacity must be greater than zero".into(),
            ));
        }

        for record in &mut self.instances {
            record.normalize()?;
        }
        ensure_unique_ids(&self.instances)
    }
}

/// Reject record sets with repeated ids.
///
/// # Errors
///
/// Returns `AppError::Config` naming the first duplicate.
pub fn ensure_unique_ids(records: &[InstanceConfig]) -> Result<()> {
    let mut seen = HashSet::new();
    for record in records {
        if !seen.insert(record.id.as_str()) {
            return Err(AppError::Config(format!(
                "duplicate instance id: {}",
                record.id
            )));
        }
    }
    Ok(())
}

/// Load every `*.json` instance record in `dir`.
///
/// Files are read in name order. Unreadable or invalid files are skipped
/// with a warning. A missing directory is created and seeded with a
/// disabled example record; no records are returned in that case.
///
/// # Errors
///
/// Returns `AppError::Io` if the directory cannot be created or listed.
pub fn load_instance_dir(dir: impl AsRef<Path>) -> Result<Vec<InstanceConfig>> {
    let dir = dir.as_ref();
    if !dir.exists() {
        info!(dir = %dir.display(), "creating instance directory");
        fs::create_dir_all(dir)?;
        if let Err(err) = save_instance_config(dir, &InstanceConfig::example()) {
            warn!(%err, "failed to write example instance record");
        }
        return Ok(Vec::new());
    }

    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext == INSTANCE_FILE_EXTENSION)
        })
        .collect();
    paths.sort();

    let mut records = Vec::with_capacity(paths.len());
    for path in paths {
        match load_instance_file(&path) {
            Ok(record) => {
                info!(id = %record.id, name = %record.name, "loaded instance record");
                records.push(record);
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "skipping instance record");
            }
        }
    }
    Ok(records)
}

/// Parse one JSON instance record.
///
/// # Errors
///
/// Returns `AppError::Io` on read failure, `AppError::Config` on parse or
/// validation failure.
pub fn load_instance_file(path: impl AsRef<Path>) -> Result<InstanceConfig> {
    let raw = fs::read_to_string(path)?;
    let mut record: InstanceConfig = serde_json::from_str(&raw)?;
    record.normalize()?;
    Ok(record)
}

/// Write `config` to `<dir>/<id>.json`, pretty-printed.
///
/// # Errors
///
/// Returns `AppError::Io` if the directory or file cannot be written.
pub fn save_instance_config(dir: impl AsRef<Path>, config: &InstanceConfig) -> Result<PathBuf> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.{INSTANCE_FILE_EXTENSION}", config.id));
    let body = serde_json::to_string_pretty(config)?;
    fs::write(&path, body)?;
    info!(id = %config.id, path = %path.display(), "saved instance record");
    Ok(path)
}
