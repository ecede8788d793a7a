//! Instance state, execution spec, and restart policy models.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// Lifecycle state of a managed instance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    /// No process is running.
    Stopped,
    /// Launch in progress.
    Starting,
    /// Process spawned and being watched.
    Running,
    /// Termination requested, waiting for the process to exit.
    Stopping,
    /// Process exited with a nonzero code or was killed by a signal.
    Crashed,
    /// Restart limiter denied a restart; operator action required.
    RestartLimitReached,
}

impl InstanceState {
    /// Compact encoding used by the atomic state cell.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Stopped => 0,
            Self::Starting => 1,
            Self::Running => 2,
            Self::Stopping => 3,
            Self::Crashed => 4,
            Self::RestartLimitReached => 5,
        }
    }

    /// Inverse of [`InstanceState::as_u8`]. Unknown values decode as `Stopped`.
    #[must_use]
    pub const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Stopping,
            4 => Self::Crashed,
            5 => Self::RestartLimitReached,
            _ => Self::Stopped,
        }
    }

    /// Whether a `start()` must be rejected in this state.
    #[must_use]
    pub const fn is_launching_or_running(self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }
}

impl Display for InstanceState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Crashed => "crashed",
            Self::RestartLimitReached => "restart_limit_reached",
        };
        f.write_str(text)
    }
}

fn default_executable() -> String {
    "java".into()
}

fn default_working_directory() -> PathBuf {
    PathBuf::from(".")
}

fn default_archive_flag() -> String {
    "-jar".into()
}

/// How to launch one instance's process.
///
/// Exactly one of `archive` or `entry_point` must be set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ExecutionSpec {
    /// Executable path or name resolved through `PATH`.
    #[serde(default = "default_executable")]
    pub executable: String,
    /// Working directory; created on start when missing.
    #[serde(default = "default_working_directory")]
    pub working_directory: PathBuf,
    /// Runnable archive passed after `archive_flag`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive: Option<String>,
    /// Entry-point identifier passed as a bare argument.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<String>,
    /// Flag that precedes the archive path.
    #[serde(default = "default_archive_flag")]
    pub archive_flag: String,
    /// Arguments placed before the launch target.
    #[serde(default)]
    pub pre_args: Vec<String>,
    /// Arguments placed after the launch target.
    #[serde(default)]
    pub post_args: Vec<String>,
    /// Environment overrides merged over the inherited environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl Default for ExecutionSpec {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            working_directory: default_working_directory(),
            archive: None,
            entry_point: None,
            archive_flag: default_archive_flag(),
            pre_args: Vec::new(),
            post_args: Vec::new(),
            env: HashMap::new(),
        }
    }
}

impl ExecutionSpec {
    /// Build the argument vector (without the executable).
    ///
    /// Blank `archive` / `entry_point` values count as absent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if neither or both launch targets are set.
    pub fn arguments(&self) -> Result<Vec<String>> {
        let archive = non_blank(self.archive.as_deref());
        let entry_point = non_blank(self.entry_point.as_deref());

        let mut args = self.pre_args.clone();
        match (archive, entry_point) {
            (Some(archive), None) => {
                args.push(self.archive_flag.clone());
                args.push(archive.to_owned());
            }
            (None, Some(entry_point)) => args.push(entry_point.to_owned()),
            (Some(_), Some(_)) => {
                return Err(AppError::Config(
                    "archive and entry_point are mutually exclusive".into(),
                ));
            }
            (None, None) => {
                return Err(AppError::Config(
                    "neither archive nor entry_point specified".into(),
                ));
            }
        }
        args.extend(self.post_args.iter().cloned());
        Ok(args)
    }

    /// Full command line, executable first. Used for logging and display.
    ///
    /// # Errors
    ///
    /// Same as [`ExecutionSpec::arguments`].
    pub fn command_line(&self) -> Result<Vec<String>> {
        let mut line = vec![self.executable.clone()];
        line.extend(self.arguments()?);
        Ok(line)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

fn default_true() -> bool {
    true
}

fn default_max_restarts() -> u32 {
    5
}

fn default_window_minutes() -> u64 {
    10
}

fn default_cooldown_seconds() -> u64 {
    5
}

/// Crash recovery policy for one instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RestartPolicy {
    /// Restart automatically after the process exits on its own.
    #[serde(default = "default_true")]
    pub auto_restart: bool,
    /// Attempts allowed inside one sliding window.
    #[serde(default = "default_max_restarts")]
    pub max_restarts_in_window: u32,
    /// Sliding window length.
    #[serde(default = "default_window_minutes")]
    pub restart_window_minutes: u64,
    /// Delay between stopping and starting during a restart.
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
    /// Cron expressions consumed by an external scheduler.
    #[serde(default)]
    pub scheduled_restarts: Vec<String>,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            auto_restart: true,
            max_restarts_in_window: default_max_restarts(),
            restart_window_minutes: default_window_minutes(),
            cooldown_seconds: default_cooldown_seconds(),
            scheduled_restarts: Vec::new(),
        }
    }
}

impl RestartPolicy {
    /// Sliding window length as a duration.
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.restart_window_minutes.saturating_mul(60))
    }

    /// Cooldown as a duration.
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_seconds)
    }
}

/// Point-in-time view of an instance for pollers and the control socket.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct InstanceStatus {
    /// Instance identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Current lifecycle state.
    pub state: InstanceState,
    /// Operator-set start suppression flag.
    pub permanently_stopped: bool,
    /// Whether the current process is still running.
    pub alive: bool,
    /// PID of the most recent process, if one was ever spawned.
    pub pid: Option<u32>,
    /// Wall-clock start of the most recent process.
    pub started_at: Option<DateTime<Utc>>,
    /// Seconds since start; zero unless alive.
    pub uptime_seconds: u64,
    /// Exit code of the most recent exit; `None` if unknown or signalled.
    pub exit_code: Option<i32>,
    /// Restart attempts retained in the current window.
    pub restart_count: usize,
}
