//! Error types shared across the supervisor.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all supervisor failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure, including an
    /// execution spec that names neither or both launch targets.
    Config(String),
    /// The operating system refused to create the child process.
    Spawn(String),
    /// The sliding-window restart limiter denied the attempt.
    RestartRefused(String),
    /// Requested instance does not exist.
    NotFound(String),
    /// Instance is already running or starting.
    AlreadyRunning(String),
    /// Instance carries the permanently-stopped flag.
    PermanentlyStopped(String),
    /// Process did not exit within the stop grace periods.
    StopTimeout(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// IPC communication failure.
    Ipc(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::RestartRefused(msg) => write!(f, "restart refused: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::AlreadyRunning(msg) => write!(f, "already running: {msg}"),
            Self::PermanentlyStopped(msg) => write!(f, "permanently stopped: {msg}"),
            Self::StopTimeout(msg) => write!(f, "stop timeout: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Ipc(msg) => write!(f, "ipc: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(format!("invalid instance record: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
