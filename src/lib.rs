#![forbid(unsafe_code)]

//! `procwarden`: single-host process supervisor.
//!
//! Launches long-running child processes, captures their console output,
//! detects crashes, and restarts them under a sliding-window restart limit.

pub mod config;
pub mod errors;
pub mod ipc;
pub mod models;
pub mod orchestrator;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
