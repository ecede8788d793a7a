//! Process orchestration modules.
//!
//! Covers the per-instance lifecycle state machine, its completion
//! watcher, the sliding-window restart limiter, console capture, and the
//! identifier-keyed registry that routes commands to instances.

pub mod console;
pub mod instance;
pub mod registry;
pub mod restart_limiter;
pub mod watcher;

pub use instance::{LifecycleSettings, ManagedInstance};
pub use registry::InstanceRegistry;
