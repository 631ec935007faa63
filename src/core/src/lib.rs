//! A3S Mirror Core - Foundational Types and Abstractions
//!
//! This module provides the value types, error taxonomy, configuration and
//! job abstraction shared by the mirror runtime, the worker pool and the CLI.

pub mod config;
pub mod descriptor;
pub mod error;
pub mod event;
pub mod job;
pub mod log;
pub mod platform;

// Re-export commonly used types
pub use config::{MirrorConfig, RegistryConfig, RetryConfig};
pub use descriptor::{annotations, ImageDescriptor};
pub use error::{MirrorError, Result};
pub use event::{EventEmitter, MirrorEvent};
pub use job::{Job, JobId, JobOutcome};
pub use log::{LogConfig, LogFormat, LogLevel};
pub use platform::PlatformKey;

/// A3S Mirror version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
