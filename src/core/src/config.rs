use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{MirrorError, Result};
use crate::log::LogConfig;

/// Upper bound on concurrent mirror workers.
pub const MAX_JOBS: usize = 20;

/// Mirror run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// Architecture allow-list
    pub arch: Vec<String>,

    /// OS allow-list (empty accepts any OS)
    pub os: Vec<String>,

    /// Number of concurrent workers (1..=20)
    pub jobs: usize,

    /// Per-unit timeout in seconds
    pub timeout_secs: u64,

    /// File receiving one line per failed unit
    pub failed_file: PathBuf,

    /// Copy attestation manifests alongside the images they reference
    pub copy_provenance: bool,

    /// Retry policy for registry writes
    pub retry: RetryConfig,

    /// Registry transport settings
    pub registry: RegistryConfig,

    /// Logging configuration
    pub log: LogConfig,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            arch: vec!["amd64".to_string(), "arm64".to_string()],
            os: vec!["linux".to_string(), "windows".to_string()],
            jobs: 1,
            timeout_secs: 600,
            failed_file: PathBuf::from("mirror-failed.txt"),
            copy_provenance: false,
            retry: RetryConfig::default(),
            registry: RegistryConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl MirrorConfig {
    /// Load configuration from a YAML or JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: MirrorConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            _ => serde_yaml::from_str(&content)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.jobs == 0 || self.jobs > MAX_JOBS {
            return Err(MirrorError::Config(format!(
                "jobs must be within 1..={}, got {}",
                MAX_JOBS, self.jobs
            )));
        }
        if self.arch.is_empty() {
            return Err(MirrorError::Config(
                "architecture list must not be empty".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(MirrorError::Config("timeout must be positive".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(MirrorError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Per-unit deadline.
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }
}

/// Retry policy for registry writes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,

    /// Fixed delay between attempts in milliseconds
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 100,
        }
    }
}

impl RetryConfig {
    pub fn delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.delay_ms)
    }
}

/// Registry transport settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Verify TLS certificates
    pub tls_verify: bool,

    /// Talk plain HTTP to registries
    pub insecure_http: bool,

    /// Basic auth username (falls back to REGISTRY_USERNAME)
    pub username: Option<String>,

    /// Basic auth password (falls back to REGISTRY_PASSWORD)
    pub password: Option<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            tls_verify: true,
            insecure_http: false,
            username: None,
            password: None,
        }
    }
}
