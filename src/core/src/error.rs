use thiserror::Error;

/// A3S Mirror error types
#[derive(Error, Debug)]
pub enum MirrorError {
    /// Unit is missing state required by the requested operation
    #[error("Invalid mirror unit: {0}")]
    InvalidUnit(String),

    /// Operation invoked on a unit constructed for another mode
    #[error("Wrong mode: unit is in {actual} mode, expected {expected}")]
    WrongMode { expected: String, actual: String },

    /// Malformed manifest or config document
    #[error("Invalid manifest {reference}: {message}")]
    InvalidManifest { reference: String, message: String },

    /// None of the requested platforms are present in the source
    #[error("No image available for {reference} (arch {arch:?}, os {os:?})")]
    NoAvailableImage {
        reference: String,
        arch: Vec<String>,
        os: Vec<String>,
    },

    /// Attempted to push a manifest list without entries
    #[error("Manifest list for {reference} is empty")]
    EmptyManifestList { reference: String },

    /// Validate mode found a difference between source and destination
    #[error("Validation failed for {reference} [{platform}]: {message}")]
    ValidationMismatch {
        reference: String,
        platform: String,
        message: String,
    },

    /// Some per-platform steps of a unit failed
    #[error("{failed} of {total} platform(s) failed for {reference}: {first_error}")]
    PlatformFailures {
        reference: String,
        failed: usize,
        total: usize,
        first_error: String,
    },

    /// Manifest or blob does not exist in the registry
    #[error("Not found: {reference}")]
    NotFound { reference: String },

    /// Container registry transport error
    #[error("Registry error: {reference} - {message}")]
    Registry { reference: String, message: String },

    /// Local archive error
    #[error("Archive error: {path} - {message}")]
    Archive { path: String, message: String },

    /// Saved archive index written by an incompatible version
    #[error("Unsupported save index version {found} (supported: {supported})")]
    TemplateVersion { found: String, supported: String },

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Run was cancelled by the operator
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl MirrorError {
    /// Whether the error means "the referenced object does not exist".
    pub fn is_not_found(&self) -> bool {
        matches!(self, MirrorError::NotFound { .. })
    }

    /// Whether a transport error is worth retrying.
    ///
    /// Not-found answers are final; timeouts, server errors and dropped
    /// connections are retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            MirrorError::Timeout(_) => true,
            MirrorError::Registry { message, .. } => {
                let m = message.to_lowercase();
                if m.contains("not found") || m.contains("manifest unknown") {
                    return false;
                }
                m.contains("500")
                    || m.contains("502")
                    || m.contains("503")
                    || m.contains("timed out")
                    || m.contains("timeout")
                    || m.contains("reset by peer")
                    || m.contains("connection")
            }
            _ => false,
        }
    }

    /// Wrap a transport failure with the reference it concerns.
    pub fn registry(reference: impl Into<String>, message: impl std::fmt::Display) -> Self {
        MirrorError::Registry {
            reference: reference.into(),
            message: message.to_string(),
        }
    }

    /// Build an invalid-manifest error for a reference.
    pub fn invalid_manifest(reference: impl Into<String>, message: impl std::fmt::Display) -> Self {
        MirrorError::InvalidManifest {
            reference: reference.into(),
            message: message.to_string(),
        }
    }
}

impl From<serde_json::Error> for MirrorError {
    fn from(err: serde_json::Error) -> Self {
        MirrorError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for MirrorError {
    fn from(err: serde_yaml::Error) -> Self {
        MirrorError::Serialization(err.to_string())
    }
}

/// Result type alias for A3S Mirror operations
pub type Result<T> = std::result::Result<T, MirrorError>;
