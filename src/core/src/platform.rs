//! Platform tuple identifying one build of a multi-architecture image.

use serde::{Deserialize, Serialize};

/// Sentinel used by attestation entries for both architecture and OS.
pub const UNKNOWN: &str = "unknown";

/// OS/architecture/variant/OS-version/OS-features tuple.
///
/// Serializes with the field names used by manifest lists and image
/// indexes, so it doubles as the wire `platform` object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlatformKey {
    #[serde(default)]
    pub architecture: String,

    #[serde(default)]
    pub os: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub variant: String,

    #[serde(rename = "os.version", default, skip_serializing_if = "String::is_empty")]
    pub os_version: String,

    #[serde(rename = "os.features", default, skip_serializing_if = "Vec::is_empty")]
    pub os_features: Vec<String>,
}

impl PlatformKey {
    pub fn new(os: impl Into<String>, architecture: impl Into<String>) -> Self {
        Self {
            architecture: architecture.into(),
            os: os.into(),
            ..Default::default()
        }
    }

    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = variant.into();
        self
    }

    pub fn with_os_version(mut self, os_version: impl Into<String>) -> Self {
        self.os_version = os_version.into();
        self
    }

    pub fn with_os_features(mut self, features: Vec<String>) -> Self {
        self.os_features = features;
        self
    }

    /// The unknown/unknown platform carried by attestation entries.
    pub fn unknown() -> Self {
        Self::new(UNKNOWN, UNKNOWN)
    }

    pub fn is_unknown(&self) -> bool {
        self.architecture == UNKNOWN && self.os == UNKNOWN
    }

    /// Variant with the arm64 default folded away.
    ///
    /// `arm64` and `arm64/v8` name the same build, so `v8` collapses to
    /// the empty variant for that architecture only.
    pub fn normalized_variant(&self) -> &str {
        if self.architecture == "arm64" && self.variant == "v8" {
            ""
        } else {
            &self.variant
        }
    }

    /// OS with the legacy empty value read as linux.
    pub fn normalized_os(&self) -> &str {
        if self.os.is_empty() {
            "linux"
        } else {
            &self.os
        }
    }

    /// Copy of this key with the OS and variant normalized.
    pub fn normalized(&self) -> Self {
        let mut key = self.clone();
        key.os = self.normalized_os().to_string();
        key.variant = self.normalized_variant().to_string();
        key
    }

    /// Whether two keys occupy the same manifest-list slot.
    pub fn same_slot(&self, other: &PlatformKey) -> bool {
        self.architecture == other.architecture
            && self.normalized_os() == other.normalized_os()
            && self.normalized_variant() == other.normalized_variant()
            && self.os_version == other.os_version
            && self.os_features == other.os_features
    }

    /// Whether the key passes the architecture and OS allow-lists.
    ///
    /// An empty OS list accepts every OS; an empty OS on the key (legacy
    /// configs) is treated as linux.
    pub fn allowed_by(&self, arch: &[String], os: &[String]) -> bool {
        if !arch.iter().any(|a| a == &self.architecture) {
            return false;
        }
        if os.is_empty() {
            return true;
        }
        os.iter().any(|o| o == self.normalized_os())
    }
}

impl std::fmt::Display for PlatformKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if !self.variant.is_empty() {
            write!(f, "/{}", self.variant)?;
        }
        if !self.os_version.is_empty() {
            write!(f, " ({})", self.os_version)?;
        }
        if !self.os_features.is_empty() {
            write!(f, " [{}]", self.os_features.join(","))?;
        }
        Ok(())
    }
}
