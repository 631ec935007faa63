//! Per-platform image descriptor.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::platform::PlatformKey;

/// Annotation keys understood by the engine.
pub mod annotations {
    /// Digest of the image an attestation entry describes.
    pub const REFERENCE_DIGEST: &str = "vnd.docker.reference.digest";
    /// Kind of reference an attestation entry carries.
    pub const REFERENCE_TYPE: &str = "vnd.docker.reference.type";
    /// `REFERENCE_TYPE` value marking build provenance.
    pub const ATTESTATION_MANIFEST: &str = "attestation-manifest";
}

/// One platform's resolved image.
///
/// Serializes as a manifest-list / image-index entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageDescriptor {
    pub media_type: String,

    #[serde(default)]
    pub size: u64,

    pub digest: String,

    #[serde(default)]
    pub platform: PlatformKey,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl ImageDescriptor {
    pub fn new(
        digest: impl Into<String>,
        media_type: impl Into<String>,
        size: u64,
        platform: PlatformKey,
    ) -> Self {
        Self {
            media_type: media_type.into(),
            size,
            digest: digest.into(),
            platform,
            annotations: BTreeMap::new(),
        }
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Attestation entry pointing at `target_digest`.
    pub fn provenance(
        digest: impl Into<String>,
        media_type: impl Into<String>,
        size: u64,
        target_digest: impl Into<String>,
    ) -> Self {
        Self::new(digest, media_type, size, PlatformKey::unknown())
            .with_annotation(annotations::REFERENCE_DIGEST, target_digest)
            .with_annotation(annotations::REFERENCE_TYPE, annotations::ATTESTATION_MANIFEST)
    }

    /// Whether this entry is an attestation rather than a runnable image.
    pub fn is_provenance(&self) -> bool {
        self.platform.is_unknown()
            && self.annotations.get(annotations::REFERENCE_TYPE).map(String::as_str)
                == Some(annotations::ATTESTATION_MANIFEST)
            && self.annotations.contains_key(annotations::REFERENCE_DIGEST)
    }

    /// Target digest of an attestation entry.
    pub fn reference_digest(&self) -> Option<&str> {
        if !self.is_provenance() {
            return None;
        }
        self.annotations
            .get(annotations::REFERENCE_DIGEST)
            .map(String::as_str)
    }

    /// Whether both entries occupy the same manifest-list slot.
    ///
    /// Attestations are keyed by their target digest, images by platform.
    pub fn same_slot(&self, other: &ImageDescriptor) -> bool {
        match (self.reference_digest(), other.reference_digest()) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self.platform.same_slot(&other.platform),
            _ => false,
        }
    }
}

impl PartialEq for ImageDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.digest == other.digest
            && self.annotations == other.annotations
            && self.platform == other.platform
    }
}

impl Eq for ImageDescriptor {}
