//! Manifest wire formats.
//!
//! The five schema kinds a registry can hand back are modelled as one sum
//! type, [`Manifest`]. Parsing picks the variant from the declared media
//! type, falling back to the document shape when the registry answers
//! with a generic content type.

use a3s_mirror_core::descriptor::ImageDescriptor;
use a3s_mirror_core::error::{MirrorError, Result};
use a3s_mirror_core::platform::PlatformKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Media type constants.
pub mod media_types {
    pub const DOCKER_V1_SIGNED: &str = "application/vnd.docker.distribution.manifest.v1+prettyjws";
    pub const DOCKER_V1: &str = "application/vnd.docker.distribution.manifest.v1+json";
    pub const DOCKER_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
    pub const DOCKER_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
    pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
    pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";

    /// Every manifest kind, in Accept-header preference order.
    pub const ALL: [&str; 6] = [
        OCI_INDEX,
        DOCKER_LIST,
        OCI_MANIFEST,
        DOCKER_V2,
        DOCKER_V1_SIGNED,
        DOCKER_V1,
    ];
}

/// SHA-256 digest of `data` in `sha256:<hex>` form.
pub fn sha256_digest(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

/// Manifest bytes exactly as served by a registry or archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawManifest {
    pub bytes: Vec<u8>,
    pub media_type: String,
}

impl RawManifest {
    pub fn new(bytes: impl Into<Vec<u8>>, media_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            media_type: media_type.into(),
        }
    }

    /// Digest recomputed from the bytes.
    pub fn digest(&self) -> String {
        sha256_digest(&self.bytes)
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Reference to a config or layer blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobDescriptor {
    #[serde(default)]
    pub media_type: String,
    #[serde(default)]
    pub size: u64,
    pub digest: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
}

/// Schema 2 / OCI single-platform image manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub config: BlobDescriptor,
    #[serde(default)]
    pub layers: Vec<BlobDescriptor>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Docker manifest list / OCI image index.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestIndex {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default)]
    pub manifests: Vec<ImageDescriptor>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Legacy schema 1 layer reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FsLayer {
    pub blob_sum: String,
}

/// Legacy schema 1 history record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct V1History {
    pub v1_compatibility: String,
}

/// Legacy schema 1 manifest, signed or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema1Manifest {
    pub schema_version: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub fs_layers: Vec<FsLayer>,
    #[serde(default)]
    pub history: Vec<V1History>,
}

impl Schema1Manifest {
    /// Platform reconstructed from the newest history record.
    ///
    /// Falls back to the top-level architecture when the record omits it.
    pub fn platform(&self, reference: &str) -> Result<PlatformKey> {
        let first = self.history.first().ok_or_else(|| {
            MirrorError::invalid_manifest(reference, "schema 1 manifest has no history")
        })?;
        let mut platform: PlatformKey = serde_json::from_str(&first.v1_compatibility)
            .map_err(|e| MirrorError::invalid_manifest(reference, format!("v1Compatibility: {}", e)))?;
        if platform.architecture.is_empty() {
            platform.architecture = self.architecture.clone();
        }
        if platform.os.is_empty() {
            platform.os = "linux".to_string();
        }
        Ok(platform)
    }
}

/// Shape used to sniff documents served with a generic content type.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Probe {
    #[serde(default)]
    schema_version: u32,
    #[serde(default)]
    media_type: Option<String>,
    #[serde(default)]
    manifests: Option<serde_json::Value>,
    #[serde(default)]
    signatures: Option<serde_json::Value>,
}

/// A parsed top-level manifest.
#[derive(Debug, Clone)]
pub enum Manifest {
    SignedV1(Schema1Manifest),
    V1(Schema1Manifest),
    V2(ImageManifest),
    List(ManifestIndex),
    OciManifest(ImageManifest),
    OciIndex(ManifestIndex),
}

impl Manifest {
    /// Parse raw bytes into the variant named by their media type.
    pub fn parse(reference: &str, raw: &RawManifest) -> Result<Self> {
        let media_type = match raw.media_type.as_str() {
            t if media_types::ALL.contains(&t) => t.to_string(),
            _ => Self::sniff(reference, &raw.bytes)?,
        };

        let invalid = |e: serde_json::Error| MirrorError::invalid_manifest(reference, e);
        let manifest = match media_type.as_str() {
            media_types::DOCKER_V1_SIGNED => {
                Manifest::SignedV1(serde_json::from_slice(&raw.bytes).map_err(invalid)?)
            }
            media_types::DOCKER_V1 => {
                Manifest::V1(serde_json::from_slice(&raw.bytes).map_err(invalid)?)
            }
            media_types::DOCKER_V2 => {
                Manifest::V2(serde_json::from_slice(&raw.bytes).map_err(invalid)?)
            }
            media_types::DOCKER_LIST => {
                Manifest::List(serde_json::from_slice(&raw.bytes).map_err(invalid)?)
            }
            media_types::OCI_MANIFEST => {
                Manifest::OciManifest(serde_json::from_slice(&raw.bytes).map_err(invalid)?)
            }
            media_types::OCI_INDEX => {
                Manifest::OciIndex(serde_json::from_slice(&raw.bytes).map_err(invalid)?)
            }
            other => {
                return Err(MirrorError::invalid_manifest(
                    reference,
                    format!("unsupported media type '{}'", other),
                ))
            }
        };
        Ok(manifest)
    }

    fn sniff(reference: &str, bytes: &[u8]) -> Result<String> {
        let probe: Probe = serde_json::from_slice(bytes)
            .map_err(|e| MirrorError::invalid_manifest(reference, e))?;
        if let Some(t) = probe.media_type {
            if media_types::ALL.contains(&t.as_str()) {
                return Ok(t);
            }
        }
        let sniffed = match probe.schema_version {
            1 if probe.signatures.is_some() => media_types::DOCKER_V1_SIGNED,
            1 => media_types::DOCKER_V1,
            2 if probe.manifests.is_some() => media_types::OCI_INDEX,
            2 => media_types::OCI_MANIFEST,
            v => {
                return Err(MirrorError::invalid_manifest(
                    reference,
                    format!("unsupported schema version {}", v),
                ))
            }
        };
        Ok(sniffed.to_string())
    }

    /// Media type of this variant.
    pub fn media_type(&self) -> &'static str {
        match self {
            Manifest::SignedV1(_) => media_types::DOCKER_V1_SIGNED,
            Manifest::V1(_) => media_types::DOCKER_V1,
            Manifest::V2(_) => media_types::DOCKER_V2,
            Manifest::List(_) => media_types::DOCKER_LIST,
            Manifest::OciManifest(_) => media_types::OCI_MANIFEST,
            Manifest::OciIndex(_) => media_types::OCI_INDEX,
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Manifest::List(_) | Manifest::OciIndex(_))
    }

    pub fn is_schema1(&self) -> bool {
        matches!(self, Manifest::SignedV1(_) | Manifest::V1(_))
    }

    /// Entries of a list or index, empty for single-platform manifests.
    pub fn entries(&self) -> &[ImageDescriptor] {
        match self {
            Manifest::List(index) | Manifest::OciIndex(index) => &index.manifests,
            _ => &[],
        }
    }

    /// Blobs a single-platform manifest depends on, config first.
    ///
    /// Duplicate layers (common in schema 1 manifests) appear once.
    pub fn blob_digests(&self) -> Vec<String> {
        let mut digests: Vec<String> = Vec::new();
        let mut push = |d: &str| {
            if !digests.iter().any(|x| x == d) {
                digests.push(d.to_string());
            }
        };
        match self {
            Manifest::SignedV1(m) | Manifest::V1(m) => {
                for layer in &m.fs_layers {
                    push(&layer.blob_sum);
                }
            }
            Manifest::V2(m) | Manifest::OciManifest(m) => {
                push(&m.config.digest);
                for layer in &m.layers {
                    if layer.urls.is_empty() {
                        push(&layer.digest);
                    }
                }
            }
            Manifest::List(_) | Manifest::OciIndex(_) => {}
        }
        digests
    }
}
