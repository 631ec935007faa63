//! Manifest normalization.
//!
//! Turns one top-level manifest of any schema kind into the per-platform
//! descriptors the caller asked for. Normalization only reads: the input
//! manifest is never modified and every descriptor is freshly built.

use std::collections::HashSet;

use a3s_mirror_core::descriptor::ImageDescriptor;
use a3s_mirror_core::error::{MirrorError, Result};
use a3s_mirror_core::platform::PlatformKey;
use async_trait::async_trait;

use super::manifest::{ImageManifest, Manifest, ManifestIndex, RawManifest, Schema1Manifest};
use super::reference::ImageReference;
use super::registry::{ImageContent, RegistryClient};

/// Source of blobs referenced by a manifest (image configs).
#[async_trait]
pub trait BlobSource: Send + Sync {
    async fn blob(&self, digest: &str) -> Result<Vec<u8>>;
}

/// Blobs served from a registry repository.
pub struct RegistryBlobs<'a> {
    pub client: &'a dyn RegistryClient,
    pub reference: &'a ImageReference,
}

#[async_trait]
impl BlobSource for RegistryBlobs<'_> {
    async fn blob(&self, digest: &str) -> Result<Vec<u8>> {
        self.client.fetch_blob(self.reference, digest).await
    }
}

#[async_trait]
impl BlobSource for ImageContent {
    async fn blob(&self, digest: &str) -> Result<Vec<u8>> {
        self.blob(digest)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| MirrorError::NotFound {
                reference: digest.to_string(),
            })
    }
}

/// Platform filters applied during normalization.
#[derive(Debug, Clone, Copy)]
pub struct PlatformFilter<'a> {
    pub arch: &'a [String],
    pub os: &'a [String],
    /// Keep attestation entries whose target image is kept.
    pub provenance: bool,
}

impl<'a> PlatformFilter<'a> {
    pub fn new(arch: &'a [String], os: &'a [String]) -> Self {
        Self {
            arch,
            os,
            provenance: false,
        }
    }

    pub fn with_provenance(mut self, provenance: bool) -> Self {
        self.provenance = provenance;
        self
    }

    fn no_available(&self, reference: &str) -> MirrorError {
        MirrorError::NoAvailableImage {
            reference: reference.to_string(),
            arch: self.arch.to_vec(),
            os: self.os.to_vec(),
        }
    }
}

/// Normalize a fetched manifest into per-platform descriptors.
pub async fn normalize(
    reference: &str,
    raw: &RawManifest,
    filter: PlatformFilter<'_>,
    blobs: &dyn BlobSource,
) -> Result<Vec<ImageDescriptor>> {
    match Manifest::parse(reference, raw)? {
        Manifest::List(index) | Manifest::OciIndex(index) => {
            normalize_index(reference, &index, filter)
        }
        Manifest::V2(m) | Manifest::OciManifest(m) => {
            normalize_image(reference, raw, &m, filter, blobs).await
        }
        Manifest::SignedV1(m) | Manifest::V1(m) => normalize_schema1(reference, raw, &m, filter),
    }
}

/// Keep allowed list entries plus, in provenance mode, the attestations
/// of kept entries.
pub fn normalize_index(
    reference: &str,
    index: &ManifestIndex,
    filter: PlatformFilter<'_>,
) -> Result<Vec<ImageDescriptor>> {
    filter_descriptors(reference, &index.manifests, filter)
}

/// Apply a platform filter to list entries.
///
/// Fails with `NoAvailableImage` when no image entry survives.
pub fn filter_descriptors(
    reference: &str,
    entries: &[ImageDescriptor],
    filter: PlatformFilter<'_>,
) -> Result<Vec<ImageDescriptor>> {
    let kept: HashSet<&str> = entries
        .iter()
        .filter(|d| !d.is_provenance() && d.platform.allowed_by(filter.arch, filter.os))
        .map(|d| d.digest.as_str())
        .collect();
    if kept.is_empty() {
        return Err(filter.no_available(reference));
    }

    let mut images = Vec::new();
    for entry in entries {
        let keep = match entry.reference_digest() {
            Some(target) => filter.provenance && kept.contains(target),
            None => kept.contains(entry.digest.as_str())
                && entry.platform.allowed_by(filter.arch, filter.os),
        };
        if keep {
            images.push(entry.clone());
        } else {
            tracing::debug!(
                reference = %reference,
                digest = %entry.digest,
                platform = %entry.platform,
                "Skipping manifest list entry"
            );
        }
    }
    Ok(images)
}

async fn normalize_image(
    reference: &str,
    raw: &RawManifest,
    manifest: &ImageManifest,
    filter: PlatformFilter<'_>,
    blobs: &dyn BlobSource,
) -> Result<Vec<ImageDescriptor>> {
    let config = blobs.blob(&manifest.config.digest).await.map_err(|e| match e {
        MirrorError::NotFound { .. } => MirrorError::registry(
            reference,
            format!("config blob {} not found", manifest.config.digest),
        ),
        MirrorError::Registry { message, .. } => MirrorError::registry(
            reference,
            format!("config blob {}: {}", manifest.config.digest, message),
        ),
        other => other,
    })?;
    let platform: PlatformKey = serde_json::from_slice(&config)
        .map_err(|e| MirrorError::invalid_manifest(reference, format!("image config: {}", e)))?;
    single(reference, raw, platform, filter)
}

fn normalize_schema1(
    reference: &str,
    raw: &RawManifest,
    manifest: &Schema1Manifest,
    filter: PlatformFilter<'_>,
) -> Result<Vec<ImageDescriptor>> {
    let platform = manifest.platform(reference)?;
    single(reference, raw, platform, filter)
}

fn single(
    reference: &str,
    raw: &RawManifest,
    platform: PlatformKey,
    filter: PlatformFilter<'_>,
) -> Result<Vec<ImageDescriptor>> {
    if !platform.allowed_by(filter.arch, filter.os) {
        tracing::debug!(reference = %reference, platform = %platform, "Platform not requested");
        return Err(filter.no_available(reference));
    }
    Ok(vec![ImageDescriptor::new(
        raw.digest(),
        raw.media_type.clone(),
        raw.size(),
        platform,
    )])
}
