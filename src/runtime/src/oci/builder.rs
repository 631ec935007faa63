//! Manifest list builder.
//!
//! Keeps at most one entry per platform slot. Attestation entries are
//! slotted by the digest they reference instead of by platform, so they
//! follow their image rather than a position in the list.

use std::collections::{HashMap, HashSet};

use a3s_mirror_core::config::RetryConfig;
use a3s_mirror_core::descriptor::ImageDescriptor;
use a3s_mirror_core::error::{MirrorError, Result};
use a3s_mirror_core::platform::PlatformKey;

use super::manifest::{media_types, ManifestIndex, RawManifest};
use super::reference::ImageReference;
use super::registry::RegistryClient;
use super::retry::with_retry;

/// Identity of a manifest list position.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Slot {
    Platform(PlatformKey),
    Provenance(String),
}

impl Slot {
    fn of(descriptor: &ImageDescriptor) -> Self {
        match descriptor.reference_digest() {
            Some(target) => Slot::Provenance(target.to_string()),
            None => Slot::Platform(descriptor.platform.normalized()),
        }
    }
}

/// Ordered manifest list with per-slot upsert.
#[derive(Debug, Clone)]
pub struct ManifestListBuilder {
    reference: ImageReference,
    images: Vec<ImageDescriptor>,
    index: HashMap<Slot, usize>,
    retry: RetryConfig,
}

impl ManifestListBuilder {
    pub fn new(reference: ImageReference) -> Self {
        Self {
            reference,
            images: Vec::new(),
            index: HashMap::new(),
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn reference(&self) -> &ImageReference {
        &self.reference
    }

    /// Insert or replace in place.
    ///
    /// An equal descriptor is a no-op; a descriptor occupying an existing
    /// slot replaces that entry at its position; anything else appends.
    pub fn add(&mut self, descriptor: ImageDescriptor) {
        let slot = Slot::of(&descriptor);
        match self.index.get(&slot) {
            Some(&pos) if self.images[pos] == descriptor => {}
            Some(&pos) => {
                tracing::debug!(
                    reference = %self.reference,
                    platform = %descriptor.platform,
                    old = %self.images[pos].digest,
                    new = %descriptor.digest,
                    "Replacing manifest list entry"
                );
                self.images[pos] = descriptor;
            }
            None => {
                self.index.insert(slot, self.images.len());
                self.images.push(descriptor);
            }
        }
    }

    /// Drop attestations whose target digest is no longer in the list.
    ///
    /// Returns the number of entries removed.
    pub fn remove_unexist_provenance(&mut self) -> usize {
        let digests: HashSet<String> = self
            .images
            .iter()
            .filter(|d| !d.is_provenance())
            .map(|d| d.digest.clone())
            .collect();
        let before = self.images.len();
        self.images.retain(|d| match d.reference_digest() {
            Some(target) => digests.contains(target),
            None => true,
        });
        let removed = before - self.images.len();
        if removed > 0 {
            tracing::debug!(reference = %self.reference, removed, "Removed dangling attestations");
            self.reindex();
        }
        removed
    }

    fn reindex(&mut self) {
        self.index = self
            .images
            .iter()
            .enumerate()
            .map(|(pos, d)| (Slot::of(d), pos))
            .collect();
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn images(&self) -> &[ImageDescriptor] {
        &self.images
    }

    /// Whether the list is entry-for-entry the same as `existing`.
    pub fn matches(&self, existing: &[ImageDescriptor]) -> bool {
        self.images.len() == existing.len()
            && self
                .images
                .iter()
                .zip(existing)
                .all(|(a, b)| a == b && a.media_type == b.media_type && a.size == b.size)
    }

    /// Serialize as a schema 2 list document.
    ///
    /// Docker entries without annotations produce a Docker manifest list;
    /// anything involving OCI manifests or annotations produces an OCI index.
    pub fn to_manifest(&self) -> Result<RawManifest> {
        let docker_only = self
            .images
            .iter()
            .all(|d| d.media_type == media_types::DOCKER_V2 && d.annotations.is_empty());
        let media_type = if docker_only {
            media_types::DOCKER_LIST
        } else {
            media_types::OCI_INDEX
        };
        let doc = ManifestIndex {
            schema_version: 2,
            media_type: Some(media_type.to_string()),
            manifests: self.images.clone(),
            annotations: Default::default(),
        };
        Ok(RawManifest::new(serde_json::to_vec_pretty(&doc)?, media_type))
    }

    /// Write the list to the destination reference.
    pub async fn push(&self, client: &dyn RegistryClient) -> Result<String> {
        if self.images.is_empty() {
            return Err(MirrorError::EmptyManifestList {
                reference: self.reference.to_string(),
            });
        }
        let manifest = self.to_manifest()?;
        let digest = with_retry(&self.retry, "push manifest list", || {
            client.push_manifest(&self.reference, &manifest)
        })
        .await?;
        tracing::info!(
            reference = %self.reference,
            images = self.images.len(),
            digest = %digest,
            "Manifest list pushed"
        );
        Ok(digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::manifest::Manifest;
    use crate::oci::registry::MemoryRegistry;

    fn builder() -> ManifestListBuilder {
        ManifestListBuilder::new(ImageReference::parse("priv.io/library/nginx:1.25").unwrap())
    }

    fn image(digest: &str, os: &str, arch: &str, variant: &str) -> ImageDescriptor {
        ImageDescriptor::new(
            digest,
            media_types::DOCKER_V2,
            100,
            PlatformKey::new(os, arch).with_variant(variant),
        )
    }

    fn att(digest: &str, target: &str) -> ImageDescriptor {
        ImageDescriptor::provenance(digest, media_types::OCI_MANIFEST, 50, target)
    }

    fn digests(b: &ManifestListBuilder) -> Vec<&str> {
        b.images().iter().map(|d| d.digest.as_str()).collect()
    }

    // ========================================================================
    // Add
    // ========================================================================

    #[test]
    fn test_distinct_platforms_in_either_order() {
        let p1 = image("sha256:1", "linux", "amd64", "");
        let p2 = image("sha256:2", "linux", "arm64", "");

        let mut a = builder();
        a.add(p1.clone());
        a.add(p2.clone());
        let mut b = builder();
        b.add(p2);
        b.add(p1);

        assert_eq!(a.len(), 2);
        assert_eq!(b.len(), 2);
        assert!(a.images().iter().all(|d| b.images().contains(d)));
    }

    #[test]
    fn test_identical_add_is_noop() {
        let mut b = builder();
        let d = image("sha256:1", "linux", "amd64", "");
        b.add(d.clone());
        b.add(d);
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn test_same_platform_replaces_in_place() {
        let mut b = builder();
        b.add(image("sha256:amd", "linux", "amd64", ""));
        b.add(image("sha256:arm-old", "linux", "arm64", ""));
        b.add(image("sha256:ppc", "linux", "ppc64le", ""));
        b.add(image("sha256:arm-new", "linux", "arm64", ""));
        assert_eq!(digests(&b), vec!["sha256:amd", "sha256:arm-new", "sha256:ppc"]);
    }

    #[test]
    fn test_arm64_v8_shares_slot_with_plain_arm64() {
        let mut b = builder();
        b.add(image("sha256:old", "linux", "arm64", ""));
        b.add(image("sha256:new", "linux", "arm64", "v8"));
        assert_eq!(digests(&b), vec!["sha256:new"]);
    }

    #[test]
    fn test_arm_variants_are_separate_slots() {
        let mut b = builder();
        b.add(image("sha256:v6", "linux", "arm", "v6"));
        b.add(image("sha256:v7", "linux", "arm", "v7"));
        assert_eq!(b.len(), 2);
    }

    #[test]
    fn test_windows_os_versions_are_separate_slots() {
        let mut b = builder();
        let mut ltsc2019 = image("sha256:2019", "windows", "amd64", "");
        ltsc2019.platform.os_version = "10.0.17763.5329".to_string();
        let mut ltsc2022 = image("sha256:2022", "windows", "amd64", "");
        ltsc2022.platform.os_version = "10.0.20348.2227".to_string();
        b.add(ltsc2019);
        b.add(ltsc2022);
        assert_eq!(b.len(), 2);
    }

    #[test]
    fn test_provenance_slotted_by_target() {
        let mut b = builder();
        b.add(image("sha256:amd", "linux", "amd64", ""));
        b.add(att("sha256:att1", "sha256:amd"));
        b.add(att("sha256:att2", "sha256:amd"));
        assert_eq!(digests(&b), vec!["sha256:amd", "sha256:att2"]);

        b.add(image("sha256:arm", "linux", "arm64", ""));
        b.add(att("sha256:att3", "sha256:arm"));
        assert_eq!(b.len(), 4);
    }

    // ========================================================================
    // Attestation cleanup
    // ========================================================================

    #[test]
    fn test_remove_dangling_provenance_after_replacement() {
        let mut b = builder();
        b.add(image("sha256:d", "linux", "amd64", ""));
        b.add(att("sha256:att", "sha256:d"));
        b.add(image("sha256:d2", "linux", "amd64", ""));

        assert_eq!(b.remove_unexist_provenance(), 1);
        assert_eq!(digests(&b), vec!["sha256:d2"]);
        assert!(b
            .images()
            .iter()
            .filter_map(|d| d.reference_digest())
            .all(|t| t == "sha256:d2"));
    }

    #[test]
    fn test_retargeted_provenance_survives() {
        let mut b = builder();
        b.add(image("sha256:d", "linux", "amd64", ""));
        b.add(att("sha256:att", "sha256:d"));
        b.add(image("sha256:d2", "linux", "amd64", ""));
        b.add(att("sha256:att2", "sha256:d2"));

        assert_eq!(b.remove_unexist_provenance(), 1);
        assert_eq!(digests(&b), vec!["sha256:d2", "sha256:att2"]);

        // Slots still resolve after reindexing.
        b.add(image("sha256:d3", "linux", "amd64", ""));
        assert_eq!(digests(&b), vec!["sha256:d3", "sha256:att2"]);
    }

    // ========================================================================
    // Serialization & push
    // ========================================================================

    #[test]
    fn test_docker_entries_serialize_as_docker_list() {
        let mut b = builder();
        b.add(image("sha256:1", "linux", "amd64", ""));
        let raw = b.to_manifest().unwrap();
        assert_eq!(raw.media_type, media_types::DOCKER_LIST);
        let parsed = Manifest::parse("r", &raw).unwrap();
        assert_eq!(parsed.entries().len(), 1);
        assert_eq!(parsed.entries()[0].platform.architecture, "amd64");
    }

    #[test]
    fn test_annotations_serialize_as_oci_index() {
        let mut b = builder();
        b.add(image("sha256:1", "linux", "amd64", ""));
        b.add(att("sha256:att", "sha256:1"));
        let raw = b.to_manifest().unwrap();
        assert_eq!(raw.media_type, media_types::OCI_INDEX);
        let parsed = Manifest::parse("r", &raw).unwrap();
        assert!(parsed.entries()[1].is_provenance());
    }

    #[tokio::test]
    async fn test_push_empty_fails() {
        let registry = MemoryRegistry::new();
        let err = builder().push(&registry).await.unwrap_err();
        assert!(matches!(err, MirrorError::EmptyManifestList { .. }));
        assert_eq!(registry.manifest_pushes(), 0);
    }

    #[tokio::test]
    async fn test_push_writes_list() {
        let registry = MemoryRegistry::new();
        let mut b = builder();
        b.add(image("sha256:1", "linux", "amd64", ""));
        let digest = b.push(&registry).await.unwrap();

        let stored = registry.manifest(b.reference()).unwrap();
        assert_eq!(stored.digest(), digest);
        assert_eq!(registry.manifest_pushes(), 1);
    }

    #[test]
    fn test_matches() {
        let mut b = builder();
        let d = image("sha256:1", "linux", "amd64", "");
        b.add(d.clone());
        assert!(b.matches(&[d.clone()]));
        let mut resized = d.clone();
        resized.size = 1;
        assert!(!b.matches(&[resized]));
        assert!(!b.matches(&[]));
    }
}
