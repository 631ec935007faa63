//! In-process registry.
//!
//! Stores manifests and blobs per repository and counts writes, so callers
//! can assert how much work a mirror run actually did.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use a3s_mirror_core::descriptor::ImageDescriptor;
use a3s_mirror_core::error::{MirrorError, Result};
use a3s_mirror_core::platform::PlatformKey;
use async_trait::async_trait;
use parking_lot::Mutex;

use super::{verify_blob, RegistryClient};
use crate::oci::manifest::{media_types, sha256_digest, RawManifest};
use crate::oci::reference::ImageReference;

#[derive(Default)]
struct Repository {
    tags: HashMap<String, String>,
    manifests: HashMap<String, RawManifest>,
    blobs: HashMap<String, Vec<u8>>,
}

/// Registry held entirely in memory.
#[derive(Default)]
pub struct MemoryRegistry {
    repositories: Mutex<HashMap<String, Repository>>,
    failing: Mutex<Vec<String>>,
    pushed: Mutex<Vec<String>>,
    manifest_pushes: AtomicUsize,
    blob_pushes: AtomicUsize,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation on repositories whose name contains `pattern` fail.
    pub fn fail_repository(&self, pattern: impl Into<String>) {
        self.failing.lock().push(pattern.into());
    }

    /// Number of manifests written since creation or the last reset.
    pub fn manifest_pushes(&self) -> usize {
        self.manifest_pushes.load(Ordering::SeqCst)
    }

    /// Number of blobs written since creation or the last reset.
    pub fn blob_pushes(&self) -> usize {
        self.blob_pushes.load(Ordering::SeqCst)
    }

    /// References manifests were pushed to, in order.
    pub fn pushed_references(&self) -> Vec<String> {
        self.pushed.lock().clone()
    }

    pub fn reset_counters(&self) {
        self.manifest_pushes.store(0, Ordering::SeqCst);
        self.blob_pushes.store(0, Ordering::SeqCst);
        self.pushed.lock().clear();
    }

    /// Store a manifest without counting it as a push.
    pub fn insert_manifest(&self, reference: &ImageReference, manifest: RawManifest) -> String {
        let digest = manifest.digest();
        let mut repos = self.repositories.lock();
        let repo = repos.entry(reference.name()).or_default();
        if let Some(tag) = &reference.tag {
            repo.tags.insert(tag.clone(), digest.clone());
        }
        repo.manifests.insert(digest.clone(), manifest);
        digest
    }

    /// Store a blob without counting it as a push.
    pub fn insert_blob(&self, reference: &ImageReference, data: &[u8]) -> String {
        let digest = sha256_digest(data);
        self.repositories
            .lock()
            .entry(reference.name())
            .or_default()
            .blobs
            .insert(digest.clone(), data.to_vec());
        digest
    }

    /// Manifest currently addressed by a reference.
    pub fn manifest(&self, reference: &ImageReference) -> Option<RawManifest> {
        let repos = self.repositories.lock();
        let repo = repos.get(&reference.name())?;
        let digest = match &reference.digest {
            Some(d) => d.clone(),
            None => repo.tags.get(reference.tag.as_deref()?)?.clone(),
        };
        repo.manifests.get(&digest).cloned()
    }

    /// Seed a single-platform image (config + one layer) at `reference`.
    ///
    /// Returns the descriptor a manifest list would carry for it.
    pub fn seed_image(
        &self,
        reference: &ImageReference,
        platform: &PlatformKey,
        media_type: &str,
    ) -> ImageDescriptor {
        let config = serde_json::json!({
            "architecture": platform.architecture,
            "os": platform.os,
            "variant": platform.variant,
            "os.version": platform.os_version,
            "rootfs": {"type": "layers", "diff_ids": []},
        });
        let config_bytes = serde_json::to_vec(&config).unwrap_or_default();
        let layer_bytes = format!("layer {} {}", reference, platform).into_bytes();
        let config_digest = self.insert_blob(reference, &config_bytes);
        let layer_digest = self.insert_blob(reference, &layer_bytes);

        let (config_type, layer_type) = if media_type == media_types::OCI_MANIFEST {
            (
                "application/vnd.oci.image.config.v1+json",
                "application/vnd.oci.image.layer.v1.tar+gzip",
            )
        } else {
            (
                "application/vnd.docker.container.image.v1+json",
                "application/vnd.docker.image.rootfs.diff.tar.gzip",
            )
        };
        let manifest = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": media_type,
            "config": {"mediaType": config_type, "size": config_bytes.len(), "digest": config_digest},
            "layers": [{"mediaType": layer_type, "size": layer_bytes.len(), "digest": layer_digest}],
        });
        let raw = RawManifest::new(serde_json::to_vec(&manifest).unwrap_or_default(), media_type);
        let size = raw.size();
        let digest = self.insert_manifest(reference, raw);
        ImageDescriptor::new(digest, media_type, size, platform.clone())
    }

    /// Seed a legacy schema 1 image with one layer at `reference`.
    pub fn seed_schema1(&self, reference: &ImageReference, platform: &PlatformKey, signed: bool) -> ImageDescriptor {
        let layer_bytes = format!("schema1 layer {} {}", reference, platform).into_bytes();
        let layer_digest = self.insert_blob(reference, &layer_bytes);
        let compat = serde_json::json!({
            "id": "1",
            "created": "2016-01-01T00:00:00Z",
            "architecture": platform.architecture,
            "os": platform.os,
            "variant": platform.variant,
        });
        let mut doc = serde_json::json!({
            "schemaVersion": 1,
            "name": reference.repository,
            "tag": reference.tag.clone().unwrap_or_default(),
            "architecture": platform.architecture,
            "fsLayers": [{"blobSum": layer_digest}],
            "history": [{"v1Compatibility": compat.to_string()}],
        });
        let media_type = if signed {
            doc["signatures"] = serde_json::json!([{"header": {"alg": "ES256"}, "signature": "c2ln", "protected": "cHJvdA"}]);
            media_types::DOCKER_V1_SIGNED
        } else {
            media_types::DOCKER_V1
        };
        let raw = RawManifest::new(serde_json::to_vec(&doc).unwrap_or_default(), media_type);
        let size = raw.size();
        let digest = self.insert_manifest(reference, raw);
        ImageDescriptor::new(digest, media_type, size, platform.clone())
    }

    /// Seed a manifest list or index at `reference`.
    pub fn seed_index(
        &self,
        reference: &ImageReference,
        entries: &[ImageDescriptor],
        media_type: &str,
    ) -> String {
        let doc = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": media_type,
            "manifests": entries,
        });
        let raw = RawManifest::new(serde_json::to_vec(&doc).unwrap_or_default(), media_type);
        self.insert_manifest(reference, raw)
    }

    fn check_available(&self, reference: &ImageReference) -> Result<()> {
        let name = reference.name();
        if self.failing.lock().iter().any(|p| name.contains(p.as_str())) {
            return Err(MirrorError::registry(
                reference.to_string(),
                "connection refused",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl RegistryClient for MemoryRegistry {
    async fn fetch_manifest(&self, reference: &ImageReference) -> Result<RawManifest> {
        self.check_available(reference)?;
        self.manifest(reference).ok_or_else(|| MirrorError::NotFound {
            reference: reference.to_string(),
        })
    }

    async fn fetch_blob(&self, reference: &ImageReference, digest: &str) -> Result<Vec<u8>> {
        self.check_available(reference)?;
        self.repositories
            .lock()
            .get(&reference.name())
            .and_then(|repo| repo.blobs.get(digest).cloned())
            .ok_or_else(|| MirrorError::NotFound {
                reference: format!("{}@{}", reference.name(), digest),
            })
    }

    async fn blob_exists(&self, reference: &ImageReference, digest: &str) -> Result<bool> {
        self.check_available(reference)?;
        Ok(self
            .repositories
            .lock()
            .get(&reference.name())
            .map(|repo| repo.blobs.contains_key(digest))
            .unwrap_or(false))
    }

    async fn push_blob(
        &self,
        reference: &ImageReference,
        digest: &str,
        data: Vec<u8>,
    ) -> Result<()> {
        self.check_available(reference)?;
        verify_blob(&reference.to_string(), digest, &data)?;
        self.repositories
            .lock()
            .entry(reference.name())
            .or_default()
            .blobs
            .insert(digest.to_string(), data);
        self.blob_pushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn push_manifest(
        &self,
        reference: &ImageReference,
        manifest: &RawManifest,
    ) -> Result<String> {
        self.check_available(reference)?;
        if manifest.media_type == media_types::DOCKER_V1_SIGNED || manifest.media_type == media_types::DOCKER_V1 {
            return Err(MirrorError::registry(
                reference.to_string(),
                "manifest invalid: schema 1 manifests are not accepted",
            ));
        }
        if let Some(expected) = &reference.digest {
            if *expected != manifest.digest() {
                return Err(MirrorError::registry(
                    reference.to_string(),
                    "manifest digest does not match reference",
                ));
            }
        }
        let digest = self.insert_manifest(reference, manifest.clone());
        self.manifest_pushes.fetch_add(1, Ordering::SeqCst);
        self.pushed.lock().push(reference.to_string());
        Ok(digest)
    }
}
