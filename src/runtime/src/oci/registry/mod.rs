//! Registry client capability.
//!
//! The engine talks to registries only through [`RegistryClient`]. The
//! HTTP implementation speaks the Docker Registry v2 API; the in-memory
//! implementation backs tests.

mod http;
pub mod memory;

pub use http::HttpRegistryClient;
pub use memory::MemoryRegistry;

use a3s_mirror_core::error::{MirrorError, Result};
use async_trait::async_trait;

use super::convert;
use super::manifest::{sha256_digest, Manifest, RawManifest};
use super::reference::ImageReference;

/// Authentication credentials for a container registry.
#[derive(Debug, Clone, Default)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    /// Create anonymous authentication (no credentials).
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Create basic authentication with username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Create authentication from environment variables.
    ///
    /// Reads `REGISTRY_USERNAME` and `REGISTRY_PASSWORD`.
    /// Falls back to anonymous if not set.
    pub fn from_env() -> Self {
        match (
            std::env::var("REGISTRY_USERNAME").ok(),
            std::env::var("REGISTRY_PASSWORD").ok(),
        ) {
            (Some(u), Some(p)) => Self::basic(u, p),
            _ => Self::anonymous(),
        }
    }

    /// Explicit credentials win over the environment.
    pub fn from_config(username: Option<&str>, password: Option<&str>) -> Self {
        match (username, password) {
            (Some(u), Some(p)) => Self::basic(u, p),
            _ => Self::from_env(),
        }
    }

    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => Some((u.as_str(), p.as_str())),
            _ => None,
        }
    }
}

/// One blob of an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub digest: String,
    pub data: Vec<u8>,
}

/// Full content of a single-platform image: its manifest and every blob
/// the manifest references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageContent {
    pub manifest: RawManifest,
    pub blobs: Vec<Blob>,
}

impl ImageContent {
    pub fn blob(&self, digest: &str) -> Option<&[u8]> {
        self.blobs
            .iter()
            .find(|b| b.digest == digest)
            .map(|b| b.data.as_slice())
    }
}

/// Check downloaded bytes against the digest they were requested by.
pub(crate) fn verify_blob(reference: &str, digest: &str, data: &[u8]) -> Result<()> {
    if digest.starts_with("sha256:") {
        let actual = sha256_digest(data);
        if actual != digest {
            return Err(MirrorError::registry(
                reference,
                format!("digest mismatch: expected {}, got {}", digest, actual),
            ));
        }
    }
    Ok(())
}

/// Fetch/push operations against container registries.
///
/// Implementations must surface "manifest unknown" / "blob unknown" as
/// [`MirrorError::NotFound`] so callers can tell "absent" from "broken".
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Fetch a manifest by tag or digest.
    async fn fetch_manifest(&self, reference: &ImageReference) -> Result<RawManifest>;

    /// Fetch a blob from the reference's repository.
    async fn fetch_blob(&self, reference: &ImageReference, digest: &str) -> Result<Vec<u8>>;

    /// Whether the repository already holds a blob.
    async fn blob_exists(&self, reference: &ImageReference, digest: &str) -> Result<bool>;

    /// Upload a blob into the reference's repository.
    async fn push_blob(&self, reference: &ImageReference, digest: &str, data: Vec<u8>)
        -> Result<()>;

    /// Write a manifest at the reference's tag (or digest). Returns the
    /// digest of the written bytes.
    async fn push_manifest(&self, reference: &ImageReference, manifest: &RawManifest)
        -> Result<String>;

    /// Download a single-platform image with all of its blobs.
    async fn pull_image(&self, reference: &ImageReference) -> Result<ImageContent> {
        let manifest = self.fetch_manifest(reference).await?;
        let parsed = Manifest::parse(&reference.to_string(), &manifest)?;
        if parsed.is_list() {
            return Err(MirrorError::invalid_manifest(
                reference.to_string(),
                "expected a single-platform manifest, got a list",
            ));
        }
        let mut blobs = Vec::new();
        for digest in parsed.blob_digests() {
            let data = self.fetch_blob(reference, &digest).await?;
            blobs.push(Blob { digest, data });
        }
        Ok(ImageContent { manifest, blobs })
    }

    /// Upload a single-platform image, skipping blobs already present.
    ///
    /// Schema 1 images are converted to schema 2 first. Returns the
    /// manifest that was written.
    async fn push_image(&self, reference: &ImageReference, content: &ImageContent) -> Result<RawManifest> {
        let converted = convert::pushable(&reference.to_string(), content)?;
        let content = converted.as_ref().unwrap_or(content);
        for blob in &content.blobs {
            if self.blob_exists(reference, &blob.digest).await? {
                continue;
            }
            self.push_blob(reference, &blob.digest, blob.data.clone()).await?;
        }
        self.push_manifest(reference, &content.manifest).await?;
        Ok(content.manifest.clone())
    }

    /// Copy a single-platform image between references, one blob at a time.
    ///
    /// Manifest bytes are written unchanged, so the destination digest
    /// equals the source digest. Schema 1 images are the exception: they
    /// are downloaded whole and written as schema 2. Returns the manifest
    /// that was written.
    async fn copy_image(&self, source: &ImageReference, destination: &ImageReference) -> Result<RawManifest> {
        let manifest = self.fetch_manifest(source).await?;
        let parsed = Manifest::parse(&source.to_string(), &manifest)?;
        if parsed.is_list() {
            return Err(MirrorError::invalid_manifest(
                source.to_string(),
                "expected a single-platform manifest, got a list",
            ));
        }

        if parsed.is_schema1() {
            let mut blobs = Vec::new();
            for digest in parsed.blob_digests() {
                let data = self.fetch_blob(source, &digest).await?;
                blobs.push(Blob { digest, data });
            }
            return self.push_image(destination, &ImageContent { manifest, blobs }).await;
        }

        for digest in parsed.blob_digests() {
            if self.blob_exists(destination, &digest).await? {
                tracing::debug!(destination = %destination, digest = %digest, "Blob already present");
                continue;
            }
            let data = self.fetch_blob(source, &digest).await?;
            self.push_blob(destination, &digest, data).await?;
        }

        let digest = self.push_manifest(destination, &manifest).await?;
        tracing::debug!(
            source = %source,
            destination = %destination,
            digest = %digest,
            "Image copied"
        );
        Ok(manifest)
    }
}
