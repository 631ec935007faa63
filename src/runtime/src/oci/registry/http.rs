//! Registry client backed by the `oci-distribution` crate.
//!
//! Manifests travel as raw bytes in both directions so digests stay
//! byte-exact. Tokens are requested once per repository and operation and
//! dropped again when a registry answers 401.

use std::collections::HashSet;

use a3s_mirror_core::config::RegistryConfig;
use a3s_mirror_core::error::{MirrorError, Result};
use async_trait::async_trait;
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::errors::{OciDistributionError, OciErrorCode};
use oci_distribution::manifest::OciDescriptor;
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use oci_distribution::{Client, Reference, RegistryOperation};
use reqwest::header::HeaderValue;
use reqwest::StatusCode;
use tokio::sync::RwLock;

use super::{verify_blob, RegistryAuth, RegistryClient};
use crate::oci::manifest::{media_types, Manifest, RawManifest};
use crate::oci::reference::ImageReference;

/// Registry client speaking the distribution API through `oci-distribution`.
pub struct HttpRegistryClient {
    client: Client,
    auth: RegistryAuth,
    // `registry/repository` plus operation pairs holding a live token.
    authorized: RwLock<HashSet<(String, bool)>>,
}

impl HttpRegistryClient {
    pub fn new(config: &RegistryConfig, auth: RegistryAuth) -> Result<Self> {
        let protocol = if config.insecure_http {
            ClientProtocol::Http
        } else {
            ClientProtocol::Https
        };
        let client = Client::new(ClientConfig {
            protocol,
            accept_invalid_certificates: !config.tls_verify,
            ..Default::default()
        });
        Ok(Self {
            client,
            auth,
            authorized: RwLock::new(HashSet::new()),
        })
    }

    fn oci_auth(&self) -> OciRegistryAuth {
        match self.auth.credentials() {
            Some((u, p)) => OciRegistryAuth::Basic(u.to_string(), p.to_string()),
            None => OciRegistryAuth::Anonymous,
        }
    }

    /// Request a token for `operation` unless one is already held.
    async fn ensure_auth(&self, reference: &ImageReference, oci_ref: &Reference, push: bool) -> Result<()> {
        let key = (reference.name(), push);
        if self.authorized.read().await.contains(&key) {
            return Ok(());
        }
        let operation = if push {
            RegistryOperation::Push
        } else {
            RegistryOperation::Pull
        };
        tracing::debug!(repository = %key.0, push, "Requesting registry token");
        self.client
            .auth(oci_ref, &self.oci_auth(), operation)
            .await
            .map_err(|e| self.map_error(reference, e))?;
        self.authorized.write().await.insert(key);
        Ok(())
    }

    /// Translate a client error, forgetting the token on 401.
    fn map_error(&self, reference: &ImageReference, error: OciDistributionError) -> MirrorError {
        if matches!(error, OciDistributionError::UnauthorizedError { .. }) {
            if let Ok(mut held) = self.authorized.try_write() {
                held.retain(|(name, _)| *name != reference.name());
            }
        }
        classify(reference, error)
    }
}

/// `NotFound` for "manifest unknown" and friends, `Registry` for the rest.
fn classify(reference: &ImageReference, error: OciDistributionError) -> MirrorError {
    let not_found = match &error {
        OciDistributionError::ImageManifestNotFoundError(_) => true,
        OciDistributionError::ServerError { code, .. } => *code == StatusCode::NOT_FOUND.as_u16(),
        OciDistributionError::RegistryError { envelope, .. } => envelope.errors.iter().any(|e| {
            matches!(
                e.code,
                OciErrorCode::ManifestUnknown | OciErrorCode::BlobUnknown | OciErrorCode::NameUnknown
            )
        }),
        OciDistributionError::RequestError(e) => e.status() == Some(StatusCode::NOT_FOUND),
        _ => false,
    };
    if not_found {
        MirrorError::NotFound {
            reference: reference.to_string(),
        }
    } else {
        MirrorError::registry(reference.to_string(), error)
    }
}

/// Convert an [`ImageReference`] to an `oci-distribution` reference.
fn to_oci_reference(reference: &ImageReference) -> Result<Reference> {
    let text = format!(
        "{}/{}{}",
        reference.registry,
        reference.repository,
        match &reference.digest {
            Some(digest) => format!("@{}", digest),
            None => format!(":{}", reference.tag.as_deref().unwrap_or("latest")),
        }
    );
    text.parse::<Reference>()
        .map_err(|e| MirrorError::registry(reference.to_string(), format!("invalid reference '{}': {}", text, e)))
}

fn blob_descriptor(digest: &str) -> OciDescriptor {
    OciDescriptor {
        digest: digest.to_string(),
        ..Default::default()
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn fetch_manifest(&self, reference: &ImageReference) -> Result<RawManifest> {
        let oci_ref = to_oci_reference(reference)?;
        self.ensure_auth(reference, &oci_ref, false).await?;
        let (bytes, digest) = self
            .client
            .pull_manifest_raw(&oci_ref, &self.oci_auth(), &media_types::ALL)
            .await
            .map_err(|e| self.map_error(reference, e))?;
        if let Some(expected) = &reference.digest {
            verify_blob(&reference.to_string(), expected, &bytes)?;
        }
        // The registry's Content-Type is not surfaced, so the document names its own kind.
        let media_type = Manifest::parse(&reference.to_string(), &RawManifest::new(bytes.clone(), ""))?.media_type();
        tracing::debug!(reference = %reference, digest = %digest, media_type = %media_type, "Fetched manifest");
        Ok(RawManifest::new(bytes, media_type))
    }

    async fn fetch_blob(&self, reference: &ImageReference, digest: &str) -> Result<Vec<u8>> {
        let oci_ref = to_oci_reference(reference)?;
        self.ensure_auth(reference, &oci_ref, false).await?;
        let mut data: Vec<u8> = Vec::new();
        self.client
            .pull_blob(&oci_ref, &blob_descriptor(digest), &mut data)
            .await
            .map_err(|e| self.map_error(reference, e))?;
        verify_blob(&reference.to_string(), digest, &data)?;
        Ok(data)
    }

    async fn blob_exists(&self, reference: &ImageReference, digest: &str) -> Result<bool> {
        let oci_ref = to_oci_reference(reference)?;
        self.ensure_auth(reference, &oci_ref, false).await?;
        // The stream is dropped unread; only the response status matters.
        match self
            .client
            .pull_blob_stream(&oci_ref, &blob_descriptor(digest))
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => match self.map_error(reference, e) {
                MirrorError::NotFound { .. } => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn push_blob(
        &self,
        reference: &ImageReference,
        digest: &str,
        data: Vec<u8>,
    ) -> Result<()> {
        let oci_ref = to_oci_reference(reference)?;
        self.ensure_auth(reference, &oci_ref, true).await?;
        let size = data.len();
        self.client
            .push_blob(&oci_ref, &data, digest)
            .await
            .map_err(|e| self.map_error(reference, e))?;
        tracing::debug!(reference = %reference, digest = %digest, size, "Uploaded blob");
        Ok(())
    }

    async fn push_manifest(
        &self,
        reference: &ImageReference,
        manifest: &RawManifest,
    ) -> Result<String> {
        let oci_ref = to_oci_reference(reference)?;
        self.ensure_auth(reference, &oci_ref, true).await?;
        let content_type = HeaderValue::from_str(&manifest.media_type).map_err(|e| {
            MirrorError::invalid_manifest(reference.to_string(), format!("media type: {}", e))
        })?;
        self.client
            .push_manifest_raw(&oci_ref, manifest.bytes.clone(), content_type)
            .await
            .map_err(|e| self.map_error(reference, e))?;
        let digest = manifest.digest();
        tracing::info!(reference = %reference, digest = %digest, "Manifest pushed");
        Ok(digest)
    }
}
