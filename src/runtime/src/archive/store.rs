//! Directory-backed image archive.
//!
//! Each saved image lives in its own folder named by a content hash of its
//! destination coordinate:
//!
//! ```text
//! <root>/
//! ├── index.json              (save index)
//! └── <folder_id>/
//!     ├── manifest.json       (manifest bytes as fetched)
//!     ├── media-type          (manifest media type)
//!     └── blobs/sha256/<hex>  (config and layers)
//! ```

use std::path::{Path, PathBuf};

use a3s_mirror_core::error::{MirrorError, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::oci::manifest::{sha256_digest, Manifest, RawManifest};
use crate::oci::registry::{Blob, ImageContent};

const MANIFEST_FILE: &str = "manifest.json";
const MEDIA_TYPE_FILE: &str = "media-type";

/// Folder name for an archived image: hex SHA-256 of its coordinate.
pub fn folder_id(coordinate: &str) -> String {
    hex::encode(Sha256::digest(coordinate.as_bytes()))
}

/// Storage for saved image content.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    async fn write_image(&self, folder_id: &str, content: &ImageContent) -> Result<()>;

    async fn read_image(&self, folder_id: &str) -> Result<ImageContent>;
}

/// Archive rooted at a local directory.
pub struct DirArchive {
    root: PathBuf,
}

impl DirArchive {
    /// Open (creating if needed) an archive directory.
    pub fn new(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root).map_err(|e| MirrorError::Archive {
            path: root.display().to_string(),
            message: format!("failed to create archive directory: {}", e),
        })?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the save index inside the archive.
    pub fn index_path(&self) -> PathBuf {
        self.root.join("index.json")
    }

    fn folder(&self, folder_id: &str) -> Result<PathBuf> {
        let valid = !folder_id.is_empty()
            && folder_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(MirrorError::Archive {
                path: folder_id.to_string(),
                message: "invalid folder id".to_string(),
            });
        }
        Ok(self.root.join(folder_id))
    }
}

fn archive_err(path: &Path, message: impl std::fmt::Display) -> MirrorError {
    MirrorError::Archive {
        path: path.display().to_string(),
        message: message.to_string(),
    }
}

/// `blobs/<algorithm>/<encoded>` inside `folder`.
///
/// Both digest parts must match the OCI digest grammar, so neither can
/// name a parent directory or contain a separator.
fn blob_path(folder: &Path, digest: &str) -> Result<PathBuf> {
    let invalid = || MirrorError::Archive {
        path: folder.display().to_string(),
        message: format!("invalid blob digest '{}'", digest),
    };
    let (algorithm, encoded) = digest.split_once(':').ok_or_else(invalid)?;
    let algorithm_ok = algorithm.starts_with(|c: char| c.is_ascii_lowercase() || c.is_ascii_digit())
        && algorithm
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '+' | '.' | '_' | '-'));
    let encoded_ok = encoded.starts_with(|c: char| c.is_ascii_alphanumeric())
        && encoded
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '=' | '_' | '-'));
    if !algorithm_ok || !encoded_ok {
        return Err(invalid());
    }
    Ok(folder.join("blobs").join(algorithm).join(encoded))
}

#[async_trait]
impl ArchiveStore for DirArchive {
    async fn write_image(&self, folder_id: &str, content: &ImageContent) -> Result<()> {
        let folder = self.folder(folder_id)?;
        let blobs_dir = folder.join("blobs").join("sha256");
        tokio::fs::create_dir_all(&blobs_dir)
            .await
            .map_err(|e| archive_err(&blobs_dir, e))?;

        for blob in &content.blobs {
            let path = blob_path(&folder, &blob.digest)?;
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                continue;
            }
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| archive_err(parent, e))?;
            }
            tokio::fs::write(&path, &blob.data)
                .await
                .map_err(|e| archive_err(&path, e))?;
        }

        let manifest_path = folder.join(MANIFEST_FILE);
        tokio::fs::write(&manifest_path, &content.manifest.bytes)
            .await
            .map_err(|e| archive_err(&manifest_path, e))?;
        let media_path = folder.join(MEDIA_TYPE_FILE);
        tokio::fs::write(&media_path, content.manifest.media_type.as_bytes())
            .await
            .map_err(|e| archive_err(&media_path, e))?;

        tracing::debug!(
            folder = %folder.display(),
            blobs = content.blobs.len(),
            "Image written to archive"
        );
        Ok(())
    }

    async fn read_image(&self, folder_id: &str) -> Result<ImageContent> {
        let folder = self.folder(folder_id)?;
        let manifest_path = folder.join(MANIFEST_FILE);
        let bytes = tokio::fs::read(&manifest_path)
            .await
            .map_err(|e| archive_err(&manifest_path, e))?;
        let media_path = folder.join(MEDIA_TYPE_FILE);
        let media_type = tokio::fs::read_to_string(&media_path)
            .await
            .map_err(|e| archive_err(&media_path, e))?;
        let manifest = RawManifest::new(bytes, media_type.trim());

        let parsed = Manifest::parse(&folder.display().to_string(), &manifest)?;
        let mut blobs = Vec::new();
        for digest in parsed.blob_digests() {
            let path = blob_path(&folder, &digest)?;
            let data = tokio::fs::read(&path)
                .await
                .map_err(|e| archive_err(&path, e))?;
            if digest.starts_with("sha256:") && sha256_digest(&data) != digest {
                return Err(archive_err(&path, "blob content does not match its digest"));
            }
            blobs.push(Blob { digest, data });
        }
        Ok(ImageContent { manifest, blobs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::manifest::media_types;
    use tempfile::TempDir;

    fn content() -> ImageContent {
        let config = br#"{"architecture":"amd64","os":"linux"}"#.to_vec();
        let layer = b"layer-bytes".to_vec();
        let config_digest = sha256_digest(&config);
        let layer_digest = sha256_digest(&layer);
        let manifest = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": media_types::OCI_MANIFEST,
            "config": {"mediaType": "application/vnd.oci.image.config.v1+json", "size": config.len(), "digest": config_digest},
            "layers": [{"mediaType": "application/vnd.oci.image.layer.v1.tar+gzip", "size": layer.len(), "digest": layer_digest}],
        });
        ImageContent {
            manifest: RawManifest::new(serde_json::to_vec(&manifest).unwrap(), media_types::OCI_MANIFEST),
            blobs: vec![
                Blob { digest: config_digest, data: config },
                Blob { digest: layer_digest, data: layer },
            ],
        }
    }

    #[test]
    fn test_folder_id_is_stable_hex() {
        let a = folder_id("priv.io/library/nginx:1.25-amd64");
        assert_eq!(a.len(), 64);
        assert_eq!(a, folder_id("priv.io/library/nginx:1.25-amd64"));
        assert_ne!(a, folder_id("priv.io/library/nginx:1.25-arm64"));
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let archive = DirArchive::new(dir.path()).unwrap();
        let original = content();
        let id = folder_id("docker.io/library/nginx:1.25-amd64");

        archive.write_image(&id, &original).await.unwrap();
        assert!(dir.path().join(&id).join("manifest.json").exists());

        let read = archive.read_image(&id).await.unwrap();
        assert_eq!(read, original);
    }

    #[tokio::test]
    async fn test_read_missing_folder() {
        let dir = TempDir::new().unwrap();
        let archive = DirArchive::new(dir.path()).unwrap();
        let err = archive.read_image(&folder_id("nothing")).await.unwrap_err();
        assert!(matches!(err, MirrorError::Archive { .. }));
    }

    #[tokio::test]
    async fn test_read_detects_corrupt_blob() {
        let dir = TempDir::new().unwrap();
        let archive = DirArchive::new(dir.path()).unwrap();
        let original = content();
        let id = folder_id("x");
        archive.write_image(&id, &original).await.unwrap();

        let layer = blob_path(&dir.path().join(&id), &original.blobs[1].digest).unwrap();
        std::fs::write(&layer, b"tampered").unwrap();

        let err = archive.read_image(&id).await.unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[tokio::test]
    async fn test_rejects_path_like_folder_id() {
        let dir = TempDir::new().unwrap();
        let archive = DirArchive::new(dir.path()).unwrap();
        assert!(archive.read_image("../etc").await.is_err());
        assert!(archive.write_image("", &content()).await.is_err());
    }

    #[test]
    fn test_blob_path_rejects_traversal() {
        let folder = Path::new("/archive/abc");
        assert_eq!(
            blob_path(folder, "sha256:0123abcd").unwrap(),
            folder.join("blobs").join("sha256").join("0123abcd")
        );
        for digest in ["../x:y", "sha256:../../etc", "sha256:a/b", ".:abc", "sha256:", "nodigest"] {
            let err = blob_path(folder, digest).unwrap_err();
            assert!(matches!(err, MirrorError::Archive { .. }), "{}", digest);
        }
    }

    #[tokio::test]
    async fn test_write_rejects_malformed_blob_digest() {
        let dir = TempDir::new().unwrap();
        let archive = DirArchive::new(dir.path()).unwrap();
        let mut bad = content();
        bad.blobs[0].digest = "../x:y".to_string();
        let err = archive.write_image(&folder_id("bad"), &bad).await.unwrap_err();
        assert!(err.to_string().contains("invalid blob digest"));
        assert!(!dir.path().join("x:y").exists());
    }
}
