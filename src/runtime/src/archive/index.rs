//! Save index: the record of what an archive holds.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use a3s_mirror_core::descriptor::ImageDescriptor;
use a3s_mirror_core::error::{MirrorError, Result};
use a3s_mirror_core::platform::PlatformKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Index format written by this release. Loading any other version fails.
pub const SAVE_INDEX_VERSION: &str = "v1.2.0";

/// One archived platform image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedPlatform {
    pub digest: String,
    pub arch: String,
    pub os: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub os_version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub os_features: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub variant: String,
    pub media_type: String,
    pub folder_id: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl SavedPlatform {
    pub fn from_descriptor(descriptor: &ImageDescriptor, folder_id: impl Into<String>) -> Self {
        let p = &descriptor.platform;
        Self {
            digest: descriptor.digest.clone(),
            arch: p.architecture.clone(),
            os: p.os.clone(),
            os_version: p.os_version.clone(),
            os_features: p.os_features.clone(),
            variant: p.variant.clone(),
            media_type: descriptor.media_type.clone(),
            folder_id: folder_id.into(),
            annotations: descriptor.annotations.clone(),
        }
    }

    pub fn platform(&self) -> PlatformKey {
        PlatformKey {
            architecture: self.arch.clone(),
            os: self.os.clone(),
            variant: self.variant.clone(),
            os_version: self.os_version.clone(),
            os_features: self.os_features.clone(),
        }
    }

    /// Descriptor as it was in the source registry.
    pub fn descriptor(&self) -> ImageDescriptor {
        ImageDescriptor {
            media_type: self.media_type.clone(),
            size: 0,
            digest: self.digest.clone(),
            platform: self.platform(),
            annotations: self.annotations.clone(),
        }
    }
}

/// One archived logical image (all of its saved platforms).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedImage {
    /// Source repository, e.g. `docker.io/library/nginx`
    pub source: String,
    pub tag: String,
    #[serde(default)]
    pub arch_list: Vec<String>,
    #[serde(default)]
    pub os_list: Vec<String>,
    #[serde(default)]
    pub images: Vec<SavedPlatform>,
}

/// Serialized save index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveIndex {
    pub version: String,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub list: Vec<SavedImage>,
}

impl Default for SaveIndex {
    fn default() -> Self {
        Self {
            version: SAVE_INDEX_VERSION.to_string(),
            time: Utc::now(),
            list: Vec::new(),
        }
    }
}

impl SaveIndex {
    /// Parse an index, refusing unknown format versions.
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        #[derive(Deserialize)]
        struct VersionProbe {
            #[serde(default)]
            version: String,
        }
        let probe: VersionProbe = serde_json::from_slice(data)?;
        if probe.version != SAVE_INDEX_VERSION {
            return Err(MirrorError::TemplateVersion {
                found: probe.version,
                supported: SAVE_INDEX_VERSION.to_string(),
            });
        }
        Ok(serde_json::from_slice(data)?)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let data = tokio::fs::read(path).await.map_err(|e| MirrorError::Archive {
            path: path.display().to_string(),
            message: format!("failed to read save index: {}", e),
        })?;
        Self::from_slice(&data)
    }

    /// Write atomically (temp file then rename).
    pub async fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

/// Incremental index writer shared by concurrent save workers.
///
/// Every append rewrites the whole index under the lock, so the file on
/// disk is always a complete, loadable index.
pub struct SaveIndexWriter {
    path: PathBuf,
    index: Mutex<SaveIndex>,
}

impl SaveIndexWriter {
    /// Start a fresh index at `path`.
    pub async fn create(path: &Path) -> Result<Self> {
        let index = SaveIndex::default();
        index.save(path).await?;
        Ok(Self {
            path: path.to_path_buf(),
            index: Mutex::new(index),
        })
    }

    pub async fn append(&self, image: SavedImage) -> Result<()> {
        let mut index = self.index.lock().await;
        index.list.push(image);
        index.time = Utc::now();
        index.save(&self.path).await
    }

    pub async fn snapshot(&self) -> SaveIndex {
        self.index.lock().await.clone()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
