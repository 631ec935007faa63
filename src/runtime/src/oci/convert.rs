//! Legacy schema 1 to schema 2 conversion.
//!
//! Registries no longer accept schema 1 pushes and a schema 1 manifest is
//! not a valid manifest list entry, so schema 1 images are rewritten as
//! Docker schema 2 on their way to a destination. The image config is
//! rebuilt from the newest history record, with `rootfs.diff_ids` computed
//! from the (decompressed) layers.

use std::io::Read;

use a3s_mirror_core::error::{MirrorError, Result};
use flate2::read::GzDecoder;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use super::manifest::{media_types, sha256_digest, BlobDescriptor, ImageManifest, Manifest, RawManifest, Schema1Manifest};
use super::registry::{Blob, ImageContent};

const CONFIG_MEDIA_TYPE: &str = "application/vnd.docker.container.image.v1+json";
const LAYER_MEDIA_TYPE: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

/// History record fields that survive into the schema 2 config.
#[derive(Deserialize, Default)]
struct V1Compat {
    #[serde(default)]
    created: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    comment: Option<String>,
    #[serde(default)]
    container_config: Option<ContainerConfig>,
    #[serde(default)]
    throwaway: bool,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
struct ContainerConfig {
    #[serde(default)]
    cmd: Option<Vec<String>>,
}

/// Uncompressed digest of a layer. Layers that are not gzip streams are
/// hashed as they are.
fn diff_id(reference: &str, data: &[u8]) -> Result<String> {
    if !data.starts_with(&[0x1f, 0x8b]) {
        return Ok(sha256_digest(data));
    }
    let mut decoder = GzDecoder::new(data);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = decoder
            .read(&mut buf)
            .map_err(|e| MirrorError::invalid_manifest(reference, format!("layer is not valid gzip: {}", e)))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
}

/// Rebuild a schema 1 image as Docker schema 2.
///
/// `blobs` must hold every layer the manifest lists. The returned content
/// carries the new config blob plus the layers still referenced.
pub fn schema1_to_schema2(reference: &str, manifest: &Schema1Manifest, blobs: &[Blob]) -> Result<ImageContent> {
    if manifest.history.is_empty() || manifest.history.len() != manifest.fs_layers.len() {
        return Err(MirrorError::invalid_manifest(
            reference,
            format!(
                "schema 1 manifest has {} layers but {} history records",
                manifest.fs_layers.len(),
                manifest.history.len()
            ),
        ));
    }

    let mut layers = Vec::new();
    let mut diff_ids = Vec::new();
    let mut history = Vec::new();
    let mut kept: Vec<Blob> = Vec::new();

    // Schema 1 lists layers newest first.
    for (layer, record) in manifest.fs_layers.iter().zip(&manifest.history).rev() {
        let compat: V1Compat = serde_json::from_str(&record.v1_compatibility)
            .map_err(|e| MirrorError::invalid_manifest(reference, format!("v1Compatibility: {}", e)))?;

        let mut entry = serde_json::Map::new();
        if let Some(created) = compat.created {
            entry.insert("created".into(), created.into());
        }
        if let Some(author) = compat.author {
            entry.insert("author".into(), author.into());
        }
        if let Some(comment) = compat.comment {
            entry.insert("comment".into(), comment.into());
        }
        if let Some(cmd) = compat.container_config.and_then(|c| c.cmd) {
            entry.insert("created_by".into(), cmd.join(" ").into());
        }
        if compat.throwaway {
            entry.insert("empty_layer".into(), true.into());
            history.push(serde_json::Value::Object(entry));
            continue;
        }
        history.push(serde_json::Value::Object(entry));

        let blob = blobs.iter().find(|b| b.digest == layer.blob_sum).ok_or_else(|| {
            MirrorError::invalid_manifest(reference, format!("layer {} was not downloaded", layer.blob_sum))
        })?;
        diff_ids.push(serde_json::Value::String(diff_id(reference, &blob.data)?));
        layers.push(BlobDescriptor {
            media_type: LAYER_MEDIA_TYPE.to_string(),
            size: blob.data.len() as u64,
            digest: blob.digest.clone(),
            urls: Vec::new(),
        });
        if !kept.iter().any(|b| b.digest == blob.digest) {
            kept.push(blob.clone());
        }
    }

    let newest = &manifest.history[0].v1_compatibility;
    let mut config: serde_json::Map<String, serde_json::Value> = serde_json::from_str(newest)
        .map_err(|e| MirrorError::invalid_manifest(reference, format!("v1Compatibility: {}", e)))?;
    for key in ["id", "parent", "parent_id", "layer_id", "throwaway", "Size"] {
        config.remove(key);
    }
    if !config.contains_key("architecture") && !manifest.architecture.is_empty() {
        config.insert("architecture".into(), manifest.architecture.clone().into());
    }
    if !config.contains_key("os") {
        config.insert("os".into(), "linux".into());
    }
    config.insert(
        "rootfs".into(),
        serde_json::json!({"type": "layers", "diff_ids": diff_ids}),
    );
    config.insert("history".into(), serde_json::Value::Array(history));

    let config_bytes = serde_json::to_vec(&config)?;
    let config_blob = Blob {
        digest: sha256_digest(&config_bytes),
        data: config_bytes,
    };

    let converted = ImageManifest {
        schema_version: 2,
        media_type: Some(media_types::DOCKER_V2.to_string()),
        config: BlobDescriptor {
            media_type: CONFIG_MEDIA_TYPE.to_string(),
            size: config_blob.data.len() as u64,
            digest: config_blob.digest.clone(),
            urls: Vec::new(),
        },
        layers,
        annotations: Default::default(),
    };
    let manifest = RawManifest::new(serde_json::to_vec(&converted)?, media_types::DOCKER_V2);

    let mut out = vec![config_blob];
    out.extend(kept);
    Ok(ImageContent { manifest, blobs: out })
}

/// Content ready to push: schema 1 images are converted, the rest pass
/// through unchanged.
pub fn pushable(reference: &str, content: &ImageContent) -> Result<Option<ImageContent>> {
    match Manifest::parse(reference, &content.manifest)? {
        Manifest::SignedV1(m) | Manifest::V1(m) => {
            tracing::info!(reference = %reference, "Converting schema 1 manifest to schema 2");
            schema1_to_schema2(reference, &m, &content.blobs).map(Some)
        }
        _ => Ok(None),
    }
}
