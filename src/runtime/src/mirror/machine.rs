//! Mirror state machine.
//!
//! A [`Mirrorer`] drives one [`MirrorUnit`] through the mode it was built
//! for. Per-platform steps run sequentially in platform order; the
//! destination list is written only after every platform was attempted.

use std::sync::Arc;

use a3s_mirror_core::config::RetryConfig;
use a3s_mirror_core::descriptor::ImageDescriptor;
use a3s_mirror_core::error::{MirrorError, Result};
use a3s_mirror_core::event::{EventEmitter, MirrorEvent};

use super::unit::{platform_reference, ImageLocation, MirrorMode, MirrorUnit, UnitImage};
use crate::archive::{folder_id, ArchiveStore, SavedImage, SavedPlatform, SaveIndexWriter};
use crate::oci::builder::ManifestListBuilder;
use crate::oci::manifest::Manifest;
use crate::oci::normalize::{filter_descriptors, normalize, RegistryBlobs};
use crate::oci::reference::ImageReference;
use crate::oci::registry::RegistryClient;
use crate::oci::retry::with_retry;

/// Executes mirror units against a registry and, for SAVE/LOAD, an archive.
///
/// Holds no per-unit state, so one instance is shared by all workers.
pub struct Mirrorer {
    registry: Arc<dyn RegistryClient>,
    archive: Option<Arc<dyn ArchiveStore>>,
    index: Option<Arc<SaveIndexWriter>>,
    retry: RetryConfig,
    events: Option<EventEmitter>,
}

impl Mirrorer {
    pub fn new(registry: Arc<dyn RegistryClient>) -> Self {
        Self {
            registry,
            archive: None,
            index: None,
            retry: RetryConfig::default(),
            events: None,
        }
    }

    pub fn with_archive(mut self, archive: Arc<dyn ArchiveStore>) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Record saved units into an incrementally written save index.
    pub fn with_index(mut self, index: Arc<SaveIndexWriter>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn registry(&self) -> &dyn RegistryClient {
        self.registry.as_ref()
    }

    pub(super) fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    pub(super) fn archive(&self) -> Result<&dyn ArchiveStore> {
        self.archive
            .as_deref()
            .ok_or_else(|| MirrorError::Config("no archive directory configured".to_string()))
    }

    pub(super) fn emit(&self, key: &str, unit: &MirrorUnit, detail: Option<String>) {
        if let Some(events) = &self.events {
            let mut event = MirrorEvent::new(key, unit.id());
            if let Some(detail) = detail {
                event = event.with_detail(detail);
            }
            events.emit(event);
        }
    }

    /// Run a unit in the mode it was created for.
    pub async fn run(&self, unit: &mut MirrorUnit) -> Result<()> {
        self.emit("unit.started", unit, Some(unit.mode().to_string()));
        let result = match unit.mode() {
            MirrorMode::Mirror => self.mirror(unit).await,
            MirrorMode::Save => self.save(unit).await,
            MirrorMode::Load => self.load(unit).await,
            MirrorMode::MirrorValidate => self.mirror_validate(unit).await,
            MirrorMode::SaveValidate => self.save_validate(unit).await,
            MirrorMode::LoadValidate => self.load_validate(unit).await,
        };
        let key = if result.is_ok() { "unit.succeeded" } else { "unit.failed" };
        self.emit(key, unit, result.as_ref().err().map(|e| e.to_string()));
        result
    }

    // ========================================================================
    // MIRROR
    // ========================================================================

    /// Copy every requested platform of the source and rebuild the
    /// destination manifest list.
    pub async fn mirror(&self, unit: &mut MirrorUnit) -> Result<()> {
        unit.expect_mode(MirrorMode::Mirror)?;
        let source = unit.source_ref()?;
        let destination = unit.destination_ref()?;
        let source_str = source.to_string();

        let raw = with_retry(&self.retry, "fetch source manifest", || {
            self.registry.fetch_manifest(&source)
        })
        .await?;
        let parent = Manifest::parse(&source_str, &raw)?;
        let existing = self.existing_list(&destination).await?;

        let blobs = RegistryBlobs {
            client: self.registry.as_ref(),
            reference: &source,
        };
        let descriptors = normalize(&source_str, &raw, unit.filter(), &blobs).await?;
        tracing::debug!(
            source = %source,
            destination = %destination,
            platforms = descriptors.len(),
            existing = existing.len(),
            "Source normalized"
        );

        unit.images = descriptors
            .into_iter()
            .map(|d| {
                let from = if parent.is_list() {
                    source.with_digest(&d.digest)
                } else {
                    source.clone()
                };
                let to = platform_reference(&destination, unit.tag(), &d);
                UnitImage::new(
                    ImageLocation::Registry(from),
                    ImageLocation::Registry(to),
                    d,
                    parent.media_type(),
                )
            })
            .collect();

        for i in 0..unit.images.len() {
            self.copy_platform(&mut unit.images[i]).await;
            let image = &unit.images[i];
            let key = match (image.done, image.skipped) {
                (true, true) => "platform.skipped",
                (true, false) => "platform.copied",
                _ => "platform.failed",
            };
            self.emit(key, unit, Some(image.descriptor.platform.to_string()));
        }

        self.finish(unit, &destination, &existing).await
    }

    /// Copy one platform unless the destination already holds its digest.
    async fn copy_platform(&self, image: &mut UnitImage) {
        let (from, to) = match (&image.source, &image.destination) {
            (ImageLocation::Registry(from), ImageLocation::Registry(to)) => (from, to),
            _ => {
                image.error = Some("mirror images must be registry addressed".to_string());
                return;
            }
        };

        match self.registry.fetch_manifest(to).await {
            Ok(current) if current.digest() == image.descriptor.digest => {
                tracing::info!(
                    destination = %to,
                    digest = %image.descriptor.digest,
                    "Destination already up to date, skipping copy"
                );
                image.done = true;
                image.skipped = true;
                return;
            }
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                tracing::warn!(destination = %to, error = %e, "Failed to inspect destination");
                image.error = Some(e.to_string());
                return;
            }
        }

        match with_retry(&self.retry, "copy image", || self.registry.copy_image(from, to)).await {
            Ok(written) => {
                let digest = written.digest();
                if digest != image.descriptor.digest {
                    tracing::info!(
                        destination = %to,
                        source_digest = %image.descriptor.digest,
                        digest = %digest,
                        media_type = %written.media_type,
                        "Destination manifest was rewritten during copy"
                    );
                    image.descriptor.digest = digest;
                    image.descriptor.size = written.size();
                    image.descriptor.media_type = written.media_type;
                }
                tracing::info!(
                    source = %from,
                    destination = %to,
                    platform = %image.descriptor.platform,
                    "Image copied"
                );
                image.done = true;
            }
            Err(e) => {
                tracing::warn!(
                    source = %from,
                    destination = %to,
                    platform = %image.descriptor.platform,
                    error = %e,
                    "Image copy failed"
                );
                image.error = Some(e.to_string());
            }
        }
    }

    /// Entries of the manifest list currently at `destination`.
    ///
    /// A missing destination is a first mirror. A single-platform manifest
    /// at the tag is replaced by the new list.
    pub(super) async fn existing_list(&self, destination: &ImageReference) -> Result<Vec<ImageDescriptor>> {
        let raw = match with_retry(&self.retry, "fetch destination manifest", || {
            self.registry.fetch_manifest(destination)
        })
        .await
        {
            Ok(raw) => raw,
            Err(e) if e.is_not_found() => {
                tracing::debug!(destination = %destination, "No existing destination manifest");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };
        let manifest = Manifest::parse(&destination.to_string(), &raw)?;
        if !manifest.is_list() {
            tracing::warn!(
                destination = %destination,
                media_type = %manifest.media_type(),
                "Destination is not a manifest list, it will be replaced"
            );
        }
        Ok(manifest.entries().to_vec())
    }

    /// Commit the destination list, then apply the strict outcome rule.
    async fn finish(
        &self,
        unit: &MirrorUnit,
        destination: &ImageReference,
        existing: &[ImageDescriptor],
    ) -> Result<()> {
        let committed = self.commit(unit, destination, existing).await;
        let reference = destination.to_string();
        match (unit.check_complete(&reference), committed) {
            (Ok(()), committed) => committed,
            (Err(failures), Ok(())) => Err(failures),
            (Err(failures), Err(e)) => {
                tracing::warn!(destination = %destination, error = %e, "Manifest list not written");
                Err(failures)
            }
        }
    }

    /// Merge finished platforms into the existing list and push it.
    ///
    /// Existing entries go in first so slots the source no longer carries
    /// survive; fresh descriptors then replace their slot in place.
    async fn commit(
        &self,
        unit: &MirrorUnit,
        destination: &ImageReference,
        existing: &[ImageDescriptor],
    ) -> Result<()> {
        let mut builder =
            ManifestListBuilder::new(destination.clone()).with_retry(self.retry.clone());
        for descriptor in existing {
            builder.add(descriptor.clone());
        }
        for image in unit.images.iter().filter(|i| i.done) {
            builder.add(image.descriptor.clone());
        }
        builder.remove_unexist_provenance();

        if !builder.is_empty() && builder.matches(existing) {
            tracing::info!(
                destination = %destination,
                images = builder.len(),
                "Manifest list unchanged, skipping push"
            );
            return Ok(());
        }
        builder.push(self.registry.as_ref()).await?;
        self.emit("list.pushed", unit, Some(destination.to_string()));
        Ok(())
    }

    // ========================================================================
    // SAVE
    // ========================================================================

    /// Write every requested platform into the archive.
    pub async fn save(&self, unit: &mut MirrorUnit) -> Result<()> {
        unit.expect_mode(MirrorMode::Save)?;
        let archive = self.archive()?;
        let source = unit.source_ref()?;
        let source_str = source.to_string();

        let raw = with_retry(&self.retry, "fetch source manifest", || {
            self.registry.fetch_manifest(&source)
        })
        .await?;
        let parent = Manifest::parse(&source_str, &raw)?;
        let blobs = RegistryBlobs {
            client: self.registry.as_ref(),
            reference: &source,
        };
        let descriptors = normalize(&source_str, &raw, unit.filter(), &blobs).await?;

        unit.images = descriptors
            .into_iter()
            .map(|d| {
                let from = if parent.is_list() {
                    source.with_digest(&d.digest)
                } else {
                    source.clone()
                };
                let folder = folder_id(&platform_reference(&source, unit.tag(), &d).to_string());
                UnitImage::new(
                    ImageLocation::Registry(from),
                    ImageLocation::Archive(folder),
                    d,
                    parent.media_type(),
                )
            })
            .collect();

        for image in unit.images.iter_mut() {
            let (from, folder) = match (&image.source, &image.destination) {
                (ImageLocation::Registry(from), ImageLocation::Archive(folder)) => (from, folder),
                _ => {
                    image.error = Some("save images must go from registry to archive".to_string());
                    continue;
                }
            };
            let saved = async {
                let content = with_retry(&self.retry, "pull image", || self.registry.pull_image(from)).await?;
                archive.write_image(folder, &content).await
            }
            .await;
            match saved {
                Ok(()) => {
                    tracing::info!(
                        source = %from,
                        folder = %folder,
                        platform = %image.descriptor.platform,
                        "Image saved"
                    );
                    image.done = true;
                }
                Err(e) => {
                    tracing::warn!(source = %from, folder = %folder, error = %e, "Image save failed");
                    image.error = Some(e.to_string());
                }
            }
        }

        let record = saved_record(unit, &source);
        if !record.images.is_empty() {
            match &self.index {
                Some(index) => index.append(record).await?,
                None => tracing::debug!(source = %source, "No save index configured"),
            }
        }
        unit.check_complete(&source_str)
    }

    // ========================================================================
    // LOAD
    // ========================================================================

    /// Push archived platforms to the destination and rebuild its list.
    pub async fn load(&self, unit: &mut MirrorUnit) -> Result<()> {
        unit.expect_mode(MirrorMode::Load)?;
        let archive = self.archive()?;
        let destination = unit.destination_ref()?;
        let saved = unit.saved()?.clone();
        let descriptors = saved_descriptors(unit, &saved, &destination)?;
        let existing = self.existing_list(&destination).await?;

        unit.images = descriptors
            .into_iter()
            .map(|(d, folder)| {
                let media_type = d.media_type.clone();
                let to = platform_reference(&destination, unit.tag(), &d);
                UnitImage::new(
                    ImageLocation::Archive(folder),
                    ImageLocation::Registry(to),
                    d,
                    media_type,
                )
            })
            .collect();

        for image in unit.images.iter_mut() {
            self.load_platform(archive, image).await;
        }

        self.finish(unit, &destination, &existing).await
    }

    async fn load_platform(&self, archive: &dyn ArchiveStore, image: &mut UnitImage) {
        let (folder, to) = match (&image.source, &image.destination) {
            (ImageLocation::Archive(folder), ImageLocation::Registry(to)) => (folder.clone(), to.clone()),
            _ => {
                image.error = Some("load images must go from archive to registry".to_string());
                return;
            }
        };
        let content = match archive.read_image(&folder).await {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(folder = %folder, error = %e, "Failed to read archived image");
                image.error = Some(e.to_string());
                return;
            }
        };
        let digest = content.manifest.digest();
        image.descriptor.size = content.manifest.size();
        image.descriptor.media_type = content.manifest.media_type.clone();

        match self.registry.fetch_manifest(&to).await {
            Ok(current) if current.digest() == digest => {
                tracing::info!(destination = %to, digest = %digest, "Destination already up to date, skipping load");
                image.descriptor.digest = digest;
                image.done = true;
                image.skipped = true;
                return;
            }
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                tracing::warn!(destination = %to, error = %e, "Failed to inspect destination");
                image.error = Some(e.to_string());
                return;
            }
        }

        match with_retry(&self.retry, "push image", || self.registry.push_image(&to, &content)).await {
            Ok(pushed) => {
                tracing::info!(
                    folder = %folder,
                    destination = %to,
                    platform = %image.descriptor.platform,
                    "Image loaded"
                );
                image.descriptor.digest = pushed.digest();
                image.descriptor.size = pushed.size();
                image.descriptor.media_type = pushed.media_type;
                image.done = true;
            }
            Err(e) => {
                tracing::warn!(folder = %folder, destination = %to, error = %e, "Image load failed");
                image.error = Some(e.to_string());
            }
        }
    }
}

/// Save index record for the platforms a SAVE unit wrote.
fn saved_record(unit: &MirrorUnit, source: &ImageReference) -> SavedImage {
    SavedImage {
        source: source.name(),
        tag: unit.tag().to_string(),
        arch_list: unit.arch().to_vec(),
        os_list: unit.os().to_vec(),
        images: unit
            .images
            .iter()
            .filter(|i| i.done)
            .filter_map(|i| match &i.destination {
                ImageLocation::Archive(folder) => Some(SavedPlatform::from_descriptor(&i.descriptor, folder.clone())),
                ImageLocation::Registry(_) => None,
            })
            .collect(),
    }
}

/// Archived descriptors allowed by the unit's filter, with their folders.
pub(super) fn saved_descriptors(
    unit: &MirrorUnit,
    saved: &SavedImage,
    destination: &ImageReference,
) -> Result<Vec<(ImageDescriptor, String)>> {
    let all: Vec<ImageDescriptor> = saved.images.iter().map(SavedPlatform::descriptor).collect();
    let kept = filter_descriptors(&destination.to_string(), &all, unit.filter())?;
    Ok(kept
        .into_iter()
        .filter_map(|d| {
            saved
                .images
                .iter()
                .find(|p| p.digest == d.digest && p.platform() == d.platform)
                .map(|p| (d, p.folder_id.clone()))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::DirArchive;
    use crate::oci::manifest::media_types;
    use crate::oci::registry::MemoryRegistry;
    use a3s_mirror_core::platform::PlatformKey;
    use tempfile::TempDir;

    fn r(s: &str) -> ImageReference {
        ImageReference::parse(s).unwrap()
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn mirrorer(registry: &Arc<MemoryRegistry>) -> Mirrorer {
        let client: Arc<dyn RegistryClient> = registry.clone();
        Mirrorer::new(client).with_retry(RetryConfig {
            max_attempts: 1,
            delay_ms: 0,
        })
    }

    fn dest_entries(registry: &MemoryRegistry, reference: &str) -> Vec<ImageDescriptor> {
        let raw = registry.manifest(&r(reference)).unwrap();
        Manifest::parse(reference, &raw).unwrap().entries().to_vec()
    }

    #[tokio::test]
    async fn test_run_rejects_wrong_mode_call() {
        let registry = Arc::new(MemoryRegistry::new());
        let m = mirrorer(&registry);
        let mut unit = MirrorUnit::save(r("nginx"), "1.25");
        let err = m.mirror(&mut unit).await.unwrap_err();
        assert!(matches!(err, MirrorError::WrongMode { .. }));
    }

    #[tokio::test]
    async fn test_save_without_archive_is_config_error() {
        let registry = Arc::new(MemoryRegistry::new());
        let m = mirrorer(&registry);
        let mut unit = MirrorUnit::save(r("nginx"), "1.25");
        assert!(matches!(m.run(&mut unit).await, Err(MirrorError::Config(_))));
    }

    #[tokio::test]
    async fn test_run_emits_unit_events() {
        let registry = Arc::new(MemoryRegistry::new());
        let events = EventEmitter::new(8);
        let mut rx = events.subscribe();
        let m = mirrorer(&registry).with_events(events);

        let mut unit = MirrorUnit::save(r("nginx"), "1.25");
        assert!(m.run(&mut unit).await.is_err());

        let started = rx.recv().await.unwrap();
        assert_eq!(started.key, "unit.started");
        assert_eq!(started.unit, "docker.io/library/nginx:1.25");
        assert_eq!(started.detail.as_deref(), Some("SAVE"));
        let failed = rx.recv().await.unwrap();
        assert_eq!(failed.key, "unit.failed");
        assert!(failed.detail.unwrap().contains("archive"));
    }

    #[tokio::test]
    async fn test_mirror_missing_source_propagates_not_found() {
        let registry = Arc::new(MemoryRegistry::new());
        let m = mirrorer(&registry);
        let mut unit = MirrorUnit::mirror(r("docker.io/library/none"), r("priv.io/library/none"), "1");
        let err = m.run(&mut unit).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(registry.manifest_pushes(), 0);
    }

    #[tokio::test]
    async fn test_mirror_list_source_tags_each_platform() {
        let registry = Arc::new(MemoryRegistry::new());
        let src = r("docker.io/library/nginx:1.25");
        let amd = registry.seed_image(&src.with_tag("amd"), &PlatformKey::new("linux", "amd64"), media_types::OCI_MANIFEST);
        let arm = registry.seed_image(
            &src.with_tag("arm"),
            &PlatformKey::new("linux", "arm").with_variant("v7"),
            media_types::OCI_MANIFEST,
        );
        registry.seed_index(&src, &[amd.clone(), arm.clone()], media_types::OCI_INDEX);

        let m = mirrorer(&registry);
        let mut unit = MirrorUnit::mirror(src.clone(), r("priv.io/library/nginx"), "1.25")
            .with_platforms(strings(&["amd64", "arm"]), strings(&["linux"]));
        m.run(&mut unit).await.unwrap();

        assert!(registry.manifest(&r("priv.io/library/nginx:1.25-amd64")).is_some());
        assert!(registry.manifest(&r("priv.io/library/nginx:1.25-armv7")).is_some());
        let entries = dest_entries(&registry, "priv.io/library/nginx:1.25");
        assert_eq!(entries, vec![amd, arm]);
        assert!(unit.images.iter().all(|i| i.done && !i.skipped));
    }

    #[tokio::test]
    async fn test_mirror_with_provenance_links_attestation() {
        let registry = Arc::new(MemoryRegistry::new());
        let src = r("docker.io/library/app:v1");
        let amd = registry.seed_image(&src.with_tag("amd"), &PlatformKey::new("linux", "amd64"), media_types::OCI_MANIFEST);
        let att_image = registry.seed_image(&src.with_tag("att"), &PlatformKey::unknown(), media_types::OCI_MANIFEST);
        let att = ImageDescriptor::provenance(&att_image.digest, media_types::OCI_MANIFEST, att_image.size, &amd.digest);
        registry.seed_index(&src, &[amd.clone(), att.clone()], media_types::OCI_INDEX);

        let m = mirrorer(&registry);
        let mut unit = MirrorUnit::mirror(src.clone(), r("priv.io/library/app"), "v1")
            .with_platforms(strings(&["amd64"]), strings(&["linux"]))
            .with_provenance(true);
        m.run(&mut unit).await.unwrap();

        let entries = dest_entries(&registry, "priv.io/library/app:v1");
        assert_eq!(entries.len(), 2);
        assert!(entries[1].is_provenance());
        assert_eq!(entries[1].reference_digest(), Some(amd.digest.as_str()));
        assert!(registry
            .manifest(&r("priv.io/library/app").with_digest(&att.digest))
            .is_some());
    }

    #[tokio::test]
    async fn test_save_writes_folders_and_index() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(MemoryRegistry::new());
        let src = r("docker.io/library/nginx:1.25");
        let d = registry.seed_image(&src, &PlatformKey::new("linux", "amd64"), media_types::DOCKER_V2);

        let archive = Arc::new(DirArchive::new(dir.path()).unwrap());
        let index = Arc::new(SaveIndexWriter::create(&archive.index_path()).await.unwrap());
        let m = mirrorer(&registry).with_archive(archive.clone()).with_index(index.clone());

        let mut unit = MirrorUnit::save(src.clone(), "1.25");
        m.run(&mut unit).await.unwrap();

        let snapshot = index.snapshot().await;
        assert_eq!(snapshot.list.len(), 1);
        let record = &snapshot.list[0];
        assert_eq!(record.source, "docker.io/library/nginx");
        assert_eq!(record.images[0].digest, d.digest);
        assert_eq!(
            record.images[0].folder_id,
            folder_id("docker.io/library/nginx:1.25-amd64")
        );
        let content = archive.read_image(&record.images[0].folder_id).await.unwrap();
        assert_eq!(content.manifest.digest(), d.digest);
    }

    #[tokio::test]
    async fn test_save_failure_is_reported_and_not_indexed() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(MemoryRegistry::new());
        let src = r("docker.io/library/nginx:1.25");
        let d = registry.seed_image(&src.with_tag("amd"), &PlatformKey::new("linux", "amd64"), media_types::DOCKER_V2);
        // Entry whose manifest does not exist in the repository.
        let ghost = ImageDescriptor::new("sha256:ghost", media_types::DOCKER_V2, 1, PlatformKey::new("linux", "arm64"));
        registry.seed_index(&src, &[d.clone(), ghost], media_types::DOCKER_LIST);

        let archive = Arc::new(DirArchive::new(dir.path()).unwrap());
        let index = Arc::new(SaveIndexWriter::create(&archive.index_path()).await.unwrap());
        let m = mirrorer(&registry).with_archive(archive).with_index(index.clone());

        let mut unit = MirrorUnit::save(src, "1.25");
        let err = m.run(&mut unit).await.unwrap_err();
        assert!(matches!(err, MirrorError::PlatformFailures { failed: 1, total: 2, .. }));

        let snapshot = index.snapshot().await;
        assert_eq!(snapshot.list[0].images.len(), 1);
        assert_eq!(snapshot.list[0].images[0].digest, d.digest);
    }

    #[tokio::test]
    async fn test_load_needs_saved_record() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(MemoryRegistry::new());
        let m = mirrorer(&registry).with_archive(Arc::new(DirArchive::new(dir.path()).unwrap()));
        let saved = SavedImage {
            source: "docker.io/library/nginx".to_string(),
            tag: "1.25".to_string(),
            arch_list: strings(&["amd64"]),
            os_list: strings(&["linux"]),
            images: vec![],
        };
        let mut unit = MirrorUnit::load(saved, r("priv.io/library/nginx"))
            .with_platforms(strings(&["amd64"]), strings(&["linux"]));
        let err = m.run(&mut unit).await.unwrap_err();
        assert!(matches!(err, MirrorError::NoAvailableImage { .. }));
    }
}
