//! Integration test: mirror, save, load and validate against an in-memory
//! registry.
//!
//! Each test seeds a [`MemoryRegistry`] with source images, runs one or
//! more mirror units through a [`Mirrorer`], and inspects the manifests
//! and write counters the registry recorded.
//!
//! ## Running
//!
//! ```bash
//! cargo test -p a3s-mirror-runtime --test mirror_scenarios
//! ```

use std::sync::Arc;

use a3s_mirror_core::config::RetryConfig;
use a3s_mirror_core::descriptor::ImageDescriptor;
use a3s_mirror_core::error::MirrorError;
use a3s_mirror_core::platform::PlatformKey;
use a3s_mirror_runtime::archive::{DirArchive, SaveIndex, SaveIndexWriter};
use a3s_mirror_runtime::oci::{media_types, Manifest};
use a3s_mirror_runtime::registry::memory::MemoryRegistry;
use a3s_mirror_runtime::registry::RegistryClient;
use a3s_mirror_runtime::{ImageReference, MirrorUnit, Mirrorer};
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

fn list_entries(registry: &MemoryRegistry, reference: &str) -> Vec<ImageDescriptor> {
    let raw = registry
        .manifest(&r(reference))
        .unwrap_or_else(|| panic!("no manifest at {}", reference));
    let manifest = Manifest::parse(reference, &raw).unwrap();
    assert!(manifest.is_list(), "{} is not a manifest list", reference);
    manifest.entries().to_vec()
}

fn linux(arch: &str) -> PlatformKey {
    PlatformKey::new("linux", arch)
}

/// Seed `source` as a list of the given platforms, each behind its own tag.
fn seed_list(
    registry: &MemoryRegistry,
    source: &ImageReference,
    platforms: &[PlatformKey],
) -> Vec<ImageDescriptor> {
    let entries: Vec<ImageDescriptor> = platforms
        .iter()
        .map(|p| {
            let tag = format!("src-{}{}", p.architecture, p.variant);
            registry.seed_image(&source.with_tag(tag), p, media_types::DOCKER_V2)
        })
        .collect();
    registry.seed_index(source, &entries, media_types::DOCKER_LIST);
    entries
}

// ============================================================================
// MIRROR
// ============================================================================

#[tokio::test]
async fn test_single_platform_source_to_empty_destination() {
    let registry = Arc::new(MemoryRegistry::new());
    let src = r("docker.io/library/nginx:1.25");
    let seeded = registry.seed_image(&src, &linux("amd64"), media_types::DOCKER_V2);

    let m = mirrorer(&registry);
    let mut unit = MirrorUnit::mirror(src.clone(), r("priv.io/library/nginx"), "1.25");
    m.run(&mut unit).await.unwrap();

    let copied = registry
        .manifest(&r("priv.io/library/nginx:1.25-amd64"))
        .unwrap();
    let entries = list_entries(&registry, "priv.io/library/nginx:1.25");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].platform, linux("amd64"));
    assert_eq!(entries[0].digest, copied.digest());
    assert_eq!(entries[0].digest, seeded.digest);
}

#[tokio::test]
async fn test_stale_platform_is_replaced_in_place() {
    let registry = Arc::new(MemoryRegistry::new());
    let src = r("docker.io/library/redis:7");
    let fresh = seed_list(&registry, &src, &[linux("amd64"), linux("arm64")]);

    // Destination already carries an older arm64 image and no amd64.
    let dst = r("priv.io/library/redis:7");
    let stale = registry.seed_image(
        &dst.with_tag("7-arm64"),
        &linux("arm64"),
        media_types::OCI_MANIFEST,
    );
    assert_ne!(stale.digest, fresh[1].digest);
    registry.seed_index(&dst, &[stale.clone()], media_types::OCI_INDEX);

    let m = mirrorer(&registry);
    let mut unit = MirrorUnit::mirror(src, r("priv.io/library/redis"), "7");
    m.run(&mut unit).await.unwrap();

    let entries = list_entries(&registry, "priv.io/library/redis:7");
    assert_eq!(entries.len(), 2);
    // arm64 keeps its position with the new digest, amd64 is appended.
    assert_eq!(entries[0].platform, linux("arm64"));
    assert_eq!(entries[0].digest, fresh[1].digest);
    assert_eq!(entries[1].platform, linux("amd64"));
    assert_eq!(entries[1].digest, fresh[0].digest);
    assert_eq!(
        entries.iter().filter(|e| e.platform == linux("arm64")).count(),
        1
    );
}

#[tokio::test]
async fn test_second_run_performs_no_writes() {
    let registry = Arc::new(MemoryRegistry::new());
    let src = r("docker.io/library/alpine:3.19");
    seed_list(&registry, &src, &[linux("amd64"), linux("arm64")]);

    let m = mirrorer(&registry);
    let mut first = MirrorUnit::mirror(src.clone(), r("priv.io/library/alpine"), "3.19");
    m.run(&mut first).await.unwrap();
    assert_eq!(registry.manifest_pushes(), 3);

    registry.reset_counters();
    let mut second = MirrorUnit::mirror(src, r("priv.io/library/alpine"), "3.19");
    m.run(&mut second).await.unwrap();
    assert_eq!(registry.manifest_pushes(), 0);
    assert_eq!(registry.blob_pushes(), 0);
    assert!(second.images.iter().all(|i| i.done && i.skipped));
}

#[tokio::test]
async fn test_platforms_missing_from_source_are_kept() {
    let registry = Arc::new(MemoryRegistry::new());
    let dst = r("priv.io/library/app:v1");
    let old_s390x = registry.seed_image(&dst.with_tag("v1-s390x"), &linux("s390x"), media_types::DOCKER_V2);
    registry.seed_index(&dst, &[old_s390x.clone()], media_types::DOCKER_LIST);

    let src = r("docker.io/library/app:v1");
    seed_list(&registry, &src, &[linux("amd64")]);

    let m = mirrorer(&registry);
    let mut unit = MirrorUnit::mirror(src, r("priv.io/library/app"), "v1");
    m.run(&mut unit).await.unwrap();

    let entries = list_entries(&registry, "priv.io/library/app:v1");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0], old_s390x);
    assert_eq!(entries[1].platform, linux("amd64"));
}

#[tokio::test]
async fn test_partial_failure_commits_successes_but_fails_unit() {
    let registry = Arc::new(MemoryRegistry::new());
    let src = r("docker.io/library/busybox:1.36");
    let amd = registry.seed_image(&src.with_tag("amd"), &linux("amd64"), media_types::DOCKER_V2);
    // arm64 entry points at a manifest the source repository does not have.
    let missing = ImageDescriptor::new("sha256:0000", media_types::DOCKER_V2, 10, linux("arm64"));
    registry.seed_index(&src, &[amd.clone(), missing], media_types::DOCKER_LIST);

    let m = mirrorer(&registry);
    let mut unit = MirrorUnit::mirror(src, r("priv.io/library/busybox"), "1.36");
    let err = m.run(&mut unit).await.unwrap_err();
    match err {
        MirrorError::PlatformFailures { failed, total, .. } => assert_eq!((failed, total), (1, 2)),
        other => panic!("unexpected error: {other}"),
    }

    let entries = list_entries(&registry, "priv.io/library/busybox:1.36");
    assert_eq!(entries, vec![amd]);
}

#[tokio::test]
async fn test_all_platforms_filtered_out() {
    let registry = Arc::new(MemoryRegistry::new());
    let src = r("docker.io/library/nginx:1.25");
    seed_list(&registry, &src, &[linux("amd64"), linux("arm64")]);

    let m = mirrorer(&registry);
    let mut unit = MirrorUnit::mirror(src, r("priv.io/library/nginx"), "1.25")
        .with_platforms(strings(&["s390x"]), strings(&["linux"]));
    let err = m.run(&mut unit).await.unwrap_err();
    assert!(matches!(err, MirrorError::NoAvailableImage { .. }));
    assert_eq!(registry.manifest_pushes(), 0);
}

#[tokio::test]
async fn test_schema1_source_is_mirrored_as_schema2() {
    let registry = Arc::new(MemoryRegistry::new());
    let src = r("docker.io/library/busybox:1.0");
    let seeded = registry.seed_schema1(&src, &linux("amd64"), true);

    let m = mirrorer(&registry);
    let mut unit = MirrorUnit::mirror(src.clone(), r("priv.io/library/busybox"), "1.0")
        .with_platforms(strings(&["amd64"]), strings(&["linux"]));
    m.run(&mut unit).await.unwrap();

    let list = registry.manifest(&r("priv.io/library/busybox:1.0")).unwrap();
    assert_eq!(list.media_type, media_types::DOCKER_LIST);
    let entries = list_entries(&registry, "priv.io/library/busybox:1.0");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].media_type, media_types::DOCKER_V2);
    assert_eq!(entries[0].platform, linux("amd64"));
    assert_ne!(entries[0].digest, seeded.digest);

    let tagged = registry.manifest(&r("priv.io/library/busybox:1.0-amd64")).unwrap();
    assert_eq!(tagged.media_type, media_types::DOCKER_V2);
    assert_eq!(tagged.digest(), entries[0].digest);

    let mut validate = MirrorUnit::mirror_validate(src, r("priv.io/library/busybox"), "1.0")
        .with_platforms(strings(&["amd64"]), strings(&["linux"]));
    m.run(&mut validate).await.unwrap();
}

// ============================================================================
// MIRROR_VALIDATE
// ============================================================================

#[tokio::test]
async fn test_validate_single_platform_source() {
    let registry = Arc::new(MemoryRegistry::new());
    let src = r("docker.io/library/nginx:1.25");
    registry.seed_image(&src, &linux("amd64"), media_types::DOCKER_V2);

    let m = mirrorer(&registry);
    let mut unit = MirrorUnit::mirror(src.clone(), r("priv.io/library/nginx"), "1.25");
    m.run(&mut unit).await.unwrap();

    let mut validate = MirrorUnit::mirror_validate(src.clone(), r("priv.io/library/nginx"), "1.25");
    m.run(&mut validate).await.unwrap();

    // Re-declare the destination entry as arm64.
    let dst = r("priv.io/library/nginx:1.25");
    let mut entries = list_entries(&registry, "priv.io/library/nginx:1.25");
    entries[0].platform = linux("arm64");
    registry.seed_index(&dst, &entries, media_types::DOCKER_LIST);

    let mut validate = MirrorUnit::mirror_validate(src, r("priv.io/library/nginx"), "1.25");
    let err = m.run(&mut validate).await.unwrap_err();
    match err {
        MirrorError::ValidationMismatch { platform, .. } => assert_eq!(platform, "linux/amd64"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_validate_multi_platform_digest_drift() {
    let registry = Arc::new(MemoryRegistry::new());
    let src = r("docker.io/library/redis:7");
    let fresh = seed_list(&registry, &src, &[linux("amd64"), linux("arm64")]);

    let m = mirrorer(&registry);
    let mut unit = MirrorUnit::mirror(src.clone(), r("priv.io/library/redis"), "7");
    m.run(&mut unit).await.unwrap();
    let mut ok = MirrorUnit::mirror_validate(src.clone(), r("priv.io/library/redis"), "7");
    m.run(&mut ok).await.unwrap();

    let dst = r("priv.io/library/redis:7");
    let drifted = ImageDescriptor::new("sha256:ffff", media_types::DOCKER_V2, 1, linux("arm64"));
    registry.seed_index(&dst, &[fresh[0].clone(), drifted], media_types::DOCKER_LIST);

    let mut bad = MirrorUnit::mirror_validate(src, r("priv.io/library/redis"), "7");
    let err = m.run(&mut bad).await.unwrap_err();
    match err {
        MirrorError::ValidationMismatch { platform, .. } => assert_eq!(platform, "linux/arm64"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(registry.manifest_pushes(), 3);
}

#[tokio::test]
async fn test_validate_missing_destination() {
    let registry = Arc::new(MemoryRegistry::new());
    let src = r("docker.io/library/nginx:1.25");
    registry.seed_image(&src, &linux("amd64"), media_types::DOCKER_V2);

    let m = mirrorer(&registry);
    let mut unit = MirrorUnit::mirror_validate(src, r("priv.io/library/nginx"), "1.25");
    let err = m.run(&mut unit).await.unwrap_err();
    assert!(matches!(err, MirrorError::ValidationMismatch { .. }));
}

// ============================================================================
// SAVE / LOAD / LOAD_VALIDATE
// ============================================================================

#[tokio::test]
async fn test_save_then_load_into_another_registry() {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(MemoryRegistry::new());
    let src = r("docker.io/library/nginx:1.25");
    let fresh = seed_list(&registry, &src, &[linux("amd64"), linux("arm64")]);

    let archive = Arc::new(DirArchive::new(dir.path()).unwrap());
    let index = Arc::new(SaveIndexWriter::create(&archive.index_path()).await.unwrap());
    let m = mirrorer(&registry)
        .with_archive(archive.clone())
        .with_index(index);

    let mut save = MirrorUnit::save(src.clone(), "1.25");
    m.run(&mut save).await.unwrap();

    let saved = SaveIndex::load(&archive.index_path()).await.unwrap();
    assert_eq!(saved.list.len(), 1);
    assert_eq!(saved.list[0].images.len(), 2);

    registry.reset_counters();
    let mut load = MirrorUnit::load(saved.list[0].clone(), r("air.gap/library/nginx"));
    m.run(&mut load).await.unwrap();

    let entries = list_entries(&registry, "air.gap/library/nginx:1.25");
    assert_eq!(entries.len(), 2);
    let digests: Vec<&str> = entries.iter().map(|e| e.digest.as_str()).collect();
    assert!(digests.contains(&fresh[0].digest.as_str()));
    assert!(digests.contains(&fresh[1].digest.as_str()));
    assert!(registry.manifest(&r("air.gap/library/nginx:1.25-arm64")).is_some());
    assert_eq!(registry.manifest_pushes(), 3);

    let mut check = MirrorUnit::load_validate(saved.list[0].clone(), r("air.gap/library/nginx"));
    m.run(&mut check).await.unwrap();

    // Loading again changes nothing.
    registry.reset_counters();
    let mut again = MirrorUnit::load(saved.list[0].clone(), r("air.gap/library/nginx"));
    m.run(&mut again).await.unwrap();
    assert_eq!(registry.manifest_pushes(), 0);
}

#[tokio::test]
async fn test_load_validate_reports_missing_platform() {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(MemoryRegistry::new());
    let src = r("docker.io/library/nginx:1.25");
    let fresh = seed_list(&registry, &src, &[linux("amd64"), linux("arm64")]);

    let archive = Arc::new(DirArchive::new(dir.path()).unwrap());
    let index = Arc::new(SaveIndexWriter::create(&archive.index_path()).await.unwrap());
    let m = mirrorer(&registry).with_archive(archive).with_index(index.clone());
    let mut save = MirrorUnit::save(src, "1.25");
    m.run(&mut save).await.unwrap();
    let record = index.snapshot().await.list[0].clone();

    // Destination list only advertises amd64.
    registry.seed_index(&r("air.gap/library/nginx:1.25"), &fresh[..1], media_types::DOCKER_LIST);

    let mut check = MirrorUnit::load_validate(record, r("air.gap/library/nginx"));
    let err = m.run(&mut check).await.unwrap_err();
    match err {
        MirrorError::ValidationMismatch { platform, message, .. } => {
            assert_eq!(platform, "linux/arm64");
            assert!(message.contains("missing"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_save_validate_tracks_source_and_archive() {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(MemoryRegistry::new());
    let src = r("docker.io/library/nginx:1.25");
    let fresh = seed_list(&registry, &src, &[linux("amd64"), linux("arm64")]);

    let archive = Arc::new(DirArchive::new(dir.path()).unwrap());
    let index = Arc::new(SaveIndexWriter::create(&archive.index_path()).await.unwrap());
    let m = mirrorer(&registry).with_archive(archive).with_index(index.clone());
    let mut save = MirrorUnit::save(src.clone(), "1.25");
    m.run(&mut save).await.unwrap();
    let record = index.snapshot().await.list[0].clone();

    registry.reset_counters();
    let mut check = MirrorUnit::save_validate(record.clone());
    m.run(&mut check).await.unwrap();
    assert_eq!(check.images.len(), 2);
    assert!(check.images.iter().all(|i| i.done));
    assert_eq!(registry.manifest_pushes(), 0);

    // The source moves arm64 to a new build.
    let rebuilt = registry.seed_image(&src.with_tag("rebuilt"), &linux("arm64"), media_types::DOCKER_V2);
    registry.seed_index(&src, &[fresh[0].clone(), rebuilt], media_types::DOCKER_LIST);
    let mut stale = MirrorUnit::save_validate(record.clone());
    let err = m.run(&mut stale).await.unwrap_err();
    match err {
        MirrorError::ValidationMismatch { platform, .. } => assert_eq!(platform, "linux/arm64"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(stale.images.iter().all(|i| !i.done));

    // Back to the saved source, but with an archive folder gone.
    registry.seed_index(&src, &fresh, media_types::DOCKER_LIST);
    let amd = record
        .images
        .iter()
        .find(|p| p.platform() == linux("amd64"))
        .unwrap();
    std::fs::remove_dir_all(dir.path().join(&amd.folder_id)).unwrap();
    let mut broken = MirrorUnit::save_validate(record);
    let err = m.run(&mut broken).await.unwrap_err();
    match err {
        MirrorError::ValidationMismatch { platform, message, .. } => {
            assert_eq!(platform, "linux/amd64");
            assert!(message.contains("unreadable"));
        }
        other => panic!("unexpected error: {other}"),
    }
}
