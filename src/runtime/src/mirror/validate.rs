//! MIRROR_VALIDATE, SAVE_VALIDATE and LOAD_VALIDATE.
//!
//! Validation never writes. Every mismatch is logged; the first one is
//! returned as the unit's error.

use std::collections::BTreeSet;

use a3s_mirror_core::descriptor::ImageDescriptor;
use a3s_mirror_core::error::{MirrorError, Result};
use a3s_mirror_core::platform::PlatformKey;

use super::machine::{saved_descriptors, Mirrorer};
use super::unit::{platform_reference, ImageLocation, MirrorMode, MirrorUnit, UnitImage};
use crate::oci::manifest::Manifest;
use crate::oci::normalize::{filter_descriptors, normalize, RegistryBlobs};
use crate::oci::reference::ImageReference;
use crate::oci::retry::with_retry;

fn mismatch(reference: &str, platform: impl ToString, message: impl Into<String>) -> MirrorError {
    MirrorError::ValidationMismatch {
        reference: reference.to_string(),
        platform: platform.to_string(),
        message: message.into(),
    }
}

/// Single-platform source: the destination list must hold exactly one
/// image, on the same platform and, unless the source is schema 1, with
/// the same digest.
pub fn compare_single(
    reference: &str,
    source: &ImageDescriptor,
    compare_digest: bool,
    destination: &[ImageDescriptor],
) -> Vec<MirrorError> {
    let images: Vec<&ImageDescriptor> = destination.iter().filter(|d| !d.is_provenance()).collect();
    let [only] = images.as_slice() else {
        return vec![mismatch(
            reference,
            &source.platform,
            format!("expected 1 image in destination list, found {}", images.len()),
        )];
    };
    if !only.platform.same_slot(&source.platform) {
        return vec![mismatch(
            reference,
            &source.platform,
            format!("destination platform is {}", only.platform),
        )];
    }
    if compare_digest && only.digest != source.digest {
        return vec![mismatch(
            reference,
            &source.platform,
            format!("digest {} != source {}", only.digest, source.digest),
        )];
    }
    Vec::new()
}

/// Multi-platform source: both sides must carry the same digests.
pub fn compare_digests(
    reference: &str,
    expected: &[ImageDescriptor],
    actual: &[ImageDescriptor],
) -> Vec<MirrorError> {
    let mut errors = Vec::new();
    for want in expected {
        if !actual.iter().any(|a| a.digest == want.digest) {
            errors.push(mismatch(
                reference,
                &want.platform,
                format!("digest {} missing from destination", want.digest),
            ));
        }
    }
    for got in actual {
        if !expected.iter().any(|e| e.digest == got.digest) {
            errors.push(mismatch(
                reference,
                &got.platform,
                format!("unexpected digest {} in destination", got.digest),
            ));
        }
    }
    errors
}

fn platform_set(entries: &[ImageDescriptor]) -> BTreeSet<String> {
    entries
        .iter()
        .filter(|d| !d.is_provenance())
        .map(|d| slot_name(&d.platform))
        .collect()
}

fn slot_name(platform: &PlatformKey) -> String {
    platform.normalized().to_string()
}

/// Archived platforms against destination platforms, ignoring digests.
pub fn compare_platforms(
    reference: &str,
    expected: &[ImageDescriptor],
    actual: &[ImageDescriptor],
) -> Vec<MirrorError> {
    let want = platform_set(expected);
    let got = platform_set(actual);
    let mut errors: Vec<MirrorError> = want
        .difference(&got)
        .map(|p| mismatch(reference, p, "platform missing from destination"))
        .collect();
    errors.extend(
        got.difference(&want)
            .map(|p| mismatch(reference, p, "unexpected platform in destination")),
    );
    errors
}

fn first_error(reference: &str, errors: Vec<MirrorError>) -> Result<()> {
    let count = errors.len();
    let mut errors = errors.into_iter();
    match errors.next() {
        None => Ok(()),
        Some(first) => {
            tracing::warn!(reference = %reference, error = %first, "Validation failed");
            for e in errors {
                tracing::warn!(reference = %reference, error = %e, "Validation failed");
            }
            tracing::debug!(reference = %reference, mismatches = count, "Validation finished");
            Err(first)
        }
    }
}

impl Mirrorer {
    /// Destination list entries, or a mismatch when there is no list.
    async fn destination_list(
        &self,
        unit: &MirrorUnit,
    ) -> Result<(String, Vec<ImageDescriptor>)> {
        let destination = unit.destination_ref()?;
        let reference = destination.to_string();
        let raw = match with_retry(self.retry(), "fetch destination manifest", || {
            self.registry().fetch_manifest(&destination)
        })
        .await
        {
            Ok(raw) => raw,
            Err(e) if e.is_not_found() => {
                return Err(mismatch(&reference, "-", "destination manifest list does not exist"))
            }
            Err(e) => return Err(e),
        };
        let manifest = Manifest::parse(&reference, &raw)?;
        if !manifest.is_list() {
            return Err(mismatch(
                &reference,
                "-",
                format!("destination is {}, not a manifest list", manifest.media_type()),
            ));
        }
        Ok((reference, manifest.entries().to_vec()))
    }

    /// Check that the destination list reflects the source.
    pub async fn mirror_validate(&self, unit: &mut MirrorUnit) -> Result<()> {
        unit.expect_mode(MirrorMode::MirrorValidate)?;
        let source = unit.source_ref()?;
        let destination = unit.destination_ref()?;
        let source_str = source.to_string();

        let raw = with_retry(self.retry(), "fetch source manifest", || {
            self.registry().fetch_manifest(&source)
        })
        .await?;
        let parent = Manifest::parse(&source_str, &raw)?;
        let blobs = RegistryBlobs {
            client: self.registry(),
            reference: &source,
        };
        let expected = normalize(&source_str, &raw, unit.filter(), &blobs).await?;
        let (reference, entries) = self.destination_list(unit).await?;

        unit.images = expected
            .iter()
            .map(|d| {
                UnitImage::new(
                    ImageLocation::Registry(source.clone()),
                    ImageLocation::Registry(platform_reference(&destination, unit.tag(), d)),
                    d.clone(),
                    parent.media_type(),
                )
            })
            .collect();

        let errors = if parent.is_list() {
            match filter_descriptors(&reference, &entries, unit.filter()) {
                Ok(actual) => compare_digests(&reference, &expected, &actual),
                Err(e) => vec![e],
            }
        } else {
            let mut errors = Vec::new();
            for source_image in &expected {
                errors.extend(compare_single(
                    &reference,
                    source_image,
                    !parent.is_schema1(),
                    &entries,
                ));
            }
            errors
        };

        let passed = errors.is_empty();
        for image in unit.images.iter_mut() {
            image.done = passed;
        }
        first_error(&reference, errors)?;
        tracing::info!(source = %source, destination = %reference, "Validation passed");
        Ok(())
    }

    /// Check that the archive holds what the source serves: the same
    /// platform digests, each with a readable and intact folder.
    pub async fn save_validate(&self, unit: &mut MirrorUnit) -> Result<()> {
        unit.expect_mode(MirrorMode::SaveValidate)?;
        let archive = self.archive()?;
        let saved = unit.saved()?.clone();
        let source = ImageReference::parse(&saved.source)?.with_tag(unit.tag());
        let reference = source.to_string();

        let raw = with_retry(self.retry(), "fetch source manifest", || {
            self.registry().fetch_manifest(&source)
        })
        .await?;
        let blobs = RegistryBlobs {
            client: self.registry(),
            reference: &source,
        };
        let expected = normalize(&reference, &raw, unit.filter(), &blobs).await?;
        let archived = saved_descriptors(unit, &saved, &source)?;
        let actual: Vec<ImageDescriptor> = archived.iter().map(|(d, _)| d.clone()).collect();

        let mut errors = compare_digests(&reference, &expected, &actual);
        for (descriptor, folder) in &archived {
            match archive.read_image(folder).await {
                Ok(content) if content.manifest.digest() == descriptor.digest => {}
                Ok(content) => errors.push(mismatch(
                    &reference,
                    &descriptor.platform,
                    format!(
                        "archived manifest is {}, index records {}",
                        content.manifest.digest(),
                        descriptor.digest
                    ),
                )),
                Err(e) => errors.push(mismatch(
                    &reference,
                    &descriptor.platform,
                    format!("archived image unreadable: {}", e),
                )),
            }
        }

        let passed = errors.is_empty();
        unit.images = archived
            .into_iter()
            .map(|(d, folder)| {
                let mut image = UnitImage::new(
                    ImageLocation::Registry(platform_reference(&source, unit.tag(), &d)),
                    ImageLocation::Archive(folder),
                    d,
                    raw.media_type.clone(),
                );
                image.done = passed;
                image
            })
            .collect();
        first_error(&reference, errors)?;
        tracing::info!(source = %reference, platforms = expected.len(), "Validation passed");
        Ok(())
    }

    /// Check that the destination list carries every archived platform.
    pub async fn load_validate(&self, unit: &mut MirrorUnit) -> Result<()> {
        unit.expect_mode(MirrorMode::LoadValidate)?;
        let destination = unit.destination_ref()?;
        let saved = unit.saved()?.clone();
        let expected: Vec<ImageDescriptor> = saved_descriptors(unit, &saved, &destination)?
            .into_iter()
            .map(|(d, _)| d)
            .collect();
        let (reference, entries) = self.destination_list(unit).await?;

        let errors = match filter_descriptors(&reference, &entries, unit.filter()) {
            Ok(actual) => compare_platforms(&reference, &expected, &actual),
            Err(e) => vec![e],
        };
        first_error(&reference, errors)?;
        tracing::info!(
            source = %saved.source,
            destination = %reference,
            platforms = expected.len(),
            "Validation passed"
        );
        Ok(())
    }
}
