//! Mirror units: one source → destination task and its per-platform images.

use a3s_mirror_core::config::MirrorConfig;
use a3s_mirror_core::descriptor::ImageDescriptor;
use a3s_mirror_core::error::{MirrorError, Result};
use serde::{Deserialize, Serialize};

use crate::archive::SavedImage;
use crate::oci::normalize::PlatformFilter;
use crate::oci::reference::ImageReference;
use crate::oci::tag::encode_platform_tag;

/// Operating mode, fixed when the unit is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MirrorMode {
    Mirror,
    Save,
    Load,
    MirrorValidate,
    SaveValidate,
    LoadValidate,
}

impl std::fmt::Display for MirrorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Mirror => "MIRROR",
            Self::Save => "SAVE",
            Self::Load => "LOAD",
            Self::MirrorValidate => "MIRROR_VALIDATE",
            Self::SaveValidate => "SAVE_VALIDATE",
            Self::LoadValidate => "LOAD_VALIDATE",
        };
        f.write_str(s)
    }
}

/// Where a per-platform image is read from or written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageLocation {
    Registry(ImageReference),
    /// Folder inside the local archive
    Archive(String),
}

impl std::fmt::Display for ImageLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Registry(r) => write!(f, "{}", r),
            Self::Archive(id) => write!(f, "archive:{}", id),
        }
    }
}

/// One resolved platform of a unit.
#[derive(Debug, Clone)]
pub struct UnitImage {
    pub source: ImageLocation,
    pub destination: ImageLocation,
    /// Resolved platform, digest, media type and annotations
    pub descriptor: ImageDescriptor,
    /// Media type of the top-level manifest this image came from
    pub parent_media_type: String,
    /// Copied / saved / loaded / validated
    pub done: bool,
    /// Content was already in place
    pub skipped: bool,
    pub error: Option<String>,
}

impl UnitImage {
    pub fn new(
        source: ImageLocation,
        destination: ImageLocation,
        descriptor: ImageDescriptor,
        parent_media_type: impl Into<String>,
    ) -> Self {
        Self {
            source,
            destination,
            descriptor,
            parent_media_type: parent_media_type.into(),
            done: false,
            skipped: false,
            error: None,
        }
    }

    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Per-platform coordinate inside `repository`.
///
/// Images get the encoded platform tag; attestations have no tag of
/// their own and are addressed by digest.
pub fn platform_reference(
    repository: &ImageReference,
    tag: &str,
    descriptor: &ImageDescriptor,
) -> ImageReference {
    if descriptor.is_provenance() {
        repository.with_digest(&descriptor.digest)
    } else {
        repository.with_tag(encode_platform_tag(tag, &descriptor.platform))
    }
}

/// One logical image moving through a single mode.
#[derive(Debug, Clone)]
pub struct MirrorUnit {
    mode: MirrorMode,
    source: Option<ImageReference>,
    destination: Option<ImageReference>,
    saved: Option<SavedImage>,
    tag: String,
    arch: Vec<String>,
    os: Vec<String>,
    copy_provenance: bool,
    failure_line: Option<String>,
    pub images: Vec<UnitImage>,
}

impl MirrorUnit {
    fn new(mode: MirrorMode, tag: impl Into<String>) -> Self {
        let defaults = MirrorConfig::default();
        Self {
            mode,
            source: None,
            destination: None,
            saved: None,
            tag: tag.into(),
            arch: defaults.arch,
            os: defaults.os,
            copy_provenance: false,
            failure_line: None,
            images: Vec::new(),
        }
    }

    /// Copy `source:tag` to `destination:tag`.
    pub fn mirror(source: ImageReference, destination: ImageReference, tag: impl Into<String>) -> Self {
        let mut unit = Self::new(MirrorMode::Mirror, tag);
        unit.source = Some(source);
        unit.destination = Some(destination);
        unit
    }

    /// Check that `destination:tag` matches `source:tag`.
    pub fn mirror_validate(
        source: ImageReference,
        destination: ImageReference,
        tag: impl Into<String>,
    ) -> Self {
        let mut unit = Self::mirror(source, destination, tag);
        unit.mode = MirrorMode::MirrorValidate;
        unit
    }

    /// Write `source:tag` into the local archive.
    pub fn save(source: ImageReference, tag: impl Into<String>) -> Self {
        let mut unit = Self::new(MirrorMode::Save, tag);
        unit.source = Some(source);
        unit
    }

    /// Check that the archive still matches the source it was saved from.
    pub fn save_validate(saved: SavedImage) -> Self {
        let mut unit = Self::new(MirrorMode::SaveValidate, saved.tag.clone());
        unit.saved = Some(saved);
        unit
    }

    /// Push an archived image to `destination`.
    pub fn load(saved: SavedImage, destination: ImageReference) -> Self {
        let mut unit = Self::new(MirrorMode::Load, saved.tag.clone());
        unit.saved = Some(saved);
        unit.destination = Some(destination);
        unit
    }

    /// Check that `destination` carries the archived platforms.
    pub fn load_validate(saved: SavedImage, destination: ImageReference) -> Self {
        let mut unit = Self::load(saved, destination);
        unit.mode = MirrorMode::LoadValidate;
        unit
    }

    pub fn with_platforms(mut self, arch: Vec<String>, os: Vec<String>) -> Self {
        self.arch = arch;
        self.os = os;
        self
    }

    pub fn with_provenance(mut self, copy_provenance: bool) -> Self {
        self.copy_provenance = copy_provenance;
        self
    }

    /// Line written to the failure file instead of the default.
    pub fn with_failure_line(mut self, line: impl Into<String>) -> Self {
        self.failure_line = Some(line.into());
        self
    }

    pub fn mode(&self) -> MirrorMode {
        self.mode
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn arch(&self) -> &[String] {
        &self.arch
    }

    pub fn os(&self) -> &[String] {
        &self.os
    }

    pub fn copy_provenance(&self) -> bool {
        self.copy_provenance
    }

    pub fn filter(&self) -> PlatformFilter<'_> {
        PlatformFilter::new(&self.arch, &self.os).with_provenance(self.copy_provenance)
    }

    /// Fail unless the unit was built for `expected` and carries what that
    /// mode needs.
    pub fn expect_mode(&self, expected: MirrorMode) -> Result<()> {
        if self.mode != expected {
            return Err(MirrorError::WrongMode {
                expected: expected.to_string(),
                actual: self.mode.to_string(),
            });
        }
        if self.tag.is_empty() {
            return Err(MirrorError::InvalidUnit("unit has no tag".to_string()));
        }
        if self.arch.is_empty() {
            return Err(MirrorError::InvalidUnit(
                "unit has no architecture list".to_string(),
            ));
        }
        Ok(())
    }

    /// Source repository addressed by the unit's tag.
    pub fn source_ref(&self) -> Result<ImageReference> {
        self.source
            .as_ref()
            .map(|s| s.with_tag(&self.tag))
            .ok_or_else(|| MirrorError::InvalidUnit(format!("{} unit has no source", self.mode)))
    }

    /// Destination repository addressed by the unit's tag.
    pub fn destination_ref(&self) -> Result<ImageReference> {
        self.destination
            .as_ref()
            .map(|d| d.with_tag(&self.tag))
            .ok_or_else(|| {
                MirrorError::InvalidUnit(format!("{} unit has no destination", self.mode))
            })
    }

    pub fn saved(&self) -> Result<&SavedImage> {
        self.saved.as_ref().ok_or_else(|| {
            MirrorError::InvalidUnit(format!("{} unit has no saved image record", self.mode))
        })
    }

    /// Human-readable identifier for logs.
    pub fn id(&self) -> String {
        let source = match (&self.source, &self.saved) {
            (Some(s), _) => s.name(),
            (None, Some(saved)) => format!("archive:{}", saved.source),
            (None, None) => "-".to_string(),
        };
        match &self.destination {
            Some(d) => format!("{}:{} => {}:{}", source, self.tag, d.name(), self.tag),
            None => format!("{}:{}", source, self.tag),
        }
    }

    /// Line appended to the failure file when this unit fails.
    ///
    /// Mirror units use the `SOURCE DESTINATION TAG` list format so the
    /// file can be fed straight back as input; the others use `name:tag`.
    pub fn failure_line(&self) -> String {
        if let Some(line) = &self.failure_line {
            return line.clone();
        }
        match (self.mode, &self.source, &self.destination, &self.saved) {
            (MirrorMode::Mirror | MirrorMode::MirrorValidate, Some(s), Some(d), _) => {
                format!("{} {} {}", s.name(), d.name(), self.tag)
            }
            (_, Some(s), _, _) => format!("{}:{}", s.name(), self.tag),
            (_, None, _, Some(saved)) => format!("{}:{}", saved.source, self.tag),
            (_, None, Some(d), None) => format!("{}:{}", d.name(), self.tag),
            _ => self.tag.clone(),
        }
    }

    pub fn failed_images(&self) -> usize {
        self.images.iter().filter(|i| i.failed()).count()
    }

    /// Strict outcome: any failed platform fails the unit.
    pub fn check_complete(&self, reference: &str) -> Result<()> {
        let failed = self.failed_images();
        if failed == 0 {
            return Ok(());
        }
        let first_error = self
            .images
            .iter()
            .find_map(|i| {
                i.error
                    .as_ref()
                    .map(|e| format!("{}: {}", i.descriptor.platform, e))
            })
            .unwrap_or_default();
        Err(MirrorError::PlatformFailures {
            reference: reference.to_string(),
            failed,
            total: self.images.len(),
            first_error,
        })
    }
}
