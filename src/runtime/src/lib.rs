//! A3S Mirror Runtime - multi-architecture manifest synchronization engine.
//!
//! This crate normalizes container manifests of every schema kind into
//! per-platform descriptors, copies them between registries and local
//! archives, and rebuilds destination manifest lists.

#![allow(clippy::result_large_err)]

pub mod archive;
pub mod mirror;
pub mod oci;

pub use oci::registry;

// Re-export common types
pub use archive::{folder_id, ArchiveStore, DirArchive, SaveIndex, SaveIndexWriter, SavedImage};
pub use mirror::{MirrorJob, MirrorMode, MirrorUnit, Mirrorer};
pub use oci::{ImageReference, ManifestListBuilder, RegistryAuth, RegistryClient};
pub use oci::{HttpRegistryClient, MemoryRegistry};

/// A3S Mirror Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
