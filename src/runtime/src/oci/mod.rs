//! Container image plumbing for the mirror engine.
//!
//! - `manifest`: wire formats for the five manifest schema kinds
//! - `normalize`: manifest → per-platform descriptors
//! - `convert`: schema 1 → schema 2 rewriting for pushes
//! - `tag`: per-platform destination tags
//! - `builder`: manifest list assembly and push
//! - `registry`: registry client capability (HTTP and in-memory)

pub mod builder;
pub mod convert;
pub mod manifest;
pub mod normalize;
pub mod reference;
pub mod registry;
pub mod retry;
pub mod tag;

pub use builder::ManifestListBuilder;
pub use manifest::{media_types, sha256_digest, Manifest, RawManifest};
pub use normalize::{filter_descriptors, normalize, BlobSource, PlatformFilter, RegistryBlobs};
pub use reference::ImageReference;
pub use registry::{
    Blob, HttpRegistryClient, ImageContent, MemoryRegistry, RegistryAuth, RegistryClient,
};
pub use tag::{encode_platform_tag, encode_tag};
