//! Per-platform destination tags.
//!
//! A logical tag plus a platform tuple maps to one concrete tag, e.g.
//! `v1.0-amd64`, `v1.0-armv7` or `v1.0-windows-amd64-10.0.17763.5329`.
//! The same encoding names archive folders, so it must not drift between
//! releases reading the same saved data.

use a3s_mirror_core::platform::PlatformKey;
use sha2::{Digest, Sha256};

/// Longest tag registries accept.
pub const MAX_TAG_LEN: usize = 128;

/// Hex characters kept from the hash suffix of an over-long tag.
const HASH_SUFFIX_LEN: usize = 12;

/// Encode a platform-specific tag.
///
/// Linux (or unspecified) images get `<tag>-<arch><variant>`, every other
/// OS is spelled out as `<tag>-<os>-<arch><variant>`. A non-empty OS
/// version is appended as a final `-<version>` component.
pub fn encode_tag(tag: &str, os: &str, arch: &str, variant: &str, os_version: &str) -> String {
    encode_tag_with_features(tag, os, arch, variant, os_version, &[])
}

/// [`encode_tag`] plus OS features, each appended as `_<feature>` in list
/// order.
pub fn encode_tag_with_features(
    tag: &str,
    os: &str,
    arch: &str,
    variant: &str,
    os_version: &str,
    os_features: &[String],
) -> String {
    let variant = if arch == "arm64" && variant == "v8" { "" } else { variant };

    let mut encoded = String::with_capacity(tag.len() + 32);
    encoded.push_str(tag);
    encoded.push('-');
    if !os.is_empty() && os != "linux" {
        encoded.push_str(os);
        encoded.push('-');
    }
    encoded.push_str(arch);
    encoded.push_str(variant);
    if !os_version.is_empty() {
        encoded.push('-');
        encoded.push_str(os_version);
    }
    for feature in os_features {
        encoded.push('_');
        encoded.push_str(feature);
    }

    bound(sanitize(&encoded))
}

/// [`encode_tag`] for a platform key.
pub fn encode_platform_tag(tag: &str, platform: &PlatformKey) -> String {
    encode_tag_with_features(
        tag,
        &platform.os,
        &platform.architecture,
        &platform.variant,
        &platform.os_version,
        &platform.os_features,
    )
}

/// Replace characters outside the registry tag charset `[A-Za-z0-9_.-]`.
fn sanitize(tag: &str) -> String {
    let mut out: String = tag
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    // Tags must start with a word character.
    if out.starts_with('.') || out.starts_with('-') {
        out.insert(0, '_');
    }
    out
}

/// Cap the length, keeping distinct long inputs distinct via a hash suffix.
fn bound(tag: String) -> String {
    if tag.len() <= MAX_TAG_LEN {
        return tag;
    }
    let hash = hex::encode(Sha256::digest(tag.as_bytes()));
    let keep = MAX_TAG_LEN - HASH_SUFFIX_LEN - 1;
    format!("{}-{}", &tag[..keep], &hash[..HASH_SUFFIX_LEN])
}
