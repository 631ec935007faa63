//! Image reference parsing.
//!
//! Parses references like `docker.io/library/nginx:1.25` into registry,
//! repository, tag and digest, and derives the per-platform coordinates
//! the mirror engine reads from and writes to.

use a3s_mirror_core::error::{MirrorError, Result};

/// Default registry when none is specified.
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Default tag when none is specified.
const DEFAULT_TAG: &str = "latest";

/// Parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    /// Registry hostname, optionally with port (e.g., "docker.io", "priv.io:5000")
    pub registry: String,
    /// Repository path (e.g., "library/nginx")
    pub repository: String,
    /// Tag (e.g., "1.25")
    pub tag: Option<String>,
    /// Digest (e.g., "sha256:abc123...")
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse an image reference string.
    ///
    /// - `nginx` → docker.io/library/nginx:latest
    /// - `myuser/app:v1` → docker.io/myuser/app:v1
    /// - `priv.io:5000/org/app@sha256:...` → registry with port, digest only
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(MirrorError::InvalidUnit(
                "empty image reference".to_string(),
            ));
        }

        let (name_tag, digest) = match reference.rsplit_once('@') {
            Some((name, digest)) => {
                if !digest.contains(':') {
                    return Err(MirrorError::InvalidUnit(format!(
                        "invalid digest in reference '{}': expected algorithm:hex",
                        reference
                    )));
                }
                (name, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        // A colon after the last slash separates the tag; earlier colons
        // belong to a registry port.
        let last_segment_start = name_tag.rfind('/').map(|p| p + 1).unwrap_or(0);
        let (name, tag) = match name_tag[last_segment_start..].rfind(':') {
            Some(colon) => {
                let split = last_segment_start + colon;
                (&name_tag[..split], Some(name_tag[split + 1..].to_string()))
            }
            None => (name_tag, None),
        };

        if let Some(ref t) = tag {
            if t.is_empty() {
                return Err(MirrorError::InvalidUnit(format!(
                    "empty tag in reference '{}'",
                    reference
                )));
            }
        }

        let (registry, repository) = Self::split_registry_repository(name)?;

        let tag = if tag.is_none() && digest.is_none() {
            Some(DEFAULT_TAG.to_string())
        } else {
            tag
        };

        Ok(ImageReference {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Split a name into registry and repository components.
    fn split_registry_repository(name: &str) -> Result<(String, String)> {
        if let Some((first, rest)) = name.split_once('/') {
            if first.contains('.') || first.contains(':') || first == "localhost" {
                if rest.is_empty() {
                    return Err(MirrorError::InvalidUnit(format!(
                        "empty repository in reference '{}'",
                        name
                    )));
                }
                return Ok((first.to_string(), rest.to_string()));
            }
        }

        if name.is_empty() {
            return Err(MirrorError::InvalidUnit("empty repository".to_string()));
        }

        let repository = if name.contains('/') {
            name.to_string()
        } else {
            format!("library/{}", name)
        };
        Ok((DEFAULT_REGISTRY.to_string(), repository))
    }

    /// Same repository, addressed by tag.
    pub fn with_tag(&self, tag: impl Into<String>) -> Self {
        Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: Some(tag.into()),
            digest: None,
        }
    }

    /// Same repository, addressed by digest.
    pub fn with_digest(&self, digest: impl Into<String>) -> Self {
        Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: None,
            digest: Some(digest.into()),
        }
    }

    /// Same repository path on another registry.
    pub fn with_registry(&self, registry: impl Into<String>) -> Self {
        let mut r = self.clone();
        r.registry = registry.into();
        r
    }

    /// Replace the project (first repository component).
    ///
    /// `library/nginx` with project `mirror` becomes `mirror/nginx`; a
    /// single-component repository gains the project as prefix.
    pub fn with_project(&self, project: &str) -> Self {
        let mut r = self.clone();
        r.repository = match self.repository.split_once('/') {
            Some((_, rest)) => format!("{}/{}", project, rest),
            None => format!("{}/{}", project, self.repository),
        };
        r
    }

    /// `registry/repository` without tag or digest.
    pub fn name(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    /// Tag or digest used to address the manifest.
    pub fn manifest_reference(&self) -> &str {
        self.digest
            .as_deref()
            .or(self.tag.as_deref())
            .unwrap_or(DEFAULT_TAG)
    }

    /// Get the full reference string.
    pub fn full_reference(&self) -> String {
        let mut s = self.name();
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

impl std::str::FromStr for ImageReference {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_name() {
        let r = ImageReference::parse("nginx").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "library/nginx");
        assert_eq!(r.tag, Some("latest".to_string()));
        assert_eq!(r.digest, None);
    }

    #[test]
    fn test_parse_name_with_tag() {
        let r = ImageReference::parse("nginx:1.25").unwrap();
        assert_eq!(r.repository, "library/nginx");
        assert_eq!(r.tag, Some("1.25".to_string()));
    }

    #[test]
    fn test_parse_numeric_tag() {
        let r = ImageReference::parse("redis:7").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "library/redis");
        assert_eq!(r.tag, Some("7".to_string()));

        let r = ImageReference::parse("postgres:16").unwrap();
        assert_eq!(r.repository, "library/postgres");
        assert_eq!(r.tag, Some("16".to_string()));

        let r = ImageReference::parse("priv.io:5000/busybox:1").unwrap();
        assert_eq!(r.registry, "priv.io:5000");
        assert_eq!(r.repository, "busybox");
        assert_eq!(r.tag, Some("1".to_string()));
    }

    #[test]
    fn test_parse_user_repo() {
        let r = ImageReference::parse("rancher/rancher:v2.8.0").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "rancher/rancher");
        assert_eq!(r.tag, Some("v2.8.0".to_string()));
    }

    #[test]
    fn test_parse_custom_registry() {
        let r = ImageReference::parse("quay.io/coreos/etcd:v3.5.0").unwrap();
        assert_eq!(r.registry, "quay.io");
        assert_eq!(r.repository, "coreos/etcd");
        assert_eq!(r.tag, Some("v3.5.0".to_string()));
    }

    #[test]
    fn test_parse_digest_only() {
        let r = ImageReference::parse("quay.io/coreos/etcd@sha256:abcdef").unwrap();
        assert_eq!(r.tag, None);
        assert_eq!(r.digest, Some("sha256:abcdef".to_string()));
        assert_eq!(r.manifest_reference(), "sha256:abcdef");
    }

    #[test]
    fn test_parse_tag_and_digest() {
        let r = ImageReference::parse("quay.io/coreos/etcd:v3@sha256:abcdef").unwrap();
        assert_eq!(r.tag, Some("v3".to_string()));
        assert_eq!(r.digest, Some("sha256:abcdef".to_string()));
    }

    #[test]
    fn test_parse_registry_with_port() {
        let r = ImageReference::parse("priv.io:5000/app:v1").unwrap();
        assert_eq!(r.registry, "priv.io:5000");
        assert_eq!(r.repository, "app");
        assert_eq!(r.tag, Some("v1".to_string()));
    }

    #[test]
    fn test_parse_localhost_registry() {
        let r = ImageReference::parse("localhost/app:test").unwrap();
        assert_eq!(r.registry, "localhost");
        assert_eq!(r.repository, "app");
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(ImageReference::parse("").is_err());
        assert!(ImageReference::parse("nginx@invaliddigest").is_err());
        assert!(ImageReference::parse("nginx:").is_err());
        assert!(ImageReference::parse("priv.io/").is_err());
    }

    #[test]
    fn test_with_tag_and_digest() {
        let r = ImageReference::parse("priv.io/library/nginx:1.25").unwrap();
        assert_eq!(r.with_tag("1.25-amd64").to_string(), "priv.io/library/nginx:1.25-amd64");
        assert_eq!(r.with_digest("sha256:aa").to_string(), "priv.io/library/nginx@sha256:aa");
    }

    #[test]
    fn test_with_registry_and_project() {
        let r = ImageReference::parse("nginx:1.25").unwrap();
        let moved = r.with_registry("priv.io").with_project("mirror");
        assert_eq!(moved.to_string(), "priv.io/mirror/nginx:1.25");

        let bare = ImageReference {
            registry: "localhost".to_string(),
            repository: "app".to_string(),
            tag: Some("v1".to_string()),
            digest: None,
        };
        assert_eq!(bare.with_project("team").repository, "team/app");
    }

    #[test]
    fn test_display_and_from_str() {
        let r: ImageReference = "nginx:1.25".parse().unwrap();
        assert_eq!(format!("{}", r), "docker.io/library/nginx:1.25");
        assert_eq!(r.name(), "docker.io/library/nginx");
    }
}
