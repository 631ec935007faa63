//! Image list files.
//!
//! Two line formats are accepted:
//!
//! - default: `REGISTRY/PROJECT/NAME:TAG`
//! - mirror:  `SOURCE DESTINATION TAG` (whitespace separated)
//!
//! Blank lines and lines starting with `#` or `//` are ignored.

use std::path::Path;

use a3s_mirror_core::error::{MirrorError, Result};
use a3s_mirror_runtime::ImageReference;

/// One parsed image list line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageLine {
    Default(ImageReference),
    Mirror {
        source: ImageReference,
        destination: ImageReference,
        tag: String,
    },
}

impl ImageLine {
    /// Source repository and tag.
    pub fn source(&self) -> (&ImageReference, &str) {
        match self {
            ImageLine::Default(r) => (r, r.tag.as_deref().unwrap_or("latest")),
            ImageLine::Mirror { source, tag, .. } => (source, tag),
        }
    }
}

/// A non-comment line and its parse result.
#[derive(Debug)]
pub struct ListEntry {
    pub line: String,
    pub parsed: Result<ImageLine>,
}

fn is_comment(line: &str) -> bool {
    line.starts_with('#') || line.starts_with("//")
}

/// Parse one line; `None` for blank and comment lines.
pub fn parse_line(line: &str) -> Option<Result<ImageLine>> {
    let line = line.trim();
    if line.is_empty() || is_comment(line) {
        return None;
    }
    let fields: Vec<&str> = line.split_whitespace().collect();
    let parsed = match fields.as_slice() {
        [reference] => ImageReference::parse(reference).and_then(|r| {
            if r.digest.is_some() {
                return Err(MirrorError::InvalidUnit(format!(
                    "digest references cannot be mirrored by tag: '{}'",
                    line
                )));
            }
            Ok(ImageLine::Default(r))
        }),
        [source, destination, tag] => {
            let source = ImageReference::parse(source);
            let destination = ImageReference::parse(destination);
            source.and_then(|source| {
                destination.map(|destination| ImageLine::Mirror {
                    source,
                    destination,
                    tag: tag.to_string(),
                })
            })
        }
        _ => Err(MirrorError::InvalidUnit(format!(
            "expected 'IMAGE:TAG' or 'SOURCE DESTINATION TAG', got '{}'",
            line
        ))),
    };
    Some(parsed)
}

/// Parse every line of a list.
pub fn parse_list(content: &str) -> Vec<ListEntry> {
    content
        .lines()
        .filter_map(|line| {
            parse_line(line).map(|parsed| ListEntry {
                line: line.trim().to_string(),
                parsed,
            })
        })
        .collect()
}

/// Read and parse a list file.
pub fn read_list(path: &Path) -> Result<Vec<ListEntry>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        MirrorError::Config(format!("failed to read image list {}: {}", path.display(), e))
    })?;
    Ok(parse_list(&content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skips_blank_and_comment_lines() {
        let entries = parse_list("\n# comment\n// also comment\n   \nnginx:1.25\n");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].line, "nginx:1.25");
    }

    #[test]
    fn test_default_format() {
        let parsed = parse_line("docker.io/rancher/rancher:v2.8.0").unwrap().unwrap();
        let (source, tag) = parsed.source();
        assert_eq!(source.name(), "docker.io/rancher/rancher");
        assert_eq!(tag, "v2.8.0");
    }

    #[test]
    fn test_default_format_without_tag_is_latest() {
        let parsed = parse_line("busybox").unwrap().unwrap();
        assert_eq!(parsed.source().1, "latest");
    }

    #[test]
    fn test_mirror_format() {
        let parsed = parse_line("docker.io/library/nginx  priv.io/mirror/nginx\t1.25")
            .unwrap()
            .unwrap();
        match parsed {
            ImageLine::Mirror { source, destination, tag } => {
                assert_eq!(source.name(), "docker.io/library/nginx");
                assert_eq!(destination.name(), "priv.io/mirror/nginx");
                assert_eq!(tag, "1.25");
            }
            other => panic!("unexpected line: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_lines_are_errors() {
        assert!(parse_line("a b").unwrap().is_err());
        assert!(parse_line("nginx@sha256:abc").unwrap().is_err());
        assert!(parse_line("nginx: src 1").unwrap().is_err());

        let entries = parse_list("nginx:1.25\na b c d\n");
        assert_eq!(entries.len(), 2);
        assert!(entries[1].parsed.is_err());
    }
}
