//! Failure list file.
//!
//! One failed unit per line, in a format that can be fed back as input.
//! The file is truncated when the run starts, so it always exists and only
//! describes the current run.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Append-only failure list shared by all workers.
pub struct FailedList {
    path: PathBuf,
    file: Mutex<File>,
    lines: AtomicUsize,
}

impl FailedList {
    /// Create (or truncate) the failure file.
    pub async fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = File::create(path)
            .await
            .with_context(|| format!("failed to open failure file {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            lines: AtomicUsize::new(0),
        })
    }

    /// Append one line and flush it to disk.
    pub async fn append(&self, line: &str) -> Result<()> {
        let mut file = self.file.lock().await;
        let mut buf = line.trim_end_matches('\n').to_string();
        buf.push('\n');
        file.write_all(buf.as_bytes())
            .await
            .with_context(|| format!("failed to write failure file {}", self.path.display()))?;
        file.flush().await?;
        self.lines.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Lines written so far.
    pub fn len(&self) -> usize {
        self.lines.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
