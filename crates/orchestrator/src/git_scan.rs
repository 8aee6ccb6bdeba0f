use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use evgate_protocol::SafetyReport;
use tokio::process::Command;

use crate::ports::SafetyScanner;

/// Changed or untracked files above this size are flagged for review.
pub const DEFAULT_LARGE_FILE_BYTES: u64 = 500 * 1024;

/// [`SafetyScanner`] backed by `git status` in a working tree.
#[derive(Debug, Clone)]
pub struct GitStatusScanner {
    root: PathBuf,
    large_file_bytes: u64,
}

impl GitStatusScanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            large_file_bytes: DEFAULT_LARGE_FILE_BYTES,
        }
    }

    #[must_use]
    pub const fn with_large_file_bytes(mut self, bytes: u64) -> Self {
        self.large_file_bytes = bytes;
        self
    }
}

#[async_trait]
impl SafetyScanner for GitStatusScanner {
    async fn scan(&self) -> Result<SafetyReport> {
        let output = Command::new("git")
            .arg("status")
            .arg("--porcelain=v1")
            .arg("-z")
            // List files inside new directories instead of a single `dir/` entry.
            .arg("--untracked-files=all")
            .current_dir(&self.root)
            .output()
            .await
            .with_context(|| format!("Failed to run git status in {}", self.root.display()))?;
        if !output.status.success() {
            anyhow::bail!(
                "git status failed in {}: {}",
                self.root.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let status = parse_porcelain(&String::from_utf8_lossy(&output.stdout));
        let large_files = large_files(&self.root, status.touched(), self.large_file_bytes).await;
        log::debug!(
            "git scan: dirty={} untracked={} large={}",
            status.dirty,
            status.untracked.len(),
            large_files.len()
        );

        Ok(SafetyReport {
            dirty: status.dirty,
            untracked: status.untracked,
            large_files: Some(large_files),
        })
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct PorcelainStatus {
    dirty: bool,
    changed: Vec<String>,
    untracked: Vec<String>,
}

impl PorcelainStatus {
    fn touched(&self) -> impl Iterator<Item = &str> {
        self.changed
            .iter()
            .chain(self.untracked.iter())
            .map(String::as_str)
    }
}

/// Parses `git status --porcelain=v1 -z`. Tracked changes make the tree dirty;
/// untracked files are listed but do not.
fn parse_porcelain(raw: &str) -> PorcelainStatus {
    let mut status = PorcelainStatus::default();
    let mut entries = raw.split('\0').filter(|e| !e.is_empty());
    while let Some(entry) = entries.next() {
        if entry.len() < 4 {
            continue;
        }
        let (code, path) = entry.split_at(3);
        let code = code.trim_end();
        if code == "??" {
            status.untracked.push(path.to_string());
            continue;
        }
        if code == "!!" {
            continue;
        }
        status.dirty = true;
        status.changed.push(path.to_string());
        // Renames and copies carry the source path as a separate entry.
        if code.starts_with('R') || code.starts_with('C') {
            entries.next();
        }
    }
    status
}

async fn large_files<'a>(
    root: &Path,
    paths: impl Iterator<Item = &'a str>,
    threshold: u64,
) -> Vec<String> {
    let mut out = Vec::new();
    for rel in paths {
        let Ok(meta) = tokio::fs::metadata(root.join(rel)).await else {
            continue;
        };
        if meta.is_file() && meta.len() > threshold {
            out.push(rel.to_string());
        }
    }
    out
}
