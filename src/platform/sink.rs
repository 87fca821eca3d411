//! Writing finished images to disk.

use anyhow::Context;
use async_trait::async_trait;
use std::path::PathBuf;

use super::OutputSink;

/// Writes to `path`, or into it under the delivered filename when `path`
/// is a directory.
#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn destination(&self, filename: &str) -> PathBuf {
        if self.path.is_dir() {
            self.path.join(filename)
        } else {
            self.path.clone()
        }
    }
}

#[async_trait]
impl OutputSink for FileSink {
    async fn deliver(&self, bytes: &[u8], filename: &str) -> anyhow::Result<()> {
        let dest = self.destination(filename);
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&dest, bytes)
            .await
            .with_context(|| format!("Failed to write {}", dest.display()))?;
        log::info!("[CAPTURE] Saved {} bytes to {}", bytes.len(), dest.display());
        Ok(())
    }
}
