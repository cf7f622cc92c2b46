// crates/boomi-core/src/files.rs
use std::path::{Path, PathBuf};

use glob::glob;
use tracing::debug;

use crate::error::{PipelineError, Result};

/// A directory standing in for a remote share (SFTP drop, export mount).
#[derive(Debug, Clone)]
pub struct FileStore {
    name: String,
    root: PathBuf,
}

impl FileStore {
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Self {
        Self {
            name: name.into(),
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    pub async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path);
        debug!(store = %self.name, path = %full.display(), "reading file");
        tokio::fs::read(&full)
            .await
            .map_err(|err| PipelineError::file(full.display().to_string(), err))
    }

    /// Replaces the file at `path`, creating parent directories.
    pub async fn write(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| PipelineError::file(parent.display().to_string(), err))?;
        }
        debug!(store = %self.name, path = %full.display(), bytes = bytes.len(), "writing file");
        tokio::fs::write(&full, bytes)
            .await
            .map_err(|err| PipelineError::file(full.display().to_string(), err))
    }

    /// Files under the root matching `pattern`, relative to the root, sorted.
    pub fn list(&self, pattern: &str) -> Result<Vec<String>> {
        let full_pattern = self.resolve(pattern);
        let mut matches = Vec::new();
        for entry in glob(&full_pattern.to_string_lossy())? {
            let path = match entry {
                Ok(path) => path,
                Err(err) => {
                    debug!(store = %self.name, error = %err, "skipping unreadable glob entry");
                    continue;
                }
            };
            if !path.is_file() {
                continue;
            }
            if let Ok(relative) = path.strip_prefix(&self.root) {
                matches.push(relative.to_string_lossy().into_owned());
            }
        }
        matches.sort();
        Ok(matches)
    }
}
