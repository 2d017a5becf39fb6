//! Native file store using tokio::fs.

use async_trait::async_trait;
use ring_core::store::{validate_name, FileStore, Result, StoreError};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

fn io_error(context: impl std::fmt::Display, e: std::io::Error) -> StoreError {
    if e.kind() == ErrorKind::NotFound {
        StoreError::NotFound(context.to_string())
    } else {
        StoreError::Io(format!("{}: {}", context, e))
    }
}

/// Store directory on the local disk
pub struct NativeStore {
    dir: PathBuf,
}

impl NativeStore {
    /// Open (creating if needed) the store directory.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_error(dir.display(), e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn full_path(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.dir.join(name))
    }
}

#[async_trait]
impl FileStore for NativeStore {
    async fn import(&self, source: &str, name: &str) -> Result<()> {
        let target = self.full_path(name)?;
        fs::copy(source, &target)
            .await
            .map_err(|e| io_error(source, e))?;
        Ok(())
    }

    async fn export(&self, name: &str, dest: &str) -> Result<()> {
        let source = self.full_path(name)?;
        if let Some(parent) = Path::new(dest).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| io_error(parent.display(), e))?;
            }
        }
        fs::copy(&source, dest)
            .await
            .map_err(|e| io_error(name, e))?;
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<bool> {
        let path = self.full_path(name)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(name, e)),
        }
    }

    async fn contains(&self, name: &str) -> Result<bool> {
        let path = self.full_path(name)?;
        fs::try_exists(&path).await.map_err(|e| io_error(name, e))
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut dir = fs::read_dir(&self.dir)
            .await
            .map_err(|e| io_error(self.dir.display(), e))?;

        let mut names = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| io_error(self.dir.display(), e))?
        {
            let is_file = entry
                .file_type()
                .await
                .map(|t| t.is_file())
                .unwrap_or(false);
            if is_file {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn path_of(&self, name: &str) -> String {
        self.dir.join(name).display().to_string()
    }
}
