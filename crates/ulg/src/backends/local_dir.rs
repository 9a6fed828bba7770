//! 📂 Local directory source: `chat_logs/`, `chat_logs_processed/` and `chat_logs_error/`
//! as sibling directories under one root. "It's just a directory", said no sysadmin
//! ever before the disk filled up.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::trace;

use crate::backends::{IngestionSource, is_ingestion_file};
use crate::lifecycle::{FileLocation, FileRef};

#[derive(Debug, Clone)]
pub struct LocalDirSource {
    root: PathBuf,
}

impl LocalDirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir(&self, location: FileLocation) -> PathBuf {
        self.root.join(location.prefix())
    }

    fn path_of(&self, location: FileLocation, name: &str) -> PathBuf {
        self.dir(location).join(name)
    }
}

#[async_trait]
impl IngestionSource for LocalDirSource {
    async fn list_pending(&self) -> Result<Vec<FileRef>> {
        let the_dir = self.dir(FileLocation::Pending);
        let mut the_entries = match tokio::fs::read_dir(&the_dir).await {
            Ok(entries) => entries,
            // -- 💤 no pending directory means nothing pending. not a crisis, just a quiet day.
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("💀 Couldn't list '{}'. The directory exists, but won't talk to us.", the_dir.display())
                });
            }
        };

        let mut the_files = Vec::new();
        while let Some(entry) = the_entries
            .next_entry()
            .await
            .with_context(|| format!("💀 Listing '{}' stopped halfway through", the_dir.display()))?
        {
            let metadata = entry.metadata().await?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !metadata.is_file() || !is_ingestion_file(&name) {
                trace!("🙈 skipping '{}' in pending, not an ingestion file", name);
                continue;
            }
            the_files.push(FileRef {
                size_bytes: metadata.len(),
                ..FileRef::pending(name)
            });
        }
        // 📋 deterministic order. the workers don't care, but humans reading logs do.
        the_files.sort();
        Ok(the_files)
    }

    async fn read(&self, file: &FileRef) -> Result<Vec<u8>> {
        let the_path = self.path_of(file.location, &file.name);
        tokio::fs::read(&the_path).await.with_context(|| {
            format!(
                "💀 The door to '{}' would not budge. It might not exist. Permissions might be wrong. The file remains unread.",
                the_path.display()
            )
        })
    }

    async fn write(&self, location: FileLocation, name: &str, contents: Vec<u8>) -> Result<FileRef> {
        let the_dir = self.dir(location);
        tokio::fs::create_dir_all(&the_dir)
            .await
            .with_context(|| format!("💀 Couldn't create '{}'", the_dir.display()))?;
        let size_bytes = contents.len() as u64;
        let the_path = the_dir.join(name);
        tokio::fs::write(&the_path, contents)
            .await
            .with_context(|| format!("💀 Couldn't write '{}'", the_path.display()))?;
        Ok(FileRef {
            name: name.to_string(),
            location,
            size_bytes,
        })
    }

    async fn exists(&self, location: FileLocation, name: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.path_of(location, name)).await?)
    }

    async fn relocate(&self, file: &FileRef, to: FileLocation) -> Result<FileRef> {
        let the_target_dir = self.dir(to);
        tokio::fs::create_dir_all(&the_target_dir)
            .await
            .with_context(|| format!("💀 Couldn't create '{}'", the_target_dir.display()))?;
        let from = self.path_of(file.location, &file.name);
        let to_path = the_target_dir.join(&file.name);
        tokio::fs::rename(&from, &to_path).await.with_context(|| {
            format!("💀 Couldn't move '{}' to '{}'", from.display(), to_path.display())
        })?;
        Ok(file.moved_to(to))
    }

    async fn remove(&self, file: &FileRef) -> Result<()> {
        let the_path = self.path_of(file.location, &file.name);
        match tokio::fs::remove_file(&the_path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("💀 Couldn't remove '{}'", the_path.display())),
        }
    }
}
