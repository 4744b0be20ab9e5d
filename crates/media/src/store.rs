//! Content-addressed artifact storage.

use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use {
    sha2::{Digest, Sha256},
    tracing::debug,
};

use crate::{error::Result, format::ImageKind};

/// Distinguishes temp files of concurrent writers in one process.
static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// A file written (or found) by [`ArtifactStore::persist`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub path: PathBuf,
    pub content_hash: String,
    pub byte_size: u64,
    /// The same content was already on disk and nothing was written.
    pub existed: bool,
}

/// Directory of images named `<sha256>.<ext>`.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, content_hash: &str, kind: ImageKind) -> PathBuf {
        self.root.join(format!("{content_hash}.{}", kind.extension()))
    }

    /// Write `bytes` under their content hash unless that file already exists.
    pub async fn persist(&self, bytes: &[u8], kind: ImageKind) -> Result<StoredFile> {
        let content_hash = content_hash(bytes);
        let path = self.path_for(&content_hash, kind);
        let byte_size = bytes.len() as u64;

        if tokio::fs::try_exists(&path).await? {
            debug!(path = %path.display(), "artifact already stored");
            return Ok(StoredFile {
                path,
                content_hash,
                byte_size,
                existed: true,
            });
        }

        tokio::fs::create_dir_all(&self.root).await?;
        let tmp = self.root.join(format!(
            ".{content_hash}.{}.{}.part",
            std::process::id(),
            TEMP_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        tokio::fs::write(&tmp, bytes).await?;

        // A concurrent writer of the same bytes may have landed first.
        let existed = match tokio::fs::rename(&tmp, &path).await {
            Ok(()) => false,
            Err(e) => {
                let _ = tokio::fs::remove_file(&tmp).await;
                if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    return Err(e.into());
                }
                debug!(path = %path.display(), "artifact stored by a concurrent writer");
                true
            },
        };

        debug!(path = %path.display(), bytes = byte_size, "artifact stored");
        Ok(StoredFile {
            path,
            content_hash,
            byte_size,
            existed,
        })
    }
}

/// Lowercase hex SHA-256.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Directory name for grouping a prompt's images: lowercase words joined by
/// `-`, at most 60 characters.
pub fn prompt_dir_name(prompt: &str) -> String {
    let mut out = String::new();
    for word in prompt
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let word = word.to_lowercase();
        let sep = usize::from(!out.is_empty());
        if out.chars().count() + sep + word.chars().count() > 60 {
            break;
        }
        if sep == 1 {
            out.push('-');
        }
        out.push_str(&word);
    }
    if out.is_empty() {
        "untitled".to_string()
    } else {
        out
    }
}
