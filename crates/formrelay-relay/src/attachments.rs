//! Attachment resolution: from a file id to a readable local path.
//!
//! The host's media registry only knows where a file was first stored. After
//! upload, files are moved into a private directory, so the resolver keeps
//! nothing from the stored path but its base name and re-roots it under the
//! configured attachment directory.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Mode applied by [`FixedModePermissions`]
pub const READABLE_MODE: u32 = 0o644;

/// Media registry lookup: file id to originally stored absolute path
#[async_trait]
pub trait AttachmentIndex: Send + Sync {
    async fn stored_path(&self, file_id: i64) -> Option<PathBuf>;
}

/// Capability that makes a resolved file readable by the relay process
pub trait PermissionNormalizer: Send + Sync {
    fn ensure_readable(&self, path: &Path) -> io::Result<()>;
}

/// Leaves permissions untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPermissions;

impl PermissionNormalizer for NoopPermissions {
    fn ensure_readable(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }
}

/// chmods files to a fixed mode (0644 by default)
#[derive(Debug, Clone, Copy)]
pub struct FixedModePermissions {
    mode: u32,
}

impl FixedModePermissions {
    pub fn new(mode: u32) -> Self {
        Self { mode }
    }
}

impl Default for FixedModePermissions {
    fn default() -> Self {
        Self::new(READABLE_MODE)
    }
}

impl PermissionNormalizer for FixedModePermissions {
    #[cfg(unix)]
    fn ensure_readable(&self, path: &Path) -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(self.mode))
    }

    #[cfg(not(unix))]
    fn ensure_readable(&self, path: &Path) -> io::Result<()> {
        let mut permissions = std::fs::metadata(path)?.permissions();
        permissions.set_readonly(false);
        std::fs::set_permissions(path, permissions)
    }
}

/// Attachment index backed by a JSON map of file id to stored path
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManifestAttachmentIndex {
    entries: HashMap<i64, PathBuf>,
}

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Failed to read attachment manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid attachment manifest {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl ManifestAttachmentIndex {
    pub fn from_entries<I, P>(entries: I) -> Self
    where
        I: IntoIterator<Item = (i64, P)>,
        P: Into<PathBuf>,
    {
        Self {
            entries: entries.into_iter().map(|(id, p)| (id, p.into())).collect(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ManifestError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let index: Self = serde_json::from_str(&raw).map_err(|source| ManifestError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(
            "Loaded {} attachment entries from {}",
            index.entries.len(),
            path.display()
        );
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl AttachmentIndex for ManifestAttachmentIndex {
    async fn stored_path(&self, file_id: i64) -> Option<PathBuf> {
        self.entries.get(&file_id).cloned()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("No stored path for attachment {0}")]
    UnknownAttachment(i64),

    #[error("Stored path {path} of attachment {file_id} has no file name")]
    InvalidFileName { file_id: i64, path: PathBuf },

    #[error("Attachment not found or not readable: {0}")]
    NotFound(PathBuf),
}

/// An attachment reference paired with its verified local path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedAttachment {
    pub path: PathBuf,
    pub document_type: String,
}

/// Locates attachments under `attachment_dir`
#[derive(Clone)]
pub struct AttachmentResolver {
    attachment_dir: PathBuf,
    index: Arc<dyn AttachmentIndex>,
    permissions: Arc<dyn PermissionNormalizer>,
}

impl AttachmentResolver {
    pub fn new(
        attachment_dir: PathBuf,
        index: Arc<dyn AttachmentIndex>,
        permissions: Arc<dyn PermissionNormalizer>,
    ) -> Self {
        Self {
            attachment_dir,
            index,
            permissions,
        }
    }

    /// Resolve a file id to a readable path under the attachment directory
    pub async fn resolve(&self, file_id: i64) -> Result<PathBuf, ResolveError> {
        let stored = self
            .index
            .stored_path(file_id)
            .await
            .ok_or(ResolveError::UnknownAttachment(file_id))?;

        let file_name = stored
            .file_name()
            .ok_or_else(|| ResolveError::InvalidFileName {
                file_id,
                path: stored.clone(),
            })?;

        let path = self.attachment_dir.join(file_name);

        if tokio::fs::metadata(&path).await.is_err() {
            return Err(ResolveError::NotFound(path));
        }

        match self.permissions.ensure_readable(&path) {
            Ok(()) => debug!("Permissions normalized for {}", path.display()),
            Err(e) => warn!("Could not change permissions of {}: {}", path.display(), e),
        }

        if !is_readable_file(&path).await {
            return Err(ResolveError::NotFound(path));
        }

        Ok(path)
    }
}

async fn is_readable_file(path: &Path) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => tokio::fs::File::open(path).await.is_ok(),
        _ => false,
    }
}
