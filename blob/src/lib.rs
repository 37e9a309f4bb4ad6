//! Opaque per-device blobs: display image, thumbnail and info text.
//!
//! ## Layout
//!
//! ```text
//! <root>/{device_id}/
//!   display.bin     raw frame buffer pushed to the panel
//!   thumbnail.png   preview shown in the portal
//!   info.txt        free-form device report
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};

/// Errors from the blob layer.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid device id: {0:?}")]
    InvalidDeviceId(String),
}

/// Which blob of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlobKind {
    DisplayImage,
    Thumbnail,
    Info,
}

impl BlobKind {
    pub fn file_name(self) -> &'static str {
        match self {
            Self::DisplayImage => "display.bin",
            Self::Thumbnail => "thumbnail.png",
            Self::Info => "info.txt",
        }
    }
}

/// Storage for the per-device blobs.
pub trait BlobStore: Send + Sync {
    /// `None` when nothing has been stored yet.
    fn get_blob(&self, device_id: &str, kind: BlobKind) -> Result<Option<Vec<u8>>, BlobError>;

    /// Replace the blob.
    fn put_blob(&self, device_id: &str, kind: BlobKind, data: &[u8]) -> Result<(), BlobError>;
}

/// One directory per device under a common root.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Create the root directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, BlobError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn device_dir(&self, device_id: &str) -> Result<PathBuf, BlobError> {
        validate_device_id(device_id)?;
        Ok(self.root.join(device_id))
    }

    /// Atomically write `data` to `path` via a uniquely named sibling, so
    /// concurrent writers of the same blob never share a temp file.
    fn atomic_write(&self, path: &Path, data: &[u8]) -> Result<(), BlobError> {
        let dir = path.parent().unwrap_or(&self.root);
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl BlobStore for FsBlobStore {
    fn get_blob(&self, device_id: &str, kind: BlobKind) -> Result<Option<Vec<u8>>, BlobError> {
        let path = self.device_dir(device_id)?.join(kind.file_name());
        match std::fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put_blob(&self, device_id: &str, kind: BlobKind, data: &[u8]) -> Result<(), BlobError> {
        let dir = self.device_dir(device_id)?;
        std::fs::create_dir_all(&dir)?;
        self.atomic_write(&dir.join(kind.file_name()), data)?;
        tracing::debug!(?kind, len = data.len(), "Blob stored");
        Ok(())
    }
}

/// A device id must name exactly one directory below the root.
fn validate_device_id(device_id: &str) -> Result<(), BlobError> {
    let bad = device_id.is_empty()
        || device_id == "."
        || device_id.contains("..")
        || device_id.contains(['/', '\\', '\0']);
    if bad {
        return Err(BlobError::InvalidDeviceId(device_id.to_string()));
    }
    Ok(())
}
