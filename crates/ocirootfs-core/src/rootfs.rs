use crate::assemble::ReleaseStack;
use crate::CoreError;
use ocirootfs_vfs::{DirEntry, Filesystem, FsError, Metadata};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// The composed root filesystem of one image.
///
/// Owns every layer's open archive and temporary artifact until `release`.
/// After release all filesystem operations fail with `FsError::Released`.
pub struct RootFilesystem {
    fs: Option<Box<dyn Filesystem>>,
    releases: ReleaseStack,
    layers: usize,
}

impl RootFilesystem {
    pub(crate) fn new(fs: Box<dyn Filesystem>, releases: ReleaseStack, layers: usize) -> Self {
        Self {
            fs: Some(fs),
            releases,
            layers,
        }
    }

    pub fn layer_count(&self) -> usize {
        self.layers
    }

    pub fn is_released(&self) -> bool {
        self.fs.is_none()
    }

    /// Close every layer, then delete every temporary artifact. All actions
    /// run even if one fails; the first failure is returned.
    ///
    /// Calling this again after it returned is a no-op.
    pub fn release(&mut self) -> Result<(), CoreError> {
        let Some(fs) = self.fs.take() else {
            return Ok(());
        };
        drop(fs);
        debug!("releasing root filesystem ({} layers)", self.layers);
        self.releases.unwind()
    }

    fn inner(&self) -> Result<&dyn Filesystem, FsError> {
        self.fs.as_deref().ok_or(FsError::Released)
    }
}

impl std::fmt::Debug for RootFilesystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootFilesystem")
            .field("layers", &self.layers)
            .field("released", &self.is_released())
            .finish_non_exhaustive()
    }
}

impl Filesystem for RootFilesystem {
    fn entry_metadata(&self, path: &Path) -> Result<Metadata, FsError> {
        self.inner()?.entry_metadata(path)
    }

    fn entry_read_link(&self, path: &Path) -> Result<PathBuf, FsError> {
        self.inner()?.entry_read_link(path)
    }

    fn entry_read_dir(&self, path: &Path) -> Result<Vec<DirEntry>, FsError> {
        self.inner()?.entry_read_dir(path)
    }

    fn entry_open(&self, path: &Path) -> Result<Box<dyn Read + '_>, FsError> {
        self.inner()?.entry_open(path)
    }
}

impl Drop for RootFilesystem {
    fn drop(&mut self) {
        if self.fs.is_some() {
            warn!("root filesystem dropped without release; releasing now");
            if let Err(e) = self.release() {
                warn!("release on drop failed: {e}");
            }
        }
    }
}
