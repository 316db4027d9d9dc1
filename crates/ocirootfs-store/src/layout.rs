use crate::StoreError;
use ocirootfs_schema::{decode, Descriptor, Digest, Index, Manifest, OciLayout};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use tracing::debug;

/// The only image layout version this implementation reads.
pub const SUPPORTED_LAYOUT_VERSION: &str = "1.0.0";
const OCI_LAYOUT_FILE: &str = "oci-layout";
const INDEX_FILE: &str = "index.json";

/// Directory layout of an OCI image on disk.
///
/// Resolves the content-addressed blob scheme (`blobs/<algorithm>/<encoded>`)
/// and the two named top-level documents. Nothing is ever written back.
#[derive(Debug, Clone)]
pub struct ImageLayout {
    root: PathBuf,
}

impl ImageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn oci_layout_path(&self) -> PathBuf {
        self.root.join(OCI_LAYOUT_FILE)
    }

    #[inline]
    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    #[inline]
    pub fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.root.join(digest.blob_path())
    }

    /// Open a blob for streaming. A missing blob is `BlobNotFound`.
    pub fn open_blob(&self, digest: &Digest) -> Result<File, StoreError> {
        let path = self.blob_path(digest);
        File::open(&path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                StoreError::BlobNotFound {
                    digest: digest.clone(),
                    path,
                }
            } else {
                StoreError::Read { path, source }
            }
        })
    }

    fn open_document(&self, document: &str, path: PathBuf) -> Result<File, StoreError> {
        File::open(&path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                StoreError::DocumentNotFound {
                    document: document.to_owned(),
                    path,
                }
            } else {
                StoreError::Read { path, source }
            }
        })
    }

    /// Reject layouts that do not declare exactly the supported version.
    pub fn verify_version(&self) -> Result<(), StoreError> {
        let file = self.open_document(OCI_LAYOUT_FILE, self.oci_layout_path())?;
        let layout: OciLayout = decode(OCI_LAYOUT_FILE, BufReader::new(file))?;

        if layout.image_layout_version != SUPPORTED_LAYOUT_VERSION {
            return Err(StoreError::UnsupportedLayoutVersion {
                expected: SUPPORTED_LAYOUT_VERSION.to_owned(),
                found: layout.image_layout_version,
            });
        }
        debug!("image layout version {SUPPORTED_LAYOUT_VERSION} verified");
        Ok(())
    }

    /// Decode the top-level `index.json`.
    pub fn read_index(&self) -> Result<Index, StoreError> {
        let file = self.open_document(INDEX_FILE, self.index_path())?;
        Ok(decode(INDEX_FILE, BufReader::new(file))?)
    }

    /// Decode the nested image index a descriptor points to.
    pub fn read_image_index(&self, descriptor: &Descriptor) -> Result<Index, StoreError> {
        let file = self.open_blob(&descriptor.digest)?;
        Ok(decode(
            &format!("image index {}", descriptor.digest),
            BufReader::new(file),
        )?)
    }

    pub fn read_manifest(&self, descriptor: &Descriptor) -> Result<Manifest, StoreError> {
        let file = self.open_blob(&descriptor.digest)?;
        Ok(decode(
            &format!("manifest {}", descriptor.digest),
            BufReader::new(file),
        )?)
    }
}
