//! Read-only access to an OCI image layout on disk.
//!
//! This crate provides the storage layer: `ImageLayout` for the
//! content-addressed blob scheme and the two top-level documents (with the
//! layout version gate), `AutoDecompressor` for sniffing and streaming
//! compressed layer blobs, and digest verification of blobs against their
//! descriptors. With the `test-support` feature it also exposes
//! `fixture::LayoutFixture` for writing synthetic layouts.

pub mod compression;
#[cfg(any(test, feature = "test-support"))]
pub mod fixture;
pub mod integrity;
pub mod layout;

pub use compression::{AutoDecompressor, Compression, Decompressor};
pub use integrity::{verify_blob, verify_descriptors, IntegrityFailure, IntegrityReport};
pub use layout::{ImageLayout, SUPPORTED_LAYOUT_VERSION};

use ocirootfs_schema::{Digest, SchemaError};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{document} not found at {}", path.display())]
    DocumentNotFound { document: String, path: PathBuf },
    #[error("blob {digest} not found at {}", path.display())]
    BlobNotFound { digest: Digest, path: PathBuf },
    #[error("unsupported image layout version: {found} (expected {expected})")]
    UnsupportedLayoutVersion { expected: String, found: String },
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("unrecognized compression format (leading bytes {0})")]
    UnsupportedCompression(String),
    #[error("integrity check failed for {digest}: got {actual}")]
    IntegrityFailure { digest: Digest, actual: String },
    #[error("size mismatch for {digest}: descriptor says {expected} bytes, blob has {actual}")]
    SizeMismatch {
        digest: Digest,
        expected: u64,
        actual: u64,
    },
    #[error("cannot verify digest algorithm '{0}'")]
    UnsupportedAlgorithm(String),
}
