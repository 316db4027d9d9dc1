//! Root filesystem resolution for OCI image layouts.
//!
//! This crate ties the schema, store, and filesystem crates together into the
//! loading pipeline: layout version check, manifest resolution through the
//! top-level and nested indexes (`resolve`), per-layer materialization into a
//! scratch directory (`layer`), and assembly of the layers into one overlay
//! view with a single release action (`assemble`, `rootfs`). `ImageLoader`
//! runs the whole pipeline with injectable collaborators.

pub mod assemble;
pub mod config;
pub mod layer;
pub mod loader;
pub mod resolve;
pub mod rootfs;

pub use assemble::{assemble, ReleaseStack};
pub use config::LoaderConfig;
pub use layer::{Layer, LayerStage, Materializer};
pub use loader::{load_image, ImageLoader};
pub use resolve::{resolve_manifest, ManifestTarget, ResolvedImage};
pub use rootfs::RootFilesystem;

use ocirootfs_schema::{Digest, MediaType};
use ocirootfs_store::StoreError;
use ocirootfs_vfs::FsError;
use std::fmt;
use thiserror::Error;

/// Broad failure classes every `CoreError` falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unsupported layout version, unexpected media type, corrupt JSON or payload.
    Format,
    /// Missing blob, unknown reference, no manifest for the platform.
    NotFound,
    /// More than one candidate and nothing to choose between them.
    Ambiguous,
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Format => "format",
            Self::NotFound => "not-found",
            Self::Ambiguous => "ambiguous",
            Self::Io => "io",
        })
    }
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Fs(#[from] FsError),
    #[error("no manifests found in index.json")]
    EmptyIndex,
    #[error("index.json lists {count} images; a reference must be specified")]
    AmbiguousReference { count: usize },
    #[error("no manifest found for ref '{0}'")]
    ReferenceNotFound(String),
    #[error("image index {digest} contains no manifests")]
    EmptyImageIndex { digest: Digest },
    #[error("no manifest found for platform {platform} in image index {digest}")]
    PlatformNotFound { platform: String, digest: Digest },
    #[error("platform {requested} is not present in image {digest} (declared: {declared})")]
    PlatformMismatch {
        requested: String,
        declared: String,
        digest: Digest,
    },
    #[error("unexpected manifest media type {media_type} for {digest}")]
    UnexpectedMediaType { media_type: MediaType, digest: Digest },
    #[error("layer {digest}: failed to {stage}: {source}")]
    Layer {
        digest: Digest,
        stage: LayerStage,
        #[source]
        source: Box<CoreError>,
    },
    #[error("corrupt compressed payload: {0}")]
    CorruptPayload(#[source] std::io::Error),
    #[error("failed to create overlay filesystem: {0}")]
    Compose(#[source] FsError),
    #[error("failed to release {label}: {source}")]
    Release {
        label: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{primary} (cleanup also failed: {cleanup})")]
    Cleanup {
        primary: Box<CoreError>,
        cleanup: Box<CoreError>,
    },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Store(e) => store_kind(e),
            Self::Fs(e) | Self::Compose(e) => fs_kind(e),
            Self::EmptyIndex
            | Self::ReferenceNotFound(_)
            | Self::EmptyImageIndex { .. }
            | Self::PlatformNotFound { .. }
            | Self::PlatformMismatch { .. } => ErrorKind::NotFound,
            Self::AmbiguousReference { .. } => ErrorKind::Ambiguous,
            Self::UnexpectedMediaType { .. } | Self::CorruptPayload(_) | Self::Config(_) => {
                ErrorKind::Format
            }
            Self::Layer { source, .. } => source.kind(),
            Self::Cleanup { primary, .. } => primary.kind(),
            Self::Release { .. } | Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Attach a failure that happened while cleaning up after `self`.
    #[must_use]
    pub fn with_cleanup(self, cleanup: CoreError) -> Self {
        Self::Cleanup {
            primary: Box::new(self),
            cleanup: Box::new(cleanup),
        }
    }
}

fn store_kind(e: &StoreError) -> ErrorKind {
    match e {
        StoreError::Io(_) | StoreError::Read { .. } => ErrorKind::Io,
        StoreError::DocumentNotFound { .. } | StoreError::BlobNotFound { .. } => {
            ErrorKind::NotFound
        }
        StoreError::UnsupportedLayoutVersion { .. }
        | StoreError::Schema(_)
        | StoreError::UnsupportedCompression(_)
        | StoreError::IntegrityFailure { .. }
        | StoreError::SizeMismatch { .. }
        | StoreError::UnsupportedAlgorithm(_) => ErrorKind::Format,
    }
}

fn fs_kind(e: &FsError) -> ErrorKind {
    match e {
        FsError::NotFound(_) => ErrorKind::NotFound,
        FsError::InvalidArchive(_) | FsError::EmptyOverlay => ErrorKind::Format,
        FsError::NotADirectory(_)
        | FsError::NotAFile(_)
        | FsError::NotASymlink(_)
        | FsError::SymlinkLoop(_)
        | FsError::Released
        | FsError::Io(_) => ErrorKind::Io,
    }
}
