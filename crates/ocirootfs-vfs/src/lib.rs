//! Read-only filesystem views used to assemble an image root filesystem.
//!
//! This crate implements the filesystem layer: the `Filesystem` trait with
//! POSIX-style path resolution (symlinks followed in intermediate components),
//! `TarFs` exposing a tar archive on disk as a random-access tree, and
//! `OverlayFs` merging an ordered stack of filesystems with OCI whiteout
//! semantics behind the `OverlayEngine` trait.

pub mod fs;
pub mod overlay;
pub mod tarfs;

pub use fs::{normalize, walk, DirEntry, FileKind, Filesystem, Metadata, MAX_SYMLINK_HOPS};
pub use overlay::{
    DefaultOverlay, EmptyRoot, OverlayEngine, OverlayFs, OPAQUE_MARKER, WHITEOUT_PREFIX,
};
pub use tarfs::TarFs;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("{}: no such file or directory", .0.display())]
    NotFound(PathBuf),
    #[error("{}: not a directory", .0.display())]
    NotADirectory(PathBuf),
    #[error("{}: not a regular file", .0.display())]
    NotAFile(PathBuf),
    #[error("{}: not a symbolic link", .0.display())]
    NotASymlink(PathBuf),
    #[error("{}: too many levels of symbolic links", .0.display())]
    SymlinkLoop(PathBuf),
    #[error("invalid tar archive: {0}")]
    InvalidArchive(String),
    #[error("overlay requires at least one layer")]
    EmptyOverlay,
    #[error("filesystem has already been released")]
    Released,
    #[error("filesystem I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FsError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
