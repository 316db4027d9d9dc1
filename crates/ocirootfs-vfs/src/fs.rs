//! The `Filesystem` trait and POSIX-style path resolution on top of it.
//!
//! Implementors only provide the `entry_*` operations, which address one
//! exact, already-resolved node and never follow symlinks. The provided
//! methods turn arbitrary paths into node paths: `/`, `.` and `..` are
//! handled lexically (`..` clamps at the root), symlinks in intermediate
//! components are always followed, and the final component is followed by
//! `metadata`, `read_dir`, `open` and `read` but not by `symlink_metadata`
//! or `read_link`. The root is the empty path.

use crate::FsError;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

/// Symlink hops allowed while resolving one path.
pub const MAX_SYMLINK_HOPS: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    File,
    Dir,
    Symlink,
    CharDevice,
    BlockDevice,
    Fifo,
}

impl FileKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Dir => "dir",
            Self::Symlink => "symlink",
            Self::CharDevice => "char-device",
            Self::BlockDevice => "block-device",
            Self::Fifo => "fifo",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub kind: FileKind,
    pub mode: u32,
    pub size: u64,
    pub uid: u64,
    pub gid: u64,
    pub mtime: u64,
}

impl Metadata {
    /// A synthesized directory with default permissions.
    pub fn directory() -> Self {
        Self {
            kind: FileKind::Dir,
            mode: 0o755,
            size: 0,
            uid: 0,
            gid: 0,
            mtime: 0,
        }
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Dir
    }

    #[inline]
    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }

    #[inline]
    pub fn is_symlink(&self) -> bool {
        self.kind == FileKind::Symlink
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: OsString,
    pub kind: FileKind,
}

pub trait Filesystem: Send + Sync {
    fn entry_metadata(&self, path: &Path) -> Result<Metadata, FsError>;

    fn entry_read_link(&self, path: &Path) -> Result<PathBuf, FsError>;

    /// Children of a directory node, sorted by name.
    fn entry_read_dir(&self, path: &Path) -> Result<Vec<DirEntry>, FsError>;

    fn entry_open(&self, path: &Path) -> Result<Box<dyn Read + '_>, FsError>;

    fn metadata(&self, path: &Path) -> Result<Metadata, FsError> {
        let node = resolve(self, path, true)?;
        self.entry_metadata(&node)
    }

    fn symlink_metadata(&self, path: &Path) -> Result<Metadata, FsError> {
        let node = resolve(self, path, false)?;
        self.entry_metadata(&node)
    }

    fn read_link(&self, path: &Path) -> Result<PathBuf, FsError> {
        let node = resolve(self, path, false)?;
        self.entry_read_link(&node)
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<DirEntry>, FsError> {
        let node = resolve(self, path, true)?;
        self.entry_read_dir(&node)
    }

    fn open(&self, path: &Path) -> Result<Box<dyn Read + '_>, FsError> {
        let node = resolve(self, path, true)?;
        self.entry_open(&node)
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>, FsError> {
        let mut buf = Vec::new();
        self.open(path)?.read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn exists(&self, path: &Path) -> bool {
        self.symlink_metadata(path).is_ok()
    }
}

/// Lexically clean a path into node form: relative, no `.`, `..` clamped at root.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(name) => out.push(name),
            Component::ParentDir => {
                out.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    out
}

fn push_components(queue: &mut VecDeque<OsString>, path: &Path) {
    for component in path.components() {
        match component {
            Component::Normal(name) => queue.push_back(name.to_owned()),
            Component::ParentDir => queue.push_back(OsString::from("..")),
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
}

/// Resolve `path` to the node path it designates.
///
/// A missing final component is not an error here; the caller's `entry_*`
/// operation reports it.
pub fn resolve<F: Filesystem + ?Sized>(
    fs: &F,
    path: &Path,
    follow_last: bool,
) -> Result<PathBuf, FsError> {
    let mut pending = VecDeque::new();
    push_components(&mut pending, path);

    let mut resolved = PathBuf::new();
    let mut hops = 0;

    while let Some(name) = pending.pop_front() {
        if name == ".." {
            resolved.pop();
            continue;
        }

        let candidate = resolved.join(&name);
        let is_last = pending.is_empty();

        let meta = match fs.entry_metadata(&candidate) {
            Ok(meta) => meta,
            Err(FsError::NotFound(_)) if is_last => return Ok(candidate),
            Err(e) => return Err(e),
        };

        if meta.is_symlink() && (follow_last || !is_last) {
            hops += 1;
            if hops > MAX_SYMLINK_HOPS {
                return Err(FsError::SymlinkLoop(normalize(path)));
            }
            let target = fs.entry_read_link(&candidate)?;
            if target.has_root() {
                resolved = PathBuf::new();
            }
            let mut expanded = VecDeque::new();
            push_components(&mut expanded, &target);
            expanded.extend(pending.drain(..));
            pending = expanded;
            continue;
        }

        if !is_last && !meta.is_dir() {
            return Err(FsError::NotADirectory(candidate));
        }
        resolved = candidate;
    }

    Ok(resolved)
}

/// Every node below `path`, depth-first in name order, paired with its
/// metadata. Symlinks are listed, not followed.
///
/// `path` is resolved first, but reported paths stay under the normalized
/// `path` even when it runs through a symlinked directory.
pub fn walk<F: Filesystem + ?Sized>(
    fs: &F,
    path: &Path,
) -> Result<Vec<(PathBuf, Metadata)>, FsError> {
    let node = resolve(fs, path, true)?;
    let mut out = Vec::new();
    walk_into(fs, &node, &normalize(path), &mut out)?;
    Ok(out)
}

fn walk_into<F: Filesystem + ?Sized>(
    fs: &F,
    node: &Path,
    shown: &Path,
    out: &mut Vec<(PathBuf, Metadata)>,
) -> Result<(), FsError> {
    for entry in fs.entry_read_dir(node)? {
        let child = node.join(&entry.name);
        let meta = fs.entry_metadata(&child)?;
        let is_dir = meta.is_dir();
        let shown_child = shown.join(&entry.name);
        out.push((shown_child.clone(), meta));
        if is_dir {
            walk_into(fs, &child, &shown_child, out)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    /// In-memory tree keyed by node path; enough to exercise resolution.
    #[derive(Default)]
    struct MemFs {
        nodes: BTreeMap<PathBuf, (Metadata, Option<PathBuf>, Vec<u8>)>,
    }

    impl MemFs {
        fn new() -> Self {
            let mut fs = Self::default();
            fs.nodes
                .insert(PathBuf::new(), (Metadata::directory(), None, Vec::new()));
            fs
        }

        fn dir(mut self, path: &str) -> Self {
            self.nodes
                .insert(PathBuf::from(path), (Metadata::directory(), None, Vec::new()));
            self
        }

        fn file(mut self, path: &str, data: &[u8]) -> Self {
            let meta = Metadata {
                kind: FileKind::File,
                size: data.len() as u64,
                mode: 0o644,
                ..Metadata::directory()
            };
            self.nodes
                .insert(PathBuf::from(path), (meta, None, data.to_vec()));
            self
        }

        fn symlink(mut self, path: &str, target: &str) -> Self {
            let meta = Metadata {
                kind: FileKind::Symlink,
                mode: 0o777,
                ..Metadata::directory()
            };
            self.nodes
                .insert(PathBuf::from(path), (meta, Some(PathBuf::from(target)), Vec::new()));
            self
        }
    }

    impl Filesystem for MemFs {
        fn entry_metadata(&self, path: &Path) -> Result<Metadata, FsError> {
            self.nodes
                .get(path)
                .map(|n| n.0.clone())
                .ok_or_else(|| FsError::NotFound(path.to_owned()))
        }

        fn entry_read_link(&self, path: &Path) -> Result<PathBuf, FsError> {
            self.nodes
                .get(path)
                .and_then(|n| n.1.clone())
                .ok_or_else(|| FsError::NotASymlink(path.to_owned()))
        }

        fn entry_read_dir(&self, path: &Path) -> Result<Vec<DirEntry>, FsError> {
            Ok(self
                .nodes
                .iter()
                .filter(|(p, _)| p.parent() == Some(path) && !p.as_os_str().is_empty())
                .map(|(p, n)| DirEntry {
                    name: p.file_name().unwrap_or_default().to_owned(),
                    kind: n.0.kind,
                })
                .collect())
        }

        fn entry_open(&self, path: &Path) -> Result<Box<dyn Read + '_>, FsError> {
            let node = self
                .nodes
                .get(path)
                .ok_or_else(|| FsError::NotFound(path.to_owned()))?;
            Ok(Box::new(&node.2[..]))
        }
    }

    #[test]
    fn normalize_strips_root_and_dots() {
        assert_eq!(normalize(Path::new("/etc/./passwd")), PathBuf::from("etc/passwd"));
        assert_eq!(normalize(Path::new("./a/b/../c/")), PathBuf::from("a/c"));
        assert_eq!(normalize(Path::new("../../x")), PathBuf::from("x"));
        assert_eq!(normalize(Path::new("/")), PathBuf::new());
    }

    #[test]
    fn follows_intermediate_symlinks() {
        let fs = MemFs::new()
            .dir("usr")
            .dir("usr/lib")
            .file("usr/lib/libc.so", b"elf")
            .symlink("lib", "usr/lib");
        assert_eq!(fs.read(Path::new("/lib/libc.so")).unwrap(), b"elf");
    }

    #[test]
    fn absolute_symlink_restarts_at_root() {
        let fs = MemFs::new()
            .dir("etc")
            .file("etc/os-release", b"ID=test")
            .dir("usr")
            .symlink("usr/os", "/etc/os-release");
        assert_eq!(fs.read(Path::new("usr/os")).unwrap(), b"ID=test");
    }

    #[test]
    fn relative_symlink_with_parent_components() {
        let fs = MemFs::new()
            .dir("a")
            .dir("b")
            .file("b/target", b"t")
            .symlink("a/link", "../b/target");
        assert_eq!(fs.read(Path::new("a/link")).unwrap(), b"t");
    }

    #[test]
    fn symlink_metadata_does_not_follow_last() {
        let fs = MemFs::new().file("f", b"x").symlink("l", "f");
        assert!(fs.symlink_metadata(Path::new("l")).unwrap().is_symlink());
        assert!(fs.metadata(Path::new("l")).unwrap().is_file());
        assert_eq!(fs.read_link(Path::new("l")).unwrap(), PathBuf::from("f"));
    }

    #[test]
    fn symlink_loop_is_detected() {
        let fs = MemFs::new().symlink("a", "b").symlink("b", "a");
        assert!(matches!(
            fs.open(Path::new("a")).err().unwrap(),
            FsError::SymlinkLoop(_)
        ));
    }

    #[test]
    fn file_in_the_middle_is_not_a_directory() {
        let fs = MemFs::new().file("f", b"x");
        assert!(matches!(
            fs.metadata(Path::new("f/child")).unwrap_err(),
            FsError::NotADirectory(_)
        ));
    }

    #[test]
    fn missing_paths_are_not_found() {
        let fs = MemFs::new().dir("a");
        assert!(fs.metadata(Path::new("a/missing")).unwrap_err().is_not_found());
        assert!(fs.metadata(Path::new("missing/deeper")).unwrap_err().is_not_found());
        assert!(!fs.exists(Path::new("a/missing")));
        assert!(fs.exists(Path::new("/a")));
    }

    #[test]
    fn walk_lists_depth_first_in_name_order() {
        let fs = MemFs::new()
            .dir("b")
            .file("b/z", b"")
            .dir("a")
            .file("a/y", b"")
            .symlink("c", "a");
        let paths: Vec<_> = walk(&fs, Path::new("/"))
            .unwrap()
            .into_iter()
            .map(|(p, _)| p)
            .collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("a"),
                PathBuf::from("a/y"),
                PathBuf::from("b"),
                PathBuf::from("b/z"),
                PathBuf::from("c"),
            ]
        );
    }

    #[test]
    fn walk_through_symlinked_dir_keeps_requested_prefix() {
        let fs = MemFs::new()
            .dir("usr")
            .dir("usr/lib")
            .dir("usr/lib/x")
            .file("usr/lib/x/libz.so", b"")
            .symlink("lib", "usr/lib");
        let paths: Vec<_> = walk(&fs, Path::new("/lib"))
            .unwrap()
            .into_iter()
            .map(|(p, _)| p)
            .collect();
        assert_eq!(
            paths,
            vec![PathBuf::from("lib/x"), PathBuf::from("lib/x/libz.so")]
        );
    }

    #[test]
    fn kind_names() {
        assert_eq!(FileKind::Dir.as_str(), "dir");
        assert_eq!(FileKind::Symlink.as_str(), "symlink");
    }
}
