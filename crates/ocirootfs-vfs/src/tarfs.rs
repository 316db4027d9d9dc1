use crate::fs::{normalize, DirEntry, FileKind, Filesystem, Metadata};
use crate::FsError;
use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::fs::File;
use std::io::{self, Read};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

// Hard-link chains longer than this are treated as a broken archive.
const MAX_HARDLINK_DEPTH: usize = 16;

#[derive(Debug, Clone)]
struct Node {
    meta: Metadata,
    /// Byte offset of the entry's data within the archive file.
    offset: u64,
    /// Symlink target, or hard-link target before links are resolved.
    link: Option<PathBuf>,
    hardlink: bool,
    children: BTreeSet<OsString>,
}

impl Node {
    fn synthesized_dir() -> Self {
        Self {
            meta: Metadata::directory(),
            offset: 0,
            link: None,
            hardlink: false,
            children: BTreeSet::new(),
        }
    }
}

/// A tar archive on disk exposed as a read-only tree.
///
/// The archive is indexed once on open; file contents are read on demand with
/// positional reads. The archive file handle lives as long as the `TarFs`.
#[derive(Debug)]
pub struct TarFs {
    file: File,
    nodes: BTreeMap<PathBuf, Node>,
}

fn invalid(e: impl std::fmt::Display) -> FsError {
    FsError::InvalidArchive(e.to_string())
}

impl TarFs {
    pub fn open(file: File) -> Result<Self, FsError> {
        let mut nodes = BTreeMap::new();
        nodes.insert(PathBuf::new(), Node::synthesized_dir());

        {
            let mut archive = tar::Archive::new(&file);
            for entry in archive.entries_with_seek().map_err(invalid)? {
                let entry = entry.map_err(invalid)?;
                let path = normalize(&entry.path().map_err(invalid)?);
                let header = entry.header();

                let (kind, hardlink) = match header.entry_type() {
                    tar::EntryType::Regular | tar::EntryType::Continuous => (FileKind::File, false),
                    tar::EntryType::Link => (FileKind::File, true),
                    tar::EntryType::Directory => (FileKind::Dir, false),
                    tar::EntryType::Symlink => (FileKind::Symlink, false),
                    tar::EntryType::Char => (FileKind::CharDevice, false),
                    tar::EntryType::Block => (FileKind::BlockDevice, false),
                    tar::EntryType::Fifo => (FileKind::Fifo, false),
                    tar::EntryType::GNUSparse => {
                        return Err(FsError::InvalidArchive(format!(
                            "sparse entry {} is not supported",
                            path.display()
                        )));
                    }
                    other => {
                        trace!("skipping tar entry {} of type {other:?}", path.display());
                        continue;
                    }
                };

                let meta = Metadata {
                    kind,
                    // Blank numeric fields read as zero.
                    mode: header.mode().unwrap_or(0) & 0o7777,
                    size: if kind == FileKind::File { entry.size() } else { 0 },
                    uid: header.uid().unwrap_or(0),
                    gid: header.gid().unwrap_or(0),
                    mtime: header.mtime().unwrap_or(0),
                };
                let link = match kind {
                    FileKind::Symlink => entry.link_name().map_err(invalid)?.map(|l| l.into_owned()),
                    _ if hardlink => entry
                        .link_name()
                        .map_err(invalid)?
                        .map(|l| normalize(&l)),
                    _ => None,
                };

                if path.as_os_str().is_empty() {
                    // "./" itself: keep the synthesized root unless the archive describes it.
                    if kind == FileKind::Dir {
                        if let Some(root) = nodes.get_mut(Path::new("")) {
                            root.meta = meta;
                        }
                    }
                    continue;
                }

                ensure_parents(&mut nodes, &path);
                let children = nodes
                    .remove(&path)
                    .filter(|old| old.meta.is_dir() && kind == FileKind::Dir)
                    .map(|old| old.children)
                    .unwrap_or_default();
                nodes.insert(
                    path,
                    Node {
                        meta,
                        offset: entry.raw_file_position(),
                        link,
                        hardlink,
                        children,
                    },
                );
            }
        }

        resolve_hardlinks(&mut nodes)?;
        debug!("indexed tar archive: {} entries", nodes.len() - 1);
        Ok(Self { file, nodes })
    }

    pub fn len(&self) -> usize {
        self.nodes.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn node(&self, path: &Path) -> Result<&Node, FsError> {
        self.nodes
            .get(path)
            .ok_or_else(|| FsError::NotFound(path.to_owned()))
    }
}

fn ensure_parents(nodes: &mut BTreeMap<PathBuf, Node>, path: &Path) {
    let mut child = path;
    while let Some(parent) = child.parent() {
        let name = child.file_name().map(ToOwned::to_owned).unwrap_or_default();
        let node = nodes
            .entry(parent.to_owned())
            .or_insert_with(Node::synthesized_dir);
        node.children.insert(name);
        child = parent;
    }
}

// Point every hard link at its target's data and size.
fn resolve_hardlinks(nodes: &mut BTreeMap<PathBuf, Node>) -> Result<(), FsError> {
    let links: Vec<PathBuf> = nodes
        .iter()
        .filter(|(_, n)| n.hardlink)
        .map(|(p, _)| p.clone())
        .collect();

    for path in links {
        let mut target = path.clone();
        let mut depth = 0;
        let resolved = loop {
            let node = nodes.get(&target).ok_or_else(|| {
                FsError::InvalidArchive(format!(
                    "hard link {} points to missing {}",
                    path.display(),
                    target.display()
                ))
            })?;
            if !node.hardlink {
                break node.clone();
            }
            depth += 1;
            if depth > MAX_HARDLINK_DEPTH {
                return Err(FsError::InvalidArchive(format!(
                    "hard link chain too deep at {}",
                    path.display()
                )));
            }
            target = node.link.clone().unwrap_or_default();
        };

        if !resolved.meta.is_file() {
            return Err(FsError::InvalidArchive(format!(
                "hard link {} does not point to a regular file",
                path.display()
            )));
        }
        if let Some(node) = nodes.get_mut(&path) {
            node.offset = resolved.offset;
            node.meta.size = resolved.meta.size;
            node.link = None;
            node.hardlink = false;
        }
    }
    Ok(())
}

/// Bounded reader over one entry's bytes inside the archive file.
struct SectionReader<'a> {
    file: &'a File,
    pos: u64,
    remaining: u64,
}

impl Read for SectionReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        let n = self.file.read_at(&mut buf[..want], self.pos)?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "tar entry data truncated",
            ));
        }
        self.pos += n as u64;
        self.remaining -= n as u64;
        Ok(n)
    }
}

impl Filesystem for TarFs {
    fn entry_metadata(&self, path: &Path) -> Result<Metadata, FsError> {
        Ok(self.node(path)?.meta.clone())
    }

    fn entry_read_link(&self, path: &Path) -> Result<PathBuf, FsError> {
        let node = self.node(path)?;
        match (&node.meta.kind, &node.link) {
            (FileKind::Symlink, Some(target)) => Ok(target.clone()),
            _ => Err(FsError::NotASymlink(path.to_owned())),
        }
    }

    fn entry_read_dir(&self, path: &Path) -> Result<Vec<DirEntry>, FsError> {
        let node = self.node(path)?;
        if !node.meta.is_dir() {
            return Err(FsError::NotADirectory(path.to_owned()));
        }
        node.children
            .iter()
            .map(|name| {
                let child = self.node(&path.join(name))?;
                Ok(DirEntry {
                    name: name.clone(),
                    kind: child.meta.kind,
                })
            })
            .collect()
    }

    fn entry_open(&self, path: &Path) -> Result<Box<dyn Read + '_>, FsError> {
        let node = self.node(path)?;
        if !node.meta.is_file() {
            return Err(FsError::NotAFile(path.to_owned()));
        }
        Ok(Box::new(SectionReader {
            file: &self.file,
            pos: node.offset,
            remaining: node.meta.size,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, Write};

    enum E<'a> {
        File(&'a str, &'a [u8]),
        Dir(&'a str),
        Symlink(&'a str, &'a str),
        HardLink(&'a str, &'a str),
    }

    fn archive(entries: &[E<'_>]) -> File {
        let mut builder = tar::Builder::new(Vec::new());
        for e in entries {
            let mut h = tar::Header::new_gnu();
            h.set_mtime(1_700_000_000);
            h.set_size(0);
            match *e {
                E::File(p, data) => {
                    h.set_entry_type(tar::EntryType::Regular);
                    h.set_mode(0o644);
                    h.set_size(data.len() as u64);
                    builder.append_data(&mut h, p, data).unwrap();
                }
                E::Dir(p) => {
                    h.set_entry_type(tar::EntryType::Directory);
                    h.set_mode(0o750);
                    builder.append_data(&mut h, p, io::empty()).unwrap();
                }
                E::Symlink(p, t) => {
                    h.set_entry_type(tar::EntryType::Symlink);
                    h.set_mode(0o777);
                    builder.append_link(&mut h, p, t).unwrap();
                }
                E::HardLink(p, t) => {
                    h.set_entry_type(tar::EntryType::Link);
                    h.set_mode(0o644);
                    builder.append_link(&mut h, p, t).unwrap();
                }
            }
        }
        let bytes = builder.into_inner().unwrap();
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(&bytes).unwrap();
        file.rewind().unwrap();
        file
    }

    #[test]
    fn reads_files_and_metadata() {
        let fs = TarFs::open(archive(&[
            E::Dir("etc/"),
            E::File("etc/hostname", b"box\n"),
        ]))
        .unwrap();
        assert_eq!(fs.len(), 2);
        assert_eq!(fs.read(Path::new("/etc/hostname")).unwrap(), b"box\n");
        let meta = fs.metadata(Path::new("etc")).unwrap();
        assert!(meta.is_dir());
        assert_eq!(meta.mode, 0o750);
        assert_eq!(meta.mtime, 1_700_000_000);
        let file_meta = fs.metadata(Path::new("etc/hostname")).unwrap();
        assert_eq!(file_meta.size, 4);
    }

    #[test]
    fn synthesizes_missing_parent_directories() {
        let fs = TarFs::open(archive(&[E::File("usr/share/doc/README", b"hi")])).unwrap();
        assert!(fs.metadata(Path::new("usr/share")).unwrap().is_dir());
        let names: Vec<_> = fs
            .read_dir(Path::new("usr"))
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec![OsString::from("share")]);
    }

    #[test]
    fn later_entries_replace_earlier_ones() {
        let fs = TarFs::open(archive(&[
            E::File("app/config", b"old"),
            E::File("app/config", b"newer"),
        ]))
        .unwrap();
        assert_eq!(fs.read(Path::new("app/config")).unwrap(), b"newer");
    }

    #[test]
    fn directory_entry_after_children_keeps_them() {
        let fs = TarFs::open(archive(&[E::File("var/log/x", b"1"), E::Dir("var/log")])).unwrap();
        let names: Vec<_> = fs
            .read_dir(Path::new("var/log"))
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec![OsString::from("x")]);
    }

    #[test]
    fn hard_links_share_target_data() {
        let fs = TarFs::open(archive(&[
            E::File("bin/busybox", b"BUSYBOX"),
            E::HardLink("bin/sh", "bin/busybox"),
        ]))
        .unwrap();
        assert_eq!(fs.read(Path::new("bin/sh")).unwrap(), b"BUSYBOX");
        assert_eq!(fs.metadata(Path::new("bin/sh")).unwrap().size, 7);
    }

    #[test]
    fn dangling_hard_link_is_invalid() {
        let err = TarFs::open(archive(&[E::HardLink("bin/sh", "bin/missing")])).unwrap_err();
        assert!(matches!(err, FsError::InvalidArchive(_)));
    }

    #[test]
    fn symlinks_are_exposed_and_followed() {
        let fs = TarFs::open(archive(&[
            E::File("usr/lib/os-release", b"ID=x"),
            E::Dir("etc"),
            E::Symlink("etc/os-release", "../usr/lib/os-release"),
        ]))
        .unwrap();
        assert_eq!(
            fs.read_link(Path::new("etc/os-release")).unwrap(),
            PathBuf::from("../usr/lib/os-release")
        );
        assert_eq!(fs.read(Path::new("etc/os-release")).unwrap(), b"ID=x");
    }

    #[test]
    fn open_directory_is_not_a_file() {
        let fs = TarFs::open(archive(&[E::Dir("etc")])).unwrap();
        assert!(matches!(
            fs.open(Path::new("etc")).err().unwrap(),
            FsError::NotAFile(_)
        ));
    }

    #[test]
    fn garbage_is_not_an_archive() {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(&[0x42; 1024]).unwrap();
        file.rewind().unwrap();
        assert!(matches!(TarFs::open(file).unwrap_err(), FsError::InvalidArchive(_)));
    }

    #[test]
    fn blank_numeric_fields_read_as_zero() {
        // uid and gid are never set, so those fields stay all NUL.
        let mut h = tar::Header::new_gnu();
        h.set_entry_type(tar::EntryType::Regular);
        h.set_mode(0o600);
        h.set_size(2);
        let mut builder = tar::Builder::new(Vec::new());
        builder.append_data(&mut h, "etc/shadow", &b"x\n"[..]).unwrap();
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(&builder.into_inner().unwrap()).unwrap();
        file.rewind().unwrap();

        let fs = TarFs::open(file).unwrap();
        let meta = fs.metadata(Path::new("etc/shadow")).unwrap();
        assert_eq!((meta.uid, meta.gid, meta.mtime), (0, 0, 0));
        assert_eq!(meta.mode, 0o600);
        assert_eq!(fs.read(Path::new("etc/shadow")).unwrap(), b"x\n");
    }

    #[test]
    fn empty_archive_has_only_root() {
        let fs = TarFs::open(archive(&[])).unwrap();
        assert!(fs.is_empty());
        assert!(fs.read_dir(Path::new("/")).unwrap().is_empty());
    }
}
