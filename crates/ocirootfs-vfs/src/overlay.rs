//! Union of an ordered layer stack with OCI whiteout semantics.
//!
//! Layers are kept bottom first. A path is answered by the topmost layer that
//! has it, unless a layer above deletes it with a `.wh.<name>` marker, covers
//! an ancestor with a non-directory, or marks an ancestor opaque with
//! `.wh..wh..opq`. Marker entries themselves are never visible.

use crate::fs::{DirEntry, FileKind, Filesystem, Metadata};
use crate::FsError;
use std::collections::{BTreeMap, BTreeSet};
use std::ffi::{OsStr, OsString};
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

pub const WHITEOUT_PREFIX: &str = ".wh.";
pub const OPAQUE_MARKER: &str = ".wh..wh..opq";

/// Builds a merged filesystem from layers ordered bottom first.
pub trait OverlayEngine: Send + Sync {
    fn compose(&self, layers: Vec<Box<dyn Filesystem>>) -> Result<Box<dyn Filesystem>, FsError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultOverlay;

impl OverlayEngine for DefaultOverlay {
    fn compose(&self, layers: Vec<Box<dyn Filesystem>>) -> Result<Box<dyn Filesystem>, FsError> {
        if layers.is_empty() {
            debug!("no layers; composing an empty root");
            return Ok(Box::new(EmptyRoot));
        }
        Ok(Box::new(OverlayFs::new(layers)?))
    }
}

/// The root of an image with no layers: one empty directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyRoot;

impl EmptyRoot {
    fn check(path: &Path) -> Result<(), FsError> {
        if path.components().any(|c| matches!(c, Component::Normal(_))) {
            return Err(FsError::NotFound(path.to_owned()));
        }
        Ok(())
    }
}

impl Filesystem for EmptyRoot {
    fn entry_metadata(&self, path: &Path) -> Result<Metadata, FsError> {
        Self::check(path)?;
        Ok(Metadata::directory())
    }

    fn entry_read_link(&self, path: &Path) -> Result<PathBuf, FsError> {
        Self::check(path)?;
        Err(FsError::NotASymlink(path.to_owned()))
    }

    fn entry_read_dir(&self, path: &Path) -> Result<Vec<DirEntry>, FsError> {
        Self::check(path)?;
        Ok(Vec::new())
    }

    fn entry_open(&self, path: &Path) -> Result<Box<dyn Read + '_>, FsError> {
        Self::check(path)?;
        Err(FsError::NotAFile(path.to_owned()))
    }
}

/// What one layer says about one node path.
enum LayerView {
    /// The layer has the node. `sealed` means lower layers contribute nothing
    /// at or below it.
    Present { meta: Metadata, sealed: bool },
    /// The layer deletes the node from everything below it.
    Hidden,
    /// The layer has nothing to say; look further down.
    Absent,
}

pub struct OverlayFs {
    layers: Vec<Box<dyn Filesystem>>,
}

fn is_marker(name: &OsStr) -> bool {
    name.to_str()
        .is_some_and(|n| n.starts_with(WHITEOUT_PREFIX))
}

fn whiteout_name(name: &OsStr) -> OsString {
    let mut marker = OsString::from(WHITEOUT_PREFIX);
    marker.push(name);
    marker
}

fn has_entry(layer: &dyn Filesystem, path: &Path) -> Result<bool, FsError> {
    match layer.entry_metadata(path) {
        Ok(_) => Ok(true),
        Err(FsError::NotFound(_)) => Ok(false),
        Err(e) => Err(e),
    }
}

impl OverlayFs {
    pub fn new(layers: Vec<Box<dyn Filesystem>>) -> Result<Self, FsError> {
        if layers.is_empty() {
            return Err(FsError::EmptyOverlay);
        }
        debug!("overlay over {} layers", layers.len());
        Ok(Self { layers })
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    fn view(layer: &dyn Filesystem, path: &Path) -> Result<LayerView, FsError> {
        let mut dir = PathBuf::new();
        let mut sealed = has_entry(layer, &dir.join(OPAQUE_MARKER))?;
        let mut meta = layer.entry_metadata(&dir)?;

        let names: Vec<&OsStr> = path
            .components()
            .filter_map(|c| match c {
                Component::Normal(name) => Some(name),
                _ => None,
            })
            .collect();

        for (i, name) in names.iter().enumerate() {
            let child = dir.join(name);
            // An entry shipped by this layer wins over its own whiteout, which
            // only deletes from the layers below.
            meta = match layer.entry_metadata(&child) {
                Ok(meta) => meta,
                Err(FsError::NotFound(_)) => {
                    let whited_out = has_entry(layer, &dir.join(whiteout_name(name)))?;
                    return Ok(if sealed || whited_out {
                        LayerView::Hidden
                    } else {
                        LayerView::Absent
                    });
                }
                Err(e) => return Err(e),
            };
            let is_last = i + 1 == names.len();
            if !meta.is_dir() {
                if is_last {
                    return Ok(LayerView::Present { meta, sealed: true });
                }
                return Ok(LayerView::Hidden);
            }
            // A directory re-created next to its own whiteout replaces the
            // lower one instead of merging with it.
            sealed = sealed
                || has_entry(layer, &child.join(OPAQUE_MARKER))?
                || has_entry(layer, &dir.join(whiteout_name(name)))?;
            dir = child;
        }

        Ok(LayerView::Present { meta, sealed })
    }

    /// Topmost layer holding `path`, with the node's metadata.
    fn locate(&self, path: &Path) -> Result<(usize, Metadata), FsError> {
        if path.components().any(|c| is_marker(c.as_os_str())) {
            return Err(FsError::NotFound(path.to_owned()));
        }
        for (i, layer) in self.layers.iter().enumerate().rev() {
            match Self::view(layer.as_ref(), path)? {
                LayerView::Present { meta, .. } => return Ok((i, meta)),
                LayerView::Hidden => break,
                LayerView::Absent => {}
            }
        }
        Err(FsError::NotFound(path.to_owned()))
    }
}

impl Filesystem for OverlayFs {
    fn entry_metadata(&self, path: &Path) -> Result<Metadata, FsError> {
        self.locate(path).map(|(_, meta)| meta)
    }

    fn entry_read_link(&self, path: &Path) -> Result<PathBuf, FsError> {
        let (i, _) = self.locate(path)?;
        self.layers[i].entry_read_link(path)
    }

    fn entry_read_dir(&self, path: &Path) -> Result<Vec<DirEntry>, FsError> {
        let (top, meta) = self.locate(path)?;
        if !meta.is_dir() {
            return Err(FsError::NotADirectory(path.to_owned()));
        }

        let mut merged: BTreeMap<OsString, FileKind> = BTreeMap::new();
        let mut deleted: BTreeSet<OsString> = BTreeSet::new();

        for layer in self.layers[..=top].iter().rev() {
            let sealed = match Self::view(layer.as_ref(), path)? {
                LayerView::Present { meta, sealed } if meta.is_dir() => sealed,
                LayerView::Present { .. } | LayerView::Hidden => break,
                LayerView::Absent => continue,
            };

            // Whiteouts only apply to layers below the one carrying them.
            let mut layer_deletes = Vec::new();
            for entry in layer.entry_read_dir(path)? {
                if entry.name == OPAQUE_MARKER {
                    continue;
                }
                if let Some(target) = entry
                    .name
                    .to_str()
                    .and_then(|n| n.strip_prefix(WHITEOUT_PREFIX))
                {
                    layer_deletes.push(OsString::from(target));
                    continue;
                }
                if !deleted.contains(&entry.name) {
                    merged.entry(entry.name).or_insert(entry.kind);
                }
            }
            deleted.extend(layer_deletes);

            if sealed {
                break;
            }
        }

        Ok(merged
            .into_iter()
            .map(|(name, kind)| DirEntry { name, kind })
            .collect())
    }

    fn entry_open(&self, path: &Path) -> Result<Box<dyn Read + '_>, FsError> {
        let (i, meta) = self.locate(path)?;
        if !meta.is_file() {
            return Err(FsError::NotAFile(path.to_owned()));
        }
        self.layers[i].entry_open(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TarFs;
    use std::io::{Seek, Write};

    enum E<'a> {
        File(&'a str, &'a str),
        Dir(&'a str),
        Symlink(&'a str, &'a str),
        Whiteout(&'a str),
        Opaque(&'a str),
    }

    fn layer(entries: &[E<'_>]) -> Box<dyn Filesystem> {
        let mut builder = tar::Builder::new(Vec::new());
        for e in entries {
            let mut h = tar::Header::new_gnu();
            h.set_entry_type(tar::EntryType::Regular);
            h.set_mode(0o644);
            h.set_size(0);
            match *e {
                E::File(p, data) => {
                    h.set_size(data.len() as u64);
                    builder.append_data(&mut h, p, data.as_bytes()).unwrap();
                }
                E::Dir(p) => {
                    h.set_entry_type(tar::EntryType::Directory);
                    builder.append_data(&mut h, p, std::io::empty()).unwrap();
                }
                E::Symlink(p, t) => {
                    h.set_entry_type(tar::EntryType::Symlink);
                    builder.append_link(&mut h, p, t).unwrap();
                }
                E::Whiteout(p) => {
                    let p = Path::new(p);
                    let name = whiteout_name(p.file_name().unwrap());
                    builder
                        .append_data(&mut h, p.with_file_name(name), std::io::empty())
                        .unwrap();
                }
                E::Opaque(dir) => {
                    builder
                        .append_data(&mut h, Path::new(dir).join(OPAQUE_MARKER), std::io::empty())
                        .unwrap();
                }
            }
        }
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(&builder.into_inner().unwrap()).unwrap();
        file.rewind().unwrap();
        Box::new(TarFs::open(file).unwrap())
    }

    fn names(fs: &dyn Filesystem, path: &str) -> Vec<String> {
        fs.read_dir(Path::new(path))
            .unwrap()
            .into_iter()
            .map(|e| e.name.to_string_lossy().into_owned())
            .collect()
    }

    fn text(fs: &dyn Filesystem, path: &str) -> String {
        String::from_utf8(fs.read(Path::new(path)).unwrap()).unwrap()
    }

    #[test]
    fn empty_stack_composes_empty_root() {
        let fs = DefaultOverlay.compose(Vec::new()).unwrap();
        assert!(fs.metadata(Path::new("/")).unwrap().is_dir());
        assert!(names(fs.as_ref(), "/").is_empty());
        assert!(fs.metadata(Path::new("etc")).unwrap_err().is_not_found());
        assert!(matches!(
            fs.open(Path::new("/")).err().unwrap(),
            FsError::NotAFile(_)
        ));
        assert!(matches!(
            OverlayFs::new(Vec::new()).err().unwrap(),
            FsError::EmptyOverlay
        ));
    }

    #[test]
    fn upper_layer_shadows_lower() {
        let fs = OverlayFs::new(vec![
            layer(&[E::File("etc/motd", "one"), E::File("etc/hosts", "h")]),
            layer(&[E::File("etc/motd", "two")]),
            layer(&[E::File("etc/motd", "three")]),
        ])
        .unwrap();
        assert_eq!(text(&fs, "/etc/motd"), "three");
        assert_eq!(text(&fs, "/etc/hosts"), "h");
        assert_eq!(names(&fs, "/etc"), vec!["hosts", "motd"]);
    }

    #[test]
    fn whiteout_deletes_lower_entry() {
        let fs = OverlayFs::new(vec![
            layer(&[E::File("a/keep", "k"), E::File("a/gone", "g")]),
            layer(&[E::Whiteout("a/gone")]),
        ])
        .unwrap();
        assert!(fs.metadata(Path::new("a/gone")).unwrap_err().is_not_found());
        assert_eq!(names(&fs, "a"), vec!["keep"]);
    }

    #[test]
    fn whiteout_does_not_hide_same_layer_entry() {
        let fs = OverlayFs::new(vec![
            layer(&[E::File("a/x", "old")]),
            layer(&[E::Whiteout("a/x"), E::File("a/x", "new")]),
        ])
        .unwrap();
        assert_eq!(names(&fs, "a"), vec!["x"]);
        assert_eq!(text(&fs, "a/x"), "new");
    }

    #[test]
    fn directory_recreated_beside_its_whiteout_drops_lower_contents() {
        let fs = OverlayFs::new(vec![
            layer(&[E::File("srv/old", "o"), E::File("srv/shared", "lower")]),
            layer(&[
                E::Whiteout("srv"),
                E::File("srv/shared", "upper"),
                E::File("srv/new", "n"),
            ]),
        ])
        .unwrap();
        assert_eq!(names(&fs, "srv"), vec!["new", "shared"]);
        assert_eq!(text(&fs, "srv/shared"), "upper");
        assert!(!fs.exists(Path::new("srv/old")));
    }

    #[test]
    fn whiteout_of_directory_hides_descendants() {
        let fs = OverlayFs::new(vec![
            layer(&[E::File("var/cache/pkg/list", "l")]),
            layer(&[E::Whiteout("var/cache")]),
        ])
        .unwrap();
        assert!(!fs.exists(Path::new("var/cache/pkg/list")));
        assert!(names(&fs, "var").is_empty());
    }

    #[test]
    fn re_created_path_above_whiteout_is_visible() {
        let fs = OverlayFs::new(vec![
            layer(&[E::File("opt/tool", "v1")]),
            layer(&[E::Whiteout("opt/tool")]),
            layer(&[E::File("opt/tool", "v3")]),
        ])
        .unwrap();
        assert_eq!(text(&fs, "opt/tool"), "v3");
    }

    #[test]
    fn opaque_directory_hides_lower_contents() {
        let fs = OverlayFs::new(vec![
            layer(&[E::File("srv/old", "o"), E::File("top", "t")]),
            layer(&[E::Dir("srv"), E::Opaque("srv"), E::File("srv/new", "n")]),
        ])
        .unwrap();
        assert_eq!(names(&fs, "srv"), vec!["new"]);
        assert!(!fs.exists(Path::new("srv/old")));
        assert_eq!(names(&fs, "/"), vec!["srv", "top"]);
    }

    #[test]
    fn markers_are_never_listed_or_reachable() {
        let fs = OverlayFs::new(vec![layer(&[
            E::Dir("d"),
            E::Opaque("d"),
            E::Whiteout("d/x"),
        ])])
        .unwrap();
        assert!(names(&fs, "d").is_empty());
        assert!(!fs.exists(Path::new("d/.wh..wh..opq")));
        assert!(!fs.exists(Path::new("d/.wh.x")));
    }

    #[test]
    fn file_replaces_lower_directory() {
        let fs = OverlayFs::new(vec![
            layer(&[E::File("x/inner", "i")]),
            layer(&[E::File("x", "file now")]),
        ])
        .unwrap();
        assert!(fs.metadata(Path::new("x")).unwrap().is_file());
        assert!(matches!(
            fs.metadata(Path::new("x/inner")).unwrap_err(),
            FsError::NotADirectory(_)
        ));
    }

    #[test]
    fn directory_over_file_starts_fresh() {
        let fs = OverlayFs::new(vec![
            layer(&[E::File("x", "file")]),
            layer(&[E::File("x/inner", "i")]),
        ])
        .unwrap();
        assert!(fs.metadata(Path::new("x")).unwrap().is_dir());
        assert_eq!(names(&fs, "x"), vec!["inner"]);
    }

    #[test]
    fn symlink_in_upper_layer_resolves_into_lower() {
        let fs = OverlayFs::new(vec![
            layer(&[E::File("usr/lib/libz.so.1", "zlib")]),
            layer(&[E::Symlink("lib", "usr/lib")]),
        ])
        .unwrap();
        assert_eq!(text(&fs, "/lib/libz.so.1"), "zlib");
        assert!(fs.symlink_metadata(Path::new("lib")).unwrap().is_symlink());
        assert_eq!(fs.read_link(Path::new("lib")).unwrap(), PathBuf::from("usr/lib"));
    }

    #[test]
    fn open_directory_is_not_a_file() {
        let fs = OverlayFs::new(vec![layer(&[E::Dir("etc")])]).unwrap();
        assert!(matches!(
            fs.open(Path::new("etc")).err().unwrap(),
            FsError::NotAFile(_)
        ));
    }
}
