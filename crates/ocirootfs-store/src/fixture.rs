//! Synthetic OCI layouts for tests.
//!
//! Every blob is written under its real sha256 digest, so fixtures also pass
//! integrity verification.

use crate::compression::Compression;
use crate::layout::{ImageLayout, SUPPORTED_LAYOUT_VERSION};
use flate2::write::GzEncoder;
use ocirootfs_schema::{Descriptor, Digest, Index, Manifest, MediaType};
use sha2::{Digest as _, Sha256};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;

/// One entry of a synthetic layer archive.
#[derive(Debug, Clone, Copy)]
pub enum Entry<'a> {
    File(&'a str, &'a [u8]),
    Dir(&'a str),
    Symlink(&'a str, &'a str),
    HardLink(&'a str, &'a str),
    /// Deletes the named path from lower layers (`.wh.<name>`).
    Whiteout(&'a str),
    /// Hides all lower-layer contents of the directory (`.wh..wh..opq`).
    Opaque(&'a str),
}

pub struct LayoutFixture {
    dir: TempDir,
}

impl Default for LayoutFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl LayoutFixture {
    /// An empty layout: supported `oci-layout`, empty `index.json`.
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create layout tempdir");
        fs::create_dir_all(dir.path().join("blobs").join("sha256")).expect("create blobs dir");
        let fixture = Self { dir };
        fixture.write_layout_version(SUPPORTED_LAYOUT_VERSION);
        fixture.write_index(&[]);
        fixture
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn layout(&self) -> ImageLayout {
        ImageLayout::new(self.dir.path())
    }

    pub fn write_layout_version(&self, version: &str) {
        let doc = serde_json::json!({ "imageLayoutVersion": version });
        fs::write(
            self.root().join("oci-layout"),
            serde_json::to_vec(&doc).expect("serialize oci-layout"),
        )
        .expect("write oci-layout");
    }

    /// Store raw bytes as a blob and describe them.
    pub fn add_blob(&self, bytes: &[u8], media_type: MediaType) -> Descriptor {
        let encoded = hex::encode(Sha256::digest(bytes));
        let digest = Digest::from_parts("sha256", &encoded).expect("sha256 digest");
        fs::write(self.layout().blob_path(&digest), bytes).expect("write blob");
        Descriptor::new(media_type, digest, bytes.len() as u64)
    }

    /// Pack entries into a tar archive, compress it, and store it as a layer blob.
    pub fn add_layer(&self, entries: &[Entry<'_>], compression: Compression) -> Descriptor {
        let tar = build_tar(entries);
        let (bytes, media_type) = match compression {
            Compression::None => (tar, MediaType::ImageLayer),
            Compression::Gzip => {
                let mut enc = GzEncoder::new(Vec::new(), flate2::Compression::default());
                enc.write_all(&tar).expect("gzip layer");
                (enc.finish().expect("finish gzip"), MediaType::ImageLayerGzip)
            }
            Compression::Zstd => (
                zstd::encode_all(&tar[..], 3).expect("zstd layer"),
                MediaType::ImageLayerZstd,
            ),
        };
        self.add_blob(&bytes, media_type)
    }

    /// Store an image manifest over the given layers (bottom first).
    pub fn add_manifest(&self, layers: &[Descriptor]) -> Descriptor {
        let config = self.add_blob(b"{}", MediaType::ImageConfig);
        let manifest = Manifest {
            schema_version: 2,
            media_type: Some(MediaType::ImageManifest),
            config: Some(config),
            layers: layers.to_vec(),
            annotations: Default::default(),
        };
        let bytes = serde_json::to_vec(&manifest).expect("serialize manifest");
        self.add_blob(&bytes, MediaType::ImageManifest)
    }

    /// Store a nested image index listing the given manifests.
    pub fn add_image_index(&self, manifests: &[Descriptor]) -> Descriptor {
        let bytes = serde_json::to_vec(&index_document(manifests)).expect("serialize index");
        self.add_blob(&bytes, MediaType::ImageIndex)
    }

    /// Replace the top-level `index.json`.
    pub fn write_index(&self, entries: &[Descriptor]) {
        let bytes = serde_json::to_vec_pretty(&index_document(entries)).expect("serialize index");
        fs::write(self.root().join("index.json"), bytes).expect("write index.json");
    }
}

fn index_document(manifests: &[Descriptor]) -> Index {
    Index {
        schema_version: 2,
        media_type: Some(MediaType::ImageIndex),
        manifests: manifests.to_vec(),
        annotations: Default::default(),
    }
}

/// Build an uncompressed tar archive from fixture entries.
pub fn build_tar(entries: &[Entry<'_>]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());

    for entry in entries {
        let mut header = tar::Header::new_gnu();
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        header.set_size(0);

        match *entry {
            Entry::File(path, data) => {
                header.set_entry_type(tar::EntryType::Regular);
                header.set_mode(0o644);
                header.set_size(data.len() as u64);
                builder.append_data(&mut header, path, data)
            }
            Entry::Dir(path) => {
                header.set_entry_type(tar::EntryType::Directory);
                header.set_mode(0o755);
                builder.append_data(&mut header, path, std::io::empty())
            }
            Entry::Symlink(path, target) => {
                header.set_entry_type(tar::EntryType::Symlink);
                header.set_mode(0o777);
                builder.append_link(&mut header, path, target)
            }
            Entry::HardLink(path, target) => {
                header.set_entry_type(tar::EntryType::Link);
                header.set_mode(0o644);
                builder.append_link(&mut header, path, target)
            }
            Entry::Whiteout(path) => {
                let path = Path::new(path);
                let name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .expect("whiteout needs a file name");
                let marker = path.with_file_name(format!(".wh.{name}"));
                header.set_entry_type(tar::EntryType::Regular);
                header.set_mode(0o644);
                builder.append_data(&mut header, marker, std::io::empty())
            }
            Entry::Opaque(dir) => {
                header.set_entry_type(tar::EntryType::Regular);
                header.set_mode(0o644);
                builder.append_data(&mut header, Path::new(dir).join(".wh..wh..opq"), std::io::empty())
            }
        }
        .expect("append tar entry");
    }

    builder.into_inner().expect("finish tar")
}
