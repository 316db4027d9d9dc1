//! Turning one layer blob into a mounted tar filesystem in the scratch dir.

use crate::CoreError;
use ocirootfs_schema::{Descriptor, Digest};
use ocirootfs_store::{Decompressor, ImageLayout};
use ocirootfs_vfs::{Filesystem, TarFs};
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, ErrorKind, Read, Seek, Write};
use std::path::Path;
use tempfile::{NamedTempFile, TempPath};
use tracing::debug;

const COPY_BUFFER: usize = 64 * 1024;

/// Step of layer materialization, reported with every layer failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerStage {
    OpenBlob,
    Decompress,
    CreateTemp,
    Extract,
    Mount,
}

impl fmt::Display for LayerStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::OpenBlob => "open layer",
            Self::Decompress => "create decompressing reader",
            Self::CreateTemp => "create temporary tar file",
            Self::Extract => "decompress layer",
            Self::Mount => "open decompressed layer",
        })
    }
}

/// A layer unpacked to a temporary tar file and indexed.
///
/// The temporary file is removed when the layer is released, or on drop as a
/// fallback.
#[derive(Debug)]
pub struct Layer {
    digest: Digest,
    fs: TarFs,
    artifact: TempPath,
}

/// Deletes a layer's temporary artifact.
pub type LayerRelease = Box<dyn FnOnce() -> Result<(), CoreError> + Send + Sync>;

impl Layer {
    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    /// Path of the decompressed tar file backing this layer.
    pub fn artifact(&self) -> &Path {
        &self.artifact
    }

    pub fn filesystem(&self) -> &TarFs {
        &self.fs
    }

    /// Hand the filesystem to an overlay and keep the deletion of the
    /// artifact as a separate action.
    pub fn into_parts(self) -> (Box<dyn Filesystem>, LayerRelease) {
        let Self {
            digest,
            fs,
            artifact,
        } = self;
        let release: LayerRelease = Box::new(move || {
            let path = artifact.to_path_buf();
            artifact.close().map_err(|source| CoreError::Release {
                label: format!("layer {} ({})", digest.short(), path.display()),
                source,
            })
        });
        (Box::new(fs), release)
    }

    /// Close the filesystem, then delete the artifact.
    pub fn release(self) -> Result<(), CoreError> {
        let (fs, release) = self.into_parts();
        drop(fs);
        release()
    }
}

/// Materializes layers of one layout into one scratch directory.
pub struct Materializer<'a> {
    layout: &'a ImageLayout,
    scratch: &'a Path,
    codec: &'a dyn Decompressor,
}

impl<'a> Materializer<'a> {
    pub fn new(layout: &'a ImageLayout, scratch: &'a Path, codec: &'a dyn Decompressor) -> Self {
        Self {
            layout,
            scratch,
            codec,
        }
    }

    /// Open, decompress, and extract one layer.
    ///
    /// On failure nothing is left behind in the scratch directory.
    pub fn materialize(&self, descriptor: &Descriptor) -> Result<Layer, CoreError> {
        let digest = &descriptor.digest;
        let fail = |stage: LayerStage, source: CoreError| CoreError::Layer {
            digest: digest.clone(),
            stage,
            source: Box::new(source),
        };

        debug!("materializing layer {} ({} bytes)", digest, descriptor.size);

        let blob = self
            .layout
            .open_blob(digest)
            .map_err(|e| fail(LayerStage::OpenBlob, e.into()))?;
        let mut reader = self
            .codec
            .open(Box::new(BufReader::new(blob)))
            .map_err(|e| fail(LayerStage::Decompress, e.into()))?;

        let mut temp = tempfile::Builder::new()
            .prefix(&format!("{}.", digest.encoded()))
            .suffix(".tar")
            .tempfile_in(self.scratch)
            .map_err(|e| fail(LayerStage::CreateTemp, e.into()))?;

        let copied = match copy_layer(&mut reader, temp.as_file_mut()) {
            Ok(n) => n,
            Err(e) => return Err(discard_temp(temp, fail(LayerStage::Extract, e))),
        };
        drop(reader);
        debug!(
            "layer {} decompressed to {} ({copied} bytes)",
            digest.short(),
            temp.path().display()
        );

        let (mut file, artifact) = temp.into_parts();
        if let Err(e) = file.rewind() {
            return Err(discard_path(artifact, fail(LayerStage::Mount, e.into())));
        }
        let fs = match TarFs::open(file) {
            Ok(fs) => fs,
            Err(e) => return Err(discard_path(artifact, fail(LayerStage::Mount, e.into()))),
        };

        Ok(Layer {
            digest: digest.clone(),
            fs,
            artifact,
        })
    }
}

/// Stream decompressed bytes into the temp file.
///
/// Read-side failures come from the decoder and mean the payload is corrupt;
/// write-side failures are plain I/O errors.
fn copy_layer(reader: &mut dyn Read, out: &mut File) -> Result<u64, CoreError> {
    let mut buf = vec![0u8; COPY_BUFFER];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(classify_read_error(e)),
        };
        out.write_all(&buf[..n])?;
        total += n as u64;
    }
    out.flush()?;
    Ok(total)
}

fn classify_read_error(e: io::Error) -> CoreError {
    match e.kind() {
        ErrorKind::InvalidData
        | ErrorKind::InvalidInput
        | ErrorKind::UnexpectedEof
        | ErrorKind::Other => CoreError::CorruptPayload(e),
        _ => CoreError::Io(e),
    }
}

fn discard_temp(temp: NamedTempFile, err: CoreError) -> CoreError {
    discard_path(temp.into_temp_path(), err)
}

fn discard_path(path: TempPath, err: CoreError) -> CoreError {
    let shown = path.to_path_buf();
    match path.close() {
        Ok(()) => err,
        Err(source) => err.with_cleanup(CoreError::Release {
            label: format!("temporary file {}", shown.display()),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind as Kind;
    use ocirootfs_schema::MediaType;
    use ocirootfs_store::fixture::{Entry, LayoutFixture};
    use ocirootfs_store::{AutoDecompressor, Compression};

    fn scratch_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn materializes_gzip_layer() {
        let fx = LayoutFixture::new();
        let scratch = tempfile::tempdir().unwrap();
        let desc = fx.add_layer(&[Entry::File("etc/motd", b"hi\n")], Compression::Gzip);

        let layout = fx.layout();
        let layer = Materializer::new(&layout, scratch.path(), &AutoDecompressor)
            .materialize(&desc)
            .unwrap();
        assert_eq!(layer.digest(), &desc.digest);
        assert_eq!(
            layer.filesystem().read(Path::new("/etc/motd")).unwrap(),
            b"hi\n"
        );

        let name = layer.artifact().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(&format!("{}.", desc.digest.encoded())));
        assert!(name.ends_with(".tar"));

        layer.release().unwrap();
        assert!(scratch_files(scratch.path()).is_empty());
    }

    #[test]
    fn same_layer_twice_does_not_collide() {
        let fx = LayoutFixture::new();
        let scratch = tempfile::tempdir().unwrap();
        let desc = fx.add_layer(&[Entry::File("a", b"1")], Compression::None);
        let layout = fx.layout();
        let m = Materializer::new(&layout, scratch.path(), &AutoDecompressor);

        let first = m.materialize(&desc).unwrap();
        let second = m.materialize(&desc).unwrap();
        assert_ne!(first.artifact(), second.artifact());
        assert_eq!(scratch_files(scratch.path()).len(), 2);
        first.release().unwrap();
        second.release().unwrap();
    }

    #[test]
    fn missing_blob_fails_at_open_stage() {
        let fx = LayoutFixture::new();
        let scratch = tempfile::tempdir().unwrap();
        let desc = fx.add_layer(&[Entry::File("a", b"1")], Compression::Gzip);
        std::fs::remove_file(fx.layout().blob_path(&desc.digest)).unwrap();

        let layout = fx.layout();
        let err = Materializer::new(&layout, scratch.path(), &AutoDecompressor)
            .materialize(&desc)
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Layer {
                stage: LayerStage::OpenBlob,
                ..
            }
        ));
        assert_eq!(err.kind(), Kind::NotFound);
    }

    #[test]
    fn unknown_compression_is_format_error() {
        let fx = LayoutFixture::new();
        let scratch = tempfile::tempdir().unwrap();
        let desc = fx.add_blob(b"PK\x03\x04 zip, not tar", MediaType::ImageLayer);

        let layout = fx.layout();
        let err = Materializer::new(&layout, scratch.path(), &AutoDecompressor)
            .materialize(&desc)
            .unwrap_err();
        assert_eq!(err.kind(), Kind::Format);
        assert!(err.to_string().contains("create decompressing reader"));
        assert!(scratch_files(scratch.path()).is_empty());
    }

    #[test]
    fn corrupt_gzip_cleans_up_temp_file() {
        let fx = LayoutFixture::new();
        let scratch = tempfile::tempdir().unwrap();
        let mut blob = vec![0x1f, 0x8b, 0x08, 0x00, 0, 0, 0, 0, 0, 0xff];
        blob.extend_from_slice(&[0xde; 256]);
        let desc = fx.add_blob(&blob, MediaType::ImageLayerGzip);

        let layout = fx.layout();
        let err = Materializer::new(&layout, scratch.path(), &AutoDecompressor)
            .materialize(&desc)
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Layer {
                stage: LayerStage::Extract,
                ..
            }
        ));
        assert_eq!(err.kind(), Kind::Format);
        assert!(scratch_files(scratch.path()).is_empty());
    }

    #[test]
    fn missing_scratch_dir_is_io_error() {
        let fx = LayoutFixture::new();
        let scratch = tempfile::tempdir().unwrap();
        let gone = scratch.path().join("does-not-exist");
        let desc = fx.add_layer(&[Entry::File("a", b"1")], Compression::None);

        let layout = fx.layout();
        let err = Materializer::new(&layout, &gone, &AutoDecompressor)
            .materialize(&desc)
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Layer {
                stage: LayerStage::CreateTemp,
                ..
            }
        ));
        assert_eq!(err.kind(), Kind::Io);
    }
}
