//! Layer blob decompression with format detection from the leading bytes.

use crate::StoreError;
use flate2::read::MultiGzDecoder;
use std::io::{Cursor, ErrorKind, Read};
use tracing::trace;

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const ZSTD_MAGIC: &[u8] = &[0x28, 0xb5, 0x2f, 0xfd];
const TAR_MAGIC_OFFSET: usize = 257;
const TAR_MAGIC: &[u8] = b"ustar";
const TAR_BLOCK: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Zstd,
}

impl Compression {
    /// Identify the format from the first bytes of a stream.
    ///
    /// `None` is reported for an uncompressed tar (ustar magic, or an empty
    /// archive consisting only of zero blocks).
    pub fn detect(head: &[u8]) -> Option<Self> {
        if head.starts_with(GZIP_MAGIC) {
            Some(Self::Gzip)
        } else if head.starts_with(ZSTD_MAGIC) {
            Some(Self::Zstd)
        } else if head.len() >= TAR_MAGIC_OFFSET + TAR_MAGIC.len()
            && &head[TAR_MAGIC_OFFSET..TAR_MAGIC_OFFSET + TAR_MAGIC.len()] == TAR_MAGIC
        {
            Some(Self::None)
        } else if head.len() == TAR_BLOCK && head.iter().all(|&b| b == 0) {
            Some(Self::None)
        } else {
            None
        }
    }
}

/// Turns a raw blob stream into its decompressed contents.
pub trait Decompressor: Send + Sync {
    fn open(&self, reader: Box<dyn Read>) -> Result<Box<dyn Read>, StoreError>;
}

/// Sniffs gzip, zstd, or plain tar and wraps the stream accordingly.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoDecompressor;

impl Decompressor for AutoDecompressor {
    fn open(&self, mut reader: Box<dyn Read>) -> Result<Box<dyn Read>, StoreError> {
        let head = read_head(&mut reader, TAR_BLOCK)?;
        let format = Compression::detect(&head).ok_or_else(|| {
            StoreError::UnsupportedCompression(hex::encode(&head[..head.len().min(8)]))
        })?;
        trace!("detected layer compression {format:?}");

        let stream = Cursor::new(head).chain(reader);
        Ok(match format {
            Compression::None => Box::new(stream),
            Compression::Gzip => Box::new(MultiGzDecoder::new(stream)),
            Compression::Zstd => Box::new(zstd::stream::read::Decoder::new(stream)?),
        })
    }
}

// Reads until `limit` bytes or EOF, so a short first read cannot hide the magic.
fn read_head(reader: &mut dyn Read, limit: usize) -> Result<Vec<u8>, StoreError> {
    let mut head = vec![0u8; limit];
    let mut filled = 0;
    while filled < limit {
        match reader.read(&mut head[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    head.truncate(filled);
    Ok(head)
}
