use crate::layout::ImageLayout;
use crate::StoreError;
use ocirootfs_schema::Descriptor;
use sha2::{Digest as _, Sha256, Sha512};
use std::io::{self, BufReader, Read, Write};

#[derive(Debug, Default)]
pub struct IntegrityReport {
    pub checked: usize,
    pub passed: usize,
    pub failed: Vec<IntegrityFailure>,
}

#[derive(Debug)]
pub struct IntegrityFailure {
    pub digest: String,
    pub reason: String,
}

/// Adapts a `sha2` hasher to `io::Write` so blobs can be streamed through it.
struct HashWriter<D>(D);

impl<D: sha2::Digest> Write for HashWriter<D> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn stream_hash<D: sha2::Digest>(reader: &mut impl Read) -> Result<(String, u64), StoreError> {
    let mut writer = HashWriter(D::new());
    let size = io::copy(reader, &mut writer)?;
    Ok((hex::encode(writer.0.finalize()), size))
}

/// Recompute a blob's digest and compare it (and a non-zero descriptor size)
/// against the descriptor.
pub fn verify_blob(layout: &ImageLayout, descriptor: &Descriptor) -> Result<(), StoreError> {
    let digest = &descriptor.digest;
    let mut reader = BufReader::new(layout.open_blob(digest)?);

    let (actual, size) = match digest.algorithm() {
        "sha256" => stream_hash::<Sha256>(&mut reader)?,
        "sha512" => stream_hash::<Sha512>(&mut reader)?,
        other => return Err(StoreError::UnsupportedAlgorithm(other.to_owned())),
    };

    if actual != digest.encoded() {
        return Err(StoreError::IntegrityFailure {
            digest: digest.clone(),
            actual,
        });
    }
    if descriptor.size != 0 && descriptor.size != size {
        return Err(StoreError::SizeMismatch {
            digest: digest.clone(),
            expected: descriptor.size,
            actual: size,
        });
    }
    Ok(())
}

/// Verify every descriptor, collecting failures instead of stopping at the first.
pub fn verify_descriptors(layout: &ImageLayout, descriptors: &[Descriptor]) -> IntegrityReport {
    let mut report = IntegrityReport {
        checked: descriptors.len(),
        ..Default::default()
    };

    for desc in descriptors {
        match verify_blob(layout, desc) {
            Ok(()) => report.passed += 1,
            Err(StoreError::IntegrityFailure { actual, .. }) => {
                report.failed.push(IntegrityFailure {
                    digest: desc.digest.to_string(),
                    reason: format!("blob hash mismatch: got {actual}"),
                });
            }
            Err(e) => {
                report.failed.push(IntegrityFailure {
                    digest: desc.digest.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    report
}
