//! OCI image-layout schema types for ocirootfs.
//!
//! This crate defines the document layer: content digests (`Digest`), media
//! types (`MediaType`), descriptors, indexes and manifests as they appear in an
//! OCI image layout, and the platform compatibility rules (`Platform`,
//! `PlatformMatcher`) used to pick one manifest out of a multi-platform index.

pub mod digest;
pub mod document;
pub mod media_type;
pub mod platform;

pub use digest::Digest;
pub use document::{decode, Descriptor, Index, Manifest, OciLayout, ANNOTATION_REF_NAME};
pub use media_type::MediaType;
pub use platform::{DefaultMatcher, Platform, PlatformMatcher};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("invalid digest '{value}': {reason}")]
    InvalidDigest { value: String, reason: String },
    #[error("invalid platform '{value}': {reason}")]
    InvalidPlatform { value: String, reason: String },
    #[error("failed to decode {document}: {source}")]
    Decode {
        document: String,
        #[source]
        source: serde_json::Error,
    },
}
