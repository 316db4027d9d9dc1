use crate::CoreError;
use ocirootfs_schema::{Descriptor, Index, Manifest, MediaType, Platform, PlatformMatcher};
use ocirootfs_store::ImageLayout;
use serde::Serialize;
use tracing::debug;

/// What a selected top-level descriptor points at, decided once from its
/// media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestTarget {
    NestedIndex,
    DirectManifest,
    Unsupported(MediaType),
}

impl ManifestTarget {
    pub fn of(media_type: &MediaType) -> Self {
        if media_type.is_index() {
            Self::NestedIndex
        } else if media_type.is_manifest() {
            Self::DirectManifest
        } else {
            Self::Unsupported(media_type.clone())
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedImage {
    /// The `index.json` entry the reference selected.
    pub entry: Descriptor,
    /// The manifest finally chosen (equal to `entry` unless it was a nested index).
    pub descriptor: Descriptor,
    pub manifest: Manifest,
}

/// Pick the top-level entry for `reference`; an empty reference only works
/// when the index lists exactly one image.
pub fn select_entry<'a>(index: &'a Index, reference: &str) -> Result<&'a Descriptor, CoreError> {
    if index.manifests.is_empty() {
        return Err(CoreError::EmptyIndex);
    }

    if reference.is_empty() {
        return match index.manifests.as_slice() {
            [only] => Ok(only),
            many => Err(CoreError::AmbiguousReference { count: many.len() }),
        };
    }

    index
        .manifests
        .iter()
        .find(|desc| desc.ref_name() == Some(reference))
        .ok_or_else(|| CoreError::ReferenceNotFound(reference.to_owned()))
}

/// Candidate platform of a descriptor; an undeclared platform matches only
/// wildcard requests.
fn declared_platform(desc: &Descriptor) -> Platform {
    desc.platform.clone().unwrap_or_default()
}

fn select_from_image_index<'a>(
    nested: &'a Index,
    index_desc: &Descriptor,
    platform: Option<&Platform>,
    matcher: &dyn PlatformMatcher,
) -> Result<&'a Descriptor, CoreError> {
    match platform {
        None => nested
            .manifests
            .first()
            .ok_or_else(|| CoreError::EmptyImageIndex {
                digest: index_desc.digest.clone(),
            }),
        Some(requested) => nested
            .manifests
            .iter()
            .find(|desc| matcher.satisfies(&declared_platform(desc), requested))
            .ok_or_else(|| CoreError::PlatformNotFound {
                platform: requested.to_string(),
                digest: index_desc.digest.clone(),
            }),
    }
}

/// Walk `index.json` (and a nested image index, if the entry is one) down to
/// exactly one manifest. First match in declared order wins everywhere.
pub fn resolve_manifest(
    layout: &ImageLayout,
    reference: &str,
    platform: Option<&Platform>,
    matcher: &dyn PlatformMatcher,
) -> Result<ResolvedImage, CoreError> {
    let index = layout.read_index()?;
    let entry = select_entry(&index, reference)?;
    debug!(
        "selected index entry {} ({})",
        entry.digest,
        entry.ref_name().unwrap_or("<unnamed>")
    );

    let descriptor = match ManifestTarget::of(&entry.media_type) {
        ManifestTarget::NestedIndex => {
            let nested = layout.read_image_index(entry)?;
            let chosen = select_from_image_index(&nested, entry, platform, matcher)?;
            debug!(
                "image index {} resolved to manifest {}",
                entry.digest.short(),
                chosen.digest
            );
            chosen.clone()
        }
        ManifestTarget::DirectManifest => {
            if let Some(requested) = platform {
                let declared = declared_platform(entry);
                if !matcher.satisfies(&declared, requested) {
                    return Err(CoreError::PlatformMismatch {
                        requested: requested.to_string(),
                        declared: if entry.platform.is_some() {
                            declared.to_string()
                        } else {
                            "none".to_owned()
                        },
                        digest: entry.digest.clone(),
                    });
                }
            }
            entry.clone()
        }
        ManifestTarget::Unsupported(media_type) => {
            return Err(CoreError::UnexpectedMediaType {
                media_type,
                digest: entry.digest.clone(),
            });
        }
    };

    let manifest = layout.read_manifest(&descriptor)?;
    debug!(
        "manifest {} has {} layers",
        descriptor.digest.short(),
        manifest.layers.len()
    );
    Ok(ResolvedImage {
        entry: entry.clone(),
        descriptor,
        manifest,
    })
}
