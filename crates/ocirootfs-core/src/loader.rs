use crate::assemble::{assemble, ReleaseStack};
use crate::layer::Materializer;
use crate::resolve::{resolve_manifest, ResolvedImage};
use crate::rootfs::RootFilesystem;
use crate::CoreError;
use ocirootfs_schema::{DefaultMatcher, Platform, PlatformMatcher};
use ocirootfs_store::{AutoDecompressor, Decompressor, ImageLayout};
use ocirootfs_vfs::{DefaultOverlay, Filesystem, OverlayEngine};
use std::path::Path;
use tracing::{debug, info};

/// Loads root filesystems out of OCI image layouts.
///
/// The decompression codec, overlay engine, and platform matcher are
/// replaceable; `new` wires in the defaults.
pub struct ImageLoader {
    codec: Box<dyn Decompressor>,
    overlay: Box<dyn OverlayEngine>,
    matcher: Box<dyn PlatformMatcher>,
}

impl Default for ImageLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageLoader {
    pub fn new() -> Self {
        Self {
            codec: Box::new(AutoDecompressor),
            overlay: Box::new(DefaultOverlay),
            matcher: Box::new(DefaultMatcher),
        }
    }

    #[must_use]
    pub fn with_codec(mut self, codec: impl Decompressor + 'static) -> Self {
        self.codec = Box::new(codec);
        self
    }

    #[must_use]
    pub fn with_overlay(mut self, overlay: impl OverlayEngine + 'static) -> Self {
        self.overlay = Box::new(overlay);
        self
    }

    #[must_use]
    pub fn with_matcher(mut self, matcher: impl PlatformMatcher + 'static) -> Self {
        self.matcher = Box::new(matcher);
        self
    }

    /// Check the layout version and resolve the manifest without touching
    /// any layer.
    pub fn inspect(
        &self,
        layout: &ImageLayout,
        reference: &str,
        platform: Option<&Platform>,
    ) -> Result<ResolvedImage, CoreError> {
        layout.verify_version()?;
        resolve_manifest(layout, reference, platform, self.matcher.as_ref())
    }

    /// Resolve the image and assemble its root filesystem.
    ///
    /// `scratch` must be an existing writable directory that outlives the
    /// returned filesystem; one temporary file per layer is created in it and
    /// removed on release. On error nothing is left behind and nothing needs
    /// releasing.
    pub fn load(
        &self,
        scratch: &Path,
        layout: &ImageLayout,
        reference: &str,
        platform: Option<&Platform>,
    ) -> Result<RootFilesystem, CoreError> {
        info!(
            "loading image '{}' from {}",
            reference,
            layout.root().display()
        );
        let image = self.inspect(layout, reference, platform)?;
        let materializer = Materializer::new(layout, scratch, self.codec.as_ref());

        let mut releases = ReleaseStack::new();
        let mut filesystems: Vec<Box<dyn Filesystem>> =
            Vec::with_capacity(image.manifest.layers.len());

        for (i, descriptor) in image.manifest.layers.iter().enumerate() {
            let layer = match materializer.materialize(descriptor) {
                Ok(layer) => layer,
                Err(e) => {
                    debug!("layer {i} failed, releasing {} layers", filesystems.len());
                    drop(filesystems);
                    return Err(releases.abort(e));
                }
            };
            let label = format!("layer {} ({})", i, descriptor.digest.short());
            let (fs, release) = layer.into_parts();
            releases.push(label, release);
            filesystems.push(fs);
        }

        let root = assemble(filesystems, releases, self.overlay.as_ref())?;
        info!(
            "loaded {} ({} layers)",
            image.descriptor.digest,
            root.layer_count()
        );
        Ok(root)
    }
}

/// `ImageLoader::load` with the default collaborators.
pub fn load_image(
    scratch: &Path,
    layout: &ImageLayout,
    reference: &str,
    platform: Option<&Platform>,
) -> Result<RootFilesystem, CoreError> {
    ImageLoader::new().load(scratch, layout, reference, platform)
}
