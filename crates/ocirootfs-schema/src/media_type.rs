use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MediaType {
    ImageIndex,
    ImageManifest,
    ImageConfig,
    ImageLayer,
    ImageLayerGzip,
    ImageLayerZstd,
    DockerManifestList,
    DockerManifest,
    DockerLayerGzip,
    Other(String),
}

impl MediaType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::ImageIndex => "application/vnd.oci.image.index.v1+json",
            Self::ImageManifest => "application/vnd.oci.image.manifest.v1+json",
            Self::ImageConfig => "application/vnd.oci.image.config.v1+json",
            Self::ImageLayer => "application/vnd.oci.image.layer.v1.tar",
            Self::ImageLayerGzip => "application/vnd.oci.image.layer.v1.tar+gzip",
            Self::ImageLayerZstd => "application/vnd.oci.image.layer.v1.tar+zstd",
            Self::DockerManifestList => {
                "application/vnd.docker.distribution.manifest.list.v2+json"
            }
            Self::DockerManifest => "application/vnd.docker.distribution.manifest.v2+json",
            Self::DockerLayerGzip => "application/vnd.docker.image.rootfs.diff.tar.gzip",
            Self::Other(s) => s,
        }
    }

    /// True for documents that list per-platform manifests.
    pub fn is_index(&self) -> bool {
        matches!(self, Self::ImageIndex | Self::DockerManifestList)
    }

    pub fn is_manifest(&self) -> bool {
        matches!(self, Self::ImageManifest | Self::DockerManifest)
    }
}

impl From<&str> for MediaType {
    fn from(s: &str) -> Self {
        match s {
            "application/vnd.oci.image.index.v1+json" => Self::ImageIndex,
            "application/vnd.oci.image.manifest.v1+json" => Self::ImageManifest,
            "application/vnd.oci.image.config.v1+json" => Self::ImageConfig,
            "application/vnd.oci.image.layer.v1.tar" => Self::ImageLayer,
            "application/vnd.oci.image.layer.v1.tar+gzip" => Self::ImageLayerGzip,
            "application/vnd.oci.image.layer.v1.tar+zstd" => Self::ImageLayerZstd,
            "application/vnd.docker.distribution.manifest.list.v2+json" => {
                Self::DockerManifestList
            }
            "application/vnd.docker.distribution.manifest.v2+json" => Self::DockerManifest,
            "application/vnd.docker.image.rootfs.diff.tar.gzip" => Self::DockerLayerGzip,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl From<String> for MediaType {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<MediaType> for String {
    fn from(m: MediaType) -> Self {
        m.as_str().to_owned()
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
