//! Platform descriptions and the compatibility rule used to pick a manifest.
//!
//! Matching is asymmetric: a *candidate* platform (declared by a descriptor)
//! satisfies a *requested* platform when every non-empty requested field
//! agrees with the candidate after normalization. Empty requested fields act
//! as wildcards.

use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub os: String,
    #[serde(rename = "os.version", default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(rename = "os.features", default, skip_serializing_if = "Vec::is_empty")]
    pub os_features: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl Platform {
    pub fn new(os: &str, architecture: &str, variant: Option<&str>) -> Self {
        Self {
            architecture: architecture.to_owned(),
            os: os.to_owned(),
            variant: variant.map(str::to_owned),
            ..Self::default()
        }
    }

    /// Parse `os[/arch[/variant]]`.
    pub fn parse(value: &str) -> Result<Self, SchemaError> {
        let invalid = |reason: &str| SchemaError::InvalidPlatform {
            value: value.to_owned(),
            reason: reason.to_owned(),
        };

        let parts: Vec<&str> = value.split('/').collect();
        if parts.len() > 3 {
            return Err(invalid("expected os[/arch[/variant]]"));
        }
        if parts.iter().any(|p| p.trim().is_empty()) {
            return Err(invalid("empty component"));
        }

        Ok(Self::new(
            parts[0].trim(),
            parts.get(1).map_or("", |s| s.trim()),
            parts.get(2).map(|s| s.trim()),
        ))
    }

    /// The platform this process runs on, normalized.
    pub fn host() -> Self {
        Self::new(std::env::consts::OS, std::env::consts::ARCH, None).normalize()
    }

    /// Canonicalize os/architecture/variant spellings.
    #[must_use]
    pub fn normalize(&self) -> Self {
        let os = match self.os.to_lowercase().as_str() {
            "macos" => "darwin".to_owned(),
            other => other.to_owned(),
        };
        let (architecture, variant) = normalize_arch(
            &self.architecture.to_lowercase(),
            &self.variant.as_deref().unwrap_or_default().to_lowercase(),
        );
        Self {
            architecture,
            os,
            os_version: self.os_version.clone(),
            os_features: self.os_features.clone(),
            variant: (!variant.is_empty()).then_some(variant),
        }
    }

    /// Fill the implied variant of architectures that have one.
    #[must_use]
    fn with_default_variant(mut self) -> Self {
        if self.variant.is_none() {
            self.variant = match self.architecture.as_str() {
                "arm64" => Some("v8".to_owned()),
                "arm" => Some("v7".to_owned()),
                _ => None,
            };
        }
        self
    }
}

fn normalize_arch(arch: &str, variant: &str) -> (String, String) {
    let (arch, variant) = match arch {
        "i386" | "i686" | "386" => ("386", ""),
        "x86_64" | "x86-64" | "amd64" => ("amd64", if variant == "v1" { "" } else { variant }),
        "aarch64" | "arm64" => (
            "arm64",
            match variant {
                "8" | "v8" => "v8",
                other => other,
            },
        ),
        "armhf" => ("arm", "v7"),
        "armel" => ("arm", "v6"),
        "arm" => (
            "arm",
            match variant {
                "5" => "v5",
                "6" => "v6",
                "7" => "v7",
                "8" => "v8",
                other => other,
            },
        ),
        other => (other, variant),
    };
    (arch.to_owned(), variant.to_owned())
}

impl FromStr for Platform {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let os = if self.os.is_empty() { "unknown" } else { &self.os };
        f.write_str(os)?;
        if !self.architecture.is_empty() {
            write!(f, "/{}", self.architecture)?;
            if let Some(variant) = self.variant.as_deref().filter(|v| !v.is_empty()) {
                write!(f, "/{variant}")?;
            }
        }
        Ok(())
    }
}

/// Decides whether a manifest declared for one platform is usable on another.
pub trait PlatformMatcher: Send + Sync {
    fn satisfies(&self, candidate: &Platform, requested: &Platform) -> bool;
}

/// Normalizing matcher with wildcard semantics for empty requested fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultMatcher;

impl PlatformMatcher for DefaultMatcher {
    fn satisfies(&self, candidate: &Platform, requested: &Platform) -> bool {
        let want = requested.normalize();
        let have = candidate.normalize().with_default_variant();

        let field_ok = |want: &str, have: &str| want.is_empty() || want == have;

        field_ok(&want.os, &have.os)
            && field_ok(&want.architecture, &have.architecture)
            && field_ok(
                want.variant.as_deref().unwrap_or_default(),
                have.variant.as_deref().unwrap_or_default(),
            )
    }
}
