//! Content digests of the form `<algorithm>:<encoded>`.
//!
//! A `Digest` is validated on construction, so the blob path derived from it
//! can never escape the `blobs/` directory of a layout.

use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest {
    algorithm: String,
    encoded: String,
}

impl Digest {
    pub fn parse(value: &str) -> Result<Self, SchemaError> {
        let invalid = |reason: &str| SchemaError::InvalidDigest {
            value: value.to_owned(),
            reason: reason.to_owned(),
        };

        let (algorithm, encoded) = value
            .split_once(':')
            .ok_or_else(|| invalid("missing ':' separator"))?;

        if !is_valid_algorithm(algorithm) {
            return Err(invalid("malformed algorithm"));
        }
        if encoded.is_empty()
            || !encoded
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'=' | b'_' | b'-'))
        {
            return Err(invalid("malformed encoded part"));
        }

        let expected_len = match algorithm {
            "sha256" => Some(64),
            "sha512" => Some(128),
            _ => None,
        };
        if let Some(len) = expected_len {
            if encoded.len() != len {
                return Err(invalid(&format!("{algorithm} requires {len} hex characters")));
            }
            if !encoded
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
            {
                return Err(invalid("expected lowercase hex"));
            }
        }

        Ok(Self {
            algorithm: algorithm.to_owned(),
            encoded: encoded.to_owned(),
        })
    }

    /// Build a digest from an algorithm and an already-encoded hash.
    pub fn from_parts(algorithm: &str, encoded: &str) -> Result<Self, SchemaError> {
        Self::parse(&format!("{algorithm}:{encoded}"))
    }

    #[inline]
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    #[inline]
    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    /// Layout-relative path of the blob: `blobs/<algorithm>/<encoded>`.
    pub fn blob_path(&self) -> PathBuf {
        PathBuf::from("blobs")
            .join(&self.algorithm)
            .join(&self.encoded)
    }

    /// First 12 characters of the encoded hash, for display.
    pub fn short(&self) -> &str {
        &self.encoded[..12.min(self.encoded.len())]
    }
}

// algorithm := component ([+._-] component)*, component := [a-z0-9]+
fn is_valid_algorithm(algorithm: &str) -> bool {
    !algorithm.is_empty()
        && algorithm
            .split(['+', '.', '_', '-'])
            .all(|c| !c.is_empty() && c.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()))
}

impl FromStr for Digest {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Digest {
    type Error = SchemaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Digest> for String {
    fn from(d: Digest) -> Self {
        d.to_string()
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.encoded)
    }
}
