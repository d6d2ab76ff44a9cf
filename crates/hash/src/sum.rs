//! Recorded input digests

use crate::{decode_base58, encode_base58, Hasher};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use vessel_errors::{Error, RecipeError};

/// Digest algorithm of a recorded sum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SumAlgo {
    /// BLAKE2b-256, value encoded as base58
    B2,
    /// SHA-256, value encoded as hex
    Sha256,
    /// HTTP `ETag` header comparison only
    Etag,
}

impl SumAlgo {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::B2 => "b2",
            Self::Sha256 => "sha256",
            Self::Etag => "etag",
        }
    }
}

impl fmt::Display for SumAlgo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SumAlgo {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "b2" | "blake2b" => Ok(Self::B2),
            "sha256" => Ok(Self::Sha256),
            "etag" => Ok(Self::Etag),
            other => Err(RecipeError::BadScript {
                name: String::new(),
                message: format!("unknown sum algorithm '{other}'"),
            }
            .into()),
        }
    }
}

/// An `(algorithm, digest)` pair in its textual encoding
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sum {
    pub algo: SumAlgo,
    pub value: String,
}

impl Sum {
    pub fn new(algo: SumAlgo, value: impl Into<String>) -> Self {
        Self {
            algo,
            value: value.into(),
        }
    }

    /// BLAKE2b sum of a byte slice
    #[must_use]
    pub fn b2_of(data: &[u8]) -> Self {
        Self::new(SumAlgo::B2, crate::Hash::from_data(data).to_base58())
    }

    /// Raw digest bytes fed into package signatures
    ///
    /// # Errors
    /// Returns an error if the textual value does not decode under its algorithm.
    pub fn digest_bytes(&self) -> Result<Vec<u8>, Error> {
        match self.algo {
            SumAlgo::B2 => decode_base58(&self.value),
            SumAlgo::Sha256 => hex::decode(&self.value).map_err(|e| {
                RecipeError::BadScript {
                    name: String::new(),
                    message: format!("invalid sha256 sum '{}': {e}", self.value),
                }
                .into()
            }),
            SumAlgo::Etag => Ok(self.value.as_bytes().to_vec()),
        }
    }

    /// Whether this sum can be checked against streamed bytes
    #[must_use]
    pub fn is_content_digest(&self) -> bool {
        !matches!(self.algo, SumAlgo::Etag)
    }

    /// Compare against an `ETag` response header, ignoring surrounding quotes
    #[must_use]
    pub fn matches_etag(&self, header: &str) -> bool {
        self.algo == SumAlgo::Etag && self.value.trim_matches('"') == header.trim_matches('"')
    }
}

impl fmt::Display for Sum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algo, self.value)
    }
}

/// Streaming hasher for a content sum algorithm
pub enum SumHasher {
    B2(Hasher),
    Sha256(Sha256),
}

impl SumHasher {
    /// Hasher for `algo`, or `None` for header-only algorithms
    #[must_use]
    pub fn for_algo(algo: SumAlgo) -> Option<Self> {
        match algo {
            SumAlgo::B2 => Some(Self::B2(Hasher::new())),
            SumAlgo::Sha256 => Some(Self::Sha256(Sha256::new())),
            SumAlgo::Etag => None,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::B2(h) => h.update(data),
            Self::Sha256(h) => Digest::update(h, data),
        }
    }

    #[must_use]
    pub fn finalize(self) -> Sum {
        match self {
            Self::B2(h) => Sum::new(SumAlgo::B2, h.finalize().to_base58()),
            Self::Sha256(h) => Sum::new(SumAlgo::Sha256, hex::encode(h.finalize())),
        }
    }
}

impl fmt::Debug for SumHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::B2(_) => f.write_str("SumHasher::B2"),
            Self::Sha256(_) => f.write_str("SumHasher::Sha256"),
        }
    }
}

/// Encode raw digest bytes under `algo`
#[must_use]
pub fn encode_digest(algo: SumAlgo, digest: &[u8]) -> String {
    match algo {
        SumAlgo::B2 => encode_base58(digest),
        SumAlgo::Sha256 => hex::encode(digest),
        SumAlgo::Etag => String::from_utf8_lossy(digest).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_streaming() {
        let mut hasher = SumHasher::for_algo(SumAlgo::Sha256).unwrap();
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(
            hasher.finalize().value,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_digest_bytes_per_algo() {
        let b2 = Sum::b2_of(b"hello world");
        assert_eq!(b2.digest_bytes().unwrap().len(), 32);

        let etag = Sum::new(SumAlgo::Etag, "\"abc\"");
        assert_eq!(etag.digest_bytes().unwrap(), b"\"abc\"");
        assert!(etag.matches_etag("abc"));
        assert!(!etag.is_content_digest());

        let bad = Sum::new(SumAlgo::Sha256, "zz");
        assert!(bad.digest_bytes().is_err());
        assert_eq!(encode_digest(SumAlgo::Sha256, &[0xab]), "ab");
    }

    #[test]
    fn test_algo_parse() {
        assert_eq!("b2".parse::<SumAlgo>().unwrap(), SumAlgo::B2);
        assert_eq!("sha256".parse::<SumAlgo>().unwrap(), SumAlgo::Sha256);
        assert!("md5".parse::<SumAlgo>().is_err());
        assert_eq!(serde_json::to_string(&SumAlgo::Etag).unwrap(), "\"etag\"");
    }
}
