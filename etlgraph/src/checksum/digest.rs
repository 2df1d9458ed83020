//! The fixed-length digest used for step fingerprints.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// A SHA-256 digest, displayed and persisted as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Checksum([u8; 32]);

impl Checksum {
    /// Length of the hex representation.
    pub const HEX_LEN: usize = 64;

    /// Wraps raw digest bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hashes a byte slice.
    #[must_use]
    pub fn of_bytes(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Combines a local hash with the full hashes of the direct dependencies.
    ///
    /// Dependency checksums are sorted before hashing, so the result does not
    /// depend on the order they are supplied in.
    #[must_use]
    pub fn fold(local: &Self, dependencies: impl IntoIterator<Item = Self>) -> Self {
        let mut deps: Vec<Self> = dependencies.into_iter().collect();
        deps.sort_unstable();

        let mut hasher = Sha256::new();
        hasher.update(local.0);
        for dep in &deps {
            hasher.update(dep.0);
        }
        Self(hasher.finalize().into())
    }

    /// Stable stand-in for an external whose content cannot be fingerprinted.
    #[must_use]
    pub fn placeholder(reference: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"etlgraph:unpinned-external:");
        hasher.update(reference.as_bytes());
        Self(hasher.finalize().into())
    }

    /// Returns the lowercase hex form.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({})", &self.to_hex()[..12])
    }
}

/// Error returned when a hex string is not a valid checksum.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid checksum '{0}': expected 64 hex characters")]
pub struct ParseChecksumError(String);

impl FromStr for Checksum {
    type Err = ParseChecksumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| ParseChecksumError(s.to_string()))?;
        Ok(Self(bytes))
    }
}

impl Serialize for Checksum {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Checksum {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
