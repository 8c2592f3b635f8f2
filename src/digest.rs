//! # Digest Engine
//!
//! Content digests for selective disclosure. A digest is always computed
//! over the full tag-24 encoding of an `IssuerSignedItem`
//! (`#6.24(bstr .cbor IssuerSignedItem)`), so issuer and verifier hash
//! byte-identical input.

use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::cbor::Tag24;
use crate::error::{Error, Result};
use crate::mdoc::IssuerSignedItem;

/// Message digest algorithms usable in an MSO.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DigestAlgorithm {
    /// SHA-256
    #[default]
    Sha256,

    /// SHA-384
    Sha384,

    /// SHA-512
    Sha512,
}

impl DigestAlgorithm {
    /// Algorithm name as it appears in the MSO.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256 => "SHA-256",
            Self::Sha384 => "SHA-384",
            Self::Sha512 => "SHA-512",
        }
    }

    /// Hash `data`.
    #[must_use]
    pub fn hash(&self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha256 => Sha256::digest(data).to_vec(),
            Self::Sha384 => Sha384::digest(data).to_vec(),
            Self::Sha512 => Sha512::digest(data).to_vec(),
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "SHA-256" => Ok(Self::Sha256),
            "SHA-384" => Ok(Self::Sha384),
            "SHA-512" => Ok(Self::Sha512),
            other => Err(Error::Crypto(format!("unsupported digest algorithm `{other}`"))),
        }
    }
}

/// Digest of an issuer-signed item, over the item's retained tag-24 bytes.
///
/// # Errors
///
/// Returns an error if the tag-24 wrapper cannot be encoded.
pub fn digest(item: &Tag24<IssuerSignedItem>, algorithm: DigestAlgorithm) -> Result<Vec<u8>> {
    Ok(algorithm.hash(&item.to_vec()?))
}
