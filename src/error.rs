//! # Errors
//!
//! Errors raised while decoding and verifying mdoc presentations.
//!
//! Decode-time problems (`Malformed`) abort immediately. The remaining
//! variants are raised by individual verification checks and are collected
//! into the `errors` list of a [`crate::VerificationResult`].

use thiserror::Error;

/// Result type for mdoc operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// mdoc decoding and verification errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Invalid CBOR, unrecognized tag, wrong arity or wrong primitive type
    /// for a fixed-shape structure.
    #[error("malformed input: {0}")]
    Malformed(String),

    /// Invalid signature or MAC, missing certificate chain, or an
    /// unsupported digest/signature algorithm.
    #[error("cryptographic failure: {0}")]
    Crypto(String),

    /// Digest mismatch, validity window violation, a device-signed element
    /// outside its authorization scope, or a late registry installation.
    #[error("policy violation: {0}")]
    Policy(String),

    /// The operation needs a capability that is not available (e.g. key
    /// agreement for MAC-based device authentication).
    #[error("not supported: {0}")]
    Unimplemented(String),
}

impl Error {
    /// True if the error reports a missing capability rather than a failed
    /// check.
    #[must_use]
    pub const fn is_unimplemented(&self) -> bool {
        matches!(self, Self::Unimplemented(_))
    }
}

impl From<ciborium::de::Error<std::io::Error>> for Error {
    fn from(e: ciborium::de::Error<std::io::Error>) -> Self {
        Self::Malformed(format!("invalid CBOR: {e}"))
    }
}

impl From<ciborium::ser::Error<std::io::Error>> for Error {
    fn from(e: ciborium::ser::Error<std::io::Error>) -> Self {
        Self::Malformed(format!("issue encoding CBOR: {e}"))
    }
}

impl From<coset::CoseError> for Error {
    fn from(e: coset::CoseError) -> Self {
        Self::Malformed(format!("invalid COSE structure: {e}"))
    }
}

impl From<base64ct::Error> for Error {
    fn from(e: base64ct::Error) -> Self {
        Self::Malformed(format!("invalid base64url: {e}"))
    }
}
