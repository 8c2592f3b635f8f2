//! # mdoc Verification
//!
//! Verification of ISO/IEC 18013-5 mobile document (mdoc) credentials
//! presented over [OpenID for Verifiable Presentations](https://openid.net/specs/openid-4-verifiable-presentations-1_0.html).
//!
//! A presentation is a base64url-encoded CBOR `Document` (or
//! `DeviceResponse`). Verification authenticates the issuer's signature
//! over the Mobile Security Object (MSO), checks the MSO's validity window,
//! authenticates the holder's device against the session transcript of the
//! exchange, checks the digest of every disclosed data element, and checks
//! device-signed elements against the device key's authorizations.
//!
//! ```rust,ignore
//! use credibil_mdoc::{VerificationContext, Verifier, VerifierOptions};
//!
//! let verifier = Verifier::new(VerifierOptions::default());
//! let ctx = VerificationContext::new(nonce, client_id).response_uri(response_uri);
//! let result = verifier.verify_presentation(&vp_token, &ctx).await?;
//!
//! if !result.valid {
//!     for error in &result.errors {
//!         tracing::warn!(%error);
//!     }
//! }
//! ```

pub mod auth;
pub mod cbor;
pub mod cose_key;
pub mod digest;
mod error;
pub mod mdoc;
pub mod mso;
pub mod registry;
pub mod session;
mod verifier;

pub use crate::error::{Error, Result};
pub use crate::session::{SessionTranscript, VerificationContext};
pub use crate::verifier::{MergeStrategy, VerificationResult, Verifier, VerifierOptions};
