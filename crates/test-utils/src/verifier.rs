//! A relying party's ephemeral reader key and request parameters.

use anyhow::{anyhow, Result};
use credibil_mdoc::auth::KeyAgreement;
use credibil_mdoc::cose_key::CoseKey;
use credibil_mdoc::{Error, SessionTranscript, VerificationContext};
use p256::ecdsa::SigningKey;
use p256::pkcs8::DecodePrivateKey as _;

/// The verifier's client identifier.
pub const CLIENT_ID: &str = "https://verifier.credibil.io";

/// The verifier's response endpoint.
pub const RESPONSE_URI: &str = "https://verifier.credibil.io/response";

/// The nonce sent in the authorization request.
pub const NONCE: &str = "tvkJ6nM2cR1pZ7bq";

/// The verification context for [`CLIENT_ID`], [`NONCE`] and
/// [`RESPONSE_URI`].
#[must_use]
pub fn context() -> VerificationContext {
    VerificationContext::new(NONCE, CLIENT_ID).response_uri(RESPONSE_URI)
}

/// The session transcript the holder builds for [`context`].
///
/// # Panics
///
/// Panics if the transcript cannot be encoded.
#[must_use]
pub fn transcript() -> SessionTranscript {
    SessionTranscript::from_context(&context()).expect("should build transcript")
}

/// An ephemeral P-256 reader key used for MAC-based device authentication.
#[derive(Clone, Debug)]
pub struct ReaderKey {
    secret: SigningKey,
}

impl ReaderKey {
    /// A freshly generated reader key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be generated.
    pub fn new() -> Result<Self> {
        let key_pair = rcgen::KeyPair::generate()?;
        let secret = SigningKey::from_pkcs8_der(&key_pair.serialize_der())
            .map_err(|e| anyhow!("issue decoding reader key: {e}"))?;
        Ok(Self { secret })
    }

    /// The reader's public key, shared with the device.
    #[must_use]
    pub fn public_key(&self) -> p256::PublicKey {
        p256::PublicKey::from(self.secret.verifying_key())
    }
}

impl KeyAgreement for ReaderKey {
    async fn shared_secret(&self, device_key: &CoseKey) -> credibil_mdoc::Result<Vec<u8>> {
        let device_key = p256::PublicKey::from_sec1_bytes(&device_key.to_sec1()?)
            .map_err(|e| Error::Crypto(format!("invalid device key: {e}")))?;
        let shared_secret =
            p256::ecdh::diffie_hellman(self.secret.as_nonzero_scalar(), device_key.as_affine());
        Ok(shared_secret.raw_secret_bytes().to_vec())
    }
}
