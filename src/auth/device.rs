use std::future::Future;

use coset::iana::Algorithm;
use coset::{mac_structure_data, CoseMac0, MacContext};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use super::{header_algorithm, PublicKey};
use crate::cose_key::CoseKey;
use crate::error::{Error, Result};
use crate::mdoc::{DeviceAuth, Document};
use crate::mso::MobileSecurityObject;
use crate::session::SessionTranscript;

/// HKDF info label for the device MAC key.
const EMAC_KEY: &[u8] = b"EMacKey";

/// Key agreement between the verifier's ephemeral key and the device key,
/// required to verify MAC-based device authentication.
pub trait KeyAgreement: Send + Sync {
    /// Shared secret (ECDH `Z_AB`) with the device key.
    fn shared_secret(
        &self, device_key: &CoseKey,
    ) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

/// The default [`KeyAgreement`]: no verifier key is available, so
/// MAC-based device authentication is reported as not supported.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoKeyAgreement;

impl KeyAgreement for NoKeyAgreement {
    async fn shared_secret(&self, _: &CoseKey) -> Result<Vec<u8>> {
        Err(Error::Unimplemented("MAC-based device authentication requires key agreement".to_string()))
    }
}

/// Verify the document's device signature or MAC over the
/// `DeviceAuthentication` structure for `transcript`.
///
/// # Errors
///
/// Returns a `Crypto` error if device authentication is missing or invalid,
/// or an `Unimplemented` error if MAC verification needs a key agreement
/// capability that is not available.
pub async fn verify_device(
    document: &Document, mso: &MobileSecurityObject, transcript: &SessionTranscript,
    key_agreement: &impl KeyAgreement,
) -> Result<()> {
    let Some(device_signed) = &document.device_signed else {
        return Err(Error::Crypto("document has no deviceSigned".to_string()));
    };
    let device_key = &mso.device_key_info.device_key;
    let payload =
        transcript.device_authentication_bytes(&document.doc_type, &device_signed.name_spaces)?;

    match &device_signed.device_auth {
        DeviceAuth::Signature(sign1) => {
            if sign1.payload.is_some() {
                return Err(Error::Crypto("deviceSignature payload must be detached".to_string()));
            }
            let Some(expected) = device_key.signature_algorithm() else {
                return Err(Error::Crypto("device key does not support signing".to_string()));
            };
            let alg = header_algorithm(&sign1.protected.header);
            if alg != Some(expected) {
                return Err(Error::Crypto(format!(
                    "deviceSignature algorithm {alg:?} does not match device key {expected:?}"
                )));
            }
            let key = PublicKey::from_cose_key(device_key)?;
            sign1.verify_detached_signature(&payload, &[], |sig, data| key.verify(data, sig))?;
            tracing::debug!("device signature verified");
        }
        DeviceAuth::Mac(mac0) => {
            if mac0.payload.is_some() {
                return Err(Error::Crypto("deviceMac payload must be detached".to_string()));
            }
            let alg = header_algorithm(&mac0.protected.header);
            if alg != Some(Algorithm::HMAC_256_256) {
                return Err(Error::Crypto(format!("unsupported deviceMac algorithm {alg:?}")));
            }

            let shared_secret = key_agreement.shared_secret(device_key).await?;
            let mac_key = emac_key(&shared_secret, transcript)?;

            verify_mac(mac0, &payload, &mac_key)?;
            tracing::debug!("device MAC verified");
        }
    }

    Ok(())
}

// HMAC-SHA256 over the `MAC_structure` of a detached-payload COSE_Mac0.
fn verify_mac(mac0: &CoseMac0, payload: &[u8], mac_key: &[u8]) -> Result<()> {
    let data = mac_structure_data(MacContext::CoseMac0, mac0.protected.clone(), &[], payload);
    let mut mac = Hmac::<Sha256>::new_from_slice(mac_key)
        .map_err(|e| Error::Crypto(format!("invalid MAC key: {e}")))?;
    mac.update(&data);
    mac.verify_slice(&mac0.tag).map_err(|_| Error::Crypto("deviceMac tag mismatch".to_string()))
}

/// `EMacKey = HKDF-SHA256(ikm = Z_AB, salt = SHA-256(SessionTranscriptBytes), info = "EMacKey", L = 32)`
///
/// # Errors
///
/// Returns an error if the transcript cannot be encoded.
pub fn emac_key(shared_secret: &[u8], transcript: &SessionTranscript) -> Result<[u8; 32]> {
    let salt = Sha256::digest(transcript.to_bytes()?);
    let hkdf = Hkdf::<Sha256>::new(Some(&salt), shared_secret);
    let mut okm = [0u8; 32];
    hkdf.expand(EMAC_KEY, &mut okm)
        .map_err(|e| Error::Crypto(format!("issue deriving MAC key: {e}")))?;
    Ok(okm)
}
