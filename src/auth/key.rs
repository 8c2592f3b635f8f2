use base64ct::{Base64UrlUnpadded, Encoding};
use coset::iana::Algorithm;
use ed25519_dalek::Verifier as _;
use p256::pkcs8::DecodePublicKey as _;
use serde::{Deserialize, Serialize};

use crate::cose_key::{CoseKey, Ec2Curve, OkpCurve};
use crate::error::{Error, Result};

// id-Ed25519
const OID_ED25519: &str = "1.3.101.112";

/// A public key able to verify issuer or device signatures.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PublicKey {
    /// ECDSA P-256 (ES256).
    P256(p256::ecdsa::VerifyingKey),

    /// ECDSA P-384 (ES384).
    P384(p384::ecdsa::VerifyingKey),

    /// Ed25519 (EdDSA).
    Ed25519(ed25519_dalek::VerifyingKey),
}

impl PublicKey {
    /// Key from the subject public key info of a DER-encoded X.509
    /// certificate.
    ///
    /// # Errors
    ///
    /// Returns a `Crypto` error if the certificate cannot be parsed or its key
    /// type is not supported.
    pub fn from_certificate(der: &[u8]) -> Result<Self> {
        let (_, cert) = x509_parser::parse_x509_certificate(der)
            .map_err(|e| Error::Crypto(format!("invalid certificate: {e}")))?;
        let spki = &cert.tbs_certificate.subject_pki;

        if spki.algorithm.algorithm.to_id_string() == OID_ED25519 {
            let bytes = <[u8; 32]>::try_from(&*spki.subject_public_key.data)
                .map_err(|_| Error::Crypto("invalid Ed25519 public key length".to_string()))?;
            let vk = ed25519_dalek::VerifyingKey::from_bytes(&bytes)
                .map_err(|e| Error::Crypto(format!("bad Ed25519 public key: {e}")))?;
            return Ok(Self::Ed25519(vk));
        }

        if let Ok(pk) = p256::PublicKey::from_public_key_der(spki.raw) {
            return Ok(Self::P256(p256::ecdsa::VerifyingKey::from(pk)));
        }
        if let Ok(pk) = p384::PublicKey::from_public_key_der(spki.raw) {
            return Ok(Self::P384(p384::ecdsa::VerifyingKey::from(pk)));
        }

        Err(Error::Crypto(format!(
            "unsupported certificate key algorithm {}",
            spki.algorithm.algorithm.to_id_string()
        )))
    }

    /// Key from a `COSE_Key`.
    ///
    /// # Errors
    ///
    /// Returns a `Crypto` error if the key is invalid or its curve is not
    /// supported.
    pub fn from_cose_key(key: &CoseKey) -> Result<Self> {
        match key {
            CoseKey::Ec2 {
                crv: Ec2Curve::P256, ..
            } => {
                let vk = p256::ecdsa::VerifyingKey::from_sec1_bytes(&key.to_sec1()?)
                    .map_err(|e| Error::Crypto(format!("bad P-256 public key: {e}")))?;
                Ok(Self::P256(vk))
            }
            CoseKey::Ec2 {
                crv: Ec2Curve::P384, ..
            } => {
                let vk = p384::ecdsa::VerifyingKey::from_sec1_bytes(&key.to_sec1()?)
                    .map_err(|e| Error::Crypto(format!("bad P-384 public key: {e}")))?;
                Ok(Self::P384(vk))
            }
            CoseKey::Okp {
                crv: OkpCurve::Ed25519,
                x,
            } => {
                let bytes: [u8; 32] = x
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::Crypto("invalid Ed25519 public key length".to_string()))?;
                let vk = ed25519_dalek::VerifyingKey::from_bytes(&bytes)
                    .map_err(|e| Error::Crypto(format!("bad Ed25519 public key: {e}")))?;
                Ok(Self::Ed25519(vk))
            }
            CoseKey::Ec2 { crv, .. } => {
                Err(Error::Crypto(format!("unsupported device key curve {crv:?}")))
            }
            CoseKey::Okp { crv, .. } => {
                Err(Error::Crypto(format!("unsupported device key curve {crv:?}")))
            }
        }
    }

    /// COSE signature algorithm for this key.
    #[must_use]
    pub const fn algorithm(&self) -> Algorithm {
        match self {
            Self::P256(_) => Algorithm::ES256,
            Self::P384(_) => Algorithm::ES384,
            Self::Ed25519(_) => Algorithm::EdDSA,
        }
    }

    /// Verify `signature` over `msg`. ECDSA signatures are accepted in the
    /// fixed-length `r || s` form used by COSE, or ASN.1 DER.
    ///
    /// # Errors
    ///
    /// Returns a `Crypto` error if the signature is malformed or invalid.
    pub fn verify(&self, msg: &[u8], signature: &[u8]) -> Result<()> {
        let verified = match self {
            Self::P256(vk) => {
                let sig = p256::ecdsa::Signature::from_slice(signature)
                    .or_else(|_| p256::ecdsa::Signature::from_der(signature))
                    .map_err(|e| Error::Crypto(format!("bad ES256 signature: {e}")))?;
                vk.verify(msg, &sig).is_ok()
            }
            Self::P384(vk) => {
                let sig = p384::ecdsa::Signature::from_slice(signature)
                    .or_else(|_| p384::ecdsa::Signature::from_der(signature))
                    .map_err(|e| Error::Crypto(format!("bad ES384 signature: {e}")))?;
                vk.verify(msg, &sig).is_ok()
            }
            Self::Ed25519(vk) => {
                let sig = ed25519_dalek::Signature::from_slice(signature)
                    .map_err(|e| Error::Crypto(format!("bad EdDSA signature: {e}")))?;
                vk.verify(msg, &sig).is_ok()
            }
        };

        if !verified {
            return Err(Error::Crypto("signature verification failed".to_string()));
        }
        Ok(())
    }

    /// The key as a JWK.
    #[must_use]
    pub fn to_jwk(&self) -> PublicKeyJwk {
        let (crv, x, y) = match self {
            Self::P256(vk) => {
                let point = vk.to_encoded_point(false);
                ("P-256", point.x().map(|x| x.to_vec()), point.y().map(|y| y.to_vec()))
            }
            Self::P384(vk) => {
                let point = vk.to_encoded_point(false);
                ("P-384", point.x().map(|x| x.to_vec()), point.y().map(|y| y.to_vec()))
            }
            Self::Ed25519(vk) => ("Ed25519", Some(vk.to_bytes().to_vec()), None),
        };

        PublicKeyJwk {
            kty: if matches!(self, Self::Ed25519(_)) { "OKP" } else { "EC" }.to_string(),
            crv: crv.to_string(),
            x: Base64UrlUnpadded::encode_string(&x.unwrap_or_default()),
            y: y.map(|y| Base64UrlUnpadded::encode_string(&y)),
            x5c: None,
        }
    }
}

/// Simplified JSON Web Key (JWK) public key.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct PublicKeyJwk {
    /// Key type: `EC` or `OKP`.
    pub kty: String,

    /// Curve.
    pub crv: String,

    /// X coordinate (or public key), base64url encoded.
    pub x: String,

    /// Y coordinate, base64url encoded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,

    /// Certificate chain, standard base64 DER, leaf first.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x5c: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use p256::ecdsa::signature::Signer as _;
    use p256::ecdsa::SigningKey;

    use super::*;
    use crate::cose_key::Ec2y;

    fn signing_key() -> SigningKey {
        SigningKey::from_slice(&[7; 32]).unwrap()
    }

    fn cose_key(sk: &SigningKey, compressed: bool) -> CoseKey {
        let point = sk.verifying_key().to_encoded_point(false);
        let y = if compressed {
            Ec2y::SignBit(point.y().unwrap()[31] & 1 == 1)
        } else {
            Ec2y::Value(point.y().unwrap().to_vec())
        };
        CoseKey::Ec2 {
            crv: Ec2Curve::P256,
            x: point.x().unwrap().to_vec(),
            y,
        }
    }

    #[test]
    fn p256_fixed_and_der() {
        let sk = signing_key();
        let key = PublicKey::from_cose_key(&cose_key(&sk, false)).unwrap();
        assert_eq!(key.algorithm(), Algorithm::ES256);

        let sig: p256::ecdsa::Signature = sk.sign(b"payload");
        assert!(key.verify(b"payload", &sig.to_bytes()).is_ok());
        assert!(key.verify(b"payload", sig.to_der().as_bytes()).is_ok());
        assert!(key.verify(b"tampered", &sig.to_bytes()).is_err());
    }

    #[test]
    fn compressed_cose_key() {
        let sk = signing_key();
        let full = PublicKey::from_cose_key(&cose_key(&sk, false)).unwrap();
        let compressed = PublicKey::from_cose_key(&cose_key(&sk, true)).unwrap();
        assert_eq!(full, compressed);
    }

    #[test]
    fn jwk_export() {
        let key = PublicKey::from_cose_key(&cose_key(&signing_key(), false)).unwrap();
        let jwk = key.to_jwk();
        assert_eq!(jwk.kty, "EC");
        assert_eq!(jwk.crv, "P-256");
        assert_eq!(jwk.x.len(), 43);
        assert!(jwk.y.is_some());
    }

    #[test]
    fn unsupported_curve() {
        let key = CoseKey::Okp {
            crv: OkpCurve::X25519,
            x: vec![0; 32],
        };
        assert!(matches!(PublicKey::from_cose_key(&key), Err(Error::Crypto(_))));
    }
}
