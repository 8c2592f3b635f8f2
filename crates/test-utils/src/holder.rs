//! A holder's mobile device: a P-256 device key that authenticates
//! presentations with a signature or a MAC.

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use base64ct::{Base64UrlUnpadded, Encoding};
use coset::iana::Algorithm;
use coset::{CoseMac0Builder, CoseSign1Builder, HeaderBuilder};
use credibil_mdoc::auth::emac_key;
use credibil_mdoc::cbor::{encode, DataElement, Tag24};
use credibil_mdoc::cose_key::{CoseKey, Ec2Curve, Ec2y};
use credibil_mdoc::mdoc::{
    DeviceAuth, DeviceNameSpaces, DeviceResponse, DeviceSigned, Document, IssuerSigned,
};
use credibil_mdoc::mso::{DeviceKeyInfo, KeyAuthorizations};
use credibil_mdoc::SessionTranscript;
use hmac::{Hmac, Mac};
use p256::ecdsa::signature::Signer as _;
use p256::ecdsa::{Signature, SigningKey};
use p256::pkcs8::DecodePrivateKey as _;
use sha2::Sha256;

/// A device key held by the mdoc.
#[derive(Clone, Debug)]
pub struct Device {
    signing_key: SigningKey,
}

impl Device {
    /// A device with a freshly generated P-256 key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be generated.
    pub fn new() -> Result<Self> {
        let key_pair = rcgen::KeyPair::generate()?;
        let signing_key = SigningKey::from_pkcs8_der(&key_pair.serialize_der())
            .map_err(|e| anyhow!("issue decoding device key: {e}"))?;
        Ok(Self { signing_key })
    }

    /// The device public key as a `COSE_Key`.
    ///
    /// # Panics
    ///
    /// Panics if the key has no affine coordinates.
    #[must_use]
    pub fn cose_key(&self) -> CoseKey {
        let point = self.signing_key.verifying_key().to_encoded_point(false);
        CoseKey::Ec2 {
            crv: Ec2Curve::P256,
            x: point.x().expect("should have x").to_vec(),
            y: Ec2y::Value(point.y().expect("should have y").to_vec()),
        }
    }

    /// Device key info with no key authorizations.
    #[must_use]
    pub fn key_info(&self) -> DeviceKeyInfo {
        DeviceKeyInfo::new(self.cose_key())
    }

    /// Device key info authorizing the device to sign every element of
    /// `name_spaces`.
    #[must_use]
    pub fn authorized_for(&self, name_spaces: &[&str]) -> DeviceKeyInfo {
        let mut info = self.key_info();
        info.key_authorizations = Some(KeyAuthorizations {
            name_spaces: Some(name_spaces.iter().map(ToString::to_string).collect()),
            data_elements: None,
        });
        info
    }

    /// Present `issuer_signed` with device-signed `name_spaces`,
    /// authenticated by a device signature over `transcript`.
    ///
    /// # Errors
    ///
    /// Returns an error if the MSO or device authentication cannot be
    /// encoded.
    pub fn present(
        &self, issuer_signed: IssuerSigned, name_spaces: DeviceNameSpaces,
        transcript: &SessionTranscript,
    ) -> Result<Document> {
        let doc_type = issuer_signed.mso()?.doc_type.clone();
        let name_spaces = Tag24::new(name_spaces)?;
        let payload = transcript.device_authentication_bytes(&doc_type, &name_spaces)?;

        let sign1 = CoseSign1Builder::new()
            .protected(HeaderBuilder::new().algorithm(Algorithm::ES256).build())
            .create_detached_signature(&payload, &[], |data| {
                let sig: Signature = self.signing_key.sign(data);
                sig.to_bytes().to_vec()
            })
            .build();

        Ok(Document {
            doc_type,
            issuer_signed,
            device_signed: Some(DeviceSigned {
                name_spaces,
                device_auth: DeviceAuth::Signature(sign1),
            }),
            errors: None,
        })
    }

    /// Present `issuer_signed` with device-signed `name_spaces`,
    /// authenticated by a MAC keyed from ECDH with the reader's key.
    ///
    /// # Errors
    ///
    /// Returns an error if the MSO or device authentication cannot be
    /// encoded.
    pub fn present_with_mac(
        &self, issuer_signed: IssuerSigned, name_spaces: DeviceNameSpaces,
        reader_key: &p256::PublicKey, transcript: &SessionTranscript,
    ) -> Result<Document> {
        let doc_type = issuer_signed.mso()?.doc_type.clone();
        let name_spaces = Tag24::new(name_spaces)?;
        let payload = transcript.device_authentication_bytes(&doc_type, &name_spaces)?;

        let shared_secret =
            p256::ecdh::diffie_hellman(self.signing_key.as_nonzero_scalar(), reader_key.as_affine());
        let mac_key = emac_key(shared_secret.raw_secret_bytes().as_slice(), transcript)?;

        // tag over the attached payload, then detach it
        let mut mac0 = CoseMac0Builder::new()
            .protected(HeaderBuilder::new().algorithm(Algorithm::HMAC_256_256).build())
            .payload(payload)
            .create_tag(&[], |data| {
                let mut mac =
                    Hmac::<Sha256>::new_from_slice(&mac_key).expect("HMAC accepts any key length");
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            })
            .build();
        mac0.payload = None;

        Ok(Document {
            doc_type,
            issuer_signed,
            device_signed: Some(DeviceSigned {
                name_spaces,
                device_auth: DeviceAuth::Mac(mac0),
            }),
            errors: None,
        })
    }
}

/// Device-signed elements in a single namespace.
#[must_use]
pub fn device_name_spaces(name_space: &str, elements: &[(&str, DataElement)]) -> DeviceNameSpaces {
    let elements = elements.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect();
    DeviceNameSpaces(BTreeMap::from([(name_space.to_string(), elements)]))
}

/// A document as a base64url presentation.
///
/// # Errors
///
/// Returns an error if the document cannot be encoded.
pub fn encode_document(document: &Document) -> Result<String> {
    let bytes = encode(&DataElement::try_from(document)?)?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// Documents wrapped in a `DeviceResponse`, as a base64url presentation.
///
/// # Errors
///
/// Returns an error if a document cannot be encoded.
pub fn encode_response(documents: Vec<Document>) -> Result<String> {
    let response = DeviceResponse {
        version: "1.0".to_string(),
        documents,
        status: 0,
    };
    let bytes = encode(&DataElement::try_from(&response)?)?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}
