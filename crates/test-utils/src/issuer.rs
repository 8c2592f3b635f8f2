//! An mDL issuer holding a self-signed P-256 certificate.

use anyhow::{anyhow, Result};
use chrono::{TimeDelta, Utc};
use coset::iana::Algorithm;
use coset::{CoseSign1, CoseSign1Builder, HeaderBuilder};
use credibil_mdoc::auth::X5CHAIN;
use credibil_mdoc::cbor::Tag24;
use credibil_mdoc::digest::DigestAlgorithm;
use credibil_mdoc::mdoc::{name_spaces_from_json, IssuerSigned};
use credibil_mdoc::mso::{DeviceKeyInfo, MobileSecurityObject, ValidityInfo};
use p256::ecdsa::signature::Signer as _;
use p256::ecdsa::{Signature, SigningKey};
use p256::pkcs8::DecodePrivateKey as _;
use serde_json::{json, Map, Value};

/// The mDL document type.
pub const MDL_DOC_TYPE: &str = "org.iso.18013.5.1.mDL";

/// The mDL namespace.
pub const MDL_NAMESPACE: &str = "org.iso.18013.5.1";

/// Signs Mobile Security Objects.
#[derive(Clone, Debug)]
pub struct Issuer {
    certificate: Vec<u8>,
    signing_key: SigningKey,
}

impl Issuer {
    /// An issuer with a freshly generated key and self-signed certificate.
    ///
    /// # Errors
    ///
    /// Returns an error if the certificate cannot be generated.
    pub fn new() -> Result<Self> {
        let certified = rcgen::generate_simple_self_signed(["issuer.credibil.io".to_string()])?;
        let signing_key = SigningKey::from_pkcs8_der(&certified.key_pair.serialize_der())
            .map_err(|e| anyhow!("issue decoding issuer key: {e}"))?;

        Ok(Self {
            certificate: certified.cert.der().to_vec(),
            signing_key,
        })
    }

    /// DER-encoded issuer certificate.
    #[must_use]
    pub fn certificate(&self) -> &[u8] {
        &self.certificate
    }

    /// Issue an mDL over `dataset` (`{namespace: {element: value}}`) bound
    /// to the device key in `device_key_info`.
    ///
    /// # Errors
    ///
    /// Returns an error if the dataset is invalid or the MSO cannot be
    /// encoded.
    pub fn issue(
        &self, dataset: &Value, device_key_info: DeviceKeyInfo, validity_info: ValidityInfo,
    ) -> Result<IssuerSigned> {
        let Some(dataset) = dataset.as_object() else {
            return Err(anyhow!("dataset is not an object"));
        };
        let name_spaces = name_spaces_from_json(dataset)?;
        let mso = MobileSecurityObject::create_for(
            &name_spaces,
            device_key_info,
            MDL_DOC_TYPE,
            validity_info,
            DigestAlgorithm::Sha256,
            None,
        )?;

        Ok(IssuerSigned {
            name_spaces,
            issuer_auth: self.sign(&mso)?,
        })
    }

    /// Sign `mso`, embedding the issuer certificate in the unprotected
    /// `x5chain` header.
    ///
    /// # Errors
    ///
    /// Returns an error if the MSO cannot be encoded.
    pub fn sign(&self, mso: &MobileSecurityObject) -> Result<CoseSign1> {
        let payload = Tag24::new(mso.clone())?.to_vec()?;

        let protected = HeaderBuilder::new().algorithm(Algorithm::ES256).build();
        let unprotected = HeaderBuilder::new()
            .value(X5CHAIN, ciborium::Value::Bytes(self.certificate.clone()))
            .build();

        Ok(CoseSign1Builder::new()
            .protected(protected)
            .unprotected(unprotected)
            .payload(payload)
            .create_signature(&[], |data| {
                let sig: Signature = self.signing_key.sign(data);
                sig.to_bytes().to_vec()
            })
            .build())
    }
}

/// A validity window opening `from` relative to now and closing `until`
/// relative to now.
#[must_use]
pub fn validity(from: TimeDelta, until: TimeDelta) -> ValidityInfo {
    let now = Utc::now();
    ValidityInfo {
        signed: now + from,
        valid_from: now + from,
        valid_until: now + until,
        expected_update: None,
    }
}

/// A validity window covering the next year.
#[must_use]
pub fn valid_for_a_year() -> ValidityInfo {
    validity(TimeDelta::minutes(-5), TimeDelta::days(365))
}

/// A sample mDL dataset.
#[must_use]
pub fn mdl_dataset() -> Value {
    json!({
        MDL_NAMESPACE: {
            "family_name": "Doe",
            "given_name": "Jane",
            "birth_date": "1990-05-17",
            "issue_date": "2024-01-01",
            "expiry_date": "2029-01-01",
            "issuing_country": "NZ",
            "document_number": "DL123456",
            "age_over_18": true,
            "portrait": "AQIDBA",
            "driving_privileges": [
                {"vehicle_category_code": "B", "issue_date": "2024-01-01"}
            ]
        }
    })
}

/// A dataset with a single namespace of string elements.
#[must_use]
pub fn dataset(name_space: &str, elements: &[(&str, &str)]) -> Value {
    let elements: Map<String, Value> =
        elements.iter().map(|(k, v)| ((*k).to_string(), Value::from(*v))).collect();
    json!({ name_space: elements })
}
