use base64ct::{Base64, Encoding};
use ciborium::Value;
use coset::{CoseSign1, Label};
use serde::{Deserialize, Serialize};

use super::{header_algorithm, PublicKey, PublicKeyJwk};
use crate::error::{Error, Result};

/// COSE header label for an X.509 certificate chain (RFC 9360).
pub const X5CHAIN: i64 = 33;

/// The issuer's public key, as recovered from the leaf certificate of a
/// verified `issuerAuth` signature.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IssuerKey {
    /// COSE algorithm name, e.g. `ES256`.
    pub algorithm: String,

    /// Public key with its certificate chain.
    pub jwk: PublicKeyJwk,
}

/// The DER certificates of the `x5chain` header, leaf first. The unprotected
/// header is searched before the protected header.
///
/// # Errors
///
/// Returns a `Crypto` error if neither header has a certificate chain and a
/// `Malformed` error if the chain is not a byte string or array of byte
/// strings.
pub fn x5chain(sign1: &CoseSign1) -> Result<Vec<Vec<u8>>> {
    let label = Label::Int(X5CHAIN);
    let found = sign1
        .unprotected
        .rest
        .iter()
        .chain(sign1.protected.header.rest.iter())
        .find(|(l, _)| *l == label)
        .map(|(_, v)| v);

    match found {
        None => Err(Error::Crypto("issuerAuth has no x5chain certificate".to_string())),
        Some(Value::Bytes(cert)) => Ok(vec![cert.clone()]),
        Some(Value::Array(certs)) if !certs.is_empty() => certs
            .iter()
            .map(|c| match c {
                Value::Bytes(cert) => Ok(cert.clone()),
                _ => Err(Error::Malformed("x5chain entries must be byte strings".to_string())),
            })
            .collect(),
        Some(_) => Err(Error::Malformed("x5chain must be a byte string or array".to_string())),
    }
}

/// Verify the `issuerAuth` signature over its MSO payload with the key in
/// the leaf certificate of the `x5chain` header.
///
/// The certificate chain is not validated against trust anchors.
///
/// # Errors
///
/// Returns a `Crypto` error if the chain is missing, the key or algorithm is
/// not supported, the algorithm does not match the key, or the signature is
/// invalid.
pub fn verify_issuer(issuer_auth: &CoseSign1) -> Result<IssuerKey> {
    if issuer_auth.payload.is_none() {
        return Err(Error::Crypto("issuerAuth has no payload".to_string()));
    }

    let chain = x5chain(issuer_auth)?;
    let key = PublicKey::from_certificate(&chain[0])?;

    let Some(alg) = header_algorithm(&issuer_auth.protected.header) else {
        return Err(Error::Crypto("issuerAuth has no signature algorithm".to_string()));
    };
    if alg != key.algorithm() {
        return Err(Error::Crypto(format!(
            "issuerAuth algorithm {alg:?} does not match certificate key {:?}",
            key.algorithm()
        )));
    }

    issuer_auth.verify_signature(&[], |sig, data| key.verify(data, sig))?;
    tracing::debug!(?alg, "issuer signature verified");

    let mut jwk = key.to_jwk();
    jwk.x5c = Some(chain.iter().map(|c| Base64::encode_string(c)).collect());

    Ok(IssuerKey {
        algorithm: format!("{alg:?}"),
        jwk,
    })
}
