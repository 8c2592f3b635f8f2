//! # Authentication
//!
//! Issuer authentication verifies the `issuerAuth` `COSE_Sign1` over the
//! MSO using the key in the leaf certificate of its `x5chain` header.
//!
//! Device authentication verifies the device's signature or MAC over the
//! `DeviceAuthentication` structure, which binds the device-signed data
//! elements to the session transcript of this exchange.

mod device;
mod issuer;
mod key;

use coset::iana::Algorithm;
use coset::{Header, RegisteredLabelWithPrivate};

pub use self::device::{emac_key, verify_device, KeyAgreement, NoKeyAgreement};
pub use self::issuer::{verify_issuer, x5chain, IssuerKey, X5CHAIN};
pub use self::key::{PublicKey, PublicKeyJwk};

fn header_algorithm(header: &Header) -> Option<Algorithm> {
    match header.alg {
        Some(RegisteredLabelWithPrivate::Assigned(alg)) => Some(alg),
        _ => None,
    }
}
