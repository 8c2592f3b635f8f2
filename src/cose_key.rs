//! An implementation of `RFC-8152` `COSE_Key` restricted to the requirements
//! of `ISO/IEC 18013-5:2021`.
//!
//! [`CoseKey`] carries the device key declared in the MSO's
//! `deviceKeyInfo`. Only `Ec2` (elliptic curve) and `Okp` (octet key pair)
//! key types are supported.

use coset::iana::Algorithm;

use crate::cbor::{DataElement, ElementMap, MapKey};
use crate::error::{Error, Result};

/// An RFC-8152 [COSE_Key](https://datatracker.ietf.org/doc/html/rfc8152#section-13)
/// restricted to the requirements of ISO/IEC 18013-5:2021.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CoseKey {
    /// Elliptic curve key with x and y coordinates.
    Ec2 {
        /// Curve.
        crv: Ec2Curve,
        /// x-coordinate.
        x: Vec<u8>,
        /// y-coordinate or its sign bit.
        y: Ec2y,
    },

    /// Octet key pair.
    Okp {
        /// Curve.
        crv: OkpCurve,
        /// Public key.
        x: Vec<u8>,
    },
}

/// The sign bit or value of the y-coordinate for the EC point.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Ec2y {
    /// Full y-coordinate.
    Value(Vec<u8>),

    /// Sign bit of the y-coordinate (point compression).
    SignBit(bool),
}

/// The RFC-8152 identifier of the curve, for Ec2 key type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ec2Curve {
    /// NIST P-256
    P256,
    /// NIST P-384
    P384,
    /// NIST P-521
    P521,
    /// secp256k1
    P256K,
}

/// The RFC-8152 identifier of the curve, for Okp key type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OkpCurve {
    /// X25519
    X25519,
    /// X448
    X448,
    /// Ed25519
    Ed25519,
    /// Ed448
    Ed448,
}

// COSE_Key labels
const KTY: i64 = 1;
const CRV: i64 = -1;
const X: i64 = -2;
const Y: i64 = -3;

const KTY_OKP: i128 = 1;
const KTY_EC2: i128 = 2;

impl CoseKey {
    /// Returns the signature algorithm associated with the key.
    #[must_use]
    pub const fn signature_algorithm(&self) -> Option<Algorithm> {
        match self {
            Self::Ec2 {
                crv: Ec2Curve::P256, ..
            } => Some(Algorithm::ES256),
            Self::Ec2 {
                crv: Ec2Curve::P384, ..
            } => Some(Algorithm::ES384),
            Self::Ec2 {
                crv: Ec2Curve::P521, ..
            } => Some(Algorithm::ES512),
            Self::Okp {
                crv: OkpCurve::Ed25519 | OkpCurve::Ed448,
                ..
            } => Some(Algorithm::EdDSA),
            Self::Ec2 { .. } | Self::Okp { .. } => None,
        }
    }

    /// SEC1 encoding of an Ec2 key: uncompressed (`0x04 || x || y`) or
    /// compressed (`0x02`/`0x03 || x`) when only the sign bit is known.
    ///
    /// # Errors
    ///
    /// Returns an error for Okp keys.
    pub fn to_sec1(&self) -> Result<Vec<u8>> {
        let Self::Ec2 { x, y, .. } = self else {
            return Err(Error::Crypto("SEC1 encoding requires an Ec2 key".to_string()));
        };
        let mut sec1 = Vec::with_capacity(1 + 2 * x.len());
        match y {
            Ec2y::Value(y) => {
                sec1.push(0x04);
                sec1.extend_from_slice(x);
                sec1.extend_from_slice(y);
            }
            Ec2y::SignBit(odd) => {
                sec1.push(if *odd { 0x03 } else { 0x02 });
                sec1.extend_from_slice(x);
            }
        }
        Ok(sec1)
    }
}

impl From<&CoseKey> for DataElement {
    fn from(key: &CoseKey) -> Self {
        let mut map = ElementMap::new();
        match key {
            CoseKey::Ec2 { crv, x, y } => {
                map.insert(KTY, Self::Integer(KTY_EC2));
                map.insert(CRV, Self::Integer(crv.id()));
                map.insert(X, x.clone());
                match y {
                    Ec2y::Value(y) => map.insert(Y, y.clone()),
                    Ec2y::SignBit(b) => map.insert(Y, *b),
                };
            }
            CoseKey::Okp { crv, x } => {
                map.insert(KTY, Self::Integer(KTY_OKP));
                map.insert(CRV, Self::Integer(crv.id()));
                map.insert(X, x.clone());
            }
        }
        Self::Map(map)
    }
}

impl TryFrom<DataElement> for CoseKey {
    type Error = Error;

    fn try_from(element: DataElement) -> Result<Self> {
        let map = element.into_map("COSE_Key")?;
        let label = |l: i64| map.get(&MapKey::Int(l));

        let kty = label(KTY).and_then(DataElement::as_integer);
        let crv = label(CRV)
            .and_then(DataElement::as_integer)
            .ok_or_else(|| Error::Malformed("COSE_Key: missing curve".to_string()))?;
        let x = label(X)
            .and_then(DataElement::as_bytes)
            .ok_or_else(|| Error::Malformed("COSE_Key: missing x coordinate".to_string()))?
            .to_vec();

        match kty {
            Some(KTY_EC2) => {
                let y = match label(Y) {
                    Some(DataElement::Bytes(y)) => Ec2y::Value(y.clone()),
                    Some(DataElement::Bool(b)) => Ec2y::SignBit(*b),
                    Some(other) => {
                        return Err(Error::Malformed(format!(
                            "COSE_Key: expected bool or bstr for y-coordinate, found {}",
                            other.kind()
                        )));
                    }
                    None => {
                        return Err(Error::Malformed(
                            "COSE_Key of kty 'Ec2' missing y coordinate".to_string(),
                        ));
                    }
                };
                Ok(Self::Ec2 {
                    crv: Ec2Curve::try_from(crv)?,
                    x,
                    y,
                })
            }
            Some(KTY_OKP) => Ok(Self::Okp {
                crv: OkpCurve::try_from(crv)?,
                x,
            }),
            _ => Err(Error::Malformed(
                "COSE_Key: only Ec2 and Okp key types are supported".to_string(),
            )),
        }
    }
}

impl Ec2Curve {
    const fn id(self) -> i128 {
        match self {
            Self::P256 => 1,
            Self::P384 => 2,
            Self::P521 => 3,
            Self::P256K => 8,
        }
    }
}

impl TryFrom<i128> for Ec2Curve {
    type Error = Error;

    fn try_from(crv: i128) -> Result<Self> {
        match crv {
            1 => Ok(Self::P256),
            2 => Ok(Self::P384),
            3 => Ok(Self::P521),
            8 => Ok(Self::P256K),
            _ => Err(Error::Malformed(format!("COSE_Key: unknown Ec2 curve {crv}"))),
        }
    }
}

impl OkpCurve {
    const fn id(self) -> i128 {
        match self {
            Self::X25519 => 4,
            Self::X448 => 5,
            Self::Ed25519 => 6,
            Self::Ed448 => 7,
        }
    }
}

impl TryFrom<i128> for OkpCurve {
    type Error = Error;

    fn try_from(crv: i128) -> Result<Self> {
        match crv {
            4 => Ok(Self::X25519),
            5 => Ok(Self::X448),
            6 => Ok(Self::Ed25519),
            7 => Ok(Self::Ed448),
            _ => Err(Error::Malformed(format!("COSE_Key: unknown Okp curve {crv}"))),
        }
    }
}
