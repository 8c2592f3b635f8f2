//! # CBOR
//!
//! The Data Element model: a closed set of CBOR value types (RFC 8949 major
//! types 0-7) extended with the date tags from RFC 8943 and the
//! nested-encoding tag 24 used throughout ISO/IEC 18013-5.
//!
//! [`encode`] and [`decode`] map between [`DataElement`] trees and CBOR
//! bytes. [`Tag24`] carries a typed structure together with the exact bytes
//! it was encoded to, so digests and signatures are always computed over
//! the bytes that were actually exchanged.

mod codec;
mod element;
mod tag24;

pub use self::codec::{decode, decode_with, encode, DecodeLimits};
pub use self::element::{DataElement, DateTimeMode, ElementMap, FullDateMode, MapKey};
pub use self::tag24::Tag24;

/// `tdate`: RFC 3339 date-time string.
pub const TAG_TDATE: u64 = 0;

/// `time`: seconds since the Unix epoch (integer or float).
pub const TAG_EPOCH_TIME: u64 = 1;

/// `#6.24(bstr)`: embedded CBOR data item.
pub const TAG_ENCODED_CBOR: u64 = 24;

/// `days`: number of days since the Unix epoch.
pub const TAG_EPOCH_DAYS: u64 = 100;

/// `full-date`: RFC 3339 full-date string.
pub const TAG_FULL_DATE: u64 = 1004;
