//! # Codec
//!
//! Conversion between [`DataElement`] trees and CBOR bytes, via
//! [`ciborium::Value`].

use std::io::Cursor;

use chrono::{DateTime, NaiveDate, SecondsFormat, TimeDelta, Utc};
use ciborium::Value;
use serde::Deserialize;

use super::element::{epoch_float, unexpected, DataElement, DateTimeMode, ElementMap, FullDateMode, MapKey};
use super::{TAG_ENCODED_CBOR, TAG_EPOCH_DAYS, TAG_EPOCH_TIME, TAG_FULL_DATE, TAG_TDATE};
use crate::error::{Error, Result};

/// Resource limits applied when decoding untrusted input.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct DecodeLimits {
    /// Maximum nesting depth of arrays, maps and tags.
    pub max_depth: usize,

    /// Maximum size of a single encoded input, in bytes.
    pub max_bytes: usize,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_depth: 64,
            max_bytes: 4 * 1024 * 1024,
        }
    }
}

/// Serialize a data element to CBOR.
///
/// # Errors
///
/// Returns an error if an integer lies outside the CBOR integer range.
pub fn encode(element: &DataElement) -> Result<Vec<u8>> {
    let value = Value::try_from(element)?;
    let mut buf = Vec::new();
    ciborium::into_writer(&value, &mut buf)?;
    Ok(buf)
}

/// Decode a single CBOR data item using default [`DecodeLimits`].
///
/// # Errors
///
/// See [`decode_with`].
pub fn decode(bytes: &[u8]) -> Result<DataElement> {
    decode_with(bytes, &DecodeLimits::default())
}

/// Decode a single CBOR data item.
///
/// # Errors
///
/// Returns a `Malformed` error if the input is empty, exceeds `limits`,
/// holds anything after the first data item, uses an unrecognized tag,
/// repeats a map key, or is otherwise invalid CBOR.
pub fn decode_with(bytes: &[u8], limits: &DecodeLimits) -> Result<DataElement> {
    if bytes.is_empty() {
        return Err(Error::Malformed("empty input".to_string()));
    }
    if bytes.len() > limits.max_bytes {
        return Err(Error::Malformed(format!(
            "input of {} bytes exceeds limit of {}",
            bytes.len(),
            limits.max_bytes
        )));
    }

    let mut cursor = Cursor::new(bytes);
    let value: Value =
        ciborium::de::from_reader_with_recursion_limit(&mut cursor, limits.max_depth)?;

    let consumed = usize::try_from(cursor.position()).unwrap_or(usize::MAX);
    if consumed != bytes.len() {
        return Err(Error::Malformed(format!(
            "{} trailing bytes after data item",
            bytes.len().saturating_sub(consumed)
        )));
    }

    DataElement::try_from(value)
}

impl TryFrom<&DataElement> for Value {
    type Error = Error;

    fn try_from(element: &DataElement) -> Result<Self> {
        let value = match element {
            DataElement::Integer(i) => Self::Integer(
                (*i).try_into()
                    .map_err(|_| Error::Malformed(format!("integer {i} out of CBOR range")))?,
            ),
            DataElement::Float(f) => Self::Float(*f),
            DataElement::Bool(b) => Self::Bool(*b),
            DataElement::Text(s) => Self::Text(s.clone()),
            DataElement::Bytes(b) => Self::Bytes(b.clone()),
            DataElement::Null => Self::Null,
            DataElement::List(items) => {
                Self::Array(items.iter().map(Self::try_from).collect::<Result<_>>()?)
            }
            DataElement::Map(map) => {
                let mut entries = Vec::with_capacity(map.len());
                for (k, v) in map.iter() {
                    let key = match k {
                        MapKey::Int(i) => Self::Integer((*i).into()),
                        MapKey::Text(s) => Self::Text(s.clone()),
                    };
                    entries.push((key, Self::try_from(v)?));
                }
                Self::Map(entries)
            }
            DataElement::DateTime(dt, mode) => encode_date_time(dt, *mode),
            DataElement::FullDate(date, mode) => encode_full_date(*date, *mode),
            DataElement::Nested(bytes) => {
                Self::Tag(TAG_ENCODED_CBOR, Box::new(Self::Bytes(bytes.clone())))
            }
        };
        Ok(value)
    }
}

impl TryFrom<DataElement> for Value {
    type Error = Error;

    fn try_from(element: DataElement) -> Result<Self> {
        Self::try_from(&element)
    }
}

impl TryFrom<Value> for DataElement {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        let element = match value {
            Value::Integer(i) => Self::Integer(i.into()),
            Value::Float(f) => Self::Float(f),
            Value::Bool(b) => Self::Bool(b),
            Value::Text(s) => Self::Text(s),
            Value::Bytes(b) => Self::Bytes(b),
            Value::Null => Self::Null,
            Value::Array(items) => {
                Self::List(items.into_iter().map(Self::try_from).collect::<Result<_>>()?)
            }
            Value::Map(entries) => {
                let mut map = ElementMap::new();
                for (k, v) in entries {
                    let key = MapKey::try_from(Self::try_from(k)?)?;
                    map.push_unique(key, Self::try_from(v)?)?;
                }
                Self::Map(map)
            }
            Value::Tag(tag, inner) => decode_tagged(tag, *inner)?,
            _ => return Err(Error::Malformed("unsupported CBOR simple value".to_string())),
        };
        Ok(element)
    }
}

fn encode_date_time(dt: &DateTime<Utc>, mode: DateTimeMode) -> Value {
    let inner = match mode {
        DateTimeMode::TDate => {
            return Value::Tag(
                TAG_TDATE,
                Box::new(Value::Text(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))),
            );
        }
        DateTimeMode::EpochInt => Value::Integer(dt.timestamp().into()),
        DateTimeMode::EpochFloat => Value::Float(epoch_float(dt)),
    };
    Value::Tag(TAG_EPOCH_TIME, Box::new(inner))
}

fn encode_full_date(date: NaiveDate, mode: FullDateMode) -> Value {
    match mode {
        FullDateMode::Text => {
            Value::Tag(TAG_FULL_DATE, Box::new(Value::Text(date.format("%Y-%m-%d").to_string())))
        }
        FullDateMode::EpochDays => {
            let days = date.signed_duration_since(epoch_date()).num_days();
            Value::Tag(TAG_EPOCH_DAYS, Box::new(Value::Integer(days.into())))
        }
    }
}

fn decode_tagged(tag: u64, inner: Value) -> Result<DataElement> {
    match (tag, inner) {
        (TAG_TDATE, Value::Text(s)) => {
            let dt = DateTime::parse_from_rfc3339(&s)
                .map_err(|e| Error::Malformed(format!("invalid tdate `{s}`: {e}")))?;
            Ok(DataElement::DateTime(dt.with_timezone(&Utc), DateTimeMode::TDate))
        }
        (TAG_EPOCH_TIME, Value::Integer(i)) => {
            let secs = i64::try_from(i128::from(i))
                .map_err(|_| Error::Malformed("epoch time out of range".to_string()))?;
            let dt = DateTime::from_timestamp(secs, 0)
                .ok_or_else(|| Error::Malformed(format!("epoch time {secs} out of range")))?;
            Ok(DataElement::DateTime(dt, DateTimeMode::EpochInt))
        }
        (TAG_EPOCH_TIME, Value::Float(f)) => {
            Ok(DataElement::DateTime(from_epoch_float(f)?, DateTimeMode::EpochFloat))
        }
        (TAG_FULL_DATE, Value::Text(s)) => {
            let date = NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                .map_err(|e| Error::Malformed(format!("invalid full-date `{s}`: {e}")))?;
            Ok(DataElement::FullDate(date, FullDateMode::Text))
        }
        (TAG_EPOCH_DAYS, Value::Integer(i)) => {
            let date = i64::try_from(i128::from(i))
                .ok()
                .and_then(TimeDelta::try_days)
                .and_then(|days| epoch_date().checked_add_signed(days))
                .ok_or_else(|| Error::Malformed("epoch days out of range".to_string()))?;
            Ok(DataElement::FullDate(date, FullDateMode::EpochDays))
        }
        (TAG_ENCODED_CBOR, Value::Bytes(b)) => Ok(DataElement::Nested(b)),
        (TAG_TDATE | TAG_EPOCH_TIME | TAG_FULL_DATE | TAG_EPOCH_DAYS | TAG_ENCODED_CBOR, other) => {
            let found = DataElement::try_from(other)?;
            Err(unexpected(&format!("tag {tag}"), "matching content", &found))
        }
        (tag, _) => Err(Error::Malformed(format!("unrecognized tag {tag}"))),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn from_epoch_float(f: f64) -> Result<DateTime<Utc>> {
    if !f.is_finite() || f.abs() > 1e15 {
        return Err(Error::Malformed(format!("epoch time {f} out of range")));
    }
    let secs = f.floor();
    let nanos = ((f - secs) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(secs as i64, nanos)
        .ok_or_else(|| Error::Malformed(format!("epoch time {f} out of range")))
}

fn epoch_date() -> NaiveDate {
    DateTime::UNIX_EPOCH.date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(s: &str) -> Vec<u8> {
        (0..s.len()).step_by(2).map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap()).collect()
    }

    #[test]
    fn primitives_roundtrip() {
        let items = vec![
            DataElement::Integer(-42),
            DataElement::Integer(u64::MAX.into()),
            DataElement::Float(1.5),
            DataElement::Bool(true),
            DataElement::Null,
            DataElement::from("ALICE"),
            DataElement::Bytes(vec![0, 1, 2]),
        ];
        let list = DataElement::List(items);
        let bytes = encode(&list).unwrap();
        assert_eq!(decode(&bytes).unwrap(), list);
    }

    #[test]
    fn nested_map_roundtrip() {
        let mut inner = ElementMap::new();
        inner.insert(1_i64, "one");
        inner.insert("two", DataElement::List(vec![2_i64.into()]));
        let mut outer = ElementMap::new();
        outer.insert("inner", inner);
        outer.insert("date", NaiveDate::from_ymd_opt(1990, 1, 15).unwrap());
        let element = DataElement::Map(outer);

        let bytes = encode(&element).unwrap();
        assert_eq!(decode(&bytes).unwrap(), element);
    }

    #[test]
    fn full_date_text() {
        let date = NaiveDate::from_ymd_opt(1990, 1, 15).unwrap();
        let bytes = encode(&date.into()).unwrap();
        // d9 03ec 6a "1990-01-15"
        assert_eq!(&bytes[..3], &[0xd9, 0x03, 0xec]);
        assert_eq!(decode(&bytes).unwrap(), DataElement::from(date));
    }

    #[test]
    fn full_date_epoch_days() {
        // 100(1) => 1970-01-02
        let element = decode(&hex("d86401")).unwrap();
        let DataElement::FullDate(date, FullDateMode::EpochDays) = element else {
            panic!("expected epoch-days full-date");
        };
        assert_eq!(date, NaiveDate::from_ymd_opt(1970, 1, 2).unwrap());
    }

    #[test]
    fn date_time_modes_compare_by_instant() {
        let dt = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let tdate = DataElement::DateTime(dt, DateTimeMode::TDate);
        let epoch = DataElement::DateTime(dt, DateTimeMode::EpochInt);
        assert_eq!(tdate, epoch);

        let decoded = decode(&encode(&epoch).unwrap()).unwrap();
        assert!(matches!(decoded, DataElement::DateTime(_, DateTimeMode::EpochInt)));
        assert_eq!(decoded, tdate);
    }

    #[test]
    fn epoch_modes_roundtrip_sub_second() {
        for (secs, nanos) in [(1_700_000_000, 123_456_789), (12, 999_999_999), (-1, 500_000_000)] {
            let dt = DateTime::from_timestamp(secs, nanos).unwrap();
            for mode in [DateTimeMode::EpochInt, DateTimeMode::EpochFloat] {
                let element = DataElement::DateTime(dt, mode);
                let decoded = decode(&encode(&element).unwrap()).unwrap();
                assert_eq!(decoded, element, "{mode:?} at {dt}");
            }
        }

        // whole seconds only for the integer form
        let dt = DateTime::from_timestamp(1_700_000_000, 500_000_000).unwrap();
        let later = DateTime::from_timestamp(1_700_000_001, 0).unwrap();
        assert_ne!(
            DataElement::DateTime(dt, DateTimeMode::EpochInt),
            DataElement::DateTime(later, DateTimeMode::EpochInt)
        );
        assert_ne!(
            DataElement::DateTime(dt, DateTimeMode::TDate),
            DataElement::DateTime(later, DateTimeMode::TDate)
        );
    }

    #[test]
    fn tdate_encodes_utc_z() {
        let dt = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let bytes = encode(&DataElement::from(dt)).unwrap();
        let Value::Tag(0, text) = ciborium::from_reader::<Value, _>(bytes.as_slice()).unwrap()
        else {
            panic!("expected tag 0");
        };
        assert_eq!(*text, Value::Text("2023-11-14T22:13:20Z".to_string()));
    }

    #[test]
    fn nested_roundtrip() {
        let inner = DataElement::from("inside");
        let wrapped = DataElement::wrap(&inner).unwrap();
        let bytes = encode(&wrapped).unwrap();
        assert_eq!(bytes[..2], [0xd8, 0x18]);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.unwrap_nested().unwrap(), inner);
    }

    #[test]
    fn unknown_tag_rejected() {
        // 37(h'00') - UUID tag
        let err = decode(&hex("d8254100")).unwrap_err();
        assert_eq!(err, Error::Malformed("unrecognized tag 37".to_string()));
    }

    #[test]
    fn mismatched_tag_content_rejected() {
        // 1004(1)
        let err = decode(&hex("d903ec01")).unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));
    }

    #[test]
    fn duplicate_keys_rejected() {
        // {"a": 1, "a": 2}
        let err = decode(&hex("a2616101616102")).unwrap_err();
        assert_eq!(err, Error::Malformed("duplicate map key `a`".to_string()));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let err = decode(&hex("0101")).unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));
    }

    #[test]
    fn empty_and_truncated_rejected() {
        assert!(decode(&[]).is_err());
        // array of 3 with only one item
        assert!(decode(&hex("8301")).is_err());
    }

    #[test]
    fn large_map_decodes_in_linear_time() {
        let entries = (0..200_000_u64).map(|i| (Value::Integer(i.into()), Value::Null)).collect();
        let mut bytes = Vec::new();
        ciborium::into_writer(&Value::Map(entries), &mut bytes).unwrap();

        let start = std::time::Instant::now();
        let element = decode(&bytes).unwrap();
        assert!(start.elapsed() < std::time::Duration::from_secs(5), "took {:?}", start.elapsed());
        assert_eq!(element.as_map().unwrap().len(), 200_000);
    }

    #[test]
    fn limits_enforced() {
        let limits = DecodeLimits {
            max_depth: 4,
            max_bytes: 16,
        };
        // [[[[[[1]]]]]]
        assert!(decode_with(&hex("81818181818101"), &limits).is_err());
        assert!(decode_with(&[0x40; 32], &limits).is_err());
        assert!(decode_with(&hex("818101"), &limits).is_ok());
    }
}
