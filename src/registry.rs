//! # Element Codec Registry
//!
//! Maps `(namespace, element identifier)` pairs to the codec used to check
//! an element's value shape and to convert it to and from JSON.
//!
//! The process-wide registry is initialized once, before first use, and is
//! immutable afterwards. Install a custom registry with
//! [`Registry::install`] during start-up; otherwise [`Registry::global`]
//! lazily installs the ISO/IEC 18013-5 mDL registrations. Registering
//! codecs after initialization is not supported.
//!
//! Elements without a registered codec fall back to a fixed set of
//! primitive conversions: byte strings become base64url text, dates become
//! ISO 8601 strings, nested-encoded values are decoded and converted.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde_json::{Map, Number, Value};

use crate::cbor::{DataElement, DateTimeMode, ElementMap, FullDateMode};
use crate::error::{Error, Result};

/// ISO/IEC 18013-5 mobile driving licence namespace.
pub const MDL_NAMESPACE: &str = "org.iso.18013.5.1";

static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Converts a single element's value between its CBOR and JSON forms.
pub trait ElementCodec: Send + Sync {
    /// Check that `value` has the shape this codec expects.
    ///
    /// # Errors
    ///
    /// Returns a `Malformed` error describing the mismatch.
    fn check(&self, value: &DataElement) -> Result<()>;

    /// Convert `value` to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` does not have the expected shape.
    fn to_json(&self, value: &DataElement) -> Result<Value>;

    /// Convert a JSON value to a data element.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be represented in this codec's
    /// shape.
    fn from_json(&self, value: &Value) -> Result<DataElement>;
}

/// Built-in value shapes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shape {
    /// Text string.
    Text,

    /// Integer.
    Integer,

    /// Boolean.
    Boolean,

    /// Byte string; base64url in JSON.
    Bytes,

    /// `full-date` (tag 1004 or 100).
    FullDate,

    /// `tdate` or `time` (tag 0 or 1).
    DateTime,

    /// Either a full-date or a date-time.
    Date,

    /// Any list or map, converted with the primitive fallback.
    Structured,
}

impl Shape {
    const fn expected(self) -> &'static str {
        match self {
            Self::Text => "text string",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Bytes => "byte string",
            Self::FullDate => "full-date",
            Self::DateTime => "date-time",
            Self::Date => "full-date or date-time",
            Self::Structured => "list or map",
        }
    }

    const fn accepts(self, value: &DataElement) -> bool {
        matches!(
            (self, value),
            (Self::Text, DataElement::Text(_))
                | (Self::Integer, DataElement::Integer(_))
                | (Self::Boolean, DataElement::Bool(_))
                | (Self::Bytes, DataElement::Bytes(_))
                | (Self::FullDate | Self::Date, DataElement::FullDate(..))
                | (Self::DateTime | Self::Date, DataElement::DateTime(..))
                | (Self::Structured, DataElement::List(_) | DataElement::Map(_))
        )
    }
}

impl ElementCodec for Shape {
    fn check(&self, value: &DataElement) -> Result<()> {
        if self.accepts(value) {
            return Ok(());
        }
        Err(Error::Malformed(format!("expected {}, found {}", self.expected(), value.kind())))
    }

    fn to_json(&self, value: &DataElement) -> Result<Value> {
        self.check(value)?;
        to_json(value)
    }

    fn from_json(&self, value: &Value) -> Result<DataElement> {
        let mismatch = || Error::Malformed(format!("JSON value is not a valid {}", self.expected()));

        let element = match self {
            Self::Text => DataElement::Text(value.as_str().ok_or_else(mismatch)?.to_string()),
            Self::Integer => json_integer(value).ok_or_else(mismatch)?,
            Self::Boolean => DataElement::Bool(value.as_bool().ok_or_else(mismatch)?),
            Self::Bytes => {
                let encoded = value.as_str().ok_or_else(mismatch)?;
                DataElement::Bytes(Base64UrlUnpadded::decode_vec(encoded)?)
            }
            Self::FullDate => parse_full_date(value.as_str().ok_or_else(mismatch)?)?,
            Self::DateTime => parse_date_time(value.as_str().ok_or_else(mismatch)?)?,
            Self::Date => {
                let s = value.as_str().ok_or_else(mismatch)?;
                parse_full_date(s).or_else(|_| parse_date_time(s))?
            }
            Self::Structured => {
                if !value.is_array() && !value.is_object() {
                    return Err(mismatch());
                }
                from_json(value)
            }
        };
        Ok(element)
    }
}

/// A table of element codecs keyed by namespace and element identifier.
#[derive(Clone, Default)]
pub struct Registry {
    codecs: HashMap<(String, String), Arc<dyn ElementCodec>>,
}

impl Registry {
    /// An empty registry: every element uses the primitive fallback.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The ISO/IEC 18013-5 mDL data element registrations.
    #[must_use]
    pub fn mdl() -> Self {
        let mut registry = Self::new();

        for id in [
            "family_name",
            "given_name",
            "issuing_country",
            "issuing_authority",
            "document_number",
            "un_distinguishing_sign",
            "administrative_number",
            "eye_colour",
            "hair_colour",
            "birth_place",
            "resident_address",
            "issuing_jurisdiction",
            "nationality",
            "resident_city",
            "resident_state",
            "resident_postal_code",
            "resident_country",
            "family_name_national_character",
            "given_name_national_character",
        ] {
            registry.register(MDL_NAMESPACE, id, Shape::Text);
        }

        for id in ["sex", "height", "weight", "age_in_years", "age_birth_year"] {
            registry.register(MDL_NAMESPACE, id, Shape::Integer);
        }

        for age in [12, 13, 14, 16, 18, 21, 25, 60, 62, 65, 68] {
            registry.register(MDL_NAMESPACE, &format!("age_over_{age}"), Shape::Boolean);
        }

        for id in [
            "portrait",
            "signature_usual_mark",
            "biometric_template_face",
            "biometric_template_finger",
            "biometric_template_signature_sign",
            "biometric_template_iris",
        ] {
            registry.register(MDL_NAMESPACE, id, Shape::Bytes);
        }

        registry
            .register(MDL_NAMESPACE, "birth_date", Shape::FullDate)
            .register(MDL_NAMESPACE, "issue_date", Shape::Date)
            .register(MDL_NAMESPACE, "expiry_date", Shape::Date)
            .register(MDL_NAMESPACE, "portrait_capture_date", Shape::DateTime)
            .register(MDL_NAMESPACE, "driving_privileges", Shape::Structured);

        registry
    }

    /// Register `codec` for an element, replacing any existing codec.
    pub fn register(
        &mut self, namespace: &str, identifier: &str, codec: impl ElementCodec + 'static,
    ) -> &mut Self {
        self.codecs.insert((namespace.to_string(), identifier.to_string()), Arc::new(codec));
        self
    }

    /// Codec registered for an element.
    #[must_use]
    pub fn codec(&self, namespace: &str, identifier: &str) -> Option<&dyn ElementCodec> {
        self.codecs.get(&(namespace.to_string(), identifier.to_string())).map(AsRef::as_ref)
    }

    /// Check an element value against its registered codec. Elements with no
    /// registered codec always pass.
    ///
    /// # Errors
    ///
    /// Returns a `Malformed` error naming the element on a shape mismatch.
    pub fn check(&self, namespace: &str, identifier: &str, value: &DataElement) -> Result<()> {
        let Some(codec) = self.codec(namespace, identifier) else {
            return Ok(());
        };
        codec.check(value).map_err(|e| in_element(namespace, identifier, &e))
    }

    /// Convert an element value to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error naming the element if conversion fails.
    pub fn to_json(&self, namespace: &str, identifier: &str, value: &DataElement) -> Result<Value> {
        let converted = match self.codec(namespace, identifier) {
            Some(codec) => codec.to_json(value),
            None => to_json(value),
        };
        converted.map_err(|e| in_element(namespace, identifier, &e))
    }

    /// Convert a JSON value to an element value.
    ///
    /// # Errors
    ///
    /// Returns an error naming the element if conversion fails.
    pub fn from_json(&self, namespace: &str, identifier: &str, value: &Value) -> Result<DataElement> {
        match self.codec(namespace, identifier) {
            Some(codec) => codec.from_json(value).map_err(|e| in_element(namespace, identifier, &e)),
            None => Ok(from_json(value)),
        }
    }

    /// Install this registry as the process-wide registry.
    ///
    /// # Errors
    ///
    /// Returns an error if a registry has already been installed or the
    /// global registry has already been used.
    pub fn install(self) -> Result<()> {
        REGISTRY.set(self).map_err(|_| {
            Error::Policy("element codec registry is already initialized".to_string())
        })
    }

    /// The process-wide registry. Installs [`Registry::mdl`] on first use if
    /// no registry was installed.
    pub fn global() -> &'static Self {
        REGISTRY.get_or_init(Self::mdl)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.codecs.keys().collect();
        keys.sort();
        f.debug_struct("Registry").field("codecs", &keys).finish()
    }
}

fn in_element(namespace: &str, identifier: &str, err: &Error) -> Error {
    let context = format!("{namespace}/{identifier}");
    match err {
        Error::Malformed(msg) => Error::Malformed(format!("{context}: {msg}")),
        Error::Crypto(msg) => Error::Crypto(format!("{context}: {msg}")),
        Error::Policy(msg) => Error::Policy(format!("{context}: {msg}")),
        Error::Unimplemented(msg) => Error::Unimplemented(format!("{context}: {msg}")),
    }
}

/// Primitive JSON rendering of a data element.
///
/// # Errors
///
/// Returns an error if a nested-encoded value cannot be decoded.
pub fn to_json(value: &DataElement) -> Result<Value> {
    let json = match value {
        DataElement::Integer(i) => i64::try_from(*i)
            .map(Value::from)
            .or_else(|_| u64::try_from(*i).map(Value::from))
            .unwrap_or_else(|_| Value::String(i.to_string())),
        DataElement::Float(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
        DataElement::Bool(b) => Value::Bool(*b),
        DataElement::Text(s) => Value::String(s.clone()),
        DataElement::Bytes(b) => Value::String(Base64UrlUnpadded::encode_string(b)),
        DataElement::Null => Value::Null,
        DataElement::List(items) => Value::Array(items.iter().map(to_json).collect::<Result<_>>()?),
        DataElement::Map(map) => {
            let mut obj = Map::new();
            for (k, v) in map.iter() {
                obj.insert(k.to_string(), to_json(v)?);
            }
            Value::Object(obj)
        }
        DataElement::DateTime(dt, _) => Value::String(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        DataElement::FullDate(date, _) => Value::String(date.format("%Y-%m-%d").to_string()),
        DataElement::Nested(_) => to_json(&value.unwrap_nested()?)?,
    };
    Ok(json)
}

/// Primitive conversion of a JSON value to a data element. Strings stay
/// text; no date or byte inference is attempted.
#[must_use]
pub fn from_json(value: &Value) -> DataElement {
    match value {
        Value::Null => DataElement::Null,
        Value::Bool(b) => DataElement::Bool(*b),
        Value::Number(n) => json_integer(value)
            .unwrap_or_else(|| n.as_f64().map_or(DataElement::Null, DataElement::Float)),
        Value::String(s) => DataElement::Text(s.clone()),
        Value::Array(items) => DataElement::List(items.iter().map(from_json).collect()),
        Value::Object(obj) => {
            DataElement::Map(obj.iter().map(|(k, v)| (k.as_str(), from_json(v))).collect::<ElementMap>())
        }
    }
}

fn json_integer(value: &Value) -> Option<DataElement> {
    value
        .as_i64()
        .map(i128::from)
        .or_else(|| value.as_u64().map(i128::from))
        .map(DataElement::Integer)
}

fn parse_full_date(s: &str) -> Result<DataElement> {
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| Error::Malformed(format!("invalid full-date `{s}`: {e}")))?;
    Ok(DataElement::FullDate(date, FullDateMode::Text))
}

fn parse_date_time(s: &str) -> Result<DataElement> {
    let dt = DateTime::parse_from_rfc3339(s)
        .map_err(|e| Error::Malformed(format!("invalid date-time `{s}`: {e}")))?;
    Ok(DataElement::DateTime(dt.with_timezone(&Utc), DateTimeMode::TDate))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn mdl_shapes() {
        let registry = Registry::mdl();
        let date = NaiveDate::from_ymd_opt(1990, 1, 15).unwrap();

        assert!(registry.check(MDL_NAMESPACE, "given_name", &"ALICE".into()).is_ok());
        assert!(registry.check(MDL_NAMESPACE, "birth_date", &date.into()).is_ok());
        assert!(registry.check(MDL_NAMESPACE, "age_over_18", &true.into()).is_ok());

        let err = registry.check(MDL_NAMESPACE, "age_over_18", &"yes".into()).unwrap_err();
        assert_eq!(
            err,
            Error::Malformed(
                "org.iso.18013.5.1/age_over_18: expected boolean, found text string".to_string()
            )
        );
    }

    #[test]
    fn unregistered_elements_pass() {
        let registry = Registry::mdl();
        assert!(registry.check("org.example", "anything", &DataElement::Null).is_ok());
    }

    #[test]
    fn bytes_as_base64url() {
        let registry = Registry::mdl();
        let portrait = DataElement::Bytes(vec![0xff, 0xd8, 0xff]);
        let json = registry.to_json(MDL_NAMESPACE, "portrait", &portrait).unwrap();
        assert_eq!(json, json!("_9j_"));

        let back = registry.from_json(MDL_NAMESPACE, "portrait", &json).unwrap();
        assert_eq!(back, portrait);
    }

    #[test]
    fn dates_as_iso_strings() {
        let registry = Registry::mdl();
        let issue = registry.from_json(MDL_NAMESPACE, "issue_date", &json!("2024-03-01")).unwrap();
        assert!(matches!(issue, DataElement::FullDate(..)));

        let capture = registry
            .from_json(MDL_NAMESPACE, "portrait_capture_date", &json!("2024-03-01T10:00:00Z"))
            .unwrap();
        assert_eq!(
            registry.to_json(MDL_NAMESPACE, "portrait_capture_date", &capture).unwrap(),
            json!("2024-03-01T10:00:00Z")
        );
    }

    #[test]
    fn structured_fallback() {
        let registry = Registry::mdl();
        let privileges = json!([{"vehicle_category_code": "A", "issue_date": "2018-08-09"}]);
        let element = registry.from_json(MDL_NAMESPACE, "driving_privileges", &privileges).unwrap();
        assert_eq!(registry.to_json(MDL_NAMESPACE, "driving_privileges", &element).unwrap(), privileges);
    }

    #[test]
    fn nested_values_unwrapped() {
        let inner = DataElement::from("inside");
        let nested = DataElement::wrap(&inner).unwrap();
        assert_eq!(to_json(&nested).unwrap(), json!("inside"));
    }
}
