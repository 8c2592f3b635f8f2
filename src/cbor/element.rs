//! # Data Element
//!
//! See CBOR major types (RFC 8949 §3.1), the CDDL prelude (RFC 8610
//! Appendix D) and the CBOR date extension (RFC 8943).

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::{Error, Result};

/// A single unit of CBOR data.
///
/// Byte-string-backed variants compare by content. Lists compare
/// positionally; maps compare by key/value correspondence independent of
/// encoding order. Date variants compare by the instant (or day) they
/// represent, not by the tag form used to encode them. An epoch-form
/// date-time compares at the precision its encoding carries: whole seconds
/// for [`DateTimeMode::EpochInt`], the `f64` value for
/// [`DateTimeMode::EpochFloat`].
#[derive(Clone, Debug)]
pub enum DataElement {
    /// Major types 0 and 1.
    Integer(i128),

    /// Major type 7, half/single/double precision.
    Float(f64),

    /// Simple values 20 and 21.
    Bool(bool),

    /// Major type 3.
    Text(String),

    /// Major type 2.
    Bytes(Vec<u8>),

    /// Simple value 22.
    Null,

    /// Major type 4.
    List(Vec<DataElement>),

    /// Major type 5, integer or text keys.
    Map(ElementMap),

    /// Tag 0 (`tdate`) or tag 1 (`time`).
    DateTime(DateTime<Utc>, DateTimeMode),

    /// Tag 1004 (`full-date`) or tag 100 (days since epoch).
    FullDate(NaiveDate, FullDateMode),

    /// Tag 24: a byte string holding another encoded data item.
    Nested(Vec<u8>),
}

/// Encoding form of a [`DataElement::DateTime`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DateTimeMode {
    /// `#6.0(tstr)`, RFC 3339.
    #[default]
    TDate,

    /// `#6.1(int)`, whole seconds since epoch. Sub-second precision is
    /// dropped when encoded.
    EpochInt,

    /// `#6.1(float)`, fractional seconds since epoch.
    EpochFloat,
}

/// Encoding form of a [`DataElement::FullDate`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FullDateMode {
    /// `#6.1004(tstr)`, `YYYY-MM-DD`.
    #[default]
    Text,

    /// `#6.100(int)`, days since 1970-01-01.
    EpochDays,
}

impl DataElement {
    /// Short name of the variant, for error messages.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::Bool(_) => "boolean",
            Self::Text(_) => "text string",
            Self::Bytes(_) => "byte string",
            Self::Null => "null",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::DateTime(..) => "date-time",
            Self::FullDate(..) => "full-date",
            Self::Nested(_) => "encoded CBOR",
        }
    }

    /// Encode `element` and wrap the result as a tag-24 nested element.
    ///
    /// # Errors
    ///
    /// Returns an error if `element` cannot be encoded.
    pub fn wrap(element: &Self) -> Result<Self> {
        Ok(Self::Nested(super::encode(element)?))
    }

    /// Decode the content of a tag-24 nested element.
    ///
    /// # Errors
    ///
    /// Returns an error if the element is not nested or its content is not
    /// valid CBOR.
    pub fn unwrap_nested(&self) -> Result<Self> {
        let Self::Nested(bytes) = self else {
            return Err(Error::Malformed(format!("expected encoded CBOR, found {}", self.kind())));
        };
        super::decode(bytes)
    }

    /// Text content, if a text string.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Byte content, if a byte string.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Integer value, if an integer.
    #[must_use]
    pub const fn as_integer(&self) -> Option<i128> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Boolean value, if a boolean.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Map entries, if a map.
    #[must_use]
    pub const fn as_map(&self) -> Option<&ElementMap> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// List items, if a list.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Self]> {
        match self {
            Self::List(l) => Some(l),
            _ => None,
        }
    }

    /// Consume into a text string.
    ///
    /// # Errors
    ///
    /// Returns a `Malformed` error naming `field` if the element is not a
    /// text string.
    pub fn into_text(self, field: &str) -> Result<String> {
        match self {
            Self::Text(s) => Ok(s),
            other => Err(unexpected(field, "text string", &other)),
        }
    }

    /// Consume into a byte string.
    ///
    /// # Errors
    ///
    /// Returns a `Malformed` error naming `field` if the element is not a
    /// byte string.
    pub fn into_bytes(self, field: &str) -> Result<Vec<u8>> {
        match self {
            Self::Bytes(b) => Ok(b),
            other => Err(unexpected(field, "byte string", &other)),
        }
    }

    /// Consume into a map.
    ///
    /// # Errors
    ///
    /// Returns a `Malformed` error naming `field` if the element is not a
    /// map.
    pub fn into_map(self, field: &str) -> Result<ElementMap> {
        match self {
            Self::Map(m) => Ok(m),
            other => Err(unexpected(field, "map", &other)),
        }
    }

    /// Consume into a list.
    ///
    /// # Errors
    ///
    /// Returns a `Malformed` error naming `field` if the element is not a
    /// list.
    pub fn into_list(self, field: &str) -> Result<Vec<Self>> {
        match self {
            Self::List(l) => Ok(l),
            other => Err(unexpected(field, "list", &other)),
        }
    }

    /// Consume into an unsigned integer.
    ///
    /// # Errors
    ///
    /// Returns a `Malformed` error naming `field` if the element is not a
    /// non-negative integer that fits in a `u64`.
    pub fn into_uint(self, field: &str) -> Result<u64> {
        match self {
            Self::Integer(i) => u64::try_from(i)
                .map_err(|_| Error::Malformed(format!("{field}: {i} is not an unsigned integer"))),
            other => Err(unexpected(field, "unsigned integer", &other)),
        }
    }

    /// Consume into a UTC date-time, accepting either date-time tag form.
    ///
    /// # Errors
    ///
    /// Returns a `Malformed` error naming `field` if the element is not a
    /// date-time.
    pub fn into_date_time(self, field: &str) -> Result<DateTime<Utc>> {
        match self {
            Self::DateTime(dt, _) => Ok(dt),
            other => Err(unexpected(field, "date-time", &other)),
        }
    }
}

pub(crate) fn unexpected(field: &str, expected: &str, found: &DataElement) -> Error {
    Error::Malformed(format!("{field}: expected {expected}, found {}", found.kind()))
}

impl PartialEq for DataElement {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) | (Self::Nested(a), Self::Nested(b)) => a == b,
            (Self::Null, Self::Null) => true,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => a == b,
            (Self::DateTime(a, am), Self::DateTime(b, bm)) => date_time_eq(a, *am, b, *bm),
            (Self::FullDate(a, _), Self::FullDate(b, _)) => a == b,
            _ => false,
        }
    }
}

// Instants compare at the precision of the coarser encoding form.
fn date_time_eq(a: &DateTime<Utc>, am: DateTimeMode, b: &DateTime<Utc>, bm: DateTimeMode) -> bool {
    match (am, bm) {
        (DateTimeMode::EpochFloat, _) | (_, DateTimeMode::EpochFloat) => {
            epoch_float(a).to_bits() == epoch_float(b).to_bits()
        }
        (DateTimeMode::EpochInt, _) | (_, DateTimeMode::EpochInt) => a.timestamp() == b.timestamp(),
        (DateTimeMode::TDate, DateTimeMode::TDate) => a == b,
    }
}

/// Fractional seconds since the epoch, as carried by `#6.1(float)`.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn epoch_float(dt: &DateTime<Utc>) -> f64 {
    dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_nanos()) / 1e9
}

impl From<&str> for DataElement {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for DataElement {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<bool> for DataElement {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for DataElement {
    fn from(i: i64) -> Self {
        Self::Integer(i.into())
    }
}

impl From<u64> for DataElement {
    fn from(i: u64) -> Self {
        Self::Integer(i.into())
    }
}

impl From<f64> for DataElement {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<Vec<u8>> for DataElement {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(b)
    }
}

impl From<NaiveDate> for DataElement {
    fn from(d: NaiveDate) -> Self {
        Self::FullDate(d, FullDateMode::Text)
    }
}

impl From<DateTime<Utc>> for DataElement {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::DateTime(dt, DateTimeMode::TDate)
    }
}

impl From<Vec<Self>> for DataElement {
    fn from(l: Vec<Self>) -> Self {
        Self::List(l)
    }
}

impl From<ElementMap> for DataElement {
    fn from(m: ElementMap) -> Self {
        Self::Map(m)
    }
}

/// Map key: either an integer or a text string.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MapKey {
    /// Integer key (e.g. COSE labels).
    Int(i64),

    /// Text key.
    Text(String),
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for MapKey {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for MapKey {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for MapKey {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl TryFrom<DataElement> for MapKey {
    type Error = Error;

    fn try_from(element: DataElement) -> Result<Self> {
        match element {
            DataElement::Text(s) => Ok(Self::Text(s)),
            DataElement::Integer(i) => i64::try_from(i)
                .map(Self::Int)
                .map_err(|_| Error::Malformed(format!("map key {i} out of range"))),
            other => Err(unexpected("map key", "integer or text string", &other)),
        }
    }
}

/// An ordered CBOR map with unique keys.
///
/// Entries keep the order they were inserted (or decoded) in, so
/// re-encoding reproduces the original layout. Lookups go through a key
/// index, so building an N-entry map costs O(N).
#[derive(Clone, Debug, Default)]
pub struct ElementMap {
    entries: Vec<(MapKey, DataElement)>,
    index: HashMap<MapKey, usize>,
}

impl ElementMap {
    /// An empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry. An existing entry for `key` has its value replaced
    /// in place and the previous value is returned.
    pub fn insert(&mut self, key: impl Into<MapKey>, value: impl Into<DataElement>) -> Option<DataElement> {
        let key = key.into();
        let value = value.into();
        if let Some(&pos) = self.index.get(&key) {
            return Some(std::mem::replace(&mut self.entries[pos].1, value));
        }
        self.index.insert(key.clone(), self.entries.len());
        self.entries.push((key, value));
        None
    }

    /// Value for `key`.
    #[must_use]
    pub fn get(&self, key: &MapKey) -> Option<&DataElement> {
        self.index.get(key).map(|&pos| &self.entries[pos].1)
    }

    /// Value for a text key.
    #[must_use]
    pub fn get_text(&self, key: &str) -> Option<&DataElement> {
        self.get(&MapKey::from(key))
    }

    /// Remove and return the value for a text key.
    pub fn remove_text(&mut self, key: &str) -> Option<DataElement> {
        let pos = self.index.remove(&MapKey::from(key))?;
        let (_, value) = self.entries.remove(pos);
        for (k, _) in &self.entries[pos..] {
            if let Some(i) = self.index.get_mut(k) {
                *i -= 1;
            }
        }
        Some(value)
    }

    /// Remove and return the value for a required text key.
    ///
    /// # Errors
    ///
    /// Returns a `Malformed` error naming `container` if the key is absent.
    pub fn take(&mut self, key: &str, container: &str) -> Result<DataElement> {
        self.remove_text(key)
            .ok_or_else(|| Error::Malformed(format!("{container}: missing `{key}`")))
    }

    /// True if the map holds an entry for `key`.
    #[must_use]
    pub fn contains_key(&self, key: &MapKey) -> bool {
        self.index.contains_key(key)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the map has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in map order.
    pub fn iter(&self) -> impl Iterator<Item = (&MapKey, &DataElement)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub(crate) fn push_unique(&mut self, key: MapKey, value: DataElement) -> Result<()> {
        if self.contains_key(&key) {
            return Err(Error::Malformed(format!("duplicate map key `{key}`")));
        }
        self.index.insert(key.clone(), self.entries.len());
        self.entries.push((key, value));
        Ok(())
    }
}

impl PartialEq for ElementMap {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|(k, v)| other.get(k) == Some(v))
    }
}

impl IntoIterator for ElementMap {
    type IntoIter = std::vec::IntoIter<(MapKey, DataElement)>;
    type Item = (MapKey, DataElement);

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<K: Into<MapKey>, V: Into<DataElement>> FromIterator<(K, V)> for ElementMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}
