use std::ops::Deref;

use super::{decode, encode, DataElement};
use crate::error::{Error, Result};

/// Wraps types that require tagging with tag 24.
///
/// The wrapped value is kept alongside the exact bytes it was decoded from
/// (or encoded to). Those bytes, not a re-encoding of the value, are what
/// digests and signatures are computed over.
#[derive(Clone, Debug)]
pub struct Tag24<T> {
    inner: T,
    bytes: Vec<u8>,
}

impl<T> Tag24<T>
where
    for<'a> DataElement: From<&'a T>,
{
    /// Encode `inner` and wrap it.
    ///
    /// # Errors
    ///
    /// Returns an error if `inner` cannot be encoded.
    pub fn new(inner: T) -> Result<Self> {
        let bytes = encode(&DataElement::from(&inner))?;
        Ok(Self { inner, bytes })
    }
}

impl<T> Tag24<T>
where
    T: TryFrom<DataElement, Error = Error>,
{
    /// Decode `bytes` (the content of the tag-24 byte string) into `T`,
    /// retaining the bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if `bytes` is not valid CBOR or does not have the
    /// shape of `T`.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let inner = T::try_from(decode(&bytes)?)?;
        Ok(Self { inner, bytes })
    }
}

impl<T> Tag24<T> {
    /// The wrapped value.
    pub const fn inner(&self) -> &T {
        &self.inner
    }

    /// Consume, returning the wrapped value.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// The embedded CBOR bytes (without the tag-24 byte string header).
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The tag-24 element, `#6.24(bstr)`.
    #[must_use]
    pub fn to_element(&self) -> DataElement {
        DataElement::Nested(self.bytes.clone())
    }

    /// Full tag-24 encoding: `0xD8 0x18` followed by the byte string.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        encode(&self.to_element())
    }
}

impl<T> TryFrom<DataElement> for Tag24<T>
where
    T: TryFrom<DataElement, Error = Error>,
{
    type Error = Error;

    fn try_from(element: DataElement) -> Result<Self> {
        match element {
            DataElement::Nested(bytes) => Self::from_bytes(bytes),
            other => Err(Error::Malformed(format!("expected tag 24, found {}", other.kind()))),
        }
    }
}

impl<T> From<&Tag24<T>> for DataElement {
    fn from(tagged: &Tag24<T>) -> Self {
        tagged.to_element()
    }
}

impl<T> Deref for Tag24<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<T> PartialEq for Tag24<T> {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}
