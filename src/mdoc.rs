//! # mdoc
//!
//! The `Document` returned in a `DeviceResponse`: data elements signed by
//! the issuer (authenticated through the MSO) and, optionally, data
//! elements signed by the mobile device (authenticated per transaction).
//!
//! See 8.3.2.1.2.2 Device retrieval mdoc response.

use std::collections::BTreeMap;
use std::ops::Deref;

use base64ct::{Base64UrlUnpadded, Encoding};
use ciborium::Value;
use coset::{AsCborValue, CoseMac0, CoseSign1};
use rand::{rng, Rng};
use serde_json::Map;

use crate::cbor::{decode_with, DataElement, DecodeLimits, ElementMap, MapKey, Tag24};
use crate::error::{Error, Result};
use crate::mso::{DigestId, DigestIdGenerator, MobileSecurityObject, NameSpace};
use crate::registry::Registry;

/// Returned data elements for each namespace.
pub type IssuerNameSpaces = BTreeMap<NameSpace, Vec<IssuerSignedItemBytes>>;

/// `IssuerSignedItemBytes` represents the tagged `IssuerSignedItem` after
/// CBOR serialization:  `#6.24(bstr .cbor IssuerSignedItem)`
pub type IssuerSignedItemBytes = Tag24<IssuerSignedItem>;

/// `DeviceNameSpacesBytes = #6.24(bstr .cbor DeviceNameSpaces)`
pub type DeviceNameSpacesBytes = Tag24<DeviceNameSpaces>;

/// A single mdoc.
#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    /// Document type, e.g. `org.iso.18013.5.1.mDL`.
    pub doc_type: String,

    /// Issuer-signed data elements and the MSO.
    pub issuer_signed: IssuerSigned,

    /// Device-signed data elements and device authentication.
    pub device_signed: Option<DeviceSigned>,

    /// Per-element error codes reported by the device.
    pub errors: Option<ElementMap>,
}

impl Document {
    /// Decode a CBOR-encoded document.
    ///
    /// # Errors
    ///
    /// Returns a `Malformed` error if the bytes are not a valid document.
    pub fn from_slice(bytes: &[u8], limits: &DecodeLimits) -> Result<Self> {
        Self::try_from(decode_with(bytes, limits)?)
    }
}

/// Data elements (claims) returned by the Issuer. Each data element is
/// hashed and signed by the Issuer in the MSO.
#[derive(Clone, Debug, PartialEq)]
pub struct IssuerSigned {
    /// Returned data elements for each namespace (`IssuerNameSpaces` element)
    pub name_spaces: IssuerNameSpaces,

    /// The mobile security object (MSO) for issuer data authentication.
    /// `COSE_Sign1` with a payload of `MobileSecurityObjectBytes`
    pub issuer_auth: CoseSign1,
}

impl IssuerSigned {
    /// The MSO carried as the `issuerAuth` payload.
    ///
    /// # Errors
    ///
    /// Returns a `Malformed` error if the payload is missing or is not a
    /// tag-24 wrapped MSO.
    pub fn mso(&self) -> Result<Tag24<MobileSecurityObject>> {
        let Some(payload) = &self.issuer_auth.payload else {
            return Err(Error::Malformed("issuerAuth has no payload".to_string()));
        };
        Tag24::try_from(crate::cbor::decode(payload)?)
    }
}

/// Issuer-signed data element
#[derive(Clone, Debug, PartialEq)]
pub struct IssuerSignedItem {
    /// Id of the digest as added to the MSO `value_digests` parameter.
    pub digest_id: DigestId,

    /// Random value for issuer data authentication (min. 16 bytes).
    pub random: Vec<u8>,

    /// Data element identifier. For example, "`family_name`"
    pub element_identifier: String,

    /// Data element value. For example, "`Smith`"
    pub element_value: DataElement,
}

impl IssuerSignedItem {
    /// A new item with a fresh 16-byte random salt.
    #[must_use]
    pub fn new(digest_id: DigestId, element_identifier: &str, element_value: DataElement) -> Self {
        Self {
            digest_id,
            random: rng().random::<[u8; 16]>().into(),
            element_identifier: element_identifier.to_string(),
            element_value,
        }
    }

    /// A new item with its value converted from JSON by the global
    /// [`Registry`].
    ///
    /// # Errors
    ///
    /// Returns an error if the registered codec rejects the value.
    pub fn from_json(
        digest_id: DigestId, name_space: &str, element_identifier: &str, value: &serde_json::Value,
    ) -> Result<Self> {
        let element_value = Registry::global().from_json(name_space, element_identifier, value)?;
        Ok(Self::new(digest_id, element_identifier, element_value))
    }
}

/// Build issuer-signed items from a JSON dataset of the form
/// `{namespace: {element identifier: value}}`.
///
/// # Errors
///
/// Returns an error if a namespace is not a JSON object or an element value
/// is rejected by its registered codec.
pub fn name_spaces_from_json(dataset: &Map<String, serde_json::Value>) -> Result<IssuerNameSpaces> {
    let mut name_spaces = IssuerNameSpaces::new();

    for (name_space, elements) in dataset {
        // namespace is a root-level claim
        let Some(elements) = elements.as_object() else {
            return Err(Error::Malformed(format!("dataset: {name_space} is not an object")));
        };

        let mut id_gen = DigestIdGenerator::new();
        let items = name_spaces.entry(name_space.clone()).or_default();
        for (identifier, value) in elements {
            let item = IssuerSignedItem::from_json(id_gen.generate(), name_space, identifier, value)?;
            items.push(Tag24::new(item)?);
        }
    }

    Ok(name_spaces)
}

/// Device-signed data elements and the device's proof over them.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceSigned {
    /// Device-signed data elements, as received.
    pub name_spaces: DeviceNameSpacesBytes,

    /// Signature or MAC over the `DeviceAuthentication` structure.
    pub device_auth: DeviceAuth,
}

/// Device-signed data elements: namespace → element identifier → value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeviceNameSpaces(pub BTreeMap<NameSpace, BTreeMap<String, DataElement>>);

impl Deref for DeviceNameSpaces {
    type Target = BTreeMap<NameSpace, BTreeMap<String, DataElement>>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Device authentication: exactly one of a signature or a MAC.
#[derive(Clone, Debug, PartialEq)]
pub enum DeviceAuth {
    /// `deviceSignature`: detached `COSE_Sign1`.
    Signature(CoseSign1),

    /// `deviceMac`: detached `COSE_Mac0`.
    Mac(CoseMac0),
}

/// A device response holding one or more documents.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceResponse {
    /// Version, "1.0".
    pub version: String,

    /// Returned documents.
    pub documents: Vec<Document>,

    /// Status code; 0 is OK.
    pub status: u64,
}

/// A decoded presentation payload.
#[derive(Clone, Debug, PartialEq)]
pub enum Presentation {
    /// A bare document.
    Document(Box<Document>),

    /// A device response container.
    Response(DeviceResponse),
}

impl Presentation {
    /// Decode a base64url (unpadded) presentation holding either a
    /// `Document` or a `DeviceResponse`.
    ///
    /// # Errors
    ///
    /// Returns a `Malformed` error if the text is not base64url or the
    /// content is not a valid document or device response.
    pub fn parse(payload: &str, limits: &DecodeLimits) -> Result<Self> {
        let bytes = Base64UrlUnpadded::decode_vec(payload.trim())?;
        let element = decode_with(&bytes, limits)?;

        let is_document = element.as_map().is_some_and(|m| m.get_text("docType").is_some());
        if is_document {
            Ok(Self::Document(Box::new(Document::try_from(element)?)))
        } else {
            Ok(Self::Response(DeviceResponse::try_from(element)?))
        }
    }

    /// The contained documents.
    #[must_use]
    pub fn into_documents(self) -> Vec<Document> {
        match self {
            Self::Document(doc) => vec![*doc],
            Self::Response(response) => response.documents,
        }
    }
}

// ---------------------------------------------------------------------------
// CBOR mapping
// ---------------------------------------------------------------------------

pub(crate) fn cose_from_element<T: AsCborValue>(element: DataElement) -> Result<T> {
    Ok(T::from_cbor_value(Value::try_from(element)?)?)
}

pub(crate) fn cose_to_element<T: AsCborValue>(cose: T) -> Result<DataElement> {
    DataElement::try_from(cose.to_cbor_value()?)
}

impl From<&IssuerSignedItem> for DataElement {
    fn from(item: &IssuerSignedItem) -> Self {
        let mut map = ElementMap::new();
        map.insert("digestID", item.digest_id);
        map.insert("random", item.random.clone());
        map.insert("elementIdentifier", item.element_identifier.as_str());
        map.insert("elementValue", item.element_value.clone());
        Self::Map(map)
    }
}

impl TryFrom<DataElement> for IssuerSignedItem {
    type Error = Error;

    fn try_from(element: DataElement) -> Result<Self> {
        const CTX: &str = "IssuerSignedItem";
        let mut map = element.into_map(CTX)?;
        Ok(Self {
            digest_id: map.take("digestID", CTX)?.into_uint("digestID")?,
            random: map.take("random", CTX)?.into_bytes("random")?,
            element_identifier: map.take("elementIdentifier", CTX)?.into_text("elementIdentifier")?,
            element_value: map.take("elementValue", CTX)?,
        })
    }
}

impl TryFrom<&IssuerSigned> for DataElement {
    type Error = Error;

    fn try_from(issuer_signed: &IssuerSigned) -> Result<Self> {
        let name_spaces: ElementMap = issuer_signed
            .name_spaces
            .iter()
            .map(|(ns, items)| (ns.as_str(), items.iter().map(Self::from).collect::<Vec<_>>()))
            .collect();

        let mut map = ElementMap::new();
        map.insert("nameSpaces", name_spaces);
        map.insert("issuerAuth", cose_to_element(issuer_signed.issuer_auth.clone())?);
        Ok(Self::Map(map))
    }
}

impl TryFrom<DataElement> for IssuerSigned {
    type Error = Error;

    fn try_from(element: DataElement) -> Result<Self> {
        const CTX: &str = "IssuerSigned";
        let mut map = element.into_map(CTX)?;
        let registry = Registry::global();

        let mut name_spaces = IssuerNameSpaces::new();
        if let Some(entries) = map.remove_text("nameSpaces") {
            for (ns, items) in entries.into_map("nameSpaces")? {
                let MapKey::Text(ns) = ns else {
                    return Err(Error::Malformed("nameSpaces: namespace must be text".to_string()));
                };
                let mut parsed = Vec::new();
                for item in items.into_list("nameSpaces")? {
                    let item = IssuerSignedItemBytes::try_from(item)?;
                    registry.check(&ns, &item.element_identifier, &item.element_value)?;
                    parsed.push(item);
                }
                name_spaces.insert(ns, parsed);
            }
        }

        Ok(Self {
            name_spaces,
            issuer_auth: cose_from_element(map.take("issuerAuth", CTX)?)?,
        })
    }
}

impl From<&DeviceNameSpaces> for DataElement {
    fn from(name_spaces: &DeviceNameSpaces) -> Self {
        let map: ElementMap = name_spaces
            .iter()
            .map(|(ns, elements)| {
                let elements: ElementMap =
                    elements.iter().map(|(id, v)| (id.as_str(), v.clone())).collect();
                (ns.as_str(), elements)
            })
            .collect();
        Self::Map(map)
    }
}

impl TryFrom<DataElement> for DeviceNameSpaces {
    type Error = Error;

    fn try_from(element: DataElement) -> Result<Self> {
        let registry = Registry::global();
        let mut name_spaces = BTreeMap::new();

        for (ns, elements) in element.into_map("DeviceNameSpaces")? {
            let MapKey::Text(ns) = ns else {
                return Err(Error::Malformed("DeviceNameSpaces: namespace must be text".to_string()));
            };
            let mut parsed = BTreeMap::new();
            for (id, value) in elements.into_map("DeviceSignedItems")? {
                let MapKey::Text(id) = id else {
                    return Err(Error::Malformed(
                        "DeviceSignedItems: identifier must be text".to_string(),
                    ));
                };
                registry.check(&ns, &id, &value)?;
                parsed.insert(id, value);
            }
            name_spaces.insert(ns, parsed);
        }

        Ok(Self(name_spaces))
    }
}

impl TryFrom<&DeviceAuth> for DataElement {
    type Error = Error;

    fn try_from(auth: &DeviceAuth) -> Result<Self> {
        let mut map = ElementMap::new();
        match auth {
            DeviceAuth::Signature(sign1) => {
                map.insert("deviceSignature", cose_to_element(sign1.clone())?);
            }
            DeviceAuth::Mac(mac0) => {
                map.insert("deviceMac", cose_to_element(mac0.clone())?);
            }
        }
        Ok(Self::Map(map))
    }
}

impl TryFrom<DataElement> for DeviceAuth {
    type Error = Error;

    fn try_from(element: DataElement) -> Result<Self> {
        let mut map = element.into_map("deviceAuth")?;
        match (map.remove_text("deviceSignature"), map.remove_text("deviceMac")) {
            (Some(sig), None) => Ok(Self::Signature(cose_from_element(sig)?)),
            (None, Some(mac)) => Ok(Self::Mac(cose_from_element(mac)?)),
            (Some(_), Some(_)) => Err(Error::Malformed(
                "deviceAuth: both deviceSignature and deviceMac present".to_string(),
            )),
            (None, None) => Err(Error::Malformed(
                "deviceAuth: neither deviceSignature nor deviceMac present".to_string(),
            )),
        }
    }
}

impl TryFrom<&DeviceSigned> for DataElement {
    type Error = Error;

    fn try_from(device_signed: &DeviceSigned) -> Result<Self> {
        let mut map = ElementMap::new();
        map.insert("nameSpaces", device_signed.name_spaces.to_element());
        map.insert("deviceAuth", Self::try_from(&device_signed.device_auth)?);
        Ok(Self::Map(map))
    }
}

impl TryFrom<DataElement> for DeviceSigned {
    type Error = Error;

    fn try_from(element: DataElement) -> Result<Self> {
        const CTX: &str = "DeviceSigned";
        let mut map = element.into_map(CTX)?;
        Ok(Self {
            name_spaces: Tag24::try_from(map.take("nameSpaces", CTX)?)?,
            device_auth: DeviceAuth::try_from(map.take("deviceAuth", CTX)?)?,
        })
    }
}

impl TryFrom<&Document> for DataElement {
    type Error = Error;

    fn try_from(doc: &Document) -> Result<Self> {
        let mut map = ElementMap::new();
        map.insert("docType", doc.doc_type.as_str());
        map.insert("issuerSigned", Self::try_from(&doc.issuer_signed)?);
        if let Some(device_signed) = &doc.device_signed {
            map.insert("deviceSigned", Self::try_from(device_signed)?);
        }
        if let Some(errors) = &doc.errors {
            map.insert("errors", errors.clone());
        }
        Ok(Self::Map(map))
    }
}

impl TryFrom<DataElement> for Document {
    type Error = Error;

    fn try_from(element: DataElement) -> Result<Self> {
        const CTX: &str = "Document";
        let mut map = element.into_map(CTX)?;
        Ok(Self {
            doc_type: map.take("docType", CTX)?.into_text("docType")?,
            issuer_signed: IssuerSigned::try_from(map.take("issuerSigned", CTX)?)?,
            device_signed: map.remove_text("deviceSigned").map(DeviceSigned::try_from).transpose()?,
            errors: map.remove_text("errors").map(|e| e.into_map("errors")).transpose()?,
        })
    }
}

impl TryFrom<&DeviceResponse> for DataElement {
    type Error = Error;

    fn try_from(response: &DeviceResponse) -> Result<Self> {
        let documents = response.documents.iter().map(Self::try_from).collect::<Result<Vec<_>>>()?;
        let mut map = ElementMap::new();
        map.insert("version", response.version.as_str());
        map.insert("documents", documents);
        map.insert("status", response.status);
        Ok(Self::Map(map))
    }
}

impl TryFrom<DataElement> for DeviceResponse {
    type Error = Error;

    fn try_from(element: DataElement) -> Result<Self> {
        const CTX: &str = "DeviceResponse";
        let mut map = element.into_map(CTX)?;
        let documents = match map.remove_text("documents") {
            Some(docs) => {
                docs.into_list("documents")?.into_iter().map(Document::try_from).collect::<Result<_>>()?
            }
            None => Vec::new(),
        };
        Ok(Self {
            version: map.take("version", CTX)?.into_text("version")?,
            documents,
            status: map.take("status", CTX)?.into_uint("status")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use coset::{CoseSign1Builder, HeaderBuilder};
    use serde_json::json;

    use super::*;
    use crate::cbor::encode;
    use crate::registry::MDL_NAMESPACE;

    fn issuer_signed(items: Vec<IssuerSignedItemBytes>) -> IssuerSigned {
        IssuerSigned {
            name_spaces: IssuerNameSpaces::from([(MDL_NAMESPACE.to_string(), items)]),
            issuer_auth: CoseSign1Builder::new()
                .protected(HeaderBuilder::new().algorithm(coset::iana::Algorithm::ES256).build())
                .payload(vec![0xd8, 0x18, 0x41, 0xa0])
                .signature(vec![0; 64])
                .build(),
        }
    }

    fn document() -> Document {
        let item = IssuerSignedItem::new(3, "given_name", "ALICE".into());
        Document {
            doc_type: "org.iso.18013.5.1.mDL".to_string(),
            issuer_signed: issuer_signed(vec![Tag24::new(item).unwrap()]),
            device_signed: None,
            errors: None,
        }
    }

    #[test]
    fn item_keys() {
        let item = IssuerSignedItem::new(3, "given_name", "ALICE".into());
        assert_eq!(item.random.len(), 16);

        let element = DataElement::from(&item);
        let map = element.as_map().unwrap();
        for key in ["digestID", "random", "elementIdentifier", "elementValue"] {
            assert!(map.get_text(key).is_some(), "missing {key}");
        }
        assert_eq!(IssuerSignedItem::try_from(element).unwrap(), item);
    }

    #[test]
    fn document_roundtrip() {
        let doc = document();
        let bytes = encode(&DataElement::try_from(&doc).unwrap()).unwrap();
        let decoded = Document::from_slice(&bytes, &DecodeLimits::default()).unwrap();
        assert_eq!(decoded.doc_type, doc.doc_type);
        assert_eq!(decoded.issuer_signed.name_spaces, doc.issuer_signed.name_spaces);
    }

    #[test]
    fn presentation_forms() {
        let doc = document();
        let doc_bytes = encode(&DataElement::try_from(&doc).unwrap()).unwrap();
        let encoded = Base64UrlUnpadded::encode_string(&doc_bytes);
        let bare = Presentation::parse(&encoded, &DecodeLimits::default()).unwrap();
        assert_eq!(bare.into_documents().len(), 1);

        let response = DeviceResponse {
            version: "1.0".to_string(),
            documents: vec![doc.clone(), doc],
            status: 0,
        };
        let bytes = encode(&DataElement::try_from(&response).unwrap()).unwrap();
        let encoded = Base64UrlUnpadded::encode_string(&bytes);
        let parsed = Presentation::parse(&encoded, &DecodeLimits::default()).unwrap();
        assert_eq!(parsed.into_documents().len(), 2);
    }

    #[test]
    fn invalid_base64_rejected() {
        let err = Presentation::parse("not base64!", &DecodeLimits::default()).unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));
    }

    #[test]
    fn registry_shape_checked_on_parse() {
        let item = IssuerSignedItem::new(3, "age_over_18", "yes".into());
        let signed = issuer_signed(vec![Tag24::new(item).unwrap()]);
        let element = DataElement::try_from(&signed).unwrap();
        assert!(matches!(IssuerSigned::try_from(element), Err(Error::Malformed(_))));
    }

    #[test]
    fn device_auth_requires_exactly_one() {
        assert!(DeviceAuth::try_from(DataElement::Map(ElementMap::new())).is_err());
    }

    #[test]
    fn dataset_to_name_spaces() {
        let dataset = json!({
            MDL_NAMESPACE: {
                "given_name": "Normal",
                "family_name": "Person",
                "birth_date": "1990-01-15",
                "age_over_18": true
            }
        });
        let name_spaces = name_spaces_from_json(dataset.as_object().unwrap()).unwrap();
        let items = &name_spaces[MDL_NAMESPACE];
        assert_eq!(items.len(), 4);

        let birth_date = items.iter().find(|i| i.element_identifier == "birth_date").unwrap();
        assert!(matches!(birth_date.element_value, DataElement::FullDate(..)));

        let mut ids: Vec<_> = items.iter().map(|i| i.digest_id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 4);
    }
}
