//! # Mobile Security Object (MSO)
//!
//! The MSO is used to provide Issuer data authentication for the associated
//! `mdoc`. It contains a digest of every issuer-signed data element, the
//! device key, the document type and the validity window, and is itself
//! signed by the issuer.
//!
//! See 9.1.2.4 Signing method and structure for MSO.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use rand::{rng, Rng};

use crate::cbor::{DataElement, ElementMap, MapKey, Tag24};
use crate::cose_key::CoseKey;
use crate::digest::{digest, DigestAlgorithm};
use crate::error::{Error, Result};
use crate::mdoc::{IssuerNameSpaces, IssuerSignedItem};

/// Digests for each namespace.
pub type ValueDigests = BTreeMap<NameSpace, DigestIds>;

/// Namespace identifier, e.g. `org.iso.18013.5.1`.
pub type NameSpace = String;

/// Digests keyed by digest ID.
pub type DigestIds = BTreeMap<DigestId, Digest>;

/// DigestID is an unsigned integer used to match the hashes in the MSO to the
/// data elements in the mdoc response.
///
/// The Digest ID must be unique within a namespace with no correlation between
/// IDs for the same namespace/element in different MSOs. The value must be
/// smaller than 2^31.
pub type DigestId = u64;

/// Digest bytes.
pub type Digest = Vec<u8>;

/// MSO version.
pub const VERSION: &str = "1.0";

/// `MobileSecurityObjectBytes = #6.24(bstr .cbor MobileSecurityObject)`
pub type MobileSecurityObjectBytes = Tag24<MobileSecurityObject>;

/// An mdoc digital signature is generated over the mobile security object (MSO).
#[derive(Clone, Debug, PartialEq)]
pub struct MobileSecurityObject {
    /// Version of the MobileSecurityObject. Must be 1.0.
    pub version: String,

    /// Message digest algorithm used, as named on the wire. Checked with
    /// [`MobileSecurityObject::digest_algorithm`].
    pub digest_algorithm: String,

    /// An ordered set of value digests for each data element in each name space.
    pub value_digests: ValueDigests,

    /// Device key information
    pub device_key_info: DeviceKeyInfo,

    /// The document type of the document being signed.
    pub doc_type: String,

    /// Validity information for the MSO
    pub validity_info: ValidityInfo,

    /// Revocation status reference.
    pub status: Option<Status>,
}

impl MobileSecurityObject {
    /// Build an MSO over the supplied issuer-signed items, computing one
    /// digest per item.
    ///
    /// # Errors
    ///
    /// Returns an error if an item cannot be encoded or two items in one
    /// namespace share a digest ID.
    pub fn create_for(
        name_spaces: &IssuerNameSpaces, device_key_info: DeviceKeyInfo, doc_type: &str,
        validity_info: ValidityInfo, algorithm: DigestAlgorithm, status: Option<Status>,
    ) -> Result<Self> {
        let mut value_digests = ValueDigests::new();

        for (name_space, items) in name_spaces {
            let digests = value_digests.entry(name_space.clone()).or_default();
            for item in items {
                if digests.insert(item.digest_id, digest(item, algorithm)?).is_some() {
                    return Err(Error::Malformed(format!(
                        "duplicate digestID {} in {name_space}",
                        item.digest_id
                    )));
                }
            }
        }

        Ok(Self {
            version: VERSION.to_string(),
            digest_algorithm: algorithm.to_string(),
            value_digests,
            device_key_info,
            doc_type: doc_type.to_string(),
            validity_info,
            status,
        })
    }

    /// The digest algorithm.
    ///
    /// # Errors
    ///
    /// Returns a `Crypto` error if the algorithm is not supported.
    pub fn digest_algorithm(&self) -> Result<DigestAlgorithm> {
        self.digest_algorithm.parse()
    }

    /// True if the MSO carries digests for `name_space`.
    #[must_use]
    pub fn has_name_space(&self, name_space: &str) -> bool {
        self.value_digests.contains_key(name_space)
    }

    /// Digests recorded for `name_space`. An absent namespace yields an empty
    /// map; use [`Self::has_name_space`] to tell the two apart.
    #[must_use]
    pub fn value_digests_for(&self, name_space: &str) -> DigestIds {
        self.value_digests.get(name_space).cloned().unwrap_or_default()
    }

    /// Check every item's digest against the digests recorded for
    /// `name_space`. Fails if any item is missing from the MSO or does not
    /// match.
    ///
    /// # Errors
    ///
    /// Returns a `Crypto` error for an unsupported digest algorithm and a
    /// `Policy` error naming the first missing or mismatched item.
    pub fn verify_signed_items(
        &self, name_space: &str, items: &[Tag24<IssuerSignedItem>],
    ) -> Result<()> {
        let algorithm = self.digest_algorithm()?;
        let digests = self.value_digests_for(name_space);

        for item in items {
            let Some(expected) = digests.get(&item.digest_id) else {
                return Err(Error::Policy(format!(
                    "no digest for {name_space}/{} (digestID {})",
                    item.element_identifier, item.digest_id
                )));
            };
            if digest(item, algorithm)? != *expected {
                return Err(Error::Policy(format!(
                    "digest mismatch for {name_space}/{} (digestID {})",
                    item.element_identifier, item.digest_id
                )));
            }
            tracing::trace!(
                name_space,
                element = %item.element_identifier,
                digest_id = item.digest_id,
                "digest matched"
            );
        }

        Ok(())
    }
}

/// Generates unique, uncorrelated digest IDs for a single namespace.
#[derive(Debug, Default)]
pub struct DigestIdGenerator {
    used: HashSet<DigestId>,
}

impl DigestIdGenerator {
    /// A generator with no IDs issued.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A random digest ID, smaller than 2^31, not previously returned by
    /// this generator.
    pub fn generate(&mut self) -> DigestId {
        loop {
            let id = rng().random_range(0..1_u64 << 31);
            if self.used.insert(id) {
                return id;
            }
        }
    }
}

/// Used to hold the mdoc authentication public key and information related to
/// this key. Encoded as an untagged `COSE_Key` element as specified in
/// [RFC 9052] and [RFC 9053].
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceKeyInfo {
    /// Device key
    pub device_key: CoseKey,

    /// Key authorizations
    pub key_authorizations: Option<KeyAuthorizations>,

    /// Key info
    pub key_info: Option<ElementMap>,
}

impl DeviceKeyInfo {
    /// Key info for `device_key` with no authorizations.
    #[must_use]
    pub const fn new(device_key: CoseKey) -> Self {
        Self {
            device_key,
            key_authorizations: None,
            key_info: None,
        }
    }
}

/// Data elements the device key may sign, per namespace.
pub type AuthorizedDataElements = BTreeMap<NameSpace, Vec<String>>;

/// Namespaces and data elements the device key is authorized to sign.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyAuthorizations {
    /// Namespaces in which every element is authorized.
    pub name_spaces: Option<Vec<NameSpace>>,

    /// Individually authorized data elements.
    /// e.g. <namespace: [data elements]>
    pub data_elements: Option<AuthorizedDataElements>,
}

impl KeyAuthorizations {
    /// True if the device key may sign `identifier` in `name_space`, either
    /// through a whole-namespace grant or an element grant.
    #[must_use]
    pub fn permits(&self, name_space: &str, identifier: &str) -> bool {
        let by_name_space =
            self.name_spaces.as_ref().is_some_and(|ns| ns.iter().any(|n| n == name_space));
        let by_element = self
            .data_elements
            .as_ref()
            .and_then(|de| de.get(name_space))
            .is_some_and(|ids| ids.iter().any(|id| id == identifier));
        by_name_space || by_element
    }
}

/// Contains information related to the validity of the MSO and its signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidityInfo {
    /// Time the MSO was signed
    pub signed: DateTime<Utc>,

    /// The timestamp before which the MSO is not yet valid. Should be equal
    /// or later than the `signed` element
    pub valid_from: DateTime<Utc>,

    /// The timestamp after which the MSO is no longer valid.
    ///
    /// The value must be later than the `valid_from` element.
    pub valid_until: DateTime<Utc>,

    /// The time at which the issuing authority expects to re-sign the MSO
    /// (and potentially update data elements).
    pub expected_update: Option<DateTime<Utc>>,
}

impl ValidityInfo {
    /// Check the current time lies within `[valid_from, valid_until]`.
    ///
    /// # Errors
    ///
    /// Returns a `Policy` error if the MSO is not yet valid or has expired.
    pub fn validate(&self) -> Result<()> {
        self.validate_at(Utc::now())
    }

    /// Check `now` lies within `[valid_from, valid_until]`.
    ///
    /// # Errors
    ///
    /// Returns a `Policy` error if the MSO is not yet valid or has expired.
    pub fn validate_at(&self, now: DateTime<Utc>) -> Result<()> {
        if now < self.valid_from {
            return Err(Error::Policy(format!("MSO not valid before {}", self.valid_from)));
        }
        if now > self.valid_until {
            return Err(Error::Policy(format!("MSO expired at {}", self.valid_until)));
        }
        Ok(())
    }
}

/// Revocation status reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Status {
    /// Token status list entry.
    StatusList {
        /// Index in the status list.
        idx: u64,
        /// Status list URI.
        uri: String,
    },

    /// Identifier list entry.
    IdentifierList {
        /// Identifier in the list.
        id: Vec<u8>,
        /// Identifier list URI.
        uri: String,
    },
}

// ---------------------------------------------------------------------------
// CBOR mapping
// ---------------------------------------------------------------------------

impl From<&MobileSecurityObject> for DataElement {
    fn from(mso: &MobileSecurityObject) -> Self {
        let value_digests: ElementMap = mso
            .value_digests
            .iter()
            .map(|(ns, ids)| {
                let digests: ElementMap = ids
                    .iter()
                    .map(|(id, d)| (MapKey::Int(i64::try_from(*id).unwrap_or(i64::MAX)), d.clone()))
                    .collect();
                (ns.as_str(), digests)
            })
            .collect();

        let mut map = ElementMap::new();
        map.insert("version", mso.version.as_str());
        map.insert("digestAlgorithm", mso.digest_algorithm.as_str());
        map.insert("valueDigests", value_digests);
        map.insert("deviceKeyInfo", Self::from(&mso.device_key_info));
        map.insert("docType", mso.doc_type.as_str());
        map.insert("validityInfo", Self::from(&mso.validity_info));
        if let Some(status) = &mso.status {
            map.insert("status", Self::from(status));
        }
        Self::Map(map)
    }
}

impl TryFrom<DataElement> for MobileSecurityObject {
    type Error = Error;

    fn try_from(element: DataElement) -> Result<Self> {
        const CTX: &str = "MobileSecurityObject";
        let mut map = element.into_map(CTX)?;

        let mut value_digests = ValueDigests::new();
        for (ns, digests) in map.take("valueDigests", CTX)?.into_map("valueDigests")? {
            let MapKey::Text(ns) = ns else {
                return Err(Error::Malformed("valueDigests: namespace must be text".to_string()));
            };
            let mut ids = DigestIds::new();
            for (id, digest) in digests.into_map("valueDigests")? {
                let MapKey::Int(id) = id else {
                    return Err(Error::Malformed("valueDigests: digestID must be uint".to_string()));
                };
                let id = u64::try_from(id).map_err(|_| {
                    Error::Malformed(format!("valueDigests: invalid digestID {id}"))
                })?;
                ids.insert(id, digest.into_bytes("digest")?);
            }
            value_digests.insert(ns, ids);
        }

        let status = map.remove_text("status").map(Status::try_from).transpose()?;

        Ok(Self {
            version: map.take("version", CTX)?.into_text("version")?,
            digest_algorithm: map.take("digestAlgorithm", CTX)?.into_text("digestAlgorithm")?,
            value_digests,
            device_key_info: DeviceKeyInfo::try_from(map.take("deviceKeyInfo", CTX)?)?,
            doc_type: map.take("docType", CTX)?.into_text("docType")?,
            validity_info: ValidityInfo::try_from(map.take("validityInfo", CTX)?)?,
            status,
        })
    }
}

impl From<&DeviceKeyInfo> for DataElement {
    fn from(info: &DeviceKeyInfo) -> Self {
        let mut map = ElementMap::new();
        map.insert("deviceKey", Self::from(&info.device_key));
        if let Some(auths) = &info.key_authorizations {
            map.insert("keyAuthorizations", Self::from(auths));
        }
        if let Some(key_info) = &info.key_info {
            map.insert("keyInfo", key_info.clone());
        }
        Self::Map(map)
    }
}

impl TryFrom<DataElement> for DeviceKeyInfo {
    type Error = Error;

    fn try_from(element: DataElement) -> Result<Self> {
        let mut map = element.into_map("deviceKeyInfo")?;
        Ok(Self {
            device_key: CoseKey::try_from(map.take("deviceKey", "deviceKeyInfo")?)?,
            key_authorizations: map
                .remove_text("keyAuthorizations")
                .map(KeyAuthorizations::try_from)
                .transpose()?,
            key_info: map.remove_text("keyInfo").map(|ki| ki.into_map("keyInfo")).transpose()?,
        })
    }
}

impl From<&KeyAuthorizations> for DataElement {
    fn from(auths: &KeyAuthorizations) -> Self {
        let mut map = ElementMap::new();
        if let Some(name_spaces) = &auths.name_spaces {
            let list = name_spaces.iter().map(|ns| Self::from(ns.as_str())).collect::<Vec<_>>();
            map.insert("nameSpaces", list);
        }
        if let Some(data_elements) = &auths.data_elements {
            let elements: ElementMap = data_elements
                .iter()
                .map(|(ns, ids)| {
                    (ns.as_str(), ids.iter().map(|id| Self::from(id.as_str())).collect::<Vec<_>>())
                })
                .collect();
            map.insert("dataElements", elements);
        }
        Self::Map(map)
    }
}

impl TryFrom<DataElement> for KeyAuthorizations {
    type Error = Error;

    fn try_from(element: DataElement) -> Result<Self> {
        let mut map = element.into_map("keyAuthorizations")?;

        let name_spaces = map
            .remove_text("nameSpaces")
            .map(|ns| text_list(ns, "nameSpaces"))
            .transpose()?;

        let data_elements = map
            .remove_text("dataElements")
            .map(|de| {
                let mut elements = AuthorizedDataElements::new();
                for (ns, ids) in de.into_map("dataElements")? {
                    elements.insert(ns.to_string(), text_list(ids, "dataElements")?);
                }
                Ok::<_, Error>(elements)
            })
            .transpose()?;

        Ok(Self {
            name_spaces,
            data_elements,
        })
    }
}

fn text_list(element: DataElement, field: &str) -> Result<Vec<String>> {
    element.into_list(field)?.into_iter().map(|e| e.into_text(field)).collect()
}

impl From<&ValidityInfo> for DataElement {
    fn from(info: &ValidityInfo) -> Self {
        let mut map = ElementMap::new();
        map.insert("signed", info.signed);
        map.insert("validFrom", info.valid_from);
        map.insert("validUntil", info.valid_until);
        if let Some(expected) = info.expected_update {
            map.insert("expectedUpdate", expected);
        }
        Self::Map(map)
    }
}

impl TryFrom<DataElement> for ValidityInfo {
    type Error = Error;

    fn try_from(element: DataElement) -> Result<Self> {
        const CTX: &str = "validityInfo";
        let mut map = element.into_map(CTX)?;
        Ok(Self {
            signed: map.take("signed", CTX)?.into_date_time("signed")?,
            valid_from: map.take("validFrom", CTX)?.into_date_time("validFrom")?,
            valid_until: map.take("validUntil", CTX)?.into_date_time("validUntil")?,
            expected_update: map
                .remove_text("expectedUpdate")
                .map(|e| e.into_date_time("expectedUpdate"))
                .transpose()?,
        })
    }
}

impl From<&Status> for DataElement {
    fn from(status: &Status) -> Self {
        let (key, entry) = match status {
            Status::StatusList { idx, uri } => {
                let mut entry = ElementMap::new();
                entry.insert("idx", *idx);
                entry.insert("uri", uri.as_str());
                ("status_list", entry)
            }
            Status::IdentifierList { id, uri } => {
                let mut entry = ElementMap::new();
                entry.insert("id", id.clone());
                entry.insert("uri", uri.as_str());
                ("identifier_list", entry)
            }
        };
        let mut map = ElementMap::new();
        map.insert(key, entry);
        Self::Map(map)
    }
}

impl TryFrom<DataElement> for Status {
    type Error = Error;

    fn try_from(element: DataElement) -> Result<Self> {
        let mut map = element.into_map("status")?;
        if let Some(list) = map.remove_text("status_list") {
            let mut list = list.into_map("status_list")?;
            return Ok(Self::StatusList {
                idx: list.take("idx", "status_list")?.into_uint("idx")?,
                uri: list.take("uri", "status_list")?.into_text("uri")?,
            });
        }
        if let Some(list) = map.remove_text("identifier_list") {
            let mut list = list.into_map("identifier_list")?;
            return Ok(Self::IdentifierList {
                id: list.take("id", "identifier_list")?.into_bytes("id")?,
                uri: list.take("uri", "identifier_list")?.into_text("uri")?,
            });
        }
        Err(Error::Malformed("status: expected status_list or identifier_list".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::cbor::{decode, encode};
    use crate::cose_key::{Ec2Curve, Ec2y};
    use crate::registry::MDL_NAMESPACE;

    fn device_key() -> CoseKey {
        CoseKey::Ec2 {
            crv: Ec2Curve::P256,
            x: vec![1; 32],
            y: Ec2y::Value(vec![2; 32]),
        }
    }

    fn validity(from: TimeDelta, until: TimeDelta) -> ValidityInfo {
        let now = Utc::now();
        ValidityInfo {
            signed: now + from,
            valid_from: now + from,
            valid_until: now + until,
            expected_update: None,
        }
    }

    fn given_name(digest_id: DigestId, value: &str) -> Tag24<IssuerSignedItem> {
        Tag24::new(IssuerSignedItem {
            digest_id,
            random: vec![9; 16],
            element_identifier: "given_name".to_string(),
            element_value: DataElement::from(value),
        })
        .unwrap()
    }

    fn mso_for(items: Vec<Tag24<IssuerSignedItem>>) -> MobileSecurityObject {
        let name_spaces = IssuerNameSpaces::from([(MDL_NAMESPACE.to_string(), items)]);
        MobileSecurityObject::create_for(
            &name_spaces,
            DeviceKeyInfo::new(device_key()),
            "org.iso.18013.5.1.mDL",
            validity(TimeDelta::days(-1), TimeDelta::days(1)),
            DigestAlgorithm::Sha256,
            None,
        )
        .unwrap()
    }

    #[test]
    fn alice_verifies_bob_does_not() {
        let alice = given_name(7, "ALICE");
        let mso = mso_for(vec![alice.clone()]);

        assert!(mso.verify_signed_items(MDL_NAMESPACE, &[alice]).is_ok());

        let bob = given_name(7, "BOB");
        let err = mso.verify_signed_items(MDL_NAMESPACE, &[bob]).unwrap_err();
        assert!(matches!(err, Error::Policy(_)));
    }

    #[test]
    fn unknown_digest_id_fails() {
        let mso = mso_for(vec![given_name(7, "ALICE")]);
        let err = mso.verify_signed_items(MDL_NAMESPACE, &[given_name(8, "ALICE")]).unwrap_err();
        assert!(matches!(err, Error::Policy(_)));
    }

    #[test]
    fn absent_namespace_is_empty() {
        let mso = mso_for(vec![given_name(7, "ALICE")]);
        assert!(mso.value_digests_for("org.example").is_empty());
        assert!(!mso.has_name_space("org.example"));
        assert_eq!(mso.value_digests_for(MDL_NAMESPACE).len(), 1);
    }

    #[test]
    fn duplicate_digest_ids_rejected() {
        let name_spaces = IssuerNameSpaces::from([(
            MDL_NAMESPACE.to_string(),
            vec![given_name(1, "A"), given_name(1, "B")],
        )]);
        let result = MobileSecurityObject::create_for(
            &name_spaces,
            DeviceKeyInfo::new(device_key()),
            "org.iso.18013.5.1.mDL",
            validity(TimeDelta::days(-1), TimeDelta::days(1)),
            DigestAlgorithm::Sha256,
            None,
        );
        assert!(result.is_err());
    }

    #[test]
    fn unsupported_algorithm() {
        let mut mso = mso_for(vec![given_name(7, "ALICE")]);
        mso.digest_algorithm = "MD5".to_string();
        let err = mso.verify_signed_items(MDL_NAMESPACE, &[given_name(7, "ALICE")]).unwrap_err();
        assert!(matches!(err, Error::Crypto(_)));
    }

    #[test]
    fn validity_window() {
        assert!(validity(TimeDelta::days(-1), TimeDelta::days(1)).validate().is_ok());
        assert!(validity(TimeDelta::days(-2), TimeDelta::days(-1)).validate().is_err());
        assert!(validity(TimeDelta::days(1), TimeDelta::days(2)).validate().is_err());
    }

    #[test]
    fn cbor_roundtrip() {
        let mut mso = mso_for(vec![given_name(7, "ALICE")]);
        mso.device_key_info.key_authorizations = Some(KeyAuthorizations {
            name_spaces: Some(vec!["org.example".to_string()]),
            data_elements: Some(AuthorizedDataElements::from([(
                MDL_NAMESPACE.to_string(),
                vec!["given_name".to_string()],
            )])),
        });
        mso.status = Some(Status::StatusList {
            idx: 42,
            uri: "https://example.com/status".to_string(),
        });

        let bytes = encode(&DataElement::from(&mso)).unwrap();
        let decoded = MobileSecurityObject::try_from(decode(&bytes).unwrap()).unwrap();
        assert_eq!(decoded, mso);
    }

    #[test]
    fn authorization_scope() {
        let auths = KeyAuthorizations {
            name_spaces: Some(vec!["org.example".to_string()]),
            data_elements: Some(AuthorizedDataElements::from([(
                MDL_NAMESPACE.to_string(),
                vec!["given_name".to_string()],
            )])),
        };
        assert!(auths.permits("org.example", "anything"));
        assert!(auths.permits(MDL_NAMESPACE, "given_name"));
        assert!(!auths.permits(MDL_NAMESPACE, "family_name"));
        assert!(!KeyAuthorizations::default().permits(MDL_NAMESPACE, "given_name"));
    }

    #[test]
    fn digest_ids_unique() {
        let mut id_gen = DigestIdGenerator::new();
        let ids: HashSet<DigestId> = (0..256).map(|_| id_gen.generate()).collect();
        assert_eq!(ids.len(), 256);
        assert!(ids.iter().all(|id| *id < 1 << 31));
    }
}
