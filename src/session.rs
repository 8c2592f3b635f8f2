//! # Session Transcript
//!
//! The session transcript binds device authentication to one specific
//! presentation exchange. For OpenID4VP presentations it is reconstructed
//! by the verifier from the request parameters it issued:
//!
//! ```text
//! SessionTranscript = [DeviceEngagementBytes, EReaderKeyBytes, Handover]
//! ```
//!
//! where both engagement fields are `null` and `Handover` is an
//! `OpenID4VPHandover` (redirect flow) or `OpenID4VPDCAPIHandover` (Digital
//! Credentials API) structure.

use sha2::{Digest, Sha256};

use crate::cbor::{encode, DataElement, Tag24};
use crate::error::Result;
use crate::mdoc::DeviceNameSpaces;

/// Handover identifier for OpenID4VP redirect and direct-post flows.
pub const OID4VP_HANDOVER: &str = "OpenID4VPHandover";

/// Handover identifier for the Digital Credentials API.
pub const DC_API_HANDOVER: &str = "OpenID4VPDCAPIHandover";

/// Context label of the `DeviceAuthentication` structure.
pub const DEVICE_AUTHENTICATION: &str = "DeviceAuthentication";

/// Per-transaction parameters the verifier issued in its request, used to
/// reconstruct the session transcript.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VerificationContext {
    /// Nonce sent in the authorization request.
    pub expected_nonce: String,

    /// Verifier's client identifier (the audience of the presentation).
    pub expected_audience: String,

    /// Response URI for `direct_post` responses.
    pub response_uri: Option<String>,

    /// JWK SHA-256 thumbprint of the verifier's response encryption key,
    /// when the response is encrypted.
    pub jwk_thumbprint: Option<Vec<u8>>,

    /// Web origin of the request, for Digital Credentials API
    /// presentations.
    pub origin: Option<String>,
}

impl VerificationContext {
    /// A context for the given nonce and audience.
    #[must_use]
    pub fn new(expected_nonce: impl Into<String>, expected_audience: impl Into<String>) -> Self {
        Self {
            expected_nonce: expected_nonce.into(),
            expected_audience: expected_audience.into(),
            ..Self::default()
        }
    }

    /// Set the response URI.
    #[must_use]
    pub fn response_uri(mut self, response_uri: impl Into<String>) -> Self {
        self.response_uri = Some(response_uri.into());
        self
    }

    /// Set the encryption key thumbprint.
    #[must_use]
    pub fn jwk_thumbprint(mut self, thumbprint: Vec<u8>) -> Self {
        self.jwk_thumbprint = Some(thumbprint);
        self
    }

    /// Set the Digital Credentials API origin.
    #[must_use]
    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }
}

/// `SessionTranscript = [DeviceEngagementBytes, EReaderKeyBytes, Handover]`
#[derive(Clone, Debug, PartialEq)]
pub struct SessionTranscript {
    /// Device engagement, `null` for OpenID4VP.
    pub device_engagement: DataElement,

    /// Reader ephemeral key, `null` for OpenID4VP.
    pub e_reader_key: DataElement,

    /// Handover structure.
    pub handover: DataElement,
}

impl SessionTranscript {
    /// OpenID4VP handover:
    /// `["OpenID4VPHandover", sha256(cbor([client_id, nonce, jwk_thumbprint, response_uri]))]`.
    ///
    /// # Errors
    ///
    /// Returns an error if the handover info cannot be encoded.
    pub fn oid4vp(
        client_id: &str, nonce: &str, jwk_thumbprint: Option<&[u8]>, response_uri: Option<&str>,
    ) -> Result<Self> {
        let info = DataElement::List(vec![
            client_id.into(),
            nonce.into(),
            jwk_thumbprint.map_or(DataElement::Null, |t| DataElement::Bytes(t.to_vec())),
            response_uri.map_or(DataElement::Null, DataElement::from),
        ]);
        Self::with_handover(OID4VP_HANDOVER, &info)
    }

    /// Digital Credentials API handover:
    /// `["OpenID4VPDCAPIHandover", sha256(cbor([origin, nonce, jwk_thumbprint]))]`.
    ///
    /// # Errors
    ///
    /// Returns an error if the handover info cannot be encoded.
    pub fn dc_api(origin: &str, nonce: &str, jwk_thumbprint: Option<&[u8]>) -> Result<Self> {
        let info = DataElement::List(vec![
            origin.into(),
            nonce.into(),
            jwk_thumbprint.map_or(DataElement::Null, |t| DataElement::Bytes(t.to_vec())),
        ]);
        Self::with_handover(DC_API_HANDOVER, &info)
    }

    /// Reconstruct the transcript for a verification context: the Digital
    /// Credentials API handover when the context carries an origin,
    /// otherwise the OpenID4VP handover.
    ///
    /// # Errors
    ///
    /// Returns an error if the handover info cannot be encoded.
    pub fn from_context(ctx: &VerificationContext) -> Result<Self> {
        let thumbprint = ctx.jwk_thumbprint.as_deref();
        match &ctx.origin {
            Some(origin) => Self::dc_api(origin, &ctx.expected_nonce, thumbprint),
            None => Self::oid4vp(
                &ctx.expected_audience,
                &ctx.expected_nonce,
                thumbprint,
                ctx.response_uri.as_deref(),
            ),
        }
    }

    fn with_handover(identifier: &str, info: &DataElement) -> Result<Self> {
        let info_hash = Sha256::digest(encode(info)?).to_vec();
        Ok(Self {
            device_engagement: DataElement::Null,
            e_reader_key: DataElement::Null,
            handover: DataElement::List(vec![identifier.into(), DataElement::Bytes(info_hash)]),
        })
    }

    /// `SessionTranscriptBytes = #6.24(bstr .cbor SessionTranscript)`
    ///
    /// # Errors
    ///
    /// Returns an error if the transcript cannot be encoded.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        encode(&DataElement::wrap(&self.into())?)
    }

    /// The detached payload covered by device authentication:
    ///
    /// ```text
    /// DeviceAuthenticationBytes = #6.24(bstr .cbor [
    ///     "DeviceAuthentication", SessionTranscript, DocType, DeviceNameSpacesBytes
    /// ])
    /// ```
    ///
    /// `name_spaces` contributes its bytes as received.
    ///
    /// # Errors
    ///
    /// Returns an error if the structure cannot be encoded.
    pub fn device_authentication_bytes(
        &self, doc_type: &str, name_spaces: &Tag24<DeviceNameSpaces>,
    ) -> Result<Vec<u8>> {
        let device_authentication = DataElement::List(vec![
            DEVICE_AUTHENTICATION.into(),
            self.into(),
            doc_type.into(),
            name_spaces.to_element(),
        ]);
        encode(&DataElement::wrap(&device_authentication)?)
    }
}

impl From<&SessionTranscript> for DataElement {
    fn from(transcript: &SessionTranscript) -> Self {
        Self::List(vec![
            transcript.device_engagement.clone(),
            transcript.e_reader_key.clone(),
            transcript.handover.clone(),
        ])
    }
}
