//! # Verifier
//!
//! Runs every check against a parsed [`Document`] and a reconstructed
//! [`SessionTranscript`]:
//!
//! 1. issuer authentication,
//! 2. MSO validity (window, digest algorithm, document type),
//! 3. device authentication,
//! 4. issuer-signed item digest integrity,
//! 5. device key authorization.
//!
//! Each check runs regardless of the outcome of the others. The result
//! reports every failing check, and `valid` is set only when all pass.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::instrument;

use crate::auth::{verify_device, verify_issuer, IssuerKey, KeyAgreement, NoKeyAgreement};
use crate::cbor::DecodeLimits;
use crate::error::{Error, Result};
use crate::mdoc::{Document, Presentation};
use crate::mso::MobileSecurityObject;
use crate::registry::Registry;
use crate::session::{SessionTranscript, VerificationContext};

/// How to combine an element disclosed in both the issuer-signed and
/// device-signed namespaces.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum MergeStrategy {
    /// Reject the presentation.
    #[default]
    Clash,

    /// Keep the issuer-signed value.
    PreferIssuer,

    /// Keep the device-signed value.
    PreferDevice,
}

/// Verifier configuration.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct VerifierOptions {
    /// Limits applied when decoding presentations.
    pub limits: DecodeLimits,

    /// Conflict resolution for credential data.
    pub merge_strategy: MergeStrategy,
}

/// Outcome of verifying a single document.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    /// True only if every check passed.
    pub valid: bool,

    /// Issuer signature over the MSO.
    pub issuer_signature_valid: bool,

    /// Digests of every issuer-signed item match the MSO.
    pub data_integrity_valid: bool,

    /// MSO validity window, digest algorithm and document type.
    pub mso_validity_valid: bool,

    /// Device signature or MAC over the session transcript.
    pub device_signature_valid: bool,

    /// Every device-signed element is within the device key's
    /// authorizations.
    pub device_key_authorized: bool,

    /// Document type.
    pub doc_type: String,

    /// Issuer key recovered from a valid issuer signature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer_key: Option<IssuerKey>,

    /// Issuer- and device-disclosed elements: `{namespace: {element: value}}`.
    pub credential_data: Value,

    /// One entry per failing check.
    pub errors: Vec<String>,
}

/// Verifies mdoc presentations.
#[derive(Clone, Debug, Default)]
pub struct Verifier<K = NoKeyAgreement> {
    options: VerifierOptions,
    key_agreement: K,
}

impl Verifier {
    /// A verifier without key agreement: MAC-based device authentication is
    /// reported as not supported.
    #[must_use]
    pub const fn new(options: VerifierOptions) -> Self {
        Self {
            options,
            key_agreement: NoKeyAgreement,
        }
    }
}

impl<K: KeyAgreement> Verifier<K> {
    /// A verifier using `key_agreement` for MAC-based device authentication.
    pub const fn with_key_agreement(options: VerifierOptions, key_agreement: K) -> Self {
        Self {
            options,
            key_agreement,
        }
    }

    /// Verifier configuration.
    pub const fn options(&self) -> &VerifierOptions {
        &self.options
    }

    /// Verify a base64url presentation holding a single document.
    ///
    /// # Errors
    ///
    /// Returns an error if the presentation cannot be decoded, does not hold
    /// exactly one document, or its credential data clashes.
    #[instrument(level = "debug", skip_all)]
    pub async fn verify_presentation(
        &self, payload: &str, ctx: &VerificationContext,
    ) -> Result<VerificationResult> {
        let mut documents = Presentation::parse(payload, &self.options.limits)?.into_documents();
        if documents.len() != 1 {
            return Err(Error::Malformed(format!(
                "expected a single document, found {}",
                documents.len()
            )));
        }
        let transcript = SessionTranscript::from_context(ctx)?;
        let document = documents.remove(0);
        self.verify(&document, &transcript).await
    }

    /// Verify every document in a base64url presentation.
    ///
    /// # Errors
    ///
    /// Returns an error if the presentation cannot be decoded or any
    /// document's MSO or credential data is invalid.
    #[instrument(level = "debug", skip_all)]
    pub async fn verify_response(
        &self, payload: &str, ctx: &VerificationContext,
    ) -> Result<Vec<VerificationResult>> {
        let documents = Presentation::parse(payload, &self.options.limits)?.into_documents();
        let transcript = SessionTranscript::from_context(ctx)?;

        let mut results = Vec::with_capacity(documents.len());
        for document in &documents {
            results.push(self.verify(document, &transcript).await?);
        }
        Ok(results)
    }

    /// Verify a document against a session transcript.
    ///
    /// # Errors
    ///
    /// Returns an error if the MSO cannot be decoded or the credential data
    /// clashes under [`MergeStrategy::Clash`]. Failed checks do not return an
    /// error; they are reported in the result.
    #[instrument(level = "debug", skip_all, fields(doc_type = %document.doc_type))]
    pub async fn verify(
        &self, document: &Document, transcript: &SessionTranscript,
    ) -> Result<VerificationResult> {
        let mso = document.issuer_signed.mso()?;
        let mut errors = Vec::new();

        let (issuer_signature_valid, issuer_key) =
            match verify_issuer(&document.issuer_signed.issuer_auth) {
                Ok(key) => (record(&mut errors, "issuer authentication", Ok(())), Some(key)),
                Err(e) => (record(&mut errors, "issuer authentication", Err(e)), None),
            };

        let mso_validity_valid =
            record(&mut errors, "MSO validation", validate_mso(document, &mso));

        let device_signature_valid = record(
            &mut errors,
            "device authentication",
            verify_device(document, &mso, transcript, &self.key_agreement).await,
        );

        let data_integrity_valid =
            record(&mut errors, "data integrity verification", verify_integrity(document, &mso));

        let device_key_authorized = record(
            &mut errors,
            "key authorization verification",
            verify_key_authorization(document, &mso),
        );

        let credential_data = self.credential_data(document)?;

        let valid = issuer_signature_valid
            && mso_validity_valid
            && device_signature_valid
            && data_integrity_valid
            && device_key_authorized;
        tracing::debug!(valid, failures = errors.len(), "document verified");

        Ok(VerificationResult {
            valid,
            issuer_signature_valid,
            data_integrity_valid,
            mso_validity_valid,
            device_signature_valid,
            device_key_authorized,
            doc_type: document.doc_type.clone(),
            issuer_key,
            credential_data,
            errors,
        })
    }

    // Merge issuer- and device-disclosed namespaces into a single JSON
    // object.
    fn credential_data(&self, document: &Document) -> Result<Value> {
        let registry = Registry::global();
        let mut data: BTreeMap<String, Map<String, Value>> = BTreeMap::new();

        for (name_space, items) in &document.issuer_signed.name_spaces {
            let elements = data.entry(name_space.clone()).or_default();
            for item in items {
                let value = registry.to_json(name_space, &item.element_identifier, &item.element_value)?;
                elements.insert(item.element_identifier.clone(), value);
            }
        }

        if let Some(device_signed) = &document.device_signed {
            for (name_space, items) in device_signed.name_spaces.iter() {
                let elements = data.entry(name_space.clone()).or_default();
                for (identifier, element) in items {
                    let value = registry.to_json(name_space, identifier, element)?;
                    if !elements.contains_key(identifier) {
                        elements.insert(identifier.clone(), value);
                        continue;
                    }
                    match self.options.merge_strategy {
                        MergeStrategy::Clash => {
                            return Err(Error::Policy(format!(
                                "{name_space}/{identifier} disclosed by both issuer and device"
                            )));
                        }
                        MergeStrategy::PreferIssuer => {}
                        MergeStrategy::PreferDevice => {
                            elements.insert(identifier.clone(), value);
                        }
                    }
                }
            }
        }

        Ok(Value::Object(data.into_iter().map(|(ns, elements)| (ns, Value::Object(elements))).collect()))
    }
}

// Record the outcome of a check, returning true if it passed.
fn record(errors: &mut Vec<String>, check: &str, outcome: Result<()>) -> bool {
    match outcome {
        Ok(()) => {
            tracing::debug!(check, "passed");
            true
        }
        Err(e) => {
            tracing::debug!(check, error = %e, "failed");
            errors.push(format!("{check} failed: {e}"));
            false
        }
    }
}

fn validate_mso(document: &Document, mso: &MobileSecurityObject) -> Result<()> {
    mso.digest_algorithm()?;
    if mso.doc_type != document.doc_type {
        return Err(Error::Policy(format!(
            "MSO docType {} does not match document docType {}",
            mso.doc_type, document.doc_type
        )));
    }
    mso.validity_info.validate()
}

fn verify_integrity(document: &Document, mso: &MobileSecurityObject) -> Result<()> {
    for (name_space, items) in &document.issuer_signed.name_spaces {
        if !mso.has_name_space(name_space) {
            return Err(Error::Policy(format!("MSO has no digests for namespace {name_space}")));
        }
        mso.verify_signed_items(name_space, items)?;
    }
    Ok(())
}

fn verify_key_authorization(document: &Document, mso: &MobileSecurityObject) -> Result<()> {
    let Some(device_signed) = &document.device_signed else {
        return Ok(());
    };
    let name_spaces = device_signed.name_spaces.inner();
    if name_spaces.values().all(BTreeMap::is_empty) {
        return Ok(());
    }

    let Some(authorizations) = &mso.device_key_info.key_authorizations else {
        return Err(Error::Policy(
            "device-signed elements present but the MSO grants no key authorizations".to_string(),
        ));
    };
    for (name_space, elements) in name_spaces.iter() {
        for identifier in elements.keys() {
            if !authorizations.permits(name_space, identifier) {
                return Err(Error::Policy(format!(
                    "device key is not authorized for {name_space}/{identifier}"
                )));
            }
        }
    }
    Ok(())
}
