//! Tests for end-to-end presentation verification

use base64ct::{Base64, Encoding};
use chrono::TimeDelta;
use credibil_mdoc::cbor::{DataElement, Tag24};
use credibil_mdoc::mdoc::{DeviceNameSpaces, Document, IssuerSigned};
use credibil_mdoc::mso::DeviceKeyInfo;
use credibil_mdoc::{
    Error, MergeStrategy, SessionTranscript, VerificationContext, Verifier, VerifierOptions,
};
use insta::assert_json_snapshot as assert_snapshot;
use rstest::rstest;
use test_utils::holder::{device_name_spaces, encode_document, encode_response, Device};
use test_utils::issuer::{self, Issuer, MDL_DOC_TYPE, MDL_NAMESPACE};
use test_utils::verifier::{context, transcript, ReaderKey, CLIENT_ID, NONCE, RESPONSE_URI};

const EXAMPLE_NAMESPACE: &str = "org.example.loyalty";

// Issue the sample mDL to `device`.
fn issue(issuer: &Issuer, device_key_info: DeviceKeyInfo) -> IssuerSigned {
    issuer
        .issue(&issuer::mdl_dataset(), device_key_info, issuer::valid_for_a_year())
        .expect("should issue")
}

// Issue and present the sample mDL with no device-signed elements.
fn present() -> (Issuer, Document) {
    let issuer = Issuer::new().expect("should create issuer");
    let device = Device::new().expect("should create device");
    let issuer_signed = issue(&issuer, device.key_info());
    let document = device
        .present(issuer_signed, DeviceNameSpaces::default(), &transcript())
        .expect("should present");
    (issuer, document)
}

#[tokio::test]
async fn verify_presentation() {
    test_utils::init_tracer();

    let (issuer, document) = present();
    let vp_token = encode_document(&document).expect("should encode");

    let result = Verifier::new(VerifierOptions::default())
        .verify_presentation(&vp_token, &context())
        .await
        .expect("should verify");

    assert!(result.valid, "errors: {:?}", result.errors);
    assert!(result.issuer_signature_valid);
    assert!(result.mso_validity_valid);
    assert!(result.device_signature_valid);
    assert!(result.data_integrity_valid);
    assert!(result.device_key_authorized);
    assert!(result.errors.is_empty());
    assert_eq!(result.doc_type, MDL_DOC_TYPE);

    let issuer_key = result.issuer_key.as_ref().expect("should have issuer key");
    assert_eq!(issuer_key.algorithm, "ES256");
    assert_eq!(issuer_key.jwk.kty, "EC");
    assert_eq!(issuer_key.jwk.crv, "P-256");
    assert_eq!(issuer_key.jwk.x5c, Some(vec![Base64::encode_string(issuer.certificate())]));

    assert_snapshot!("mdl_credential_data", result.credential_data);
}

#[tokio::test]
async fn dc_api_handover() {
    test_utils::init_tracer();

    let ctx = VerificationContext::new(NONCE, CLIENT_ID).origin("https://verifier.credibil.io");
    let transcript = SessionTranscript::from_context(&ctx).expect("should build transcript");

    let issuer = Issuer::new().expect("should create issuer");
    let device = Device::new().expect("should create device");
    let document = device
        .present(issue(&issuer, device.key_info()), DeviceNameSpaces::default(), &transcript)
        .expect("should present");
    let vp_token = encode_document(&document).expect("should encode");

    let verifier = Verifier::new(VerifierOptions::default());
    let result = verifier.verify_presentation(&vp_token, &ctx).await.expect("should verify");
    assert!(result.valid, "errors: {:?}", result.errors);

    // the same presentation is bound to the DC API origin, not the OpenID4VP request
    let result =
        verifier.verify_presentation(&vp_token, &context()).await.expect("should verify");
    assert!(!result.valid);
    assert!(!result.device_signature_valid);
}

#[tokio::test]
async fn tampered_issuer_signature() {
    test_utils::init_tracer();

    let (_, mut document) = present();
    let signature = &mut document.issuer_signed.issuer_auth.signature;
    let last = signature.len() - 1;
    signature[last] ^= 0x01;

    let result = Verifier::new(VerifierOptions::default())
        .verify(&document, &transcript())
        .await
        .expect("should verify");

    assert!(!result.valid);
    assert!(!result.issuer_signature_valid);
    assert!(result.issuer_key.is_none());
    assert!(result.mso_validity_valid);
    assert!(result.device_signature_valid);
    assert!(result.data_integrity_valid);
    assert!(result.device_key_authorized);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].starts_with("issuer authentication failed"));
}

#[tokio::test]
async fn tampered_element_value() {
    test_utils::init_tracer();

    let (_, mut document) = present();
    let items = document
        .issuer_signed
        .name_spaces
        .get_mut(MDL_NAMESPACE)
        .expect("should have mDL namespace");
    let index = items
        .iter()
        .position(|item| item.element_identifier == "family_name")
        .expect("should have family_name");

    let mut altered = items[index].inner().clone();
    altered.element_value = DataElement::from("Smith");
    items[index] = Tag24::new(altered).expect("should encode");

    let result = Verifier::new(VerifierOptions::default())
        .verify(&document, &transcript())
        .await
        .expect("should verify");

    assert!(!result.valid);
    assert!(result.issuer_signature_valid);
    assert!(!result.data_integrity_valid);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].starts_with("data integrity verification failed"));
    assert!(result.errors[0].contains("digest mismatch"));
}

#[rstest]
#[case::expired(TimeDelta::days(-10), TimeDelta::days(-1), "expired")]
#[case::not_yet_valid(TimeDelta::days(1), TimeDelta::days(10), "not valid before")]
#[tokio::test]
async fn validity_window(#[case] from: TimeDelta, #[case] until: TimeDelta, #[case] reason: &str) {
    test_utils::init_tracer();

    let issuer = Issuer::new().expect("should create issuer");
    let device = Device::new().expect("should create device");
    let issuer_signed = issuer
        .issue(&issuer::mdl_dataset(), device.key_info(), issuer::validity(from, until))
        .expect("should issue");
    let document = device
        .present(issuer_signed, DeviceNameSpaces::default(), &transcript())
        .expect("should present");

    let result = Verifier::new(VerifierOptions::default())
        .verify(&document, &transcript())
        .await
        .expect("should verify");

    assert!(!result.valid);
    assert!(!result.mso_validity_valid);
    assert!(result.issuer_signature_valid);
    assert!(result.device_signature_valid);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].starts_with("MSO validation failed"));
    assert!(result.errors[0].contains(reason));
}

#[tokio::test]
async fn doc_type_mismatch() {
    test_utils::init_tracer();

    let (_, mut document) = present();
    document.doc_type = "org.example.other".to_string();

    let result = Verifier::new(VerifierOptions::default())
        .verify(&document, &transcript())
        .await
        .expect("should verify");

    assert!(!result.valid);
    assert!(!result.mso_validity_valid);
    assert!(result
        .errors
        .iter()
        .any(|e| e.starts_with("MSO validation failed") && e.contains("does not match")));
}

#[tokio::test]
async fn wrong_nonce() {
    test_utils::init_tracer();

    let (_, document) = present();
    let vp_token = encode_document(&document).expect("should encode");
    let ctx = VerificationContext::new("another-nonce", CLIENT_ID).response_uri(RESPONSE_URI);

    let result = Verifier::new(VerifierOptions::default())
        .verify_presentation(&vp_token, &ctx)
        .await
        .expect("should verify");

    assert!(!result.valid);
    assert!(result.issuer_signature_valid);
    assert!(result.data_integrity_valid);
    assert!(!result.device_signature_valid);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].starts_with("device authentication failed"));
}

#[rstest]
#[case::no_authorizations(None, false)]
#[case::namespace_authorized(Some(EXAMPLE_NAMESPACE), true)]
#[case::other_namespace_authorized(Some(MDL_NAMESPACE), false)]
#[tokio::test]
async fn device_key_authorization(#[case] authorized: Option<&str>, #[case] expected: bool) {
    test_utils::init_tracer();

    let issuer = Issuer::new().expect("should create issuer");
    let device = Device::new().expect("should create device");
    let key_info = authorized.map_or_else(|| device.key_info(), |ns| device.authorized_for(&[ns]));

    let name_spaces =
        device_name_spaces(EXAMPLE_NAMESPACE, &[("membership_tier", DataElement::from("gold"))]);
    let document = device
        .present(issue(&issuer, key_info), name_spaces, &transcript())
        .expect("should present");

    let result = Verifier::new(VerifierOptions::default())
        .verify(&document, &transcript())
        .await
        .expect("should verify");

    assert!(result.device_signature_valid);
    assert_eq!(result.device_key_authorized, expected);
    assert_eq!(result.valid, expected);
    if !expected {
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("key authorization verification failed"));
    }
    assert_eq!(result.credential_data[EXAMPLE_NAMESPACE]["membership_tier"], "gold");
}

#[tokio::test]
async fn device_mac_without_key_agreement() {
    test_utils::init_tracer();

    let issuer = Issuer::new().expect("should create issuer");
    let device = Device::new().expect("should create device");
    let reader = ReaderKey::new().expect("should create reader key");

    let document = device
        .present_with_mac(
            issue(&issuer, device.key_info()),
            DeviceNameSpaces::default(),
            &reader.public_key(),
            &transcript(),
        )
        .expect("should present");

    let result = Verifier::new(VerifierOptions::default())
        .verify(&document, &transcript())
        .await
        .expect("should verify");

    assert!(!result.valid);
    assert!(!result.device_signature_valid);
    assert!(result.issuer_signature_valid);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].starts_with("device authentication failed: not supported"));
}

#[tokio::test]
async fn device_mac_with_key_agreement() {
    test_utils::init_tracer();

    let issuer = Issuer::new().expect("should create issuer");
    let device = Device::new().expect("should create device");
    let reader = ReaderKey::new().expect("should create reader key");

    let document = device
        .present_with_mac(
            issue(&issuer, device.key_info()),
            DeviceNameSpaces::default(),
            &reader.public_key(),
            &transcript(),
        )
        .expect("should present");
    let vp_token = encode_document(&document).expect("should encode");

    let verifier = Verifier::with_key_agreement(VerifierOptions::default(), reader);
    let result =
        verifier.verify_presentation(&vp_token, &context()).await.expect("should verify");
    assert!(result.valid, "errors: {:?}", result.errors);

    // a MAC keyed for another reader does not verify
    let other = ReaderKey::new().expect("should create reader key");
    let verifier = Verifier::with_key_agreement(VerifierOptions::default(), other);
    let result =
        verifier.verify_presentation(&vp_token, &context()).await.expect("should verify");
    assert!(!result.device_signature_valid);
}

#[rstest]
#[case::prefer_issuer(MergeStrategy::PreferIssuer, "Doe")]
#[case::prefer_device(MergeStrategy::PreferDevice, "Smith")]
#[tokio::test]
async fn merge_strategies(#[case] merge_strategy: MergeStrategy, #[case] family_name: &str) {
    test_utils::init_tracer();

    let document = clashing_document();
    let options = VerifierOptions {
        merge_strategy,
        ..VerifierOptions::default()
    };

    let result = Verifier::new(options)
        .verify(&document, &transcript())
        .await
        .expect("should verify");

    assert!(result.valid, "errors: {:?}", result.errors);
    assert_eq!(result.credential_data[MDL_NAMESPACE]["family_name"], family_name);
}

#[tokio::test]
async fn merge_clash() {
    test_utils::init_tracer();

    let document = clashing_document();
    let err = Verifier::new(VerifierOptions::default())
        .verify(&document, &transcript())
        .await
        .expect_err("should clash");

    let Error::Policy(msg) = &err else {
        panic!("expected a policy error, got {err:?}");
    };
    assert!(msg.contains("family_name"));
}

// A presentation where issuer and device both disclose `family_name`.
fn clashing_document() -> Document {
    let issuer = Issuer::new().expect("should create issuer");
    let device = Device::new().expect("should create device");
    let issuer_signed = issue(&issuer, device.authorized_for(&[MDL_NAMESPACE]));

    let name_spaces =
        device_name_spaces(MDL_NAMESPACE, &[("family_name", DataElement::from("Smith"))]);
    device.present(issuer_signed, name_spaces, &transcript()).expect("should present")
}

#[tokio::test]
async fn device_response() {
    test_utils::init_tracer();

    let (_, first) = present();
    let (_, second) = present();
    let vp_token = encode_response(vec![first, second]).expect("should encode");

    let verifier = Verifier::new(VerifierOptions::default());
    let results =
        verifier.verify_response(&vp_token, &context()).await.expect("should verify");
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.valid));

    let err = verifier
        .verify_presentation(&vp_token, &context())
        .await
        .expect_err("should require a single document");
    assert!(matches!(err, Error::Malformed(_)));
}

#[tokio::test]
async fn malformed_presentation() {
    test_utils::init_tracer();

    let verifier = Verifier::new(VerifierOptions::default());

    let err = verifier
        .verify_presentation("not base64url!", &context())
        .await
        .expect_err("should fail to decode");
    assert!(matches!(err, Error::Malformed(_)));

    // valid base64url, but an unregistered CBOR tag (37)
    let err = verifier
        .verify_presentation("2CVBAA", &context())
        .await
        .expect_err("should fail to decode");
    assert!(matches!(err, Error::Malformed(_)));
}

#[tokio::test]
async fn dataset_shape_is_checked() {
    test_utils::init_tracer();

    let issuer = Issuer::new().expect("should create issuer");
    let device = Device::new().expect("should create device");
    let dataset = issuer::dataset(MDL_NAMESPACE, &[("age_over_18", "yes")]);

    let err = issuer
        .issue(&dataset, device.key_info(), issuer::valid_for_a_year())
        .expect_err("should reject a non-boolean age_over_18");
    assert!(err.to_string().contains("age_over_18"));
}
