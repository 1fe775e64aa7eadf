mod common;

use chrono::{TimeZone, Utc};
use teif_core::invoice::compute_totals;
use teif_core::invoice::sign::{
    InvoiceSigner, SigningError, SigningStage, canonicalize, digest_base64, strip_signatures,
};
use teif_core::invoice::xml::{XmlFormat, to_xml_with_format};

fn unsigned_xml(format: XmlFormat) -> String {
    let invoice = common::sample_invoice();
    to_xml_with_format(&invoice, &compute_totals(&invoice), format).expect("xml")
}

fn signer() -> InvoiceSigner {
    InvoiceSigner::from_pkcs12(&common::valid_pkcs12(), common::PIN, common::now())
        .expect("signer")
}

#[test]
fn signed_document_is_well_formed() {
    let xml = unsigned_xml(XmlFormat::Compact);
    let signed = signer()
        .sign_xml_at(&xml, common::now())
        .expect("sign");

    assert_eq!(signed.xml.matches("<ds:Signature ").count(), 1);
    assert!(signed.xml.ends_with("</ds:Signature></TEIF>"));
    assert!(signed.xml.contains(r#"Id="SigFrs""#));
    assert!(signed.xml.contains(r#"<ds:Reference Id="r-id-frs" URI="">"#));
    assert!(signed.xml.contains("<xades:SigningTime>2024-03-15T10:30:00Z</xades:SigningTime>"));
    assert!(signed.xml.contains(r##"<xades:DataObjectFormat ObjectReference="#r-id-frs">"##));
    assert!(signed.xml.contains("<ds:X509Certificate>"));
    assert_eq!(
        common::text(&signed.xml, "ds:DigestValue"),
        Some(signed.digest.as_str())
    );
}

#[test]
fn digest_recomputes_from_the_signed_document() {
    let signed = signer()
        .sign_xml_at(&unsigned_xml(XmlFormat::Compact), common::now())
        .expect("sign");

    let recomputed = digest_base64(&canonicalize(&strip_signatures(&signed.xml)));
    assert_eq!(recomputed, signed.digest);
}

#[test]
fn signature_verifies_over_canonical_signed_info() {
    let signed = signer()
        .sign_xml_at(&unsigned_xml(XmlFormat::Compact), common::now())
        .expect("sign");
    let public_key = common::rsa_key().to_public_key();
    assert!(common::signature_verifies(&signed.xml, &public_key));

    let tampered = signed.xml.replacen(&signed.digest, "AAAA", 1);
    assert!(!common::signature_verifies(&tampered, &public_key));
}

#[test]
fn resigning_replaces_the_previous_signature() {
    let signer = signer();
    let first = signer
        .sign_xml_at(&unsigned_xml(XmlFormat::Compact), common::now())
        .expect("first");
    let later = Utc.with_ymd_and_hms(2024, 3, 16, 8, 0, 0).unwrap();
    let second = signer.sign_xml_at(&first.xml, later).expect("second");

    assert_eq!(second.xml.matches("<ds:Signature ").count(), 1);
    assert_eq!(second.digest, first.digest);
    assert!(second.xml.contains("2024-03-16T08:00:00Z"));
}

#[test]
fn pretty_and_compact_documents_share_a_digest() {
    let signer = signer();
    let compact = signer
        .sign_xml_at(&unsigned_xml(XmlFormat::Compact), common::now())
        .expect("compact");
    let pretty = signer
        .sign_xml_at(
            &unsigned_xml(XmlFormat::Pretty {
                indent_char: ' ',
                indent_size: 4,
            }),
            common::now(),
        )
        .expect("pretty");
    assert_eq!(compact.digest, pretty.digest);
}

#[test]
fn documents_without_root_close_are_malformed() {
    let err = signer()
        .sign_xml_at("<Invoice></Invoice>", common::now())
        .expect_err("malformed");
    assert!(matches!(err, SigningError::MalformedDocument(_)));
    assert_eq!(err.code(), "MALFORMED_DOCUMENT");
}

#[test]
fn wrong_pin_and_expired_certificates_are_reported() {
    assert!(matches!(
        InvoiceSigner::from_pkcs12(&common::valid_pkcs12(), "0000", common::now()),
        Err(SigningError::InvalidPin)
    ));
    assert!(matches!(
        InvoiceSigner::from_pkcs12(&common::expired_pkcs12(), common::PIN, common::now()),
        Err(SigningError::CertificateExpired { .. })
    ));
    assert!(matches!(
        InvoiceSigner::from_pkcs12(b"garbage", common::PIN, common::now()),
        Err(SigningError::SigningFailed {
            stage: SigningStage::KeyExtracted,
            ..
        })
    ));
}

#[test]
fn signs_with_an_openssl3_container() {
    use rsa::RsaPublicKey;
    use rsa::pkcs8::DecodePublicKey;
    use x509_cert::der::Encode;

    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("openssl3-pbes2.p12");
    let blob = std::fs::read(path).expect("fixture");
    let signer = InvoiceSigner::from_pkcs12(&blob, common::PIN, common::now()).expect("signer");

    let spki = signer
        .certificate()
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .expect("spki der");
    let public_key = RsaPublicKey::from_public_key_der(&spki).expect("rsa public key");

    let signed = signer
        .sign_xml_at(&unsigned_xml(XmlFormat::Compact), common::now())
        .expect("sign");
    assert!(common::signature_verifies(&signed.xml, &public_key));
}

#[test]
fn digest_ignores_the_xml_declaration() {
    let xml = unsigned_xml(XmlFormat::Compact);
    let body = xml
        .split_once("?>")
        .map(|(_, rest)| rest)
        .expect("declaration");
    assert_eq!(
        digest_base64(&canonicalize(&xml)),
        digest_base64(&canonicalize(body))
    );
}
