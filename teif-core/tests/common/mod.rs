use base64ct::{Base64, Encoding};
use chrono::{DateTime, TimeZone, Utc};
use rand_core::OsRng;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::EncodePrivateKey;
use rsa::signature::Verifier;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;
use teif_core::config::{EncryptionKey, PinHashCost};
use teif_core::invoice::sign::canonical_signed_info;
use teif_core::invoice::Invoice;
use teif_core::vault::CertificateVault;
use x509_cert::builder::{Builder, CertificateBuilder, Profile};
use x509_cert::der::asn1::UtcTime;
use x509_cert::der::Encode;
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::SubjectPublicKeyInfoOwned;
use x509_cert::time::{Time, Validity};

pub const PIN: &str = "2468";
pub const SERIAL: u32 = 0x00c0_ffee;

/// Fixed clock shared by the tests.
#[allow(dead_code)]
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 15, 10, 30, 0).unwrap()
}

pub fn rsa_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| RsaPrivateKey::new(&mut OsRng, 2048).expect("rsa key"))
}

fn utc_time(at: DateTime<Utc>) -> Time {
    let since_epoch = Duration::from_secs(at.timestamp() as u64);
    Time::UtcTime(UtcTime::from_unix_duration(since_epoch).expect("utc time"))
}

/// Self-signed RSA certificate and its PKCS#8 key, both DER.
pub fn self_signed(valid_from: DateTime<Utc>, valid_until: DateTime<Utc>) -> (Vec<u8>, Vec<u8>) {
    let key = rsa_key();
    let signer = SigningKey::<Sha256>::new(key.clone());
    let subject = Name::from_str("CN=Atelier Medina,O=Atelier Medina SARL,C=TN").expect("subject");
    let validity = Validity {
        not_before: utc_time(valid_from),
        not_after: utc_time(valid_until),
    };
    let public_key =
        SubjectPublicKeyInfoOwned::from_key(key.to_public_key()).expect("public key info");
    let builder = CertificateBuilder::new(
        Profile::Root,
        SerialNumber::from(SERIAL),
        validity,
        subject,
        public_key,
        &signer,
    )
    .expect("builder");
    let cert = builder.build::<Signature>().expect("certificate");

    let cert_der = cert.to_der().expect("cert der");
    let key_der = key.to_pkcs8_der().expect("key der").as_bytes().to_vec();
    (cert_der, key_der)
}

pub fn pkcs12(valid_from: DateTime<Utc>, valid_until: DateTime<Utc>, pin: &str) -> Vec<u8> {
    let (cert_der, key_der) = self_signed(valid_from, valid_until);
    p12::PFX::new(&cert_der, &key_der, None, pin, "teif-test")
        .expect("pkcs12")
        .to_der()
}

/// Container valid for 2024 and 2025.
#[allow(dead_code)]
pub fn valid_pkcs12() -> Vec<u8> {
    pkcs12(
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        PIN,
    )
}

/// Container that expired at the end of 2021.
#[allow(dead_code)]
pub fn expired_pkcs12() -> Vec<u8> {
    pkcs12(
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap(),
        PIN,
    )
}

/// Vault with a cheap PIN hash so tests stay fast.
#[allow(dead_code)]
pub fn test_vault() -> CertificateVault {
    CertificateVault::new(
        EncryptionKey::from_bytes([0x42; 32]),
        PinHashCost {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        },
    )
}

/// Three lines at 0 %, 7 % and 19 % with a 1.000 stamp duty.
#[allow(dead_code)]
pub fn sample_invoice() -> Invoice {
    serde_json::from_str(include_str!("../fixtures/three_rates.json")).expect("fixture invoice")
}

/// Text between the first `<tag ...>` and its closing tag.
#[allow(dead_code)]
pub fn element<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let start = xml.find(&open)?;
    let end = xml[start..].find(&close)? + start + close.len();
    Some(&xml[start..end])
}

/// Inner text of the first `<tag>`.
#[allow(dead_code)]
pub fn text<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    let whole = element(xml, tag)?;
    let inner_start = whole.find('>')? + 1;
    let inner_end = whole.rfind("</")?;
    Some(&whole[inner_start..inner_end])
}

/// Check `ds:SignatureValue` over the canonical `ds:SignedInfo` of `signed_xml`.
#[allow(dead_code)]
pub fn signature_verifies(signed_xml: &str, public_key: &RsaPublicKey) -> bool {
    let signed_info = element(signed_xml, "ds:SignedInfo").expect("signed info");
    let value = text(signed_xml, "ds:SignatureValue").expect("signature value");
    let raw = Base64::decode_vec(value).expect("base64 signature");
    let signature = Signature::try_from(raw.as_slice()).expect("signature bytes");
    VerifyingKey::<Sha256>::new(public_key.clone())
        .verify(canonical_signed_info(signed_info).as_bytes(), &signature)
        .is_ok()
}
