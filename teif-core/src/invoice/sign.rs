//! Enveloped XML signatures for TEIF documents.
//!
//! The pipeline strips any previous `ds:Signature`, canonicalizes the body,
//! digests it, signs a `SignedInfo` over that digest with RSA PKCS#1 v1.5
//! SHA-256, and embeds the resulting signature just before `</TEIF>`.
use crate::invoice::xml::constants::{
    DS_NS, EXC_C14N, REFERENCE_ID, RSA_SHA256, SHA256, SIGNATURE_ID, XADES_NS, XPATH_EXCLUDE_SIGNATURE,
    XPATH_TRANSFORM,
};
use crate::invoice::xml::helpers::Wrap;
use crate::vault::{self, VaultError};
use base64ct::{Base64, Encoding};
use chrono::{DateTime, SecondsFormat, Utc};
use lazy_static::lazy_static;
use quick_xml::se::{QuoteLevel, SeError, Serializer as QuickXmlSerializer};
use regex::Regex;
use rsa::{
    RsaPrivateKey,
    pkcs1v15::SigningKey,
    pkcs8::DecodePrivateKey,
    signature::{SignatureEncoding, Signer},
};
use serde::ser::{Serialize, SerializeStruct, Serializer};
use sha2::{Digest, Sha256};
use std::{borrow::Cow, fmt};
use thiserror::Error;
use x509_cert::{Certificate, der::Decode};

const ROOT_CLOSE: &str = "</TEIF>";

lazy_static! {
    static ref SIGNATURE_ELEMENT: Regex =
        Regex::new(r"(?s)<ds:Signature\b[^>]*/>|<ds:Signature\b[^>]*>.*?</ds:Signature>").unwrap();
    static ref XML_DECLARATION: Regex = Regex::new(r"<\?xml[^?]*\?>").unwrap();
    static ref COMMENT: Regex = Regex::new(r"(?s)<!--.*?-->").unwrap();
    static ref INTER_TAG_WHITESPACE: Regex = Regex::new(r">\s+<").unwrap();
}

/// Progress of a signing run. Stages only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SigningStage {
    Unsigned,
    KeyExtracted,
    BodyCanonicalized,
    DigestComputed,
    SignedInfoBuilt,
    Signed,
    Embedded,
}

impl fmt::Display for SigningStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SigningStage::Unsigned => "unsigned",
            SigningStage::KeyExtracted => "key extraction",
            SigningStage::BodyCanonicalized => "body canonicalization",
            SigningStage::DigestComputed => "digest",
            SigningStage::SignedInfoBuilt => "signed info",
            SigningStage::Signed => "signature",
            SigningStage::Embedded => "embedding",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("invalid PIN")]
    InvalidPin,
    #[error("certificate is outside its validity window ({valid_from} - {valid_until})")]
    CertificateExpired {
        valid_from: DateTime<Utc>,
        valid_until: DateTime<Utc>,
    },
    #[error("no active certificate on file")]
    NoCertificateOnFile,
    #[error("malformed document: {0}")]
    MalformedDocument(String),
    #[error("signing failed during {stage}: {message}")]
    SigningFailed { stage: SigningStage, message: String },
}

impl SigningError {
    pub fn code(&self) -> &'static str {
        match self {
            SigningError::InvalidPin => "INVALID_PIN",
            SigningError::CertificateExpired { .. } => "CERTIFICATE_EXPIRED",
            SigningError::NoCertificateOnFile => "NO_CERTIFICATE",
            SigningError::MalformedDocument(_) => "MALFORMED_DOCUMENT",
            SigningError::SigningFailed { .. } => "SIGNING_FAILED",
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            SigningError::InvalidPin => "The PIN is incorrect.".to_owned(),
            SigningError::CertificateExpired { valid_until, .. } => format!(
                "The signing certificate is not valid (expires {}).",
                valid_until.format("%Y-%m-%d")
            ),
            SigningError::NoCertificateOnFile => {
                "No signing certificate is on file. Upload one first.".to_owned()
            }
            SigningError::MalformedDocument(_) => "The document cannot be signed.".to_owned(),
            SigningError::SigningFailed { .. } => "The document could not be signed.".to_owned(),
        }
    }

    fn failed(stage: SigningStage, message: impl Into<String>) -> Self {
        SigningError::SigningFailed {
            stage,
            message: message.into(),
        }
    }
}

/// Signed XML together with the values that went into the signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedDocument {
    pub xml: String,
    /// Base64 SHA-256 of the canonical body.
    pub digest: String,
    pub signature_value: String,
    pub signing_time: DateTime<Utc>,
}

/// Leaf certificate plus RSA key, ready to sign documents.
///
/// The key is wiped when the signer is dropped.
pub struct InvoiceSigner {
    certificate: Certificate,
    certificate_der: Vec<u8>,
    signing_key: SigningKey<Sha256>,
}

impl InvoiceSigner {
    /// Unlock a PKCS#12 container and re-check the certificate window at `now`.
    pub fn from_pkcs12(blob: &[u8], pin: &str, now: DateTime<Utc>) -> Result<Self, SigningError> {
        let bundle = vault::open_pkcs12(blob, pin).map_err(|e| match e {
            VaultError::InvalidPassphrase => SigningError::InvalidPin,
            other => SigningError::failed(SigningStage::KeyExtracted, other.to_string()),
        })?;

        let metadata = vault::certificate_metadata(&bundle.certificate)
            .map_err(|e| SigningError::failed(SigningStage::KeyExtracted, e.to_string()))?;
        vault::check_validity(&metadata, now).map_err(|_| SigningError::CertificateExpired {
            valid_from: metadata.valid_from,
            valid_until: metadata.valid_until,
        })?;

        Self::from_der(&bundle.certificate_der, &bundle.private_key_der)
    }

    /// Build a signer from a DER certificate and a PKCS#8 DER RSA key.
    pub fn from_der(cert_der: &[u8], private_key_der: &[u8]) -> Result<Self, SigningError> {
        let certificate = Certificate::from_der(cert_der).map_err(|e| {
            SigningError::failed(
                SigningStage::KeyExtracted,
                format!("Certificate parse error: {e:?}"),
            )
        })?;
        let private_key = RsaPrivateKey::from_pkcs8_der(private_key_der).map_err(|e| {
            SigningError::failed(
                SigningStage::KeyExtracted,
                format!("Private key parse error: {e:?}"),
            )
        })?;
        Ok(Self {
            certificate,
            certificate_der: cert_der.to_vec(),
            signing_key: SigningKey::<Sha256>::new(private_key),
        })
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    pub fn sign_xml(&self, xml: &str) -> Result<SignedDocument, SigningError> {
        self.sign_xml_at(xml, Utc::now())
    }

    /// Sign `xml`, recording `signing_time` in the qualifying properties.
    ///
    /// Any existing signature is replaced, so re-signing never nests.
    pub fn sign_xml_at(
        &self,
        xml: &str,
        signing_time: DateTime<Utc>,
    ) -> Result<SignedDocument, SigningError> {
        let body = strip_signatures(xml);
        if !body.contains(ROOT_CLOSE) {
            return Err(SigningError::MalformedDocument(format!(
                "missing {ROOT_CLOSE} closing tag"
            )));
        }

        let canonical = canonicalize(&body);
        tracing::debug!(stage = %SigningStage::BodyCanonicalized, bytes = canonical.len(), "canonicalized body");

        let digest = digest_base64(&canonical);
        tracing::debug!(stage = %SigningStage::DigestComputed, %digest, "digested body");

        let signed_info = SignedInfoXml { digest: &digest };
        let signed_info_xml = render(&signed_info, "ds:SignedInfo")
            .map_err(|e| SigningError::failed(SigningStage::SignedInfoBuilt, e.to_string()))?;
        let canonical_signed_info = canonical_signed_info(&signed_info_xml);
        tracing::debug!(stage = %SigningStage::SignedInfoBuilt, "built signed info");

        let signature = self
            .signing_key
            .try_sign(canonical_signed_info.as_bytes())
            .map_err(|e| SigningError::failed(SigningStage::Signed, format!("{e:?}")))?;
        let signature_value = Base64::encode_string(&signature.to_vec());
        tracing::debug!(stage = %SigningStage::Signed, "signed");

        let certificate_b64 = Base64::encode_string(&self.certificate_der);
        let signing_time_text = signing_time.to_rfc3339_opts(SecondsFormat::Secs, true);
        let element = SignatureXml {
            signed_info,
            signature_value: &signature_value,
            certificate: &certificate_b64,
            signing_time: &signing_time_text,
        };
        let element_xml = render(&element, "ds:Signature")
            .map_err(|e| SigningError::failed(SigningStage::Embedded, e.to_string()))?;

        let xml = embed_signature(&body, &element_xml)?;
        tracing::debug!(stage = %SigningStage::Embedded, bytes = xml.len(), "embedded signature");

        Ok(SignedDocument {
            xml,
            digest,
            signature_value,
            signing_time,
        })
    }
}

/// Remove every `ds:Signature` element, paired or self-closing.
///
/// # Examples
/// ```rust
/// use teif_core::invoice::sign::strip_signatures;
///
/// let xml = r#"<TEIF><A/><ds:Signature Id="x"><B/></ds:Signature></TEIF>"#;
/// assert_eq!(strip_signatures(xml), "<TEIF><A/></TEIF>");
/// assert_eq!(strip_signatures("<TEIF><ds:Signature/></TEIF>"), "<TEIF></TEIF>");
/// ```
pub fn strip_signatures(xml: &str) -> Cow<'_, str> {
    SIGNATURE_ELEMENT.replace_all(xml, "")
}

/// Drop the declaration and comments, trim, and remove whitespace between tags.
///
/// The XML declaration is not part of the digested bytes.
///
/// # Examples
/// ```rust
/// use teif_core::invoice::sign::canonicalize;
///
/// let xml = "<?xml version=\"1.0\"?>\n<TEIF>\n  <!-- note -->\n  <A>1</A>\n</TEIF>\n";
/// assert_eq!(canonicalize(xml), "<TEIF><A>1</A></TEIF>");
/// ```
pub fn canonicalize(xml: &str) -> String {
    let without_declaration = XML_DECLARATION.replace_all(xml, "");
    let without_comments = COMMENT.replace_all(&without_declaration, "");
    INTER_TAG_WHITESPACE
        .replace_all(without_comments.trim(), "><")
        .into_owned()
}

/// Base64 SHA-256 of the input.
pub fn digest_base64(canonical: &str) -> String {
    Base64::encode_string(&Sha256::digest(canonical.as_bytes()))
}

/// Canonical `SignedInfo` as it is signed: standalone, so it declares the
/// `ds` namespace itself.
pub fn canonical_signed_info(signed_info: &str) -> String {
    let declared = signed_info.replacen(
        "<ds:SignedInfo",
        &format!("<ds:SignedInfo xmlns:ds=\"{DS_NS}\""),
        1,
    );
    canonicalize(&declared)
}

fn embed_signature(body: &str, element: &str) -> Result<String, SigningError> {
    let position = body
        .rfind(ROOT_CLOSE)
        .ok_or_else(|| SigningError::MalformedDocument(format!("missing {ROOT_CLOSE} closing tag")))?;
    let mut xml = String::with_capacity(body.len() + element.len());
    xml.push_str(&body[..position]);
    xml.push_str(element);
    xml.push_str(&body[position..]);
    Ok(xml)
}

fn render<T: Serialize>(value: &T, root: &str) -> Result<String, SeError> {
    let mut buffer = String::with_capacity(2048);
    let mut serializer = QuickXmlSerializer::with_root(&mut buffer, Some(root))?;
    serializer.set_quote_level(QuoteLevel::Full);
    value.serialize(serializer)?;
    Ok(buffer)
}

struct AlgorithmXml(&'static str);

impl Serialize for AlgorithmXml {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("Algorithm", 1)?;
        st.serialize_field("@Algorithm", self.0)?;
        st.end()
    }
}

#[derive(Clone, Copy)]
struct SignedInfoXml<'a> {
    digest: &'a str,
}

impl Serialize for SignedInfoXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("ds:SignedInfo", 3)?;
        st.serialize_field("ds:CanonicalizationMethod", &AlgorithmXml(EXC_C14N))?;
        st.serialize_field("ds:SignatureMethod", &AlgorithmXml(RSA_SHA256))?;
        st.serialize_field("ds:Reference", &ReferenceXml(self.digest))?;
        st.end()
    }
}

struct ReferenceXml<'a>(&'a str);

impl Serialize for ReferenceXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("ds:Reference", 5)?;
        st.serialize_field("@Id", REFERENCE_ID)?;
        st.serialize_field("@URI", "")?;
        st.serialize_field("ds:Transforms", &TransformsXml)?;
        st.serialize_field("ds:DigestMethod", &AlgorithmXml(SHA256))?;
        st.serialize_field("ds:DigestValue", self.0)?;
        st.end()
    }
}

struct TransformsXml;

impl Serialize for TransformsXml {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("ds:Transforms", 2)?;
        st.serialize_field("ds:Transform", &XPathTransformXml)?;
        st.serialize_field("ds:Transform", &AlgorithmXml(EXC_C14N))?;
        st.end()
    }
}

struct XPathTransformXml;

impl Serialize for XPathTransformXml {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("ds:Transform", 2)?;
        st.serialize_field("@Algorithm", XPATH_TRANSFORM)?;
        st.serialize_field("ds:XPath", XPATH_EXCLUDE_SIGNATURE)?;
        st.end()
    }
}

struct SignatureXml<'a> {
    signed_info: SignedInfoXml<'a>,
    signature_value: &'a str,
    certificate: &'a str,
    signing_time: &'a str,
}

impl Serialize for SignatureXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("ds:Signature", 7)?;
        st.serialize_field("@xmlns:ds", DS_NS)?;
        st.serialize_field("@xmlns:xades", XADES_NS)?;
        st.serialize_field("@Id", SIGNATURE_ID)?;
        st.serialize_field("ds:SignedInfo", &self.signed_info)?;
        st.serialize_field("ds:SignatureValue", self.signature_value)?;
        st.serialize_field(
            "ds:KeyInfo",
            &Wrap(
                "ds:X509Data",
                &Wrap("ds:X509Certificate", self.certificate),
            ),
        )?;
        st.serialize_field(
            "ds:Object",
            &Wrap(
                "xades:QualifyingProperties",
                &QualifyingPropertiesXml {
                    signing_time: self.signing_time,
                },
            ),
        )?;
        st.end()
    }
}

struct QualifyingPropertiesXml<'a> {
    signing_time: &'a str,
}

impl Serialize for QualifyingPropertiesXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let target = format!("#{SIGNATURE_ID}");
        let mut st = s.serialize_struct("xades:QualifyingProperties", 2)?;
        st.serialize_field("@Target", &target)?;
        st.serialize_field(
            "xades:SignedProperties",
            &SignedPropertiesXml {
                signing_time: self.signing_time,
            },
        )?;
        st.end()
    }
}

struct SignedPropertiesXml<'a> {
    signing_time: &'a str,
}

impl Serialize for SignedPropertiesXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut signature_props = s.serialize_struct("xades:SignedProperties", 2)?;
        signature_props.serialize_field(
            "xades:SignedSignatureProperties",
            &Wrap("xades:SigningTime", self.signing_time),
        )?;
        signature_props.serialize_field(
            "xades:SignedDataObjectProperties",
            &Wrap(
                "xades:DataObjectFormat",
                &DataObjectFormatXml,
            ),
        )?;
        signature_props.end()
    }
}

struct DataObjectFormatXml;

impl Serialize for DataObjectFormatXml {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let object_reference = format!("#{REFERENCE_ID}");
        let mut st = s.serialize_struct("xades:DataObjectFormat", 3)?;
        st.serialize_field("@ObjectReference", &object_reference)?;
        st.serialize_field("xades:MimeType", "text/xml")?;
        st.serialize_field("xades:Encoding", "UTF-8")?;
        st.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stripping_handles_paired_self_closing_and_multiple() {
        let xml = concat!(
            "<TEIF><A/>",
            "<ds:Signature xmlns:ds=\"x\" Id=\"SigFrs\"/>",
            "<ds:Signature Id=\"b\"><ds:SignedInfo>\n<x/></ds:SignedInfo></ds:Signature>",
            "</TEIF>"
        );
        assert_eq!(strip_signatures(xml), "<TEIF><A/></TEIF>");
    }

    #[test]
    fn stripping_leaves_similar_names_alone() {
        let xml = "<TEIF><ds:SignatureValue>v</ds:SignatureValue></TEIF>";
        assert_eq!(strip_signatures(xml), xml);
    }

    #[test]
    fn canonicalization_is_whitespace_insensitive_between_tags() {
        let pretty = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<TEIF>\n  <A>x y</A>\n</TEIF>";
        let compact = "<TEIF><A>x y</A></TEIF>";
        assert_eq!(canonicalize(pretty), canonicalize(compact));
        assert_eq!(digest_base64(&canonicalize(pretty)), digest_base64(compact));
    }

    #[test]
    fn signed_info_declares_namespace_when_standalone() {
        let rendered = render(&SignedInfoXml { digest: "abc" }, "ds:SignedInfo").expect("render");
        assert!(rendered.starts_with("<ds:SignedInfo>"));
        let canonical = canonical_signed_info(&rendered);
        assert!(canonical.starts_with(&format!("<ds:SignedInfo xmlns:ds=\"{DS_NS}\">")));
        assert!(canonical.contains("<ds:DigestValue>abc</ds:DigestValue>"));
        assert!(canonical.contains(&format!("<ds:XPath>{XPATH_EXCLUDE_SIGNATURE}</ds:XPath>")));
    }

    #[test]
    fn embedding_targets_the_last_root_close() {
        let xml = embed_signature("<TEIF><A>&lt;/TEIF&gt;</A></TEIF>", "<S/>").expect("embed");
        assert_eq!(xml, "<TEIF><A>&lt;/TEIF&gt;</A><S/></TEIF>");
        assert!(matches!(
            embed_signature("<Other/>", "<S/>"),
            Err(SigningError::MalformedDocument(_))
        ));
    }

    #[test]
    fn failures_report_their_stage() {
        let err = match InvoiceSigner::from_der(b"junk", b"junk") {
            Err(err) => err,
            Ok(_) => panic!("junk certificate accepted"),
        };
        assert!(matches!(
            err,
            SigningError::SigningFailed {
                stage: SigningStage::KeyExtracted,
                ..
            }
        ));
        assert_eq!(err.code(), "SIGNING_FAILED");
    }
}
