pub(crate) const TEIF_VERSION: &str = "1.8.8";
pub(crate) const CONTROLLING_AGENCY: &str = "TTN";
pub(crate) const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

pub(crate) const DS_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
pub(crate) const XADES_NS: &str = "http://uri.etsi.org/01903/v1.3.2#";
pub(crate) const SIGNATURE_ID: &str = "SigFrs";
pub(crate) const REFERENCE_ID: &str = "r-id-frs";

pub(crate) const EXC_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
pub(crate) const RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
pub(crate) const SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
pub(crate) const XPATH_TRANSFORM: &str = "http://www.w3.org/TR/1999/REC-xpath-19991116";
pub(crate) const XPATH_EXCLUDE_SIGNATURE: &str = "not(ancestor-or-self::ds:Signature)";

pub(crate) const CURRENCY_CODE_LIST: &str = "ISO_4217";
pub(crate) const COUNTRY_CODE_LIST: &str = "ISO_3166-1";
pub(crate) const LANG: &str = "fr";

pub(crate) const DATE_FORMAT: &str = "ddMMyy";
pub(crate) const PERIOD_FORMAT: &str = "ddMMyy-ddMMyy";
pub(crate) const DATETIME_FORMAT: &str = "ddMMyyHHmm";
