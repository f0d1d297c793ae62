//! Issued certificate with its decoded metadata

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use time::OffsetDateTime;
use x509_parser::extensions::GeneralName;
use x509_parser::parse_x509_certificate;

use crate::error::CertError;
use crate::key;

/// Object identifier of the sha256WithRSAEncryption signature algorithm
pub const SHA256_WITH_RSA_OID: &str = "1.2.840.113549.1.1.11";

/// An X.509 certificate plus, when known, its private key
///
/// Metadata is decoded once from the DER when the value is built, so a
/// certificate loaded from a store and one fresh from the factory expose
/// exactly the same view.
pub struct Certificate {
    der: CertificateDer<'static>,
    private_key: Option<PrivateKeyDer<'static>>,
    subject: String,
    issuer: String,
    serial_number: u64,
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
    is_ca: bool,
    dns_names: Vec<String>,
    signature_algorithm: String,
    public_key: Vec<u8>,
}

impl Certificate {
    /// Decode a DER certificate, attaching an optional private key
    pub fn from_der(
        der: CertificateDer<'static>,
        private_key: Option<PrivateKeyDer<'static>>,
    ) -> Result<Self, CertError> {
        let (_, parsed) =
            parse_x509_certificate(der.as_ref()).map_err(|e| CertError::Parse(e.to_string()))?;

        let dns_names = match parsed.subject_alternative_name() {
            Ok(Some(san)) => san
                .value
                .general_names
                .iter()
                .filter_map(|name| match name {
                    GeneralName::DNSName(dns) => Some(dns.to_string()),
                    _ => None,
                })
                .collect(),
            Ok(None) => Vec::new(),
            Err(e) => return Err(CertError::Parse(format!("subjectAltName: {}", e))),
        };

        let validity = parsed.validity();
        let certificate = Self {
            subject: parsed.subject().to_string(),
            issuer: parsed.issuer().to_string(),
            serial_number: serial_to_u64(parsed.raw_serial())?,
            not_before: validity.not_before.to_datetime(),
            not_after: validity.not_after.to_datetime(),
            is_ca: parsed.is_ca(),
            dns_names,
            signature_algorithm: parsed.signature_algorithm.algorithm.to_id_string(),
            public_key: parsed.public_key().subject_public_key.data.to_vec(),
            der,
            private_key,
        };

        Ok(certificate)
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn serial_number(&self) -> u64 {
        self.serial_number
    }

    pub fn not_before(&self) -> OffsetDateTime {
        self.not_before
    }

    pub fn not_after(&self) -> OffsetDateTime {
        self.not_after
    }

    pub fn is_ca(&self) -> bool {
        self.is_ca
    }

    pub fn is_self_signed(&self) -> bool {
        self.subject == self.issuer
    }

    /// DNS entries of the subject alternative name extension
    pub fn dns_names(&self) -> &[String] {
        &self.dns_names
    }

    /// Dotted OID of the signature algorithm
    pub fn signature_algorithm(&self) -> &str {
        &self.signature_algorithm
    }

    /// Contents of the subjectPublicKey bit string
    pub fn public_key_raw(&self) -> &[u8] {
        &self.public_key
    }

    /// Raw DER of the public certificate
    pub fn der(&self) -> &[u8] {
        self.der.as_ref()
    }

    pub fn certificate_der(&self) -> CertificateDer<'static> {
        self.der.clone()
    }

    pub fn has_private_key(&self) -> bool {
        self.private_key.is_some()
    }

    pub fn private_key(&self) -> Option<PrivateKeyDer<'static>> {
        self.private_key.as_ref().map(|key| key.clone_key())
    }

    pub(crate) fn private_key_ref(&self) -> Option<&PrivateKeyDer<'static>> {
        self.private_key.as_ref()
    }

    /// Whether the attached private key is the one this certificate certifies
    pub fn has_matching_private_key(&self) -> bool {
        match self.private_key.as_ref().map(key::public_key_of) {
            Some(Ok(public_key)) => public_key == self.public_key,
            _ => false,
        }
    }

    /// Whether the key of the certificate in `issuer_der` signed this one
    pub fn is_signed_by(&self, issuer_der: &[u8]) -> bool {
        let (Ok((_, parsed)), Ok((_, issuer))) = (
            parse_x509_certificate(self.der()),
            parse_x509_certificate(issuer_der),
        ) else {
            return false;
        };
        parsed.verify_signature(Some(issuer.public_key())).is_ok()
    }

    /// Public certificate as a PEM `CERTIFICATE` block
    pub fn to_pem(&self) -> String {
        pem_block("CERTIFICATE", self.der())
    }

    /// Private key as a PEM block, if one is attached
    pub fn private_key_pem(&self) -> Option<String> {
        self.private_key.as_ref().map(|key| {
            let label = match key {
                PrivateKeyDer::Pkcs1(_) => "RSA PRIVATE KEY",
                PrivateKeyDer::Sec1(_) => "EC PRIVATE KEY",
                _ => "PRIVATE KEY",
            };
            pem_block(label, key.secret_der())
        })
    }

    /// Whether both values carry the same encoded certificate
    pub fn same_as(&self, other: &Certificate) -> bool {
        self.der == other.der
    }
}

impl Clone for Certificate {
    fn clone(&self) -> Self {
        Self {
            der: self.der.clone(),
            private_key: self.private_key(),
            subject: self.subject.clone(),
            issuer: self.issuer.clone(),
            serial_number: self.serial_number,
            not_before: self.not_before,
            not_after: self.not_after,
            is_ca: self.is_ca,
            dns_names: self.dns_names.clone(),
            signature_algorithm: self.signature_algorithm.clone(),
            public_key: self.public_key.clone(),
        }
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.subject)
            .field("issuer", &self.issuer)
            .field("serial_number", &self.serial_number)
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .field("is_ca", &self.is_ca)
            .field("dns_names", &self.dns_names)
            .field("has_private_key", &self.has_private_key())
            .finish()
    }
}

/// Encode bytes as a PEM block with 64 character lines
pub(crate) fn pem_block(label: &str, der: &[u8]) -> String {
    let encoded = STANDARD.encode(der);
    let mut pem = format!("-----BEGIN {}-----\n", label);
    for line in encoded.as_bytes().chunks(64) {
        // base64 output is always ASCII
        pem.push_str(std::str::from_utf8(line).unwrap_or_default());
        pem.push('\n');
    }
    pem.push_str(&format!("-----END {}-----\n", label));
    pem
}

fn serial_to_u64(raw: &[u8]) -> Result<u64, CertError> {
    let significant: Vec<u8> = raw.iter().copied().skip_while(|b| *b == 0).collect();
    if significant.len() > 8 {
        return Err(CertError::Parse(format!(
            "serial number of {} bytes does not fit in 64 bits",
            significant.len()
        )));
    }

    Ok(significant
        .iter()
        .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte)))
}
