//! Certificate construction and signing
//!
//! Builds either the self-signed root CA or a hostname leaf signed by it:
//! - fresh RSA key per certificate
//! - random serial in `[1, i64::MAX]`
//! - validity from the start of the current UTC day for twenty years
//! - SHA-256 with RSA signatures

use std::fmt;

use rand::Rng;
use rcgen::{
    BasicConstraints, CertificateParams, CustomExtension, Ia5String, IsCa, KeyPair, SanType,
    SerialNumber,
};
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use time::{Date, Month, OffsetDateTime, Time};
use tracing::debug;

use crate::certificate::Certificate;
use crate::error::CertError;
use crate::key;
use crate::name::DistinguishedName;

/// Lifetime of every issued certificate
pub const VALIDITY_YEARS: i32 = 20;

/// id-ce-extKeyUsage
const OID_EXTENDED_KEY_USAGE: &[u64] = &[2, 5, 29, 37];

/// SEQUENCE { id-kp-serverAuth }
const SERVER_AUTH_ONLY: &[u8] = &[
    0x30, 0x0a, 0x06, 0x08, 0x2b, 0x06, 0x01, 0x05, 0x05, 0x07, 0x03, 0x01,
];

/// The CA key and certificate used to sign leaves
pub struct CaSigner {
    subject: String,
    certificate: rcgen::Certificate,
    key_pair: KeyPair,
    private_key: PrivatePkcs8KeyDer<'static>,
}

impl CaSigner {
    /// Rebuild the signer from a root certificate loaded out of a store
    pub fn from_certificate(root: &Certificate) -> Result<Self, CertError> {
        let stored_key = root.private_key_ref().ok_or_else(|| {
            CertError::KeyConversion(format!(
                "root certificate `{}` carries no private key",
                root.subject()
            ))
        })?;

        let rsa_key = key::rsa_from_store(stored_key)?;
        let key_pair = key::signing_key_pair(&rsa_key)?;
        if key_pair.public_key_raw() != root.public_key_raw() {
            return Err(CertError::KeyConversion(format!(
                "private key does not match root certificate `{}`",
                root.subject()
            )));
        }

        let params = CertificateParams::from_ca_cert_der(&root.certificate_der())?;
        let certificate = params
            .self_signed(&key_pair)
            .map_err(|e| CertError::Signing(e.to_string()))?;

        Ok(Self {
            subject: root.subject().to_string(),
            certificate,
            key_pair,
            private_key: key::rsa_to_store(&rsa_key)?,
        })
    }

    /// Subject DN of the CA this signer represents
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Raw subjectPublicKey bits of the CA key
    pub fn public_key_raw(&self) -> &[u8] {
        self.key_pair.public_key_raw()
    }

    /// Whether `certificate` carries a signature made with the CA key
    pub fn has_signed(&self, certificate: &Certificate) -> bool {
        certificate.is_signed_by(self.certificate.der().as_ref())
    }

    fn private_key(&self) -> PrivateKeyDer<'static> {
        PrivateKeyDer::Pkcs8(self.private_key.clone_key())
    }
}

impl fmt::Debug for CaSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaSigner")
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}

/// Builds and signs single certificates for one configured root
#[derive(Debug, Clone)]
pub struct CertificateFactory {
    root_subject: DistinguishedName,
    key_bits: usize,
}

impl CertificateFactory {
    pub fn new(root_subject: DistinguishedName, key_bits: usize) -> Self {
        Self {
            root_subject,
            key_bits,
        }
    }

    pub fn root_subject(&self) -> &DistinguishedName {
        &self.root_subject
    }

    /// Create a self-signed CA certificate with a freshly generated key
    ///
    /// The returned signer owns that key and signs every subsequent leaf.
    pub fn create_ca(&self, subject_name: &str) -> Result<(Certificate, CaSigner), CertError> {
        let rsa_key = key::generate_rsa_key(self.key_bits)?;
        let key_pair = key::signing_key_pair(&rsa_key)?;
        let private_key = key::rsa_to_store(&rsa_key)?;

        let params = build_params(subject_name, Role::Authority)?;
        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| CertError::Signing(e.to_string()))?;

        let certificate = Certificate::from_der(
            cert.der().clone(),
            Some(PrivateKeyDer::Pkcs8(private_key.clone_key())),
        )?;
        debug!(
            subject = %certificate.subject(),
            serial = certificate.serial_number(),
            "Created CA certificate"
        );

        let signer = CaSigner {
            subject: certificate.subject().to_string(),
            certificate: cert,
            key_pair,
            private_key,
        };
        Ok((certificate, signer))
    }

    /// Self-sign a new CA certificate with an already established CA key
    pub fn reissue_ca(
        &self,
        subject_name: &str,
        signer: &CaSigner,
    ) -> Result<Certificate, CertError> {
        let params = build_params(subject_name, Role::Authority)?;
        let cert = params
            .self_signed(&signer.key_pair)
            .map_err(|e| CertError::Signing(e.to_string()))?;

        Certificate::from_der(cert.der().clone(), Some(signer.private_key()))
    }

    /// Create a server-auth leaf for `alt_name`, signed by `signer`
    ///
    /// The leaf gets its own key; the CA key only signs it.
    pub fn create_leaf(
        &self,
        subject_name: &str,
        alt_name: &str,
        signer: &CaSigner,
    ) -> Result<Certificate, CertError> {
        let rsa_key = key::generate_rsa_key(self.key_bits)?;
        let key_pair = key::signing_key_pair(&rsa_key)?;
        let private_key = key::rsa_to_store(&rsa_key)?;

        let params = build_params(subject_name, Role::Leaf { alt_name })?;
        let cert = params
            .signed_by(&key_pair, &signer.certificate, &signer.key_pair)
            .map_err(|e| CertError::Signing(e.to_string()))?;

        let certificate =
            Certificate::from_der(cert.der().clone(), Some(PrivateKeyDer::Pkcs8(private_key)))?;

        let expected_issuer = self.root_subject.to_string();
        if certificate.issuer() != expected_issuer {
            return Err(CertError::Generation(format!(
                "leaf issuer `{}` does not match root `{}`",
                certificate.issuer(),
                expected_issuer
            )));
        }

        debug!(
            subject = %certificate.subject(),
            serial = certificate.serial_number(),
            "Created leaf certificate"
        );
        Ok(certificate)
    }
}

enum Role<'a> {
    Authority,
    Leaf { alt_name: &'a str },
}

fn build_params(subject_name: &str, role: Role<'_>) -> Result<CertificateParams, CertError> {
    let subject: DistinguishedName = subject_name.parse()?;

    let mut params = CertificateParams::default();
    params.distinguished_name = subject.to_rcgen();
    params.serial_number = Some(SerialNumber::from(random_serial()));

    let (not_before, not_after) = validity_window(OffsetDateTime::now_utc())?;
    params.not_before = not_before;
    params.not_after = not_after;

    match role {
        Role::Authority => {
            params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        }
        Role::Leaf { alt_name } => {
            params.is_ca = IsCa::NoCa;

            let mut server_auth = CustomExtension::from_oid_content(
                OID_EXTENDED_KEY_USAGE,
                SERVER_AUTH_ONLY.to_vec(),
            );
            server_auth.set_criticality(true);
            params.custom_extensions.push(server_auth);

            let dns_name = Ia5String::try_from(alt_name).map_err(|e| {
                CertError::Generation(format!("invalid DNS name `{}`: {}", alt_name, e))
            })?;
            params.subject_alt_names = vec![SanType::DnsName(dns_name)];
        }
    }

    Ok(params)
}

/// Uniform serial in `[1, 2^63 - 1]`
fn random_serial() -> u64 {
    rand::thread_rng().gen_range(1..=i64::MAX as u64)
}

/// `[midnight UTC today, +VALIDITY_YEARS)`
fn validity_window(now: OffsetDateTime) -> Result<(OffsetDateTime, OffsetDateTime), CertError> {
    let not_before = now
        .to_offset(time::UtcOffset::UTC)
        .replace_time(Time::MIDNIGHT);
    let not_after = not_before.replace_date(add_years(not_before.date(), VALIDITY_YEARS)?);
    Ok((not_before, not_after))
}

fn add_years(date: Date, years: i32) -> Result<Date, CertError> {
    let year = date.year() + years;
    date.replace_year(year)
        // 29 February in a non-leap target year
        .or_else(|_| Date::from_calendar_date(year, Month::February, 28))
        .map_err(|e| CertError::Generation(format!("validity window: {}", e)))
}
