//! Certificate manager configuration

use serde::{Deserialize, Serialize};

use crate::error::CertError;
use crate::key::MIN_RSA_BITS;
use crate::name::DistinguishedName;

pub const DEFAULT_ISSUER: &str = "EavesdropCA";
pub const DEFAULT_ROOT_CERTIFICATE_NAME: &str = "Eavesdrop Root";

/// Largest RSA modulus accepted by the signing backend
pub const MAX_RSA_BITS: usize = 4096;

/// Settings fixed for the lifetime of a `CertificateManager`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CertificateManagerConfig {
    /// Organization embedded in every subject and issuer DN
    pub issuer: String,
    /// Common name of the root CA
    pub root_certificate_name: String,
    /// Persist issued leaves to the personal store, not just the cache
    pub store_personal_certificates: bool,
    /// RSA modulus size for every generated key
    pub key_bits: usize,
}

impl Default for CertificateManagerConfig {
    fn default() -> Self {
        Self {
            issuer: DEFAULT_ISSUER.to_string(),
            root_certificate_name: DEFAULT_ROOT_CERTIFICATE_NAME.to_string(),
            store_personal_certificates: false,
            key_bits: MIN_RSA_BITS,
        }
    }
}

impl CertificateManagerConfig {
    pub fn new(issuer: impl Into<String>, root_certificate_name: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            root_certificate_name: root_certificate_name.into(),
            ..Self::default()
        }
    }

    pub fn with_store_personal_certificates(mut self, enabled: bool) -> Self {
        self.store_personal_certificates = enabled;
        self
    }

    pub fn with_key_bits(mut self, key_bits: usize) -> Self {
        self.key_bits = key_bits;
        self
    }

    pub fn validate(&self) -> Result<(), CertError> {
        validate_dn_value("issuer", &self.issuer)?;
        validate_dn_value("root_certificate_name", &self.root_certificate_name)?;

        if !(MIN_RSA_BITS..=MAX_RSA_BITS).contains(&self.key_bits) {
            return Err(CertError::InvalidConfig(format!(
                "key_bits must be between {} and {}, got {}",
                MIN_RSA_BITS, MAX_RSA_BITS, self.key_bits
            )));
        }

        Ok(())
    }

    /// `CN=<name>, O=<issuer>`
    pub fn subject_for(&self, name: &str) -> DistinguishedName {
        DistinguishedName::subject(name, &self.issuer)
    }

    pub fn root_subject(&self) -> DistinguishedName {
        self.subject_for(&self.root_certificate_name)
    }
}

fn validate_dn_value(field: &str, value: &str) -> Result<(), CertError> {
    if value.trim().is_empty() {
        return Err(CertError::InvalidConfig(format!("{} must not be empty", field)));
    }
    if value.trim() != value {
        return Err(CertError::InvalidConfig(format!(
            "{} must not have surrounding whitespace",
            field
        )));
    }
    if value.contains(&[',', '=', '+'][..]) {
        return Err(CertError::InvalidConfig(format!(
            "{} must not contain ',', '=' or '+': {}",
            field, value
        )));
    }
    Ok(())
}
