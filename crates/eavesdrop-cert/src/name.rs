//! Distinguished names in their `CN=<name>, O=<org>` textual form
//!
//! Certificates are matched by the exact rendering produced here, which is
//! the same rendering `x509-parser` uses when decoding a certificate, so a
//! name built by [`DistinguishedName::subject`] compares equal to the subject
//! read back from the issued DER.

use std::fmt;
use std::str::FromStr;

use rcgen::DnType;

use crate::error::CertError;

/// Attribute types accepted in a distinguished name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnAttribute {
    CommonName,
    Organization,
    OrganizationalUnit,
    Country,
    Locality,
    State,
}

impl DnAttribute {
    fn abbreviation(self) -> &'static str {
        match self {
            DnAttribute::CommonName => "CN",
            DnAttribute::Organization => "O",
            DnAttribute::OrganizationalUnit => "OU",
            DnAttribute::Country => "C",
            DnAttribute::Locality => "L",
            DnAttribute::State => "ST",
        }
    }

    fn from_abbreviation(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "CN" => Some(DnAttribute::CommonName),
            "O" => Some(DnAttribute::Organization),
            "OU" => Some(DnAttribute::OrganizationalUnit),
            "C" => Some(DnAttribute::Country),
            "L" => Some(DnAttribute::Locality),
            "ST" => Some(DnAttribute::State),
            _ => None,
        }
    }

    fn dn_type(self) -> DnType {
        match self {
            DnAttribute::CommonName => DnType::CommonName,
            DnAttribute::Organization => DnType::OrganizationName,
            DnAttribute::OrganizationalUnit => DnType::OrganizationalUnitName,
            DnAttribute::Country => DnType::CountryName,
            DnAttribute::Locality => DnType::LocalityName,
            DnAttribute::State => DnType::StateOrProvinceName,
        }
    }
}

/// An ordered list of single-valued relative distinguished names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistinguishedName {
    entries: Vec<(DnAttribute, String)>,
}

impl DistinguishedName {
    /// `CN=<common_name>, O=<organization>`
    pub fn subject(common_name: &str, organization: &str) -> Self {
        Self {
            entries: vec![
                (DnAttribute::CommonName, common_name.to_string()),
                (DnAttribute::Organization, organization.to_string()),
            ],
        }
    }

    pub fn common_name(&self) -> Option<&str> {
        self.get(DnAttribute::CommonName)
    }

    pub fn organization(&self) -> Option<&str> {
        self.get(DnAttribute::Organization)
    }

    pub fn get(&self, attribute: DnAttribute) -> Option<&str> {
        self.entries
            .iter()
            .find(|(attr, _)| *attr == attribute)
            .map(|(_, value)| value.as_str())
    }

    /// Convert into the rcgen representation, preserving attribute order
    pub fn to_rcgen(&self) -> rcgen::DistinguishedName {
        let mut dn = rcgen::DistinguishedName::new();
        for (attribute, value) in &self.entries {
            dn.push(attribute.dn_type(), value.as_str());
        }
        dn
    }
}

impl FromStr for DistinguishedName {
    type Err = CertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut entries = Vec::new();

        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| CertError::InvalidName(format!("missing '=' in `{}`", part)))?;
            let attribute = DnAttribute::from_abbreviation(key.trim()).ok_or_else(|| {
                CertError::InvalidName(format!("unsupported attribute `{}`", key.trim()))
            })?;
            let value = value.trim();
            if value.is_empty() {
                return Err(CertError::InvalidName(format!(
                    "empty value for `{}`",
                    attribute.abbreviation()
                )));
            }

            entries.push((attribute, value.to_string()));
        }

        if entries.is_empty() {
            return Err(CertError::InvalidName(format!("`{}` has no attributes", s)));
        }

        Ok(Self { entries })
    }
}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (attribute, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", attribute.abbreviation(), value)?;
        }
        Ok(())
    }
}
