//! Directory-backed certificate store
//!
//! Each certificate is one PEM file holding the certificate block and, when
//! known, its PKCS#8 private key block. Files are named after the serial
//! number. Lookups scan the directory; stores are expected to hold tens of
//! certificates, not thousands.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rustls::pki_types::PrivateKeyDer;
use rustls_pemfile::Item;
use tracing::{debug, warn};

use super::{CertificateStore, OpenMode};
use crate::certificate::Certificate;
use crate::error::StoreError;

const EXTENSION: &str = "pem";

#[cfg(unix)]
const FILE_MODE_RESTRICTED: u32 = 0o600;

pub struct DirectoryStore {
    path: PathBuf,
    mode: Mutex<Option<OpenMode>>,
}

impl DirectoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mode: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn require_open(&self) -> Result<OpenMode, StoreError> {
        let mode = self.mode.lock().map_err(|_| poisoned())?;
        mode.ok_or(StoreError::NotOpen)
    }

    fn require_writable(&self) -> Result<(), StoreError> {
        match self.require_open()? {
            OpenMode::ReadWrite => Ok(()),
            OpenMode::ReadOnly => Err(StoreError::ReadOnly),
        }
    }

    /// Every readable certificate file, paired with its path
    fn entries(&self) -> Result<Vec<(PathBuf, Certificate)>, StoreError> {
        let dir = match fs::read_dir(&self.path) {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for entry in dir {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
                continue;
            }

            match read_certificate(&path) {
                Ok(certificate) => entries.push((path, certificate)),
                Err(e) => warn!("Skipping unreadable certificate {}: {}", path.display(), e),
            }
        }

        Ok(entries)
    }

    fn find(&self, matches: impl Fn(&Certificate) -> bool) -> Result<Vec<Certificate>, StoreError> {
        self.require_open()?;
        Ok(self
            .entries()?
            .into_iter()
            .map(|(_, certificate)| certificate)
            .filter(|certificate| matches(certificate))
            .collect())
    }
}

impl CertificateStore for DirectoryStore {
    fn open(&self, mode: OpenMode) -> Result<(), StoreError> {
        if self.path.exists() && !self.path.is_dir() {
            return Err(StoreError::Unavailable(format!(
                "{} is not a directory",
                self.path.display()
            )));
        }

        if mode == OpenMode::ReadWrite {
            fs::create_dir_all(&self.path).map_err(|e| {
                StoreError::Unavailable(format!("create {}: {}", self.path.display(), e))
            })?;
        }

        let mut current = self.mode.lock().map_err(|_| poisoned())?;
        *current = Some(mode);
        Ok(())
    }

    fn close(&self) -> Result<(), StoreError> {
        let mut current = self.mode.lock().map_err(|_| poisoned())?;
        current.take().map(|_| ()).ok_or(StoreError::NotOpen)
    }

    fn find_by_subject(&self, subject: &str) -> Result<Vec<Certificate>, StoreError> {
        self.find(|certificate| certificate.subject() == subject)
    }

    fn find_by_issuer(&self, issuer: &str) -> Result<Vec<Certificate>, StoreError> {
        self.find(|certificate| certificate.issuer() == issuer)
    }

    fn add(&self, certificate: &Certificate) -> Result<(), StoreError> {
        self.require_writable()?;

        let path = self
            .path
            .join(format!("{:016x}.{}", certificate.serial_number(), EXTENSION));
        if path.exists() {
            let existing = read_certificate(&path)?;
            if existing.same_as(certificate) {
                return Ok(());
            }
            return Err(StoreError::InvalidData(format!(
                "{} already holds a different certificate",
                path.display()
            )));
        }

        let mut contents = certificate.to_pem();
        if let Some(key_pem) = certificate.private_key_pem() {
            contents.push_str(&key_pem);
        }
        fs::write(&path, contents)?;

        if certificate.has_private_key() {
            restrict_permissions(&path)?;
        }

        debug!(
            "Stored certificate {} at {}",
            certificate.subject(),
            path.display()
        );
        Ok(())
    }

    fn remove(&self, certificates: &[Certificate]) -> Result<(), StoreError> {
        self.require_writable()?;

        for (path, existing) in self.entries()? {
            if certificates.iter().any(|doomed| doomed.same_as(&existing)) {
                fs::remove_file(&path)?;
                debug!("Removed certificate file {}", path.display());
            }
        }
        Ok(())
    }
}

fn read_certificate(path: &Path) -> Result<Certificate, StoreError> {
    let contents = fs::read(path)?;

    let mut certificate_der = None;
    let mut private_key = None;
    for item in rustls_pemfile::read_all(&mut contents.as_slice()) {
        match item? {
            Item::X509Certificate(der) if certificate_der.is_none() => {
                certificate_der = Some(der);
            }
            Item::Pkcs8Key(key) => private_key = Some(PrivateKeyDer::Pkcs8(key)),
            Item::Pkcs1Key(key) => private_key = Some(PrivateKeyDer::Pkcs1(key)),
            _ => {}
        }
    }

    let der = certificate_der.ok_or_else(|| {
        StoreError::InvalidData(format!("{} has no certificate block", path.display()))
    })?;
    Certificate::from_der(der, private_key)
        .map_err(|e| StoreError::InvalidData(format!("{}: {}", path.display(), e)))
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(FILE_MODE_RESTRICTED))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> io::Result<()> {
    Ok(())
}

fn poisoned() -> StoreError {
    StoreError::Unavailable("store lock poisoned".to_string())
}
