//! In-memory certificate store

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use tracing::debug;

use super::{CertificateStore, OpenMode};
use crate::certificate::Certificate;
use crate::error::StoreError;

/// Process-local store, used for tests and for deployments that should not
/// leave anything behind
///
/// Opening an already open store fails, which makes unserialized access
/// visible instead of silently interleaving.
pub struct MemoryStore {
    certificates: RwLock<Vec<Certificate>>,
    mode: RwLock<Option<OpenMode>>,
    opens: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            certificates: RwLock::new(Vec::new()),
            mode: RwLock::new(None),
            opens: AtomicUsize::new(0),
        }
    }

    /// How many times the store has been opened
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn is_open(&self) -> bool {
        self.mode.read().map(|mode| mode.is_some()).unwrap_or(false)
    }

    /// Number of certificates held, regardless of open state
    pub fn count(&self) -> usize {
        self.certificates.read().map(|certs| certs.len()).unwrap_or(0)
    }

    fn require_open(&self) -> Result<OpenMode, StoreError> {
        self.mode
            .read()
            .map_err(|_| poisoned())?
            .ok_or(StoreError::NotOpen)
    }

    fn require_writable(&self) -> Result<(), StoreError> {
        match self.require_open()? {
            OpenMode::ReadWrite => Ok(()),
            OpenMode::ReadOnly => Err(StoreError::ReadOnly),
        }
    }

    fn find(&self, matches: impl Fn(&Certificate) -> bool) -> Result<Vec<Certificate>, StoreError> {
        self.require_open()?;
        let certs = self.certificates.read().map_err(|_| poisoned())?;
        Ok(certs.iter().filter(|cert| matches(cert)).cloned().collect())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CertificateStore for MemoryStore {
    fn open(&self, mode: OpenMode) -> Result<(), StoreError> {
        let mut current = self.mode.write().map_err(|_| poisoned())?;
        if current.is_some() {
            return Err(StoreError::Unavailable("store is already open".to_string()));
        }
        *current = Some(mode);
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> Result<(), StoreError> {
        let mut current = self.mode.write().map_err(|_| poisoned())?;
        current.take().map(|_| ()).ok_or(StoreError::NotOpen)
    }

    fn find_by_subject(&self, subject: &str) -> Result<Vec<Certificate>, StoreError> {
        self.find(|cert| cert.subject() == subject)
    }

    fn find_by_issuer(&self, issuer: &str) -> Result<Vec<Certificate>, StoreError> {
        self.find(|cert| cert.issuer() == issuer)
    }

    fn add(&self, certificate: &Certificate) -> Result<(), StoreError> {
        self.require_writable()?;
        let mut certs = self.certificates.write().map_err(|_| poisoned())?;
        if certs.iter().any(|existing| existing.same_as(certificate)) {
            return Ok(());
        }

        debug!("Storing certificate for subject: {}", certificate.subject());
        certs.push(certificate.clone());
        Ok(())
    }

    fn remove(&self, certificates: &[Certificate]) -> Result<(), StoreError> {
        self.require_writable()?;
        let mut certs = self.certificates.write().map_err(|_| poisoned())?;
        certs.retain(|existing| !certificates.iter().any(|doomed| doomed.same_as(existing)));
        Ok(())
    }
}

fn poisoned() -> StoreError {
    StoreError::Unavailable("store lock poisoned".to_string())
}
