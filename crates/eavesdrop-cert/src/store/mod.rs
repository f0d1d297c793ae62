//! Certificate stores
//!
//! A store is an external collection of certificates addressed by
//! distinguished name. The manager only relies on the [`CertificateStore`]
//! contract; concrete backends live in the submodules.

use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{trace, warn};

use crate::certificate::Certificate;
use crate::error::StoreError;

pub mod directory;
pub mod memory;

pub use directory::DirectoryStore;
pub use memory::MemoryStore;

/// Which logical store a certificate lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreLocation {
    /// Issued certificates presented to clients
    Personal,
    /// Trusted root authorities
    Root,
}

impl fmt::Display for StoreLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreLocation::Personal => f.write_str("My"),
            StoreLocation::Root => f.write_str("Root"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
}

/// Store backend contract
///
/// Every operation other than `open` requires the store to be open; writes
/// additionally require [`OpenMode::ReadWrite`]. Callers serialize access, so
/// implementations only need to be internally consistent, not transactional.
pub trait CertificateStore: Send + Sync {
    fn open(&self, mode: OpenMode) -> Result<(), StoreError>;

    fn close(&self) -> Result<(), StoreError>;

    /// Certificates whose subject DN equals `subject` exactly
    fn find_by_subject(&self, subject: &str) -> Result<Vec<Certificate>, StoreError>;

    /// Certificates whose issuer DN equals `issuer` exactly
    fn find_by_issuer(&self, issuer: &str) -> Result<Vec<Certificate>, StoreError>;

    fn add(&self, certificate: &Certificate) -> Result<(), StoreError>;

    fn remove(&self, certificates: &[Certificate]) -> Result<(), StoreError>;
}

/// A store paired with the lock that serializes its open/modify/close cycles
///
/// The lock is a separate object so the backend can be swapped or shared
/// without changing which lock guards it.
pub struct LockedStore {
    location: StoreLocation,
    lock: Mutex<()>,
    store: Arc<dyn CertificateStore>,
}

impl LockedStore {
    pub fn new(location: StoreLocation, store: Arc<dyn CertificateStore>) -> Self {
        Self {
            location,
            lock: Mutex::new(()),
            store,
        }
    }

    pub fn location(&self) -> StoreLocation {
        self.location
    }

    /// Take the store lock and open the store
    ///
    /// The returned guard closes the store and then releases the lock when
    /// dropped, whichever way the caller leaves.
    pub fn open(&self, mode: OpenMode) -> Result<StoreGuard<'_>, StoreError> {
        // The mutex guards no data, so a panic elsewhere leaves nothing torn.
        let lock = self
            .lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        trace!("Opening {} store ({:?})", self.location, mode);
        self.store.open(mode)?;

        Ok(StoreGuard {
            location: self.location,
            store: self.store.as_ref(),
            _lock: lock,
        })
    }
}

/// An open store held under its lock
pub struct StoreGuard<'a> {
    location: StoreLocation,
    store: &'a dyn CertificateStore,
    _lock: MutexGuard<'a, ()>,
}

impl StoreGuard<'_> {
    pub fn location(&self) -> StoreLocation {
        self.location
    }
}

impl<'a> Deref for StoreGuard<'a> {
    type Target = dyn CertificateStore + 'a;

    fn deref(&self) -> &Self::Target {
        self.store
    }
}

impl Drop for StoreGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.store.close() {
            warn!("Failed to close {} store: {}", self.location, e);
        } else {
            trace!("Closed {} store", self.location);
        }
    }
}
