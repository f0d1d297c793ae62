//! In-memory certificate cache keyed by store location and logical name
//!
//! The root lives under its configured name in [`StoreLocation::Root`] and
//! leaves under their hostname in [`StoreLocation::Personal`], so a hostname
//! never resolves to the CA. The map is sharded, so lookups never wait on a
//! store lock.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::trace;

use crate::certificate::Certificate;
use crate::store::StoreLocation;

type CacheKey = (StoreLocation, String);

pub struct CertificateCache {
    entries: DashMap<CacheKey, Arc<Certificate>>,
}

impl CertificateCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn get(&self, location: StoreLocation, name: &str) -> Option<Arc<Certificate>> {
        self.entries
            .get(&(location, name.to_string()))
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Insert unless the name is already cached for `location`
    ///
    /// Returns whichever certificate ends up cached under that key.
    pub fn insert_if_absent(
        &self,
        location: StoreLocation,
        name: &str,
        certificate: Arc<Certificate>,
    ) -> Arc<Certificate> {
        let entry = self
            .entries
            .entry((location, name.to_string()))
            .or_insert_with(|| {
                trace!("Caching {} certificate for {}", location, name);
                certificate
            });
        Arc::clone(entry.value())
    }

    pub fn remove(&self, location: StoreLocation, name: &str) -> Option<Arc<Certificate>> {
        self.entries
            .remove(&(location, name.to_string()))
            .map(|(_, certificate)| certificate)
    }

    /// Evict every entry issued by `issuer`, returning how many were dropped
    pub fn remove_issued_by(&self, issuer: &str) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, certificate| certificate.issuer() != issuer);
        before.saturating_sub(self.entries.len())
    }

    pub fn contains(&self, location: StoreLocation, name: &str) -> bool {
        self.entries.contains_key(&(location, name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for CertificateCache {
    fn default() -> Self {
        Self::new()
    }
}
