//! Certificate manager
//!
//! Resolves a certificate name through three tiers:
//! 1. the in-memory cache (no store lock taken)
//! 2. the backing store, looked up by subject DN under that store's lock
//! 3. the factory, persisting the result when policy allows
//!
//! The personal store holds leaves, the root store holds the CA. Each store
//! has its own lock, so root operations never wait on leaf issuance of other
//! callers and vice versa. A leaf request resolves the CA through the root
//! tier before it takes the personal lock, so the two locks never nest.
//!
//! A leaf loaded from the personal store is only reused when it still chains
//! to the current CA key and carries its own private key. Stale leaves issued
//! under the root's name are removed and replaced.

use std::fs;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use tracing::{debug, info, trace, warn};

use crate::cache::CertificateCache;
use crate::certificate::Certificate;
use crate::config::CertificateManagerConfig;
use crate::error::CertError;
use crate::factory::{CaSigner, CertificateFactory};
use crate::store::{
    CertificateStore, DirectoryStore, LockedStore, MemoryStore, OpenMode, StoreGuard,
    StoreLocation,
};

/// Issues, caches and persists certificates under a single root CA
pub struct CertificateManager {
    config: CertificateManagerConfig,
    root_subject: String,
    factory: CertificateFactory,
    cache: CertificateCache,
    personal: LockedStore,
    root: LockedStore,
    /// Set once, under the root store lock, then only read
    ca: OnceLock<Arc<CaSigner>>,
}

impl CertificateManager {
    /// Create a manager over the given personal and root stores
    ///
    /// The two stores must be distinct backends.
    pub fn new(
        config: CertificateManagerConfig,
        personal: Arc<dyn CertificateStore>,
        root: Arc<dyn CertificateStore>,
    ) -> Result<Self, CertError> {
        config.validate()?;

        let root_subject = config.root_subject();
        info!(
            "Certificate manager for root '{}' (persist leaves: {})",
            root_subject, config.store_personal_certificates
        );

        Ok(Self {
            root_subject: root_subject.to_string(),
            factory: CertificateFactory::new(root_subject, config.key_bits),
            cache: CertificateCache::new(),
            personal: LockedStore::new(StoreLocation::Personal, personal),
            root: LockedStore::new(StoreLocation::Root, root),
            ca: OnceLock::new(),
            config,
        })
    }

    /// Manager whose stores live only as long as the process
    pub fn in_memory(config: CertificateManagerConfig) -> Result<Self, CertError> {
        Self::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryStore::new()),
        )
    }

    /// Manager backed by `personal/` and `root/` under `dir`
    pub fn with_directory(
        config: CertificateManagerConfig,
        dir: impl AsRef<Path>,
    ) -> Result<Self, CertError> {
        let dir = dir.as_ref();
        Self::new(
            config,
            Arc::new(DirectoryStore::new(dir.join("personal"))),
            Arc::new(DirectoryStore::new(dir.join("root"))),
        )
    }

    pub fn config(&self) -> &CertificateManagerConfig {
        &self.config
    }

    pub fn cache(&self) -> &CertificateCache {
        &self.cache
    }

    /// Subject DN of the configured root, `CN=<root name>, O=<issuer>`
    pub fn root_subject(&self) -> &str {
        &self.root_subject
    }

    /// Leaf certificate for `name`, issued on first request
    ///
    /// Returns `None` when the certificate could not be loaded or issued;
    /// use [`try_generate_certificate`](Self::try_generate_certificate) for
    /// the reason.
    pub fn generate_certificate(&self, name: &str) -> Option<Arc<Certificate>> {
        match self.try_generate_certificate(name) {
            Ok(certificate) => Some(certificate),
            Err(e) => {
                warn!("Failed to generate certificate for {}: {}", name, e);
                None
            }
        }
    }

    pub fn try_generate_certificate(&self, name: &str) -> Result<Arc<Certificate>, CertError> {
        validate_name(name)?;
        if name == self.config.root_certificate_name {
            return Err(CertError::InvalidName(format!(
                "`{}` is the root certificate name",
                name
            )));
        }
        self.certificate_for(StoreLocation::Personal, name)
    }

    /// Make sure the root CA exists in the root store
    pub fn create_trusted_root_certificate(&self) -> bool {
        match self.root_certificate() {
            Ok(_) => true,
            Err(e) => {
                warn!("Failed to install root certificate: {}", e);
                false
            }
        }
    }

    /// The root CA, loaded from the root store or generated into it
    pub fn root_certificate(&self) -> Result<Arc<Certificate>, CertError> {
        self.certificate_for(StoreLocation::Root, &self.config.root_certificate_name)
    }

    /// Remove every certificate issued by the root from the root store
    pub fn destroy_trusted_root_certificate(&self) -> bool {
        match self.try_destroy_trusted_root_certificate() {
            Ok(_) => true,
            Err(e) => {
                warn!("Failed to destroy root certificate: {}", e);
                false
            }
        }
    }

    /// Returns how many certificates were removed from the root store
    pub fn try_destroy_trusted_root_certificate(&self) -> Result<usize, CertError> {
        self.destroy_in(StoreLocation::Root)
    }

    /// Write the root CA's DER certificate (never its key) to `path`
    ///
    /// Success means the file exists afterwards.
    pub fn export_trusted_root_certificate(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        if let Err(e) = self.try_export_trusted_root_certificate(path) {
            warn!("Failed to export root certificate to {}: {}", path.display(), e);
        }
        path.exists()
    }

    pub fn try_export_trusted_root_certificate(&self, path: &Path) -> Result<(), CertError> {
        let root = self.root_certificate()?;
        fs::write(path, root.der())?;
        info!("Exported root certificate to {}", path.display());
        Ok(())
    }

    /// Personal-store certificates whose subject DN is exactly `subject`
    ///
    /// `None` stands for "nothing found", including when the store could not
    /// be read.
    pub fn find_certificates(&self, subject: &str) -> Option<Vec<Certificate>> {
        match self.try_find_certificates(subject) {
            Ok(found) if !found.is_empty() => Some(found),
            Ok(_) => None,
            Err(e) => {
                warn!("Failed to search personal store for {}: {}", subject, e);
                None
            }
        }
    }

    pub fn try_find_certificates(&self, subject: &str) -> Result<Vec<Certificate>, CertError> {
        let store = self.personal.open(OpenMode::ReadOnly)?;
        Ok(store.find_by_subject(subject)?)
    }

    /// Remove everything issued by the root from both stores
    pub fn destroy_certificates(&self) {
        for location in [StoreLocation::Personal, StoreLocation::Root] {
            if let Err(e) = self.destroy_in(location) {
                warn!("Failed to destroy certificates in {} store: {}", location, e);
            }
        }
    }

    /// Returns how many certificates were removed across both stores
    pub fn try_destroy_certificates(&self) -> Result<usize, CertError> {
        let personal = self.destroy_in(StoreLocation::Personal)?;
        let root = self.destroy_in(StoreLocation::Root)?;
        Ok(personal + root)
    }

    fn store(&self, location: StoreLocation) -> &LockedStore {
        match location {
            StoreLocation::Personal => &self.personal,
            StoreLocation::Root => &self.root,
        }
    }

    fn certificate_for(
        &self,
        location: StoreLocation,
        name: &str,
    ) -> Result<Arc<Certificate>, CertError> {
        if let Some(certificate) = self.cache.get(location, name) {
            trace!("Cache hit for {}", name);
            return Ok(certificate);
        }

        let signer = match location {
            StoreLocation::Personal => Some(self.ca_signer()?),
            StoreLocation::Root => None,
        };

        let store = self.store(location).open(OpenMode::ReadWrite)?;

        // Another caller may have issued it while we waited for the lock.
        if let Some(certificate) = self.cache.get(location, name) {
            trace!("Cache hit for {} after acquiring {} store", name, location);
            return Ok(certificate);
        }

        let subject = self.config.subject_for(name).to_string();
        let existing = store.find_by_subject(&subject)?;
        let found = match &signer {
            Some(signer) => self.reusable_leaf(&store, existing, signer)?,
            None => preferred_root(existing),
        };

        let certificate = match found {
            Some(certificate) => {
                debug!("Loaded {} from {} store", subject, location);
                certificate
            }
            None => {
                let issued = match &signer {
                    Some(signer) => self.factory.create_leaf(&subject, name, signer)?,
                    None => self.issue_root(&subject)?,
                };
                if location == StoreLocation::Root || self.config.store_personal_certificates {
                    store.add(&issued)?;
                    info!(
                        "Issued {} (serial {}) into {} store",
                        subject,
                        issued.serial_number(),
                        location
                    );
                } else {
                    info!(
                        "Issued {} (serial {}), cached only",
                        subject,
                        issued.serial_number()
                    );
                }
                issued
            }
        };

        if location == StoreLocation::Root {
            self.establish_ca(&certificate)?;
        }

        Ok(self
            .cache
            .insert_if_absent(location, name, Arc::new(certificate)))
    }

    /// Pick a stored leaf that chains to `signer` and holds its own key
    ///
    /// Unusable leaves under the root's issuer name are removed from the
    /// store; certificates from other issuers are left alone.
    fn reusable_leaf(
        &self,
        store: &StoreGuard<'_>,
        candidates: Vec<Certificate>,
        signer: &CaSigner,
    ) -> Result<Option<Certificate>, CertError> {
        let (usable, rejected): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .partition(|certificate| self.is_reusable_leaf(certificate, signer));

        let stale: Vec<_> = rejected
            .into_iter()
            .filter(|certificate| certificate.issuer() == self.root_subject)
            .collect();
        if !stale.is_empty() {
            info!(
                "Discarding {} stale certificate(s) for {} from {} store",
                stale.len(),
                stale[0].subject(),
                store.location()
            );
            store.remove(&stale)?;
        }

        Ok(usable.into_iter().next())
    }

    fn is_reusable_leaf(&self, certificate: &Certificate, signer: &CaSigner) -> bool {
        certificate.issuer() == self.root_subject
            && !certificate.is_ca()
            && signer.has_signed(certificate)
            && certificate.has_matching_private_key()
    }

    /// Create the root on a store miss; caller holds the root store lock
    fn issue_root(&self, subject: &str) -> Result<Certificate, CertError> {
        match self.ca.get() {
            // The CA key is fixed for the process; a destroyed root is
            // re-issued around the same key.
            Some(signer) => self.factory.reissue_ca(subject, signer),
            None => {
                let (certificate, signer) = self.factory.create_ca(subject)?;
                self.adopt_ca(signer)?;
                Ok(certificate)
            }
        }
    }

    /// Bind the root found in the store to the CA key, adopting it if none is held
    fn establish_ca(&self, root: &Certificate) -> Result<(), CertError> {
        if let Some(signer) = self.ca.get() {
            if signer.public_key_raw() != root.public_key_raw() {
                return Err(CertError::KeyConversion(format!(
                    "stored root `{}` does not carry the established CA key",
                    root.subject()
                )));
            }
            return Ok(());
        }

        let signer = CaSigner::from_certificate(root)?;
        debug!("Established CA signing key from stored root {}", root.subject());
        self.adopt_ca(signer)
    }

    /// Record the CA key; callers hold the root store lock
    fn adopt_ca(&self, signer: CaSigner) -> Result<(), CertError> {
        self.ca.set(Arc::new(signer)).map_err(|_| {
            CertError::Generation("CA signing key is already established".to_string())
        })
    }

    /// The CA key, checked against the current root first
    fn ca_signer(&self) -> Result<Arc<CaSigner>, CertError> {
        self.root_certificate()?;
        self.ca.get().cloned().ok_or(CertError::MissingCaKey)
    }

    fn destroy_in(&self, location: StoreLocation) -> Result<usize, CertError> {
        let store = self.store(location).open(OpenMode::ReadWrite)?;

        let doomed = store.find_by_issuer(&self.root_subject)?;
        if !doomed.is_empty() {
            store.remove(&doomed)?;
        }

        let evicted = self.cache.remove_issued_by(&self.root_subject);
        info!(
            "Destroyed {} certificate(s) in {} store, evicted {} cached",
            doomed.len(),
            location,
            evicted
        );
        Ok(doomed.len())
    }
}

/// Prefer a stored root that carries its private key
fn preferred_root(mut candidates: Vec<Certificate>) -> Option<Certificate> {
    match candidates.iter().position(Certificate::has_private_key) {
        Some(index) => Some(candidates.swap_remove(index)),
        None => candidates.into_iter().next(),
    }
}

fn validate_name(name: &str) -> Result<(), CertError> {
    if name.is_empty() || name.trim() != name {
        return Err(CertError::InvalidName(format!("`{}`", name)));
    }
    if name.contains(&[',', '=', '+'][..]) {
        return Err(CertError::InvalidName(format!(
            "`{}` contains a DN separator",
            name
        )));
    }
    Ok(())
}
