//! On-demand certificate issuance for TLS interception
//!
//! Maintains a single self-signed root CA and issues per-hostname leaf
//! certificates signed by it, caching every result so repeated requests
//! for the same hostname never touch the backing stores again.

pub mod cache;
pub mod certificate;
pub mod config;
pub mod error;
pub mod factory;
pub mod key;
pub mod manager;
pub mod name;
pub mod store;

pub use cache::CertificateCache;
pub use certificate::Certificate;
pub use config::CertificateManagerConfig;
pub use error::{CertError, StoreError};
pub use factory::{CaSigner, CertificateFactory};
pub use manager::CertificateManager;
pub use name::DistinguishedName;
pub use store::{
    CertificateStore, DirectoryStore, LockedStore, MemoryStore, OpenMode, StoreGuard,
    StoreLocation,
};
