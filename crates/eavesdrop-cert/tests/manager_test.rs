//! End-to-end behaviour of the certificate manager

use std::sync::Arc;
use std::thread;

use eavesdrop_cert::certificate::SHA256_WITH_RSA_OID;
use eavesdrop_cert::{
    Certificate, CertificateManager, CertificateManagerConfig, CertificateStore, CertError,
    MemoryStore, OpenMode, StoreError, StoreLocation,
};
use x509_parser::parse_x509_certificate;

const ISSUER: &str = "EavesdropCA";
const ROOT_NAME: &str = "Eavesdrop Root";
const ROOT_DN: &str = "CN=Eavesdrop Root, O=EavesdropCA";

struct Fixture {
    manager: CertificateManager,
    personal: Arc<MemoryStore>,
    root: Arc<MemoryStore>,
}

fn fixture(store_personal: bool) -> Fixture {
    let personal = Arc::new(MemoryStore::new());
    let root = Arc::new(MemoryStore::new());
    let config = CertificateManagerConfig::new(ISSUER, ROOT_NAME)
        .with_store_personal_certificates(store_personal);
    let manager = CertificateManager::new(config, personal.clone(), root.clone()).unwrap();
    Fixture {
        manager,
        personal,
        root,
    }
}

fn seed(store: &MemoryStore, certificate: &Certificate) {
    store.open(OpenMode::ReadWrite).unwrap();
    store.add(certificate).unwrap();
    store.close().unwrap();
}

fn assert_signed_by(leaf: &Certificate, ca: &Certificate) {
    let (_, parsed_leaf) = parse_x509_certificate(leaf.der()).unwrap();
    let (_, parsed_ca) = parse_x509_certificate(ca.der()).unwrap();
    parsed_leaf
        .verify_signature(Some(parsed_ca.public_key()))
        .expect("leaf signature should verify against the root");
}

struct UnavailableStore;

impl CertificateStore for UnavailableStore {
    fn open(&self, _mode: OpenMode) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("access denied".to_string()))
    }
    fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
    fn find_by_subject(&self, _: &str) -> Result<Vec<Certificate>, StoreError> {
        Err(StoreError::NotOpen)
    }
    fn find_by_issuer(&self, _: &str) -> Result<Vec<Certificate>, StoreError> {
        Err(StoreError::NotOpen)
    }
    fn add(&self, _: &Certificate) -> Result<(), StoreError> {
        Err(StoreError::NotOpen)
    }
    fn remove(&self, _: &[Certificate]) -> Result<(), StoreError> {
        Err(StoreError::NotOpen)
    }
}

#[test]
fn test_example_com_scenario() {
    let fx = fixture(false);

    let leaf = fx
        .manager
        .generate_certificate("example.com")
        .expect("certificate should be issued");

    assert_eq!(leaf.subject(), "CN=example.com, O=EavesdropCA");
    assert_eq!(leaf.issuer(), ROOT_DN);
    assert_eq!(leaf.dns_names(), ["example.com".to_string()]);
    assert_eq!(leaf.signature_algorithm(), SHA256_WITH_RSA_OID);
    assert!(leaf.serial_number() >= 1);
    assert!(leaf.serial_number() <= i64::MAX as u64);
    assert!(!leaf.is_ca());
}

#[test]
fn test_repeat_issuance_hits_cache() {
    let fx = fixture(true);

    let first = fx.manager.generate_certificate("repeat.test").unwrap();
    let opens_after_first = fx.personal.open_count();
    let root_opens_after_first = fx.root.open_count();

    let second = fx.manager.generate_certificate("repeat.test").unwrap();

    assert_eq!(second.subject(), first.subject());
    assert_eq!(second.issuer(), first.issuer());
    assert_eq!(second.serial_number(), first.serial_number());
    assert_eq!(fx.personal.open_count(), opens_after_first);
    assert_eq!(fx.root.open_count(), root_opens_after_first);
}

#[test]
fn test_root_is_self_signed_ca() {
    let fx = fixture(false);

    assert!(fx.manager.create_trusted_root_certificate());
    let root = fx.manager.root_certificate().unwrap();

    assert_eq!(root.subject(), ROOT_DN);
    assert_eq!(root.issuer(), root.subject());
    assert!(root.is_ca());
    assert!(root.has_private_key());
    assert_eq!(fx.root.count(), 1);
}

#[test]
fn test_leaves_chain_to_root() {
    let fx = fixture(false);

    let hosts = ["a.example.com", "b.example.com", "api.internal"];
    let root = fx.manager.root_certificate().unwrap();

    for host in hosts {
        let leaf = fx.manager.generate_certificate(host).unwrap();
        assert_eq!(leaf.issuer(), root.subject());
        assert_eq!(leaf.dns_names().len(), 1);
        assert_eq!(leaf.dns_names()[0], host);
        assert_signed_by(&leaf, &root);
    }
}

#[test]
fn test_leaf_before_root_installs_root() {
    let fx = fixture(false);

    let leaf = fx.manager.generate_certificate("first.test").unwrap();

    assert_eq!(fx.root.count(), 1);
    let root = fx.manager.root_certificate().unwrap();
    assert_signed_by(&leaf, &root);
}

#[test]
fn test_validity_spans_twenty_years() {
    let fx = fixture(false);
    let issued_at = time::OffsetDateTime::now_utc();

    let leaf = fx.manager.generate_certificate("validity.test").unwrap();
    let root = fx.manager.root_certificate().unwrap();

    for certificate in [&leaf, &root] {
        let not_before = certificate.not_before();
        let not_after = certificate.not_after();
        let start = not_before.date();
        let expected_end = start.replace_year(start.year() + 20).unwrap_or_else(|_| {
            time::Date::from_calendar_date(start.year() + 20, time::Month::February, 28).unwrap()
        });

        assert!(not_before <= issued_at);
        assert_eq!(not_after.date(), expected_end);
        assert_eq!(not_after.time(), time::Time::MIDNIGHT);
        assert_eq!(not_before.time(), time::Time::MIDNIGHT);
    }
}

#[test]
fn test_leaves_stay_in_cache_unless_persistence_enabled() {
    let cached_only = fixture(false);
    cached_only.manager.generate_certificate("cached.test").unwrap();
    assert_eq!(cached_only.personal.count(), 0);
    assert!(cached_only
        .manager
        .find_certificates("CN=cached.test, O=EavesdropCA")
        .is_none());

    let persisted = fixture(true);
    persisted.manager.generate_certificate("persisted.test").unwrap();
    assert_eq!(persisted.personal.count(), 1);

    let found = persisted
        .manager
        .find_certificates("CN=persisted.test, O=EavesdropCA")
        .unwrap();
    assert_eq!(found.len(), 1);
    assert!(found[0].has_private_key());
}

#[test]
fn test_find_returns_none_for_unknown_subject() {
    let fx = fixture(true);
    fx.manager.generate_certificate("known.test").unwrap();

    assert!(fx.manager.find_certificates("CN=unknown.test, O=EavesdropCA").is_none());
    assert!(fx
        .manager
        .try_find_certificates("CN=unknown.test, O=EavesdropCA")
        .unwrap()
        .is_empty());
}

#[test]
fn test_destroy_evicts_cache_and_stores() {
    let fx = fixture(true);

    let before = fx.manager.generate_certificate("destroy.test").unwrap();
    assert!(fx.manager.cache().contains(StoreLocation::Personal, "destroy.test"));
    assert!(fx.manager.cache().contains(StoreLocation::Root, ROOT_NAME));

    fx.manager.destroy_certificates();

    assert!(fx
        .manager
        .find_certificates("CN=destroy.test, O=EavesdropCA")
        .is_none());
    assert!(!fx.manager.cache().contains(StoreLocation::Personal, "destroy.test"));
    assert!(!fx.manager.cache().contains(StoreLocation::Root, ROOT_NAME));
    assert_eq!(fx.personal.count(), 0);
    assert_eq!(fx.root.count(), 0);

    let after = fx.manager.generate_certificate("destroy.test").unwrap();
    assert_ne!(after.serial_number(), before.serial_number());
}

#[test]
fn test_recreated_root_still_verifies_earlier_leaves() {
    let fx = fixture(false);

    let leaf = fx.manager.generate_certificate("survivor.test").unwrap();
    let first_root = fx.manager.root_certificate().unwrap();

    assert!(fx.manager.destroy_trusted_root_certificate());
    assert_eq!(fx.root.count(), 0);

    assert!(fx.manager.create_trusted_root_certificate());
    let second_root = fx.manager.root_certificate().unwrap();

    assert!(!second_root.same_as(&first_root));
    assert_eq!(second_root.public_key_raw(), first_root.public_key_raw());
    assert_signed_by(&leaf, &second_root);

    let fresh = fx.manager.generate_certificate("fresh.test").unwrap();
    assert_signed_by(&fresh, &second_root);
}

#[test]
fn test_export_writes_public_der() {
    let fx = fixture(false);
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("root.cer");

    assert!(fx.manager.export_trusted_root_certificate(&path));

    let bytes = std::fs::read(&path).unwrap();
    let (rest, parsed) = parse_x509_certificate(&bytes).unwrap();
    assert!(rest.is_empty());
    assert_eq!(parsed.subject().to_string(), ROOT_DN);
    assert!(!bytes.windows(11).any(|w| w == b"PRIVATE KEY"));
}

#[test]
fn test_export_to_unwritable_path_fails() {
    let fx = fixture(false);
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("missing").join("root.cer");

    assert!(!fx.manager.export_trusted_root_certificate(&path));
}

#[test]
fn test_concurrent_requests_share_one_ca() {
    let fx = fixture(true);
    let manager = Arc::new(fx.manager);

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                let host = format!("host{}.test", i % 3);
                manager.generate_certificate(&host).unwrap()
            })
        })
        .collect();

    let leaves: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let root = manager.root_certificate().unwrap();

    assert_eq!(fx.root.count(), 1);
    assert_eq!(fx.personal.count(), 3);
    for leaf in &leaves {
        assert_signed_by(leaf, &root);
    }

    // same host always resolves to the same certificate
    for (i, leaf) in leaves.iter().enumerate() {
        let twin = &leaves[(i + 3) % 6];
        assert_eq!(leaf.serial_number(), twin.serial_number());
    }
}

#[test]
fn test_unavailable_store_yields_empty_results() {
    let config = CertificateManagerConfig::new(ISSUER, ROOT_NAME);
    let manager = CertificateManager::new(
        config,
        Arc::new(UnavailableStore),
        Arc::new(UnavailableStore),
    )
    .unwrap();

    assert!(manager.generate_certificate("down.test").is_none());
    assert!(!manager.create_trusted_root_certificate());
    assert!(!manager.destroy_trusted_root_certificate());
    assert!(manager.find_certificates(ROOT_DN).is_none());
    manager.destroy_certificates();

    assert!(matches!(
        manager.try_generate_certificate("down.test"),
        Err(CertError::Store(StoreError::Unavailable(_)))
    ));
    assert!(manager.cache().is_empty());
}

#[test]
fn test_root_store_failure_blocks_leaf_issuance() {
    let personal = Arc::new(MemoryStore::new());
    let manager = CertificateManager::new(
        CertificateManagerConfig::new(ISSUER, ROOT_NAME),
        personal.clone(),
        Arc::new(UnavailableStore),
    )
    .unwrap();

    assert!(manager.generate_certificate("orphan.test").is_none());
    assert!(!personal.is_open());
    assert!(manager.cache().is_empty());
}

#[test]
fn test_directory_stores_reload_root_across_managers() {
    let temp = tempfile::tempdir().unwrap();
    let config = CertificateManagerConfig::new(ISSUER, ROOT_NAME);

    let first = CertificateManager::with_directory(config.clone(), temp.path()).unwrap();
    let root = first.root_certificate().unwrap();
    drop(first);

    // fresh process: the CA key comes back from the stored root
    let second = CertificateManager::with_directory(config, temp.path()).unwrap();
    let reloaded = second.root_certificate().unwrap();
    assert!(reloaded.same_as(&root));

    let leaf = second.generate_certificate("reload.test").unwrap();
    assert_signed_by(&leaf, &root);
}

#[test]
fn test_stored_root_without_key_cannot_sign() {
    let personal = Arc::new(MemoryStore::new());
    let root_store = Arc::new(MemoryStore::new());

    let donor = CertificateManager::in_memory(CertificateManagerConfig::new(ISSUER, ROOT_NAME))
        .unwrap();
    let donor_root = donor.root_certificate().unwrap();
    let public_only = Certificate::from_der(donor_root.certificate_der(), None).unwrap();

    root_store.open(OpenMode::ReadWrite).unwrap();
    root_store.add(&public_only).unwrap();
    root_store.close().unwrap();

    let manager = CertificateManager::new(
        CertificateManagerConfig::new(ISSUER, ROOT_NAME),
        personal,
        root_store,
    )
    .unwrap();

    assert!(matches!(
        manager.try_generate_certificate("nokey.test"),
        Err(CertError::KeyConversion(_))
    ));
}

#[test]
fn test_persisted_leaves_reload_and_chain_to_root() {
    let temp = tempfile::tempdir().unwrap();
    let config =
        CertificateManagerConfig::new(ISSUER, ROOT_NAME).with_store_personal_certificates(true);

    let first = CertificateManager::with_directory(config.clone(), temp.path()).unwrap();
    let issued = first.generate_certificate("persisted.example.com").unwrap();
    drop(first);

    let second = CertificateManager::with_directory(config, temp.path()).unwrap();
    let reloaded = second.generate_certificate("persisted.example.com").unwrap();
    let root = second.root_certificate().unwrap();

    assert!(reloaded.same_as(&issued));
    assert!(reloaded.has_private_key());
    assert_signed_by(&reloaded, &root);
    assert_eq!(
        std::fs::read_dir(temp.path().join("personal")).unwrap().count(),
        1
    );
}

#[test]
fn test_destroyed_root_invalidates_persisted_leaves() {
    let temp = tempfile::tempdir().unwrap();
    let config =
        CertificateManagerConfig::new(ISSUER, ROOT_NAME).with_store_personal_certificates(true);

    let first = CertificateManager::with_directory(config.clone(), temp.path()).unwrap();
    let old_leaf = first.generate_certificate("example.com").unwrap();
    let old_root = first.root_certificate().unwrap();
    assert!(first.destroy_trusted_root_certificate());
    drop(first);

    // next process generates a new CA key; the old leaf no longer chains
    let second = CertificateManager::with_directory(config, temp.path()).unwrap();
    let leaf = second.generate_certificate("example.com").unwrap();
    let root = second.root_certificate().unwrap();

    assert_ne!(root.public_key_raw(), old_root.public_key_raw());
    assert!(!leaf.same_as(&old_leaf));
    assert_signed_by(&leaf, &root);

    let stored = second
        .find_certificates("CN=example.com, O=EavesdropCA")
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert!(stored[0].same_as(&leaf));
}

#[test]
fn test_leaf_from_another_ca_is_replaced() {
    let fx = fixture(true);

    let donor = CertificateManager::in_memory(CertificateManagerConfig::new(ISSUER, ROOT_NAME))
        .unwrap();
    let foreign = donor.generate_certificate("stale.test").unwrap();
    assert_eq!(foreign.issuer(), ROOT_DN);
    seed(&fx.personal, &foreign);

    let leaf = fx.manager.generate_certificate("stale.test").unwrap();
    let root = fx.manager.root_certificate().unwrap();

    assert!(!leaf.same_as(&foreign));
    assert_signed_by(&leaf, &root);
    assert_eq!(fx.personal.count(), 1);
}

#[test]
fn test_keyless_stored_leaf_is_reissued() {
    let fx = fixture(true);

    let original = fx.manager.generate_certificate("keyless.test").unwrap();
    let public_only = Certificate::from_der(original.certificate_der(), None).unwrap();

    fx.personal.open(OpenMode::ReadWrite).unwrap();
    fx.personal.remove(&[(*original).clone()]).unwrap();
    fx.personal.add(&public_only).unwrap();
    fx.personal.close().unwrap();
    fx.manager
        .cache()
        .remove(StoreLocation::Personal, "keyless.test");

    let leaf = fx.manager.generate_certificate("keyless.test").unwrap();

    assert!(leaf.has_private_key());
    assert!(leaf.has_matching_private_key());
    assert_ne!(leaf.serial_number(), original.serial_number());
    assert_signed_by(&leaf, &fx.manager.root_certificate().unwrap());
    assert_eq!(fx.personal.count(), 1);
}

#[test]
fn test_root_name_never_yields_the_ca() {
    let config = CertificateManagerConfig::new(ISSUER, "eavesdrop.local");
    let manager = CertificateManager::in_memory(config).unwrap();

    assert!(manager.create_trusted_root_certificate());
    assert!(manager.generate_certificate("eavesdrop.local").is_none());
    assert!(matches!(
        manager.try_generate_certificate("eavesdrop.local"),
        Err(CertError::InvalidName(_))
    ));

    let leaf = manager.generate_certificate("www.eavesdrop.local").unwrap();
    let root = manager.root_certificate().unwrap();
    assert!(!leaf.is_ca());
    assert_ne!(leaf.public_key_raw(), root.public_key_raw());
    assert!(root.is_ca());
}

#[test]
fn test_root_replaced_under_held_key_is_refused() {
    let temp = tempfile::tempdir().unwrap();
    let config = CertificateManagerConfig::new(ISSUER, ROOT_NAME);

    let first = CertificateManager::with_directory(config.clone(), temp.path()).unwrap();
    first.root_certificate().unwrap();
    assert!(first.destroy_trusted_root_certificate());

    // another process installs a root with a different key
    let second = CertificateManager::with_directory(config, temp.path()).unwrap();
    let replacement = second.root_certificate().unwrap();

    assert!(matches!(
        first.root_certificate(),
        Err(CertError::KeyConversion(_))
    ));
    assert!(matches!(
        first.try_generate_certificate("after.test"),
        Err(CertError::KeyConversion(_))
    ));
    assert!(!first.export_trusted_root_certificate(temp.path().join("root.cer")));

    let leaf = second.generate_certificate("after.test").unwrap();
    assert_signed_by(&leaf, &replacement);
}
