//! Private key conversion between store and signing representations
//!
//! Stores persist private keys as DER (`PrivateKeyDer`). Key generation and
//! validation work on [`RsaPrivateKey`], which carries the modulus, both
//! exponents, the primes and the precomputed CRT values. Signing goes through
//! an rcgen [`KeyPair`]. Every conversion failure is a
//! [`CertError::KeyConversion`]: without the key there is nothing to sign with.

use rcgen::KeyPair;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};

use crate::error::CertError;

/// Smallest modulus accepted for generated or loaded keys
pub const MIN_RSA_BITS: usize = 2048;

/// Generate a fresh RSA key pair
pub fn generate_rsa_key(bits: usize) -> Result<RsaPrivateKey, CertError> {
    if bits < MIN_RSA_BITS {
        return Err(CertError::Generation(format!(
            "RSA modulus of {} bits is below the {} bit minimum",
            bits, MIN_RSA_BITS
        )));
    }

    let mut rng = rand::thread_rng();
    RsaPrivateKey::new(&mut rng, bits)
        .map_err(|e| CertError::Generation(format!("RSA {} bit key generation: {}", bits, e)))
}

/// Decode a store-native private key into its RSA components
///
/// Both PKCS#8 and PKCS#1 encodings are accepted. Anything else (EC keys,
/// SEC1, truncated data) is rejected.
pub fn rsa_from_store(key: &PrivateKeyDer<'_>) -> Result<RsaPrivateKey, CertError> {
    let rsa_key = match key {
        PrivateKeyDer::Pkcs8(der) => RsaPrivateKey::from_pkcs8_der(der.secret_pkcs8_der())
            .map_err(|e| CertError::KeyConversion(format!("PKCS#8 RSA key: {}", e)))?,
        PrivateKeyDer::Pkcs1(der) => RsaPrivateKey::from_pkcs1_der(der.secret_pkcs1_der())
            .map_err(|e| CertError::KeyConversion(format!("PKCS#1 RSA key: {}", e)))?,
        _ => {
            return Err(CertError::KeyConversion(
                "unsupported private key encoding, expected RSA".to_string(),
            ))
        }
    };

    rsa_key
        .validate()
        .map_err(|e| CertError::KeyConversion(format!("inconsistent RSA key: {}", e)))?;

    let bits = rsa_key.size() * 8;
    if bits < MIN_RSA_BITS {
        return Err(CertError::KeyConversion(format!(
            "RSA modulus of {} bits is below the {} bit minimum",
            bits, MIN_RSA_BITS
        )));
    }

    Ok(rsa_key)
}

/// Encode an RSA key as PKCS#8 DER for storage alongside its certificate
pub fn rsa_to_store(key: &RsaPrivateKey) -> Result<PrivatePkcs8KeyDer<'static>, CertError> {
    let document = key
        .to_pkcs8_der()
        .map_err(|e| CertError::KeyConversion(format!("PKCS#8 encoding: {}", e)))?;
    Ok(PrivatePkcs8KeyDer::from(document.as_bytes().to_vec()))
}

/// Build an rcgen signing key (SHA-256 with RSA) from RSA components
pub fn signing_key_pair(key: &RsaPrivateKey) -> Result<KeyPair, CertError> {
    let pem = key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| CertError::KeyConversion(format!("PKCS#8 encoding: {}", e)))?;
    KeyPair::from_pem_and_sign_algo(&pem, &rcgen::PKCS_RSA_SHA256)
        .map_err(|e| CertError::KeyConversion(format!("signing key: {}", e)))
}

/// Raw subjectPublicKey bits of a store-native private key
pub fn public_key_of(key: &PrivateKeyDer<'_>) -> Result<Vec<u8>, CertError> {
    let key_pair = signing_key_pair(&rsa_from_store(key)?)?;
    Ok(key_pair.public_key_raw().to_vec())
}
