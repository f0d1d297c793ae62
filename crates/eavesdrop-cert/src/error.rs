//! Error types

use std::io;
use thiserror::Error;

/// Failures raised by a certificate store backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store is not open")]
    NotOpen,

    #[error("Store was opened read-only")]
    ReadOnly,

    #[error("Invalid store data: {0}")]
    InvalidData(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Certificate issuance errors
#[derive(Debug, Error)]
pub enum CertError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Key conversion failed: {0}")]
    KeyConversion(String),

    #[error("Certificate generation failed: {0}")]
    Generation(String),

    #[error("Certificate signing failed: {0}")]
    Signing(String),

    #[error("Invalid distinguished name: {0}")]
    InvalidName(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Certificate parse failed: {0}")]
    Parse(String),

    #[error("No CA signing key is available")]
    MissingCaKey,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl From<rcgen::Error> for CertError {
    fn from(err: rcgen::Error) -> Self {
        CertError::Generation(err.to_string())
    }
}
