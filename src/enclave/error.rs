// Sigvault — Enclave error types
//
// These are the only errors that cross the custody boundary, so every variant
// is `Clone` and carries text, never key material.

use thiserror::Error;

use crate::codec::CodecError;
use crate::store::StoreError;

#[derive(Debug, Clone, Error)]
pub enum EnclaveError {
    #[error("Keyring error: {0}")]
    Keyring(String),

    #[error("Key derivation error: {0}")]
    Derivation(String),

    #[error("Device master secret not found — run `sigvault init` first")]
    MasterSecretNotFound,

    #[error("Entropy error: generated secret has insufficient entropy ({0} bytes, expected {1})")]
    InsufficientEntropy(usize, usize),

    #[error("Signer not found: {0}")]
    SignerNotFound(String),

    #[error("Signer already has key material: {0}")]
    AlreadyExists(String),

    #[error("Credential creation failed: {0}")]
    CredentialCreationFailed(String),

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("Authentication failed: envelope could not be opened")]
    AuthenticationFailed,

    #[error("{0}")]
    MalformedSignature(#[from] CodecError),

    #[error("Cipher error: {0}")]
    Cipher(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Custody boundary is not running")]
    Unavailable,

    #[error("Custody boundary answered {0} with the wrong reply")]
    UnexpectedReply(&'static str),
}

impl From<StoreError> for EnclaveError {
    fn from(e: StoreError) -> Self {
        EnclaveError::Storage(e.to_string())
    }
}
