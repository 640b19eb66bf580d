// Sigvault — Top-level error types
//
// The caller-facing error taxonomy. Module errors (codec, enclave, store) are
// flattened into it so that, for example, a boundary-side "signer not found"
// reaches the caller as `SignerNotFound` rather than as a nested enclave error.

use thiserror::Error;

use crate::codec::CodecError;
use crate::enclave::EnclaveError;
use crate::store::StoreError;

/// Top-level error type for all Sigvault operations.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Environment unsupported: {0}")]
    EnvironmentUnsupported(String),

    #[error("Signer not found: {0}")]
    SignerNotFound(String),

    #[error("Signer session expired: {0}")]
    SignerExpired(String),

    #[error("Signer already exists: {0}")]
    AlreadyExists(String),

    #[error("Credential creation failed: {0}")]
    CredentialCreationFailed(String),

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("Authentication failed: the supplied secret does not open this signer")]
    AuthenticationFailed,

    #[error("Malformed signature: {0}")]
    MalformedSignature(#[from] CodecError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Custody boundary unavailable: {0}")]
    BoundaryUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<EnclaveError> for VaultError {
    fn from(e: EnclaveError) -> Self {
        match e {
            EnclaveError::SignerNotFound(id) => VaultError::SignerNotFound(id),
            EnclaveError::AlreadyExists(id) => VaultError::AlreadyExists(id),
            EnclaveError::CredentialCreationFailed(reason) => {
                VaultError::CredentialCreationFailed(reason)
            }
            EnclaveError::AssertionFailed(reason) => VaultError::AssertionFailed(reason),
            EnclaveError::AuthenticationFailed => VaultError::AuthenticationFailed,
            EnclaveError::MalformedSignature(codec) => VaultError::MalformedSignature(codec),
            EnclaveError::Storage(reason) => VaultError::Storage(reason),
            EnclaveError::Unavailable => {
                VaultError::BoundaryUnavailable("boundary is not running".to_string())
            }
            EnclaveError::UnexpectedReply(command) => {
                VaultError::BoundaryUnavailable(format!("protocol violation on {}", command))
            }
            other @ (EnclaveError::Keyring(_)
            | EnclaveError::Derivation(_)
            | EnclaveError::MasterSecretNotFound
            | EnclaveError::InsufficientEntropy(..)
            | EnclaveError::Cipher(_)) => VaultError::Other(other.to_string()),
        }
    }
}

impl From<StoreError> for VaultError {
    fn from(e: StoreError) -> Self {
        VaultError::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, VaultError>;

// ─── Tests ───────────────────────────────────────────────────────────────────
