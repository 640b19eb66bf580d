// Sigvault — Device Master Key Provider
//
// Manages the lifecycle of the device master secret behind the boundary's
// non-extractable wrap key. The master secret is stored in the platform's
// native keyring and never exposed in logs, debug output, or outside the
// custody boundary.
//
// Flow:
//   1. `get_or_create_master_secret()` — retrieves from keyring, or generates + stores a new one
//   2. `derive_wrap_key()` — uses Argon2id to derive the 32-byte AES-256 wrap key from it
//   3. The wrap key stays cached inside the boundary and is zeroized when the boundary stops

use std::sync::Mutex;

use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::EnclaveError;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Service name used to identify sigvault entries in the platform keyring.
const KEYRING_SERVICE: &str = "sigvault-custody-boundary";

/// Username for the keyring entry (identifies the master secret).
const KEYRING_USER: &str = "device-master-secret";

/// Length of the randomly generated master secret in bytes (256-bit entropy).
const MASTER_SECRET_LEN: usize = 32;

/// Length of the derived wrap key in bytes (AES-256).
const DERIVED_KEY_LEN: usize = 32;

// Argon2id parameters: m=65536 (64 MiB), t=3, p=4
const ARGON2_M_COST: u32 = 65536;
const ARGON2_T_COST: u32 = 3;
const ARGON2_P_COST: u32 = 4;

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over device master key management, enabling the platform
/// keyring in production and an in-memory secret for tests and keyring-less hosts.
pub trait MasterKeyProvider: Send + Sync {
    /// Retrieve the master secret, generating and storing one on first use.
    fn get_or_create_master_secret(&self) -> Result<Zeroizing<Vec<u8>>, EnclaveError>;

    /// Check if a master secret already exists.
    fn has_master_secret(&self) -> Result<bool, EnclaveError>;

    /// Delete the master secret.
    /// WARNING: every device-wrapped envelope becomes unreadable.
    fn delete_master_secret(&self) -> Result<(), EnclaveError>;

    /// Per-installation salt input for the wrap key derivation.
    fn salt_context(&self) -> (&str, &str);

    /// Derive the boundary wrap key from the master secret using Argon2id.
    fn derive_wrap_key(&self, master_secret: &[u8]) -> Result<Zeroizing<Vec<u8>>, EnclaveError> {
        let (service, user) = self.salt_context();
        argon2id_wrap_key(master_secret, &build_salt(service, user))
    }
}

/// Salt = SHA-256(service || "::" || user). The same master secret always
/// derives the same wrap key on this installation.
fn build_salt(service: &str, user: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(service.as_bytes());
    hasher.update(b"::");
    hasher.update(user.as_bytes());
    hasher.finalize().to_vec()
}

fn argon2id_wrap_key(master_secret: &[u8], salt: &[u8]) -> Result<Zeroizing<Vec<u8>>, EnclaveError> {
    let params = Params::new(ARGON2_M_COST, ARGON2_T_COST, ARGON2_P_COST, Some(DERIVED_KEY_LEN))
        .map_err(|e| EnclaveError::Derivation(format!("invalid Argon2 params: {}", e)))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut derived_key = Zeroizing::new(vec![0u8; DERIVED_KEY_LEN]);
    argon2
        .hash_password_into(master_secret, salt, &mut derived_key)
        .map_err(|e| EnclaveError::Derivation(format!("Argon2id hash failed: {}", e)))?;

    Ok(derived_key)
}

/// Generate a cryptographically secure random master secret.
fn generate_master_secret() -> Result<Zeroizing<Vec<u8>>, EnclaveError> {
    let mut secret = Zeroizing::new(vec![0u8; MASTER_SECRET_LEN]);
    rand::rng().fill_bytes(&mut secret);

    if secret.len() != MASTER_SECRET_LEN {
        return Err(EnclaveError::InsufficientEntropy(
            secret.len(),
            MASTER_SECRET_LEN,
        ));
    }

    Ok(secret)
}

// ─── Platform Implementation ─────────────────────────────────────────────────

/// Production implementation using the `keyring` crate.
/// Dispatches to:
///   - Linux: kernel keyutils
///   - macOS: Security.framework Keychain
///   - Windows: Windows Credential Manager
pub struct KeyringProvider {
    service: String,
    user: String,
}

impl KeyringProvider {
    pub fn new() -> Self {
        Self {
            service: KEYRING_SERVICE.to_string(),
            user: KEYRING_USER.to_string(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, EnclaveError> {
        keyring::Entry::new(&self.service, &self.user)
            .map_err(|e| EnclaveError::Keyring(format!("failed to create keyring entry: {}", e)))
    }
}

impl Default for KeyringProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MasterKeyProvider for KeyringProvider {
    fn get_or_create_master_secret(&self) -> Result<Zeroizing<Vec<u8>>, EnclaveError> {
        let entry = self.entry()?;

        match entry.get_secret() {
            Ok(secret) => {
                tracing::debug!("Retrieved device master secret from keyring");
                Ok(Zeroizing::new(secret))
            }
            Err(keyring::Error::NoEntry) => {
                tracing::info!("No device master secret found — generating new one");
                let secret = generate_master_secret()?;
                entry.set_secret(&secret).map_err(|e| {
                    EnclaveError::Keyring(format!("failed to store master secret: {}", e))
                })?;
                tracing::info!("Device master secret stored in platform keyring");
                Ok(secret)
            }
            Err(e) => Err(EnclaveError::Keyring(format!(
                "failed to retrieve master secret: {}",
                e
            ))),
        }
    }

    fn has_master_secret(&self) -> Result<bool, EnclaveError> {
        let entry = self.entry()?;
        match entry.get_secret() {
            Ok(_) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(EnclaveError::Keyring(format!(
                "failed to check master secret: {}",
                e
            ))),
        }
    }

    fn delete_master_secret(&self) -> Result<(), EnclaveError> {
        let entry = self.entry()?;
        match entry.delete_credential() {
            Ok(()) => {
                tracing::warn!("Device master secret deleted — device-wrapped envelopes are now unreadable");
                Ok(())
            }
            Err(keyring::Error::NoEntry) => {
                tracing::debug!("No device master secret to delete");
                Ok(())
            }
            Err(e) => Err(EnclaveError::Keyring(format!(
                "failed to delete master secret: {}",
                e
            ))),
        }
    }

    fn salt_context(&self) -> (&str, &str) {
        (&self.service, &self.user)
    }
}

// ─── In-Memory Implementation ────────────────────────────────────────────────

/// Holds the master secret in process memory. Device-wrapped envelopes sealed
/// under it are readable only for the lifetime of this provider.
pub struct MemoryKeyProvider {
    secret: Mutex<Option<Zeroizing<Vec<u8>>>>,
}

impl MemoryKeyProvider {
    pub fn new() -> Self {
        Self {
            secret: Mutex::new(None),
        }
    }

    /// Create a provider pre-loaded with a known secret.
    pub fn with_secret(secret: Vec<u8>) -> Self {
        Self {
            secret: Mutex::new(Some(Zeroizing::new(secret))),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<Zeroizing<Vec<u8>>>>, EnclaveError> {
        self.secret
            .lock()
            .map_err(|_| EnclaveError::Keyring("in-memory keyring poisoned".to_string()))
    }
}

impl Default for MemoryKeyProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MasterKeyProvider for MemoryKeyProvider {
    fn get_or_create_master_secret(&self) -> Result<Zeroizing<Vec<u8>>, EnclaveError> {
        let mut guard = self.lock()?;
        if let Some(ref s) = *guard {
            return Ok(s.clone());
        }
        let secret = generate_master_secret()?;
        *guard = Some(secret.clone());
        Ok(secret)
    }

    fn has_master_secret(&self) -> Result<bool, EnclaveError> {
        Ok(self.lock()?.is_some())
    }

    fn delete_master_secret(&self) -> Result<(), EnclaveError> {
        *self.lock()? = None;
        Ok(())
    }

    fn salt_context(&self) -> (&str, &str) {
        ("sigvault-memory", "device-master-secret")
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
