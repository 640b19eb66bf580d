// Sigvault — Envelope Cipher
//
// Two-layer encryption of exported key material for durable storage:
//
//   1. A fresh 256-bit content key encrypts the key bytes (AES-256-GCM, 96-bit
//      nonce, 128-bit tag).
//   2. A `KeyWrapStrategy` encrypts the content key: either the boundary's
//      device wrap key, or a PBKDF2-HMAC-SHA-256 key derived from a password.
//
// Both layers authenticate the owning signer id, the key kind, and the public
// key as associated data. `open` takes the id of the row being read, so an
// envelope copied onto another signer's row does not open, and neither does
// one whose recorded public key was rewritten. Every failure to open an
// envelope is `AuthenticationFailed`; no partial plaintext escapes.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use super::EnclaveError;
use crate::entropy::random_bytes;

// ─── Constants ───────────────────────────────────────────────────────────────

pub const CONTENT_KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const SALT_LEN: usize = 16;

/// Lowest PBKDF2 iteration count accepted for sealing or opening.
pub const MIN_PBKDF2_ITERATIONS: u32 = 100_000;

// ─── Wrap Secrets ────────────────────────────────────────────────────────────

/// Which strategy protects an envelope's content key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WrapKind {
    Device,
    Password,
}

/// The secret a caller supplies to persist or unlock a signer.
#[derive(Clone)]
pub enum WrapSecret {
    /// Use the boundary's non-extractable device key.
    Device,
    Password(Zeroizing<String>),
}

impl WrapSecret {
    pub fn password(password: impl Into<String>) -> Self {
        WrapSecret::Password(Zeroizing::new(password.into()))
    }

    pub fn kind(&self) -> WrapKind {
        match self {
            WrapSecret::Device => WrapKind::Device,
            WrapSecret::Password(_) => WrapKind::Password,
        }
    }
}

impl std::fmt::Debug for WrapSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WrapSecret::Device => f.write_str("Device"),
            WrapSecret::Password(_) => f.write_str("Password([REDACTED])"),
        }
    }
}

// ─── Envelope Records ────────────────────────────────────────────────────────

/// What the envelope plaintext is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SealedKeyKind {
    /// A raw P-256 private scalar.
    Software,
    /// A platform-authenticator credential id (the private key stays on the device).
    Authenticator,
}

/// The content key, encrypted by a wrap strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedKey {
    pub kind: WrapKind,
    #[serde(with = "b64")]
    pub nonce: Vec<u8>,
    /// PBKDF2 salt, password wraps only.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "b64_opt")]
    pub salt: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iterations: Option<u32>,
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
}

/// One persisted signer's key material, as stored in the durable store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedKeyEnvelope {
    pub owner_id: String,
    pub key_kind: SealedKeyKind,
    #[serde(with = "b64")]
    pub public_key: Vec<u8>,
    #[serde(with = "b64")]
    pub iv: Vec<u8>,
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    pub wrap: WrappedKey,
}

// ─── Wrap Strategies ─────────────────────────────────────────────────────────

/// Protects and recovers a content key.
pub trait KeyWrapStrategy: Send + Sync {
    fn kind(&self) -> WrapKind;

    fn wrap(&self, content_key: &[u8], aad: &[u8]) -> Result<WrappedKey, EnclaveError>;

    fn unwrap(&self, wrapped: &WrappedKey, aad: &[u8])
        -> Result<Zeroizing<Vec<u8>>, EnclaveError>;
}

/// Wraps under a key derived from a password with PBKDF2-HMAC-SHA-256.
pub struct PasswordWrap {
    password: Zeroizing<String>,
    iterations: u32,
}

impl PasswordWrap {
    pub fn new(password: Zeroizing<String>, iterations: u32) -> Result<Self, EnclaveError> {
        if iterations < MIN_PBKDF2_ITERATIONS {
            return Err(EnclaveError::Cipher(format!(
                "PBKDF2 iterations {} below minimum {}",
                iterations, MIN_PBKDF2_ITERATIONS
            )));
        }
        Ok(Self {
            password,
            iterations,
        })
    }

    fn derive(&self, salt: &[u8], iterations: u32) -> Zeroizing<[u8; 32]> {
        let mut key = Zeroizing::new([0u8; 32]);
        pbkdf2::pbkdf2_hmac::<Sha256>(self.password.as_bytes(), salt, iterations, &mut *key);
        key
    }
}

impl KeyWrapStrategy for PasswordWrap {
    fn kind(&self) -> WrapKind {
        WrapKind::Password
    }

    fn wrap(&self, content_key: &[u8], aad: &[u8]) -> Result<WrappedKey, EnclaveError> {
        let salt: [u8; SALT_LEN] = random_bytes();
        let key = self.derive(&salt, self.iterations);
        let (nonce, ciphertext) = aead_seal(&*key, content_key, aad)?;

        Ok(WrappedKey {
            kind: WrapKind::Password,
            nonce,
            salt: Some(salt.to_vec()),
            iterations: Some(self.iterations),
            ciphertext,
        })
    }

    fn unwrap(
        &self,
        wrapped: &WrappedKey,
        aad: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, EnclaveError> {
        let salt = wrapped
            .salt
            .as_deref()
            .filter(|s| s.len() == SALT_LEN)
            .ok_or(EnclaveError::AuthenticationFailed)?;
        let iterations = wrapped
            .iterations
            .filter(|i| *i >= MIN_PBKDF2_ITERATIONS)
            .ok_or(EnclaveError::AuthenticationFailed)?;

        let key = self.derive(salt, iterations);
        aead_open(&*key, &wrapped.nonce, &wrapped.ciphertext, aad)
    }
}

/// Wraps under the boundary's device key. The key never leaves the boundary.
pub struct DeviceWrap {
    key: Zeroizing<Vec<u8>>,
}

impl DeviceWrap {
    pub fn new(key: Zeroizing<Vec<u8>>) -> Result<Self, EnclaveError> {
        if key.len() != CONTENT_KEY_LEN {
            return Err(EnclaveError::Cipher(format!(
                "device wrap key must be {} bytes",
                CONTENT_KEY_LEN
            )));
        }
        Ok(Self { key })
    }
}

impl std::fmt::Debug for DeviceWrap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceWrap").field("key", &"[REDACTED]").finish()
    }
}

impl KeyWrapStrategy for DeviceWrap {
    fn kind(&self) -> WrapKind {
        WrapKind::Device
    }

    fn wrap(&self, content_key: &[u8], aad: &[u8]) -> Result<WrappedKey, EnclaveError> {
        let (nonce, ciphertext) = aead_seal(&self.key, content_key, aad)?;
        Ok(WrappedKey {
            kind: WrapKind::Device,
            nonce,
            salt: None,
            iterations: None,
            ciphertext,
        })
    }

    fn unwrap(
        &self,
        wrapped: &WrappedKey,
        aad: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, EnclaveError> {
        aead_open(&self.key, &wrapped.nonce, &wrapped.ciphertext, aad)
    }
}

// ─── Envelope Cipher ─────────────────────────────────────────────────────────

/// Seals key material into envelopes and opens them again, under one strategy.
pub struct EnvelopeCipher<'a> {
    strategy: &'a dyn KeyWrapStrategy,
}

impl<'a> EnvelopeCipher<'a> {
    pub fn new(strategy: &'a dyn KeyWrapStrategy) -> Self {
        Self { strategy }
    }

    pub fn seal(
        &self,
        owner_id: &str,
        key_kind: SealedKeyKind,
        public_key: &[u8],
        plaintext: &[u8],
    ) -> Result<EncryptedKeyEnvelope, EnclaveError> {
        let content_key = Zeroizing::new(random_bytes::<CONTENT_KEY_LEN>());
        let aad = envelope_aad(owner_id, key_kind, public_key);

        let (iv, ciphertext) = aead_seal(&*content_key, plaintext, &aad)?;
        let wrap = self.strategy.wrap(&*content_key, &aad)?;

        Ok(EncryptedKeyEnvelope {
            owner_id: owner_id.to_string(),
            key_kind,
            public_key: public_key.to_vec(),
            iv,
            ciphertext,
            wrap,
        })
    }

    /// Recover the plaintext of the envelope stored for `owner_id`, or fail
    /// with `AuthenticationFailed`.
    pub fn open(
        &self,
        owner_id: &str,
        envelope: &EncryptedKeyEnvelope,
    ) -> Result<Zeroizing<Vec<u8>>, EnclaveError> {
        if envelope.owner_id != owner_id || envelope.wrap.kind != self.strategy.kind() {
            return Err(EnclaveError::AuthenticationFailed);
        }

        let aad = envelope_aad(owner_id, envelope.key_kind, &envelope.public_key);
        let content_key = self.strategy.unwrap(&envelope.wrap, &aad)?;
        if content_key.len() != CONTENT_KEY_LEN {
            return Err(EnclaveError::AuthenticationFailed);
        }

        aead_open(&content_key, &envelope.iv, &envelope.ciphertext, &aad)
    }
}

/// `len(owner_id) ‖ owner_id ‖ kind ‖ public_key`
fn envelope_aad(owner_id: &str, key_kind: SealedKeyKind, public_key: &[u8]) -> Vec<u8> {
    let mut aad = Vec::with_capacity(4 + owner_id.len() + 1 + public_key.len());
    aad.extend_from_slice(&(owner_id.len() as u32).to_be_bytes());
    aad.extend_from_slice(owner_id.as_bytes());
    aad.push(match key_kind {
        SealedKeyKind::Software => 0,
        SealedKeyKind::Authenticator => 1,
    });
    aad.extend_from_slice(public_key);
    aad
}

// ─── AEAD ────────────────────────────────────────────────────────────────────

fn aead_seal(key: &[u8], plaintext: &[u8], aad: &[u8]) -> Result<(Vec<u8>, Vec<u8>), EnclaveError> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| EnclaveError::Cipher(format!("invalid AES-256 key: {}", e)))?;
    let nonce: [u8; NONCE_LEN] = random_bytes();

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad })
        .map_err(|e| EnclaveError::Cipher(format!("encryption failed: {}", e)))?;

    Ok((nonce.to_vec(), ciphertext))
}

fn aead_open(
    key: &[u8],
    nonce: &[u8],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, EnclaveError> {
    if nonce.len() != NONCE_LEN {
        return Err(EnclaveError::AuthenticationFailed);
    }
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EnclaveError::AuthenticationFailed)?;

    cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map(Zeroizing::new)
        .map_err(|_| EnclaveError::AuthenticationFailed)
}

// ─── Serde helpers ───────────────────────────────────────────────────────────

mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

mod b64_opt {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => serializer.serialize_some(&STANDARD.encode(b)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|encoded| STANDARD.decode(encoded.as_bytes()))
            .transpose()
            .map_err(serde::de::Error::custom)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
