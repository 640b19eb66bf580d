// Sigvault — Registry Data Models
//
// Public signer metadata. Nothing in here is secret: records hold the public
// key, a display name, the authenticator credential reference, and lifetime
// bookkeeping. Key material stays behind the custody boundary.

use std::fmt;

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::enclave::SignerBackend;

/// SubjectPublicKeyInfo DER bytes; the signer's stable external identifier.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PublicKey(Vec<u8>);

impl PublicKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Parse the standard base64 form used on the wire.
    pub fn from_base64(encoded: &str) -> Result<Self, base64::DecodeError> {
        STANDARD.decode(encoded.trim()).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_base64())
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        PublicKey::from_base64(&encoded).map_err(serde::de::Error::custom)
    }
}

/// Where a signer's key lives between operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// Live handle inside the boundary only; gone when the boundary stops.
    Ephemeral,
    /// Envelope in the durable store.
    Persisted,
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageMode::Ephemeral => f.write_str("ephemeral"),
            StorageMode::Persisted => f.write_str("persisted"),
        }
    }
}

/// Public metadata for one signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerRecord {
    /// Boundary-side key id.
    pub id: String,
    pub name: String,
    pub public_key: PublicKey,
    /// Authenticator credential id (base64url), if the key is device-bound.
    pub credential_ref: Option<String>,
    pub session_expiry: Option<DateTime<Utc>>,
    pub storage_mode: StorageMode,
    pub backend: SignerBackend,
    pub created_at: DateTime<Utc>,
}

impl SignerRecord {
    /// A record is expired from the instant its expiry is reached.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.session_expiry, Some(expiry) if expiry <= now)
    }

    pub(crate) fn encode_credential_ref(credential_id: &[u8]) -> String {
        URL_SAFE_NO_PAD.encode(credential_id)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
