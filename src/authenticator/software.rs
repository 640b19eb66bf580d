// Sigvault — Software Key Primitive
//
// P-256 key pair generated in process memory, for signers that are not backed
// by a platform authenticator. The private scalar only ever lives inside the
// custody boundary (or inside an envelope as ciphertext).

use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::pkcs8::EncodePublicKey;
use zeroize::Zeroizing;

use super::AuthenticatorError;
use crate::entropy::generate_signing_key;

/// A software signing key and its encoded public half.
pub struct SoftwareKeyPair {
    signing_key: SigningKey,
    public_key_spki: Vec<u8>,
}

impl SoftwareKeyPair {
    /// `GenerateKeyPair(P-256)`.
    pub fn generate() -> Result<Self, AuthenticatorError> {
        Self::from_signing_key(generate_signing_key())
    }

    /// Rebuild a key pair from exported scalar bytes.
    pub fn from_private_bytes(bytes: &[u8]) -> Result<Self, AuthenticatorError> {
        let signing_key = SigningKey::from_slice(bytes)
            .map_err(|e| AuthenticatorError::Encoding(format!("invalid private scalar: {}", e)))?;
        Self::from_signing_key(signing_key)
    }

    fn from_signing_key(signing_key: SigningKey) -> Result<Self, AuthenticatorError> {
        let public_key_spki = encode_public_key(signing_key.verifying_key())?;
        Ok(Self {
            signing_key,
            public_key_spki,
        })
    }

    pub fn public_key_spki(&self) -> &[u8] {
        &self.public_key_spki
    }

    /// Raw scalar bytes, for sealing into an envelope only.
    pub fn export_private_bytes(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.signing_key.to_bytes().to_vec())
    }

    /// `SignDigest(handle, payload)`: SHA-256 + ECDSA, DER-encoded.
    pub fn sign(&self, payload: &[u8]) -> Vec<u8> {
        sign_der(&self.signing_key, payload)
    }
}

impl std::fmt::Debug for SoftwareKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareKeyPair")
            .field("signing_key", &"[REDACTED]")
            .field("public_key_spki_len", &self.public_key_spki.len())
            .finish()
    }
}

/// ECDSA-sign `payload` (hashed with SHA-256) and return the DER encoding.
pub fn sign_der(key: &SigningKey, payload: &[u8]) -> Vec<u8> {
    let signature: Signature = key.sign(payload);
    signature.to_der().as_bytes().to_vec()
}

/// SubjectPublicKeyInfo DER for a P-256 verifying key.
pub fn encode_public_key(key: &VerifyingKey) -> Result<Vec<u8>, AuthenticatorError> {
    key.to_public_key_der()
        .map(|doc| doc.as_bytes().to_vec())
        .map_err(|e| AuthenticatorError::Encoding(format!("SPKI encoding failed: {}", e)))
}

// ─── Tests ───────────────────────────────────────────────────────────────────
