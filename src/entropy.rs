// Sigvault — Randomness helpers
//
// All nonces, salts, content keys, credential ids, and software private
// scalars come from the thread-local CSPRNG through here.

use p256::ecdsa::SigningKey;
use rand::RngCore;

/// Fill a fixed-size array from the CSPRNG.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::rng().fill_bytes(&mut bytes);
    bytes
}

/// Generate a fresh P-256 signing key.
///
/// Candidate scalars of zero or above the group order are rejected and drawn
/// again; the chance of that happening is about 2^-32.
pub fn generate_signing_key() -> SigningKey {
    loop {
        let mut candidate = zeroize::Zeroizing::new([0u8; 32]);
        rand::rng().fill_bytes(&mut *candidate);
        if let Ok(key) = SigningKey::from_slice(&*candidate) {
            return key;
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
