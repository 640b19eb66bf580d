// Sigvault — Fixed-width P-256 verification
//
// Replays a signature produced by the vault: `data` is exactly what was signed
// (the caller's message for software signers, `authenticatorData ‖
// SHA-256(clientDataJSON)` for authenticator signers), hashed with SHA-256 by
// the ES256 verifier.

use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};
use p256::pkcs8::DecodePublicKey;

use super::der::P256_COORDINATE_WIDTH;
use super::CodecError;

/// Verify a fixed-width `r ‖ s` signature against a SubjectPublicKeyInfo DER key.
///
/// Returns `Ok(false)` for a well-formed signature that does not verify, and an
/// error when the key or the signature encoding is unusable.
pub fn verify_p256(public_key_spki: &[u8], signature: &[u8], data: &[u8]) -> Result<bool, CodecError> {
    let key = VerifyingKey::from_public_key_der(public_key_spki)
        .map_err(|e| CodecError::PublicKey(e.to_string()))?;

    if signature.len() != 2 * P256_COORDINATE_WIDTH {
        return Err(CodecError::Width {
            component: "signature",
            len: signature.len(),
            width: 2 * P256_COORDINATE_WIDTH,
        });
    }

    // Zero or out-of-range scalars can never verify.
    let Ok(signature) = Signature::from_slice(signature) else {
        return Ok(false);
    };

    Ok(key.verify(data, &signature).is_ok())
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::signature::Signer;
    use p256::ecdsa::SigningKey;
    use p256::pkcs8::EncodePublicKey;

    fn keypair() -> (SigningKey, Vec<u8>) {
        let key = SigningKey::from_slice(&[3u8; 32]).unwrap();
        let spki = key
            .verifying_key()
            .to_public_key_der()
            .unwrap()
            .as_bytes()
            .to_vec();
        (key, spki)
    }

    #[test]
    fn test_valid_signature_verifies() {
        let (key, spki) = keypair();
        let signature: Signature = key.sign(b"hello");
        assert!(verify_p256(&spki, &signature.to_bytes(), b"hello").unwrap());
    }

    #[test]
    fn test_tampered_data_does_not_verify() {
        let (key, spki) = keypair();
        let signature: Signature = key.sign(b"hello");
        assert!(!verify_p256(&spki, &signature.to_bytes(), b"hellO").unwrap());
    }

    #[test]
    fn test_zero_signature_does_not_verify() {
        let (_, spki) = keypair();
        assert!(!verify_p256(&spki, &[0u8; 64], b"hello").unwrap());
    }

    #[test]
    fn test_wrong_length_signature_is_an_error() {
        let (_, spki) = keypair();
        assert!(matches!(
            verify_p256(&spki, &[1u8; 63], b"hello"),
            Err(CodecError::Width { len: 63, .. })
        ));
    }

    #[test]
    fn test_garbage_public_key_is_an_error() {
        assert!(matches!(
            verify_p256(b"not a key", &[1u8; 64], b"hello"),
            Err(CodecError::PublicKey(_))
        ));
    }
}
