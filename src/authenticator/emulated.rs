// Sigvault — Emulated Platform Authenticator
//
// An in-process authenticator that behaves like a WebAuthn platform
// authenticator on the wire: credentials are P-256 keys it keeps to itself,
// and assertions sign `authenticatorData ‖ SHA-256(clientDataJSON)`. Used for
// hosts without real hardware (demo daemon) and throughout the test suite.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use p256::ecdsa::SigningKey;
use sha2::{Digest, Sha256};

use super::platform::{
    Assertion, AssertionRequest, CreatedCredential, CredentialRequest, PlatformAuthenticator, ES256,
};
use super::software::{encode_public_key, sign_der};
use super::AuthenticatorError;
use crate::entropy::{generate_signing_key, random_bytes};

/// authenticatorData flags: user present | user verified.
const FLAGS_UP_UV: u8 = 0x05;

struct EmulatedCredential {
    relying_party_id: String,
    key: SigningKey,
}

/// Software stand-in for a device authenticator.
pub struct SoftwareAuthenticator {
    origin: String,
    credentials: Mutex<HashMap<Vec<u8>, EmulatedCredential>>,
    sign_count: AtomicU32,
    declining: AtomicBool,
}

impl SoftwareAuthenticator {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            credentials: Mutex::new(HashMap::new()),
            sign_count: AtomicU32::new(0),
            declining: AtomicBool::new(false),
        }
    }

    /// Make every subsequent prompt behave as if the user cancelled it.
    pub fn set_declining(&self, declining: bool) {
        self.declining.store(declining, Ordering::SeqCst);
    }

    pub fn credential_count(&self) -> usize {
        self.credentials.lock().map(|c| c.len()).unwrap_or(0)
    }

    fn check_consent(&self) -> Result<(), AuthenticatorError> {
        if self.declining.load(Ordering::SeqCst) {
            return Err(AuthenticatorError::NotAllowed(
                "user cancelled the prompt".to_string(),
            ));
        }
        Ok(())
    }

    fn client_data_json(&self, challenge: &[u8]) -> Vec<u8> {
        serde_json::json!({
            "type": "webauthn.get",
            "challenge": URL_SAFE_NO_PAD.encode(challenge),
            "origin": self.origin,
            "crossOrigin": false,
        })
        .to_string()
        .into_bytes()
    }
}

impl Default for SoftwareAuthenticator {
    fn default() -> Self {
        Self::new("https://localhost")
    }
}

#[async_trait]
impl PlatformAuthenticator for SoftwareAuthenticator {
    fn is_available(&self) -> bool {
        true
    }

    async fn create_credential(
        &self,
        request: CredentialRequest,
    ) -> Result<CreatedCredential, AuthenticatorError> {
        self.check_consent()?;
        if request.algorithm != ES256 {
            return Err(AuthenticatorError::NotAllowed(format!(
                "unsupported algorithm {}",
                request.algorithm
            )));
        }

        let key = generate_signing_key();
        let public_key_spki = encode_public_key(key.verifying_key())?;
        let credential_id = random_bytes::<16>().to_vec();

        let mut credentials = self
            .credentials
            .lock()
            .map_err(|_| AuthenticatorError::NotAllowed("authenticator state poisoned".into()))?;
        credentials.insert(
            credential_id.clone(),
            EmulatedCredential {
                relying_party_id: request.relying_party.id,
                key,
            },
        );

        Ok(CreatedCredential {
            credential_id,
            public_key_spki,
        })
    }

    async fn get_assertion(
        &self,
        request: AssertionRequest,
    ) -> Result<Assertion, AuthenticatorError> {
        self.check_consent()?;

        let client_data_json = self.client_data_json(&request.challenge);
        let client_data_json_hash: [u8; 32] = Sha256::digest(&client_data_json).into();

        let credentials = self
            .credentials
            .lock()
            .map_err(|_| AuthenticatorError::NotAllowed("authenticator state poisoned".into()))?;
        let credential = credentials
            .get(&request.allowed_credential_id)
            .filter(|c| c.relying_party_id == request.relying_party_id)
            .ok_or(AuthenticatorError::UnknownCredential)?;

        let count = self.sign_count.fetch_add(1, Ordering::SeqCst) + 1;
        let mut authenticator_data = Vec::with_capacity(37);
        authenticator_data.extend_from_slice(&Sha256::digest(request.relying_party_id.as_bytes()));
        authenticator_data.push(FLAGS_UP_UV);
        authenticator_data.extend_from_slice(&count.to_be_bytes());

        let mut signed = authenticator_data.clone();
        signed.extend_from_slice(&client_data_json_hash);
        let signature_der = sign_der(&credential.key, &signed);

        Ok(Assertion {
            signature_der,
            authenticator_data,
            client_data_json_hash,
        })
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
