// Sigvault — Platform Authenticator Contract
//
// Mirrors the two calls a platform authenticator exposes: create a device-bound
// ES256 credential, and produce an assertion over a challenge with it. The
// boundary bounds both calls with its own timeout; implementations only need
// to honour `timeout` as a hint to the user prompt.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::AuthenticatorError;

/// COSE algorithm identifier for ECDSA P-256 with SHA-256.
pub const ES256: i64 = -7;

/// Relying party the credentials are scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelyingParty {
    pub id: String,
    pub name: String,
}

impl Default for RelyingParty {
    fn default() -> Self {
        Self {
            id: "localhost".to_string(),
            name: "sigvault".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserVerification {
    #[default]
    Required,
    Preferred,
    Discouraged,
}

#[derive(Debug, Clone)]
pub struct CredentialRequest {
    pub challenge: [u8; 32],
    pub relying_party: RelyingParty,
    pub user_id: [u8; 16],
    pub user_name: String,
    pub algorithm: i64,
    pub user_verification: UserVerification,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CreatedCredential {
    pub credential_id: Vec<u8>,
    /// SubjectPublicKeyInfo DER.
    pub public_key_spki: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct AssertionRequest {
    pub challenge: Vec<u8>,
    pub relying_party_id: String,
    pub allowed_credential_id: Vec<u8>,
    pub user_verification: UserVerification,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct Assertion {
    pub signature_der: Vec<u8>,
    pub authenticator_data: Vec<u8>,
    pub client_data_json_hash: [u8; 32],
}

impl Assertion {
    /// The bytes the authenticator actually signed:
    /// `authenticatorData ‖ SHA-256(clientDataJSON)`.
    pub fn signed_data(&self) -> Vec<u8> {
        let mut data =
            Vec::with_capacity(self.authenticator_data.len() + self.client_data_json_hash.len());
        data.extend_from_slice(&self.authenticator_data);
        data.extend_from_slice(&self.client_data_json_hash);
        data
    }
}

/// A device authenticator that owns its private keys.
#[async_trait]
pub trait PlatformAuthenticator: Send + Sync {
    /// Whether a platform authenticator can be reached at all.
    fn is_available(&self) -> bool;

    async fn create_credential(
        &self,
        request: CredentialRequest,
    ) -> Result<CreatedCredential, AuthenticatorError>;

    async fn get_assertion(&self, request: AssertionRequest)
        -> Result<Assertion, AuthenticatorError>;
}

/// Stand-in for hosts with no platform authenticator.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableAuthenticator;

#[async_trait]
impl PlatformAuthenticator for UnavailableAuthenticator {
    fn is_available(&self) -> bool {
        false
    }

    async fn create_credential(
        &self,
        _request: CredentialRequest,
    ) -> Result<CreatedCredential, AuthenticatorError> {
        Err(AuthenticatorError::Unavailable)
    }

    async fn get_assertion(
        &self,
        _request: AssertionRequest,
    ) -> Result<Assertion, AuthenticatorError> {
        Err(AuthenticatorError::Unavailable)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
