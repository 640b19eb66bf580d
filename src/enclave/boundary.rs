// Sigvault — Key Custody Boundary
//
// The only place private key material exists in usable form. The boundary runs
// on its own task, receives `BoundaryRequest`s over a channel, handles each on
// a spawned task, and answers with a `BoundaryResponse` carrying the request's
// correlation id. Nothing it sends back contains a private key: only public
// keys, fixed-width signatures, and errors.
//
// Per signer id:
//   Absent → Generated (ephemeral, live handle in the arena)
//   Generated → Persisted (envelope in the durable store, live handle dropped)
//   Generated | Persisted → Absent (delete)
//
// Stopping the boundary drops the arena, and with it every ephemeral key.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, OnceCell};
use zeroize::Zeroizing;

use super::client::BoundaryClient;
use super::envelope::{
    DeviceWrap, EncryptedKeyEnvelope, EnvelopeCipher, KeyWrapStrategy, PasswordWrap,
    SealedKeyKind, WrapKind, WrapSecret, MIN_PBKDF2_ITERATIONS,
};
use super::keys::{KeyArena, LiveKeyHandle};
use super::protocol::{
    BoundaryCommand, BoundaryReply, BoundaryRequest, BoundaryResponse, Signature, SignerBackend,
};
use super::provider::MasterKeyProvider;
use super::EnclaveError;
use crate::authenticator::{
    Assertion, AssertionRequest, AuthenticatorError, CreatedCredential, CredentialRequest,
    PlatformAuthenticator, RelyingParty, SoftwareKeyPair, UserVerification, ES256,
};
use crate::codec::{normalize_der_signature, P256_COORDINATE_WIDTH};
use crate::entropy::random_bytes;
use crate::locks::KeyedLocks;
use crate::store::{KeyValueStore, KeyValueStoreExt, StoreOp};

/// Durable collection holding one `EncryptedKeyEnvelope` per persisted signer.
pub const ENVELOPE_COLLECTION: &str = "envelopes";

const CHANNEL_CAPACITY: usize = 256;

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BoundaryConfig {
    pub relying_party: RelyingParty,
    pub authenticator_timeout: Duration,
    pub pbkdf2_iterations: u32,
    pub coordinate_width: usize,
}

impl Default for BoundaryConfig {
    fn default() -> Self {
        Self {
            relying_party: RelyingParty::default(),
            authenticator_timeout: Duration::from_secs(60),
            pbkdf2_iterations: 310_000,
            coordinate_width: P256_COORDINATE_WIDTH,
        }
    }
}

// ─── Boundary ────────────────────────────────────────────────────────────────

pub struct CustodyBoundary {
    arena: Mutex<KeyArena>,
    durable: Arc<dyn KeyValueStore>,
    authenticator: Arc<dyn PlatformAuthenticator>,
    provider: Arc<dyn MasterKeyProvider>,
    /// Derived on first use, zeroized when the boundary is dropped.
    device_key: OnceCell<Zeroizing<Vec<u8>>>,
    locks: KeyedLocks,
    config: BoundaryConfig,
}

/// Work left to do after a handle has been consulted.
enum PendingSignature {
    /// Software key: already signed, DER.
    Der(Vec<u8>),
    /// Authenticator key: needs an assertion from the device.
    Assertion { credential_id: Vec<u8> },
}

impl CustodyBoundary {
    pub fn new(
        config: BoundaryConfig,
        durable: Arc<dyn KeyValueStore>,
        authenticator: Arc<dyn PlatformAuthenticator>,
        provider: Arc<dyn MasterKeyProvider>,
    ) -> Self {
        Self {
            arena: Mutex::new(KeyArena::new()),
            durable,
            authenticator,
            provider,
            device_key: OnceCell::new(),
            locks: KeyedLocks::new(),
            config,
        }
    }

    /// Start the boundary on its own task. The returned client is the only
    /// way to reach it; dropping the client stops the boundary.
    pub fn spawn(self) -> BoundaryClient {
        let (request_tx, request_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (response_tx, response_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (stop_tx, stop_rx) = oneshot::channel();

        tokio::spawn(serve(Arc::new(self), request_rx, response_tx, stop_rx));
        BoundaryClient::start(request_tx, response_rx, stop_tx)
    }

    async fn handle(&self, command: BoundaryCommand) -> Result<BoundaryReply, EnclaveError> {
        match command {
            BoundaryCommand::GenerateKey {
                signer_id,
                backend,
                label,
            } => self.generate_key(&signer_id, backend, &label).await,
            BoundaryCommand::GetAddress { signer_id } => self
                .get_address(&signer_id)
                .await
                .map(BoundaryReply::Address),
            BoundaryCommand::Sign {
                signer_id,
                message,
                unlock,
            } => self
                .sign(&signer_id, message, unlock.as_ref())
                .await
                .map(BoundaryReply::Signed),
            BoundaryCommand::PersistKey {
                signer_id,
                wrap,
                companion,
            } => self
                .persist_key(&signer_id, &wrap, companion)
                .await
                .map(|()| BoundaryReply::Persisted),
            BoundaryCommand::DeleteKey {
                signer_id,
                companion,
            } => self
                .delete_key(&signer_id, companion)
                .await
                .map(|()| BoundaryReply::Deleted),
        }
    }

    // ─── Commands ────────────────────────────────────────────────────────────

    async fn generate_key(
        &self,
        signer_id: &str,
        backend: SignerBackend,
        label: &str,
    ) -> Result<BoundaryReply, EnclaveError> {
        let _guard = self.locks.lock(signer_id).await;

        let live = self.arena()?.contains(signer_id);
        if live || self.durable.get(ENVELOPE_COLLECTION, signer_id)?.is_some() {
            return Err(EnclaveError::AlreadyExists(signer_id.to_string()));
        }

        let (handle, credential_ref) = match backend {
            SignerBackend::Software => {
                let pair = SoftwareKeyPair::generate()
                    .map_err(|e| EnclaveError::CredentialCreationFailed(e.to_string()))?;
                (LiveKeyHandle::Software(pair), None)
            }
            SignerBackend::Authenticator => {
                let created = self.create_credential(label).await?;
                let credential_ref = Some(created.credential_id.clone());
                (
                    LiveKeyHandle::Authenticator {
                        credential_id: created.credential_id,
                        public_key_spki: created.public_key_spki,
                    },
                    credential_ref,
                )
            }
        };

        let public_key = handle.public_key().to_vec();
        self.arena()?.insert(signer_id, handle)?;

        tracing::info!(signer_id = %signer_id, backend = %backend, "Key generated");
        Ok(BoundaryReply::Generated {
            public_key,
            credential_ref,
        })
    }

    async fn get_address(&self, signer_id: &str) -> Result<Option<Vec<u8>>, EnclaveError> {
        let live = self.arena()?.get(signer_id).map(|h| h.public_key().to_vec());
        if live.is_some() {
            return Ok(live);
        }

        let Some(envelope) = self.load_envelope(signer_id)? else {
            return Ok(None);
        };
        // A device envelope can be opened here, which authenticates its public
        // key. Password envelopes are only checked once a password unlocks them.
        if envelope.wrap.kind == WrapKind::Device {
            self.open_envelope(signer_id, &envelope, &WrapSecret::Device)
                .await?;
        }
        Ok(Some(envelope.public_key))
    }

    async fn sign(
        &self,
        signer_id: &str,
        message: Vec<u8>,
        unlock: Option<&WrapSecret>,
    ) -> Result<Signature, EnclaveError> {
        let live = {
            let arena = self.arena()?;
            arena.get(signer_id).map(|h| begin_signing(h, &message))
        };

        let pending = match live {
            Some(pending) => pending,
            None => {
                let envelope = self
                    .load_envelope(signer_id)?
                    .ok_or_else(|| EnclaveError::SignerNotFound(signer_id.to_string()))?;

                let secret = match envelope.wrap.kind {
                    WrapKind::Device => WrapSecret::Device,
                    WrapKind::Password => unlock
                        .filter(|s| s.kind() == WrapKind::Password)
                        .cloned()
                        .ok_or(EnclaveError::AuthenticationFailed)?,
                };

                let plaintext = self.open_envelope(signer_id, &envelope, &secret).await?;
                let handle = LiveKeyHandle::reconstitute(
                    envelope.key_kind,
                    &plaintext,
                    &envelope.public_key,
                )?;
                // Reconstituted keys are used once and dropped here.
                begin_signing(&handle, &message)
            }
        };

        let (der, data) = match pending {
            PendingSignature::Der(der) => (der, message),
            PendingSignature::Assertion { credential_id } => {
                let assertion = self.get_assertion(credential_id, message).await?;
                let data = assertion.signed_data();
                (assertion.signature_der, data)
            }
        };

        let signature = normalize_der_signature(&der, self.config.coordinate_width)?;
        tracing::debug!(signer_id = %signer_id, "Message signed");
        Ok(Signature { signature, data })
    }

    async fn persist_key(
        &self,
        signer_id: &str,
        secret: &WrapSecret,
        companion: Vec<StoreOp>,
    ) -> Result<(), EnclaveError> {
        let _guard = self.locks.lock(signer_id).await;

        let live = {
            let arena = self.arena()?;
            arena
                .get(signer_id)
                .map(|h| (h.sealed_kind(), h.export_material(), h.public_key().to_vec()))
        };

        let (kind, plaintext, public_key) = match live {
            Some(material) => material,
            None => {
                // Already persisted: the supplied secret must open the current envelope.
                let envelope = self
                    .load_envelope(signer_id)?
                    .ok_or_else(|| EnclaveError::SignerNotFound(signer_id.to_string()))?;
                let plaintext = self.open_envelope(signer_id, &envelope, secret).await?;
                (envelope.key_kind, plaintext, envelope.public_key)
            }
        };

        let envelope = self
            .seal_envelope(signer_id, kind, public_key, plaintext, secret)
            .await?;

        let mut batch = Vec::with_capacity(companion.len() + 1);
        batch.push(StoreOp::put_json(ENVELOPE_COLLECTION, signer_id, &envelope)?);
        batch.extend(companion);
        self.durable.apply(&batch)?;

        // From here on the envelope is the only copy.
        self.arena()?.remove(signer_id);

        tracing::info!(signer_id = %signer_id, wrap = ?secret.kind(), "Key persisted");
        Ok(())
    }

    async fn delete_key(&self, signer_id: &str, companion: Vec<StoreOp>) -> Result<(), EnclaveError> {
        let _guard = self.locks.lock(signer_id).await;

        let mut batch = Vec::with_capacity(companion.len() + 1);
        batch.push(StoreOp::delete(ENVELOPE_COLLECTION, signer_id));
        batch.extend(companion);
        self.durable.apply(&batch)?;

        let was_live = self.arena()?.remove(signer_id).is_some();
        tracing::info!(signer_id = %signer_id, was_live, "Key deleted");
        Ok(())
    }

    // ─── Authenticator ───────────────────────────────────────────────────────

    async fn create_credential(&self, label: &str) -> Result<CreatedCredential, EnclaveError> {
        if !self.authenticator.is_available() {
            return Err(EnclaveError::CredentialCreationFailed(
                AuthenticatorError::Unavailable.to_string(),
            ));
        }

        let timeout = self.config.authenticator_timeout;
        let request = CredentialRequest {
            challenge: random_bytes(),
            relying_party: self.config.relying_party.clone(),
            user_id: random_bytes(),
            user_name: label.to_string(),
            algorithm: ES256,
            user_verification: UserVerification::Required,
            timeout,
        };

        match tokio::time::timeout(timeout, self.authenticator.create_credential(request)).await {
            Ok(Ok(created)) => Ok(created),
            Ok(Err(e)) => Err(EnclaveError::CredentialCreationFailed(e.to_string())),
            Err(_) => Err(EnclaveError::CredentialCreationFailed(
                AuthenticatorError::TimedOut(timeout).to_string(),
            )),
        }
    }

    async fn get_assertion(
        &self,
        credential_id: Vec<u8>,
        challenge: Vec<u8>,
    ) -> Result<Assertion, EnclaveError> {
        let timeout = self.config.authenticator_timeout;
        let request = AssertionRequest {
            challenge,
            relying_party_id: self.config.relying_party.id.clone(),
            allowed_credential_id: credential_id,
            user_verification: UserVerification::Required,
            timeout,
        };

        match tokio::time::timeout(timeout, self.authenticator.get_assertion(request)).await {
            Ok(Ok(assertion)) => Ok(assertion),
            Ok(Err(e)) => Err(EnclaveError::AssertionFailed(e.to_string())),
            Err(_) => Err(EnclaveError::AssertionFailed(
                AuthenticatorError::TimedOut(timeout).to_string(),
            )),
        }
    }

    // ─── Envelopes ───────────────────────────────────────────────────────────

    /// The envelope stored in `signer_id`'s row. A row holding another
    /// signer's envelope is an authentication failure, not a key.
    fn load_envelope(&self, signer_id: &str) -> Result<Option<EncryptedKeyEnvelope>, EnclaveError> {
        let envelope: Option<EncryptedKeyEnvelope> =
            self.durable.get_json(ENVELOPE_COLLECTION, signer_id)?;
        match envelope {
            Some(envelope) if envelope.owner_id != signer_id => {
                tracing::warn!(
                    signer_id = %signer_id,
                    owner_id = %envelope.owner_id,
                    "Envelope row holds another signer's key"
                );
                Err(EnclaveError::AuthenticationFailed)
            }
            other => Ok(other),
        }
    }

    async fn open_envelope(
        &self,
        signer_id: &str,
        envelope: &EncryptedKeyEnvelope,
        secret: &WrapSecret,
    ) -> Result<Zeroizing<Vec<u8>>, EnclaveError> {
        let strategy = self.strategy_for(secret, false).await?;
        let owner_id = signer_id.to_string();
        let envelope = envelope.clone();
        run_blocking(move || EnvelopeCipher::new(strategy.as_ref()).open(&owner_id, &envelope))
            .await
    }

    async fn seal_envelope(
        &self,
        signer_id: &str,
        kind: SealedKeyKind,
        public_key: Vec<u8>,
        plaintext: Zeroizing<Vec<u8>>,
        secret: &WrapSecret,
    ) -> Result<EncryptedKeyEnvelope, EnclaveError> {
        let strategy = self.strategy_for(secret, true).await?;
        let owner_id = signer_id.to_string();
        run_blocking(move || {
            EnvelopeCipher::new(strategy.as_ref()).seal(&owner_id, kind, &public_key, &plaintext)
        })
        .await
    }

    async fn strategy_for(
        &self,
        secret: &WrapSecret,
        provision: bool,
    ) -> Result<Box<dyn KeyWrapStrategy>, EnclaveError> {
        let strategy: Box<dyn KeyWrapStrategy> = match secret {
            WrapSecret::Password(password) => Box::new(PasswordWrap::new(
                password.clone(),
                self.config.pbkdf2_iterations.max(MIN_PBKDF2_ITERATIONS),
            )?),
            WrapSecret::Device => Box::new(DeviceWrap::new(self.device_key(provision).await?)?),
        };
        Ok(strategy)
    }

    /// The device wrap key. Without `provision`, a missing master secret means
    /// nothing sealed under the device key can be opened.
    async fn device_key(&self, provision: bool) -> Result<Zeroizing<Vec<u8>>, EnclaveError> {
        if let Some(key) = self.device_key.get() {
            return Ok(key.clone());
        }
        if !provision && !self.provider.has_master_secret()? {
            return Err(EnclaveError::AuthenticationFailed);
        }

        let provider = Arc::clone(&self.provider);
        let key = self
            .device_key
            .get_or_try_init(|| async move {
                tokio::task::spawn_blocking(move || {
                    let master = provider.get_or_create_master_secret()?;
                    provider.derive_wrap_key(&master)
                })
                .await
                .map_err(|e| EnclaveError::Derivation(format!("derivation task failed: {}", e)))?
            })
            .await?;
        Ok(key.clone())
    }

    fn arena(&self) -> Result<MutexGuard<'_, KeyArena>, EnclaveError> {
        self.arena.lock().map_err(|_| EnclaveError::Unavailable)
    }
}

/// Envelope work off the async workers: a password wrap runs PBKDF2 at full
/// iteration count.
async fn run_blocking<T: Send + 'static>(
    work: impl FnOnce() -> Result<T, EnclaveError> + Send + 'static,
) -> Result<T, EnclaveError> {
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| EnclaveError::Cipher(format!("envelope task failed: {}", e)))?
}

fn begin_signing(handle: &LiveKeyHandle, message: &[u8]) -> PendingSignature {
    match handle {
        LiveKeyHandle::Software(pair) => PendingSignature::Der(pair.sign(message)),
        LiveKeyHandle::Authenticator { credential_id, .. } => PendingSignature::Assertion {
            credential_id: credential_id.clone(),
        },
    }
}

// ─── Serve Loop ──────────────────────────────────────────────────────────────

async fn serve(
    boundary: Arc<CustodyBoundary>,
    mut requests: mpsc::Receiver<BoundaryRequest>,
    responses: mpsc::Sender<BoundaryResponse>,
    mut stop: oneshot::Receiver<()>,
) {
    tracing::debug!("Custody boundary started");

    loop {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            request = requests.recv() => {
                let Some(BoundaryRequest { id, command }) = request else {
                    break;
                };

                let boundary = Arc::clone(&boundary);
                let responses = responses.clone();
                tokio::spawn(async move {
                    let name = command.name();
                    tracing::debug!(request_id = id, command = name, signer_id = %command.signer_id(), "Boundary request");

                    let outcome = boundary.handle(command).await;
                    if let Err(ref e) = outcome {
                        tracing::debug!(request_id = id, command = name, error = %e, "Boundary request failed");
                    }
                    if responses.send(BoundaryResponse { id, outcome }).await.is_err() {
                        tracing::debug!(request_id = id, "Client went away before the response");
                    }
                });
            }
        }
    }

    // Request side closes first: once the client sees the response channel
    // close, no request can still be sitting in the queue.
    requests.close();
    drop(requests);
    drop(responses);
    tracing::debug!("Custody boundary stopped");
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authenticator::{SoftwareAuthenticator, UnavailableAuthenticator};
    use crate::codec::verify_p256;
    use crate::enclave::MemoryKeyProvider;
    use crate::store::{SessionStore, SqliteKeyValueStore};
    use async_trait::async_trait;

    fn test_config() -> BoundaryConfig {
        BoundaryConfig {
            pbkdf2_iterations: MIN_PBKDF2_ITERATIONS,
            ..BoundaryConfig::default()
        }
    }

    fn spawn_with(
        durable: Arc<dyn KeyValueStore>,
        authenticator: Arc<dyn PlatformAuthenticator>,
        provider: Arc<dyn MasterKeyProvider>,
        config: BoundaryConfig,
    ) -> BoundaryClient {
        CustodyBoundary::new(config, durable, authenticator, provider).spawn()
    }

    fn spawn_default() -> BoundaryClient {
        spawn_with(
            Arc::new(SqliteKeyValueStore::in_memory()),
            Arc::new(SoftwareAuthenticator::default()),
            Arc::new(MemoryKeyProvider::new()),
            test_config(),
        )
    }

    /// Never answers, so the boundary's own timeout has to fire.
    struct StallingAuthenticator;

    #[async_trait]
    impl PlatformAuthenticator for StallingAuthenticator {
        fn is_available(&self) -> bool {
            true
        }

        async fn create_credential(
            &self,
            _request: CredentialRequest,
        ) -> Result<CreatedCredential, AuthenticatorError> {
            std::future::pending().await
        }

        async fn get_assertion(
            &self,
            _request: AssertionRequest,
        ) -> Result<Assertion, AuthenticatorError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_software_key_signs_verifiable_message() {
        let client = spawn_default();
        let (public_key, credential_ref) = client
            .generate_key("s1", SignerBackend::Software, "alice")
            .await
            .unwrap();
        assert!(credential_ref.is_none());

        let signature = client.sign("s1", b"hello".to_vec(), None).await.unwrap();
        assert_eq!(signature.signature.len(), 64);
        assert_eq!(signature.data, b"hello");
        assert!(verify_p256(&public_key, &signature.signature, &signature.data).unwrap());
    }

    #[tokio::test]
    async fn test_authenticator_key_signs_authenticator_data() {
        let client = spawn_default();
        let (public_key, credential_ref) = client
            .generate_key("s1", SignerBackend::Authenticator, "alice")
            .await
            .unwrap();
        assert!(credential_ref.is_some(), "Authenticator keys carry a credential id");

        let signature = client.sign("s1", b"hello".to_vec(), None).await.unwrap();
        assert_eq!(signature.data.len(), 37 + 32, "authData ‖ SHA-256(clientDataJSON)");
        assert!(verify_p256(&public_key, &signature.signature, &signature.data).unwrap());
    }

    #[tokio::test]
    async fn test_regenerating_existing_id_is_refused() {
        let client = spawn_default();
        client
            .generate_key("s1", SignerBackend::Software, "a")
            .await
            .unwrap();
        let result = client.generate_key("s1", SignerBackend::Software, "a").await;
        assert!(matches!(result, Err(EnclaveError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_sign_unknown_id_is_not_found() {
        let client = spawn_default();
        let result = client.sign("missing", b"m".to_vec(), None).await;
        assert!(matches!(result, Err(EnclaveError::SignerNotFound(_))));
        assert_eq!(client.get_address("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_declining_authenticator_fails_creation() {
        let authenticator = Arc::new(SoftwareAuthenticator::default());
        authenticator.set_declining(true);
        let client = spawn_with(
            Arc::new(SessionStore::new()),
            authenticator,
            Arc::new(MemoryKeyProvider::new()),
            test_config(),
        );

        let result = client
            .generate_key("s1", SignerBackend::Authenticator, "a")
            .await;
        assert!(matches!(result, Err(EnclaveError::CredentialCreationFailed(_))));
        assert_eq!(client.get_address("s1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unavailable_authenticator_fails_creation() {
        let client = spawn_with(
            Arc::new(SessionStore::new()),
            Arc::new(UnavailableAuthenticator),
            Arc::new(MemoryKeyProvider::new()),
            test_config(),
        );
        let result = client
            .generate_key("s1", SignerBackend::Authenticator, "a")
            .await;
        assert!(matches!(result, Err(EnclaveError::CredentialCreationFailed(_))));
    }

    #[tokio::test]
    async fn test_stalled_authenticator_times_out() {
        let config = BoundaryConfig {
            authenticator_timeout: Duration::from_millis(50),
            ..test_config()
        };
        let client = spawn_with(
            Arc::new(SessionStore::new()),
            Arc::new(StallingAuthenticator),
            Arc::new(MemoryKeyProvider::new()),
            config,
        );

        let result = client
            .generate_key("s1", SignerBackend::Authenticator, "a")
            .await;
        match result {
            Err(EnclaveError::CredentialCreationFailed(reason)) => {
                assert!(reason.contains("timed out"), "unexpected reason: {}", reason)
            }
            other => panic!("expected timeout failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_password_persist_requires_password_to_sign() {
        let durable = Arc::new(SqliteKeyValueStore::in_memory());
        let client = spawn_with(
            durable.clone(),
            Arc::new(SoftwareAuthenticator::default()),
            Arc::new(MemoryKeyProvider::new()),
            test_config(),
        );
        let (public_key, _) = client
            .generate_key("s1", SignerBackend::Software, "a")
            .await
            .unwrap();

        client
            .persist_key("s1", WrapSecret::password("pw"), vec![])
            .await
            .unwrap();
        assert!(durable.get(ENVELOPE_COLLECTION, "s1").unwrap().is_some());

        let no_secret = client.sign("s1", b"m".to_vec(), None).await;
        assert!(matches!(no_secret, Err(EnclaveError::AuthenticationFailed)));

        let wrong = client
            .sign("s1", b"m".to_vec(), Some(WrapSecret::password("nope")))
            .await;
        assert!(matches!(wrong, Err(EnclaveError::AuthenticationFailed)));

        let signature = client
            .sign("s1", b"m".to_vec(), Some(WrapSecret::password("pw")))
            .await
            .unwrap();
        assert!(verify_p256(&public_key, &signature.signature, b"m").unwrap());
        assert_eq!(client.get_address("s1").await.unwrap(), Some(public_key));
    }

    #[tokio::test]
    async fn test_repersist_needs_current_secret() {
        let client = spawn_default();
        client
            .generate_key("s1", SignerBackend::Software, "a")
            .await
            .unwrap();
        client
            .persist_key("s1", WrapSecret::password("first"), vec![])
            .await
            .unwrap();

        let wrong = client
            .persist_key("s1", WrapSecret::password("other"), vec![])
            .await;
        assert!(matches!(wrong, Err(EnclaveError::AuthenticationFailed)));

        client
            .persist_key("s1", WrapSecret::password("first"), vec![])
            .await
            .expect("Re-persist with the current secret must succeed");
    }

    #[tokio::test]
    async fn test_persist_writes_companion_atomically_and_delete_removes_it() {
        let durable = Arc::new(SqliteKeyValueStore::in_memory());
        let client = spawn_with(
            durable.clone(),
            Arc::new(SoftwareAuthenticator::default()),
            Arc::new(MemoryKeyProvider::new()),
            test_config(),
        );
        client
            .generate_key("s1", SignerBackend::Software, "a")
            .await
            .unwrap();

        let companion = vec![StoreOp::put_json("signers", "s1", &"record").unwrap()];
        client
            .persist_key("s1", WrapSecret::Device, companion)
            .await
            .unwrap();
        assert!(durable.get("signers", "s1").unwrap().is_some());
        assert!(durable.get(ENVELOPE_COLLECTION, "s1").unwrap().is_some());

        client
            .delete_key("s1", vec![StoreOp::delete("signers", "s1")])
            .await
            .unwrap();
        assert!(durable.get("signers", "s1").unwrap().is_none());
        assert!(durable.get(ENVELOPE_COLLECTION, "s1").unwrap().is_none());

        // Idempotent
        client.delete_key("s1", vec![]).await.unwrap();
    }

    #[tokio::test]
    async fn test_restart_keeps_persisted_and_loses_ephemeral() {
        let durable: Arc<dyn KeyValueStore> = Arc::new(SqliteKeyValueStore::in_memory());
        let provider: Arc<dyn MasterKeyProvider> = Arc::new(MemoryKeyProvider::new());
        let authenticator: Arc<dyn PlatformAuthenticator> =
            Arc::new(SoftwareAuthenticator::default());

        let first = spawn_with(
            durable.clone(),
            authenticator.clone(),
            provider.clone(),
            test_config(),
        );
        first
            .generate_key("ephemeral", SignerBackend::Software, "e")
            .await
            .unwrap();
        let (persisted_key, _) = first
            .generate_key("persisted", SignerBackend::Authenticator, "p")
            .await
            .unwrap();
        first
            .persist_key("persisted", WrapSecret::Device, vec![])
            .await
            .unwrap();
        first.shutdown();

        let unavailable = first.sign("ephemeral", b"m".to_vec(), None).await;
        assert!(matches!(unavailable, Err(EnclaveError::Unavailable)));

        let second = spawn_with(durable, authenticator, provider, test_config());
        assert_eq!(
            second.get_address("ephemeral").await.unwrap(),
            None,
            "Ephemeral keys must not survive the boundary"
        );
        assert_eq!(
            second.get_address("persisted").await.unwrap(),
            Some(persisted_key.clone())
        );

        let signature = second.sign("persisted", b"m".to_vec(), None).await.unwrap();
        assert!(verify_p256(&persisted_key, &signature.signature, &signature.data).unwrap());
    }

    #[tokio::test]
    async fn test_device_envelope_unreadable_after_master_secret_loss() {
        let durable: Arc<dyn KeyValueStore> = Arc::new(SqliteKeyValueStore::in_memory());
        let first = spawn_with(
            durable.clone(),
            Arc::new(SoftwareAuthenticator::default()),
            Arc::new(MemoryKeyProvider::new()),
            test_config(),
        );
        first
            .generate_key("s1", SignerBackend::Software, "a")
            .await
            .unwrap();
        first
            .persist_key("s1", WrapSecret::Device, vec![])
            .await
            .unwrap();
        first.shutdown();

        // A fresh keyring has no master secret at all.
        let second = spawn_with(
            durable,
            Arc::new(SoftwareAuthenticator::default()),
            Arc::new(MemoryKeyProvider::new()),
            test_config(),
        );
        let result = second.sign("s1", b"m".to_vec(), None).await;
        assert!(matches!(result, Err(EnclaveError::AuthenticationFailed)));
    }

    #[tokio::test]
    async fn test_concurrent_requests_are_matched_by_id() {
        let client = Arc::new(spawn_default());
        client
            .generate_key("s1", SignerBackend::Software, "a")
            .await
            .unwrap();

        let mut tasks = Vec::new();
        for i in 0..16u8 {
            let client = Arc::clone(&client);
            tasks.push(tokio::spawn(async move {
                let message = vec![i; 8];
                let signature = client.sign("s1", message.clone(), None).await.unwrap();
                (message, signature)
            }));
        }

        for task in tasks {
            let (message, signature) = task.await.unwrap();
            assert_eq!(signature.data, message, "Each caller must get its own reply");
        }
    }

    #[tokio::test]
    async fn test_envelope_row_copied_from_another_signer_is_rejected() {
        let durable = Arc::new(SqliteKeyValueStore::in_memory());
        let client = spawn_with(
            durable.clone(),
            Arc::new(SoftwareAuthenticator::default()),
            Arc::new(MemoryKeyProvider::new()),
            test_config(),
        );
        let (first_key, _) = client
            .generate_key("s1", SignerBackend::Software, "a")
            .await
            .unwrap();
        client
            .generate_key("s2", SignerBackend::Software, "b")
            .await
            .unwrap();
        client.persist_key("s1", WrapSecret::Device, vec![]).await.unwrap();
        client.persist_key("s2", WrapSecret::Device, vec![]).await.unwrap();

        let stolen = durable.get(ENVELOPE_COLLECTION, "s1").unwrap().unwrap();
        durable.put(ENVELOPE_COLLECTION, "s2", &stolen).unwrap();

        let signed = client.sign("s2", b"m".to_vec(), None).await;
        assert!(
            matches!(signed, Err(EnclaveError::AuthenticationFailed)),
            "A row holding another signer's envelope must not sign, got {:?}",
            signed
        );
        let address = client.get_address("s2").await;
        assert!(matches!(address, Err(EnclaveError::AuthenticationFailed)));

        let signature = client.sign("s1", b"m".to_vec(), None).await.unwrap();
        assert!(verify_p256(&first_key, &signature.signature, b"m").unwrap());
    }

    #[tokio::test]
    async fn test_rewritten_envelope_public_key_is_not_reported() {
        let durable = Arc::new(SqliteKeyValueStore::in_memory());
        let client = spawn_with(
            durable.clone(),
            Arc::new(SoftwareAuthenticator::default()),
            Arc::new(MemoryKeyProvider::new()),
            test_config(),
        );
        client
            .generate_key("s1", SignerBackend::Authenticator, "a")
            .await
            .unwrap();
        client.persist_key("s1", WrapSecret::Device, vec![]).await.unwrap();

        let mut envelope: EncryptedKeyEnvelope = durable
            .get_json(ENVELOPE_COLLECTION, "s1")
            .unwrap()
            .unwrap();
        envelope.public_key = b"someone else".to_vec();
        durable.put_json(ENVELOPE_COLLECTION, "s1", &envelope).unwrap();

        assert!(matches!(
            client.get_address("s1").await,
            Err(EnclaveError::AuthenticationFailed)
        ));
        assert!(matches!(
            client.sign("s1", b"m".to_vec(), None).await,
            Err(EnclaveError::AuthenticationFailed)
        ));
    }

    #[tokio::test]
    async fn test_password_derivation_does_not_stall_other_requests() {
        // Single-threaded runtime, production iteration count.
        let client = spawn_with(
            Arc::new(SqliteKeyValueStore::in_memory()),
            Arc::new(SoftwareAuthenticator::default()),
            Arc::new(MemoryKeyProvider::new()),
            BoundaryConfig::default(),
        );
        client
            .generate_key("slow", SignerBackend::Software, "a")
            .await
            .unwrap();
        let (fast_key, _) = client
            .generate_key("fast", SignerBackend::Software, "b")
            .await
            .unwrap();

        let persist = client.persist_key("slow", WrapSecret::password("pw"), vec![]);
        tokio::pin!(persist);

        let first = tokio::select! {
            biased;
            result = &mut persist => {
                result.unwrap();
                "persist"
            }
            address = client.get_address("fast") => {
                assert_eq!(address.unwrap(), Some(fast_key));
                "address"
            }
        };
        assert_eq!(
            first, "address",
            "A lookup sent after a password persist must not wait for PBKDF2"
        );

        persist.await.unwrap();
        let signature = client
            .sign("slow", b"m".to_vec(), Some(WrapSecret::password("pw")))
            .await
            .unwrap();
        assert_eq!(signature.signature.len(), 64);
    }
}
