// Sigvault — Signer Registry
//
// Caller-facing catalogue of signers. The registry owns public metadata only
// and drives the custody boundary for everything involving a key.
//
// Records live in one of two stores, both keyed by the base64 public key:
//   - the session store (ephemeral signers, gone with the process)
//   - the durable store (persisted signers, written in the same transaction
//     as the key envelope)
//
// Expiry is lazy: every lookup checks `session_expiry` against the clock and
// prunes what has lapsed, so an expired signer looks exactly like one that
// never existed (except to `sign`, which reports `SignerExpired` once).

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use uuid::Uuid;

use super::models::{PublicKey, SignerRecord, StorageMode};
use crate::authenticator::PlatformAuthenticator;
use crate::clock::{Clock, SystemClock};
use crate::codec::verify_p256;
use crate::config::VaultConfig;
use crate::enclave::{
    BoundaryClient, CustodyBoundary, MasterKeyProvider, Signature, SignerBackend, WrapSecret,
};
use crate::error::{Result, VaultError};
use crate::locks::KeyedLocks;
use crate::store::{KeyValueStore, KeyValueStoreExt, StoreOp};

/// Collection holding `SignerRecord`s in both stores.
pub const SIGNER_COLLECTION: &str = "signers";

enum Lookup {
    Live(SignerRecord),
    Expired(SignerRecord),
    Missing,
}

/// Marks a name as mid-creation until dropped.
struct CreationClaim<'a> {
    names: &'a DashMap<String, ()>,
    name: String,
}

impl Drop for CreationClaim<'_> {
    fn drop(&mut self) {
        self.names.remove(&self.name);
    }
}

pub struct SignerRegistry {
    config: VaultConfig,
    boundary: BoundaryClient,
    session: Arc<dyn KeyValueStore>,
    durable: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    /// Serializes persist / delete per public key.
    signer_locks: KeyedLocks,
    creating: DashMap<String, ()>,
}

impl SignerRegistry {
    /// Start a custody boundary and open a registry over it. `session`
    /// holds ephemeral signer records for this process; `durable` holds
    /// persisted records and key envelopes.
    ///
    /// Fails with `EnvironmentUnsupported` outside a Tokio runtime, or when
    /// the default backend is the platform authenticator and none is present.
    pub fn open(
        config: VaultConfig,
        session: Arc<dyn KeyValueStore>,
        durable: Arc<dyn KeyValueStore>,
        authenticator: Arc<dyn PlatformAuthenticator>,
        provider: Arc<dyn MasterKeyProvider>,
    ) -> Result<Self> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(VaultError::EnvironmentUnsupported(
                "the signer registry must be opened inside a Tokio runtime".to_string(),
            ));
        }
        config.validate()?;
        if config.default_backend == SignerBackend::Authenticator && !authenticator.is_available()
        {
            return Err(VaultError::EnvironmentUnsupported(
                "no platform authenticator is available".to_string(),
            ));
        }

        let boundary =
            CustodyBoundary::new(config.boundary(), Arc::clone(&durable), authenticator, provider)
                .spawn();

        tracing::debug!(backend = %config.default_backend, "Signer registry opened");
        Ok(Self {
            config,
            boundary,
            session,
            durable,
            clock: Arc::new(SystemClock),
            signer_locks: KeyedLocks::new(),
            creating: DashMap::new(),
        })
    }

    /// Replace the clock used for expiry.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    // ─── Create ──────────────────────────────────────────────────────────────

    /// Create a signer on the default backend. `expiry` is the session
    /// lifetime; `None` falls back to the configured session timeout.
    pub async fn create(&self, name: &str, expiry: Option<Duration>) -> Result<PublicKey> {
        self.create_with_backend(name, self.config.default_backend, expiry)
            .await
    }

    pub async fn create_with_backend(
        &self,
        name: &str,
        backend: SignerBackend,
        expiry: Option<Duration>,
    ) -> Result<PublicKey> {
        let name = name.trim();
        if name.is_empty() {
            return Err(VaultError::Other("signer name must not be empty".to_string()));
        }

        let _claim = self.claim_name(name)?;
        if self.find_by_name(name).await?.is_some() {
            return Err(VaultError::AlreadyExists(name.to_string()));
        }

        let id = Uuid::new_v4().to_string();
        let (public_key, credential_id) = self.boundary.generate_key(&id, backend, name).await?;

        let now = self.clock.now();
        let session_expiry = match expiry.or(self.config.session_timeout) {
            Some(lifetime) => Some(
                now + chrono::Duration::from_std(lifetime)
                    .map_err(|e| VaultError::Other(format!("session lifetime out of range: {}", e)))?,
            ),
            None => None,
        };

        let record = SignerRecord {
            id,
            name: name.to_string(),
            public_key: PublicKey::from_bytes(public_key),
            credential_ref: credential_id
                .as_deref()
                .map(SignerRecord::encode_credential_ref),
            session_expiry,
            storage_mode: StorageMode::Ephemeral,
            backend,
            created_at: now,
        };

        let key = record.public_key.to_base64();
        if let Err(e) = self.session.put_json(SIGNER_COLLECTION, &key, &record) {
            // Do not leave a key behind that no record points at.
            if let Err(rollback) = self.boundary.delete_key(&record.id, vec![]).await {
                tracing::warn!(
                    signer_id = %record.id,
                    error = %rollback,
                    "Rollback of unrecorded key failed; live key left in boundary"
                );
            }
            return Err(e.into());
        }

        tracing::info!(signer_id = %record.id, name = %name, backend = %backend, "Signer created");
        Ok(record.public_key)
    }

    fn claim_name(&self, name: &str) -> Result<CreationClaim<'_>> {
        match self.creating.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(VaultError::AlreadyExists(name.to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(());
                Ok(CreationClaim {
                    names: &self.creating,
                    name: name.to_string(),
                })
            }
        }
    }

    // ─── Lookup ──────────────────────────────────────────────────────────────

    pub async fn get(&self, public_key: &PublicKey) -> Result<SignerRecord> {
        match self.lookup(public_key)? {
            Lookup::Live(record) => Ok(record),
            Lookup::Expired(record) => {
                self.prune(&record).await?;
                Err(VaultError::SignerNotFound(public_key.to_string()))
            }
            Lookup::Missing => Err(VaultError::SignerNotFound(public_key.to_string())),
        }
    }

    /// Every live signer, oldest first. Expired ones are pruned on the way.
    pub async fn list(&self) -> Result<Vec<SignerRecord>> {
        let now = self.clock.now();
        let mut records: Vec<SignerRecord> = self.durable.list_json(SIGNER_COLLECTION)?;
        records.extend(self.session.list_json::<SignerRecord>(SIGNER_COLLECTION)?);

        let mut live = Vec::with_capacity(records.len());
        for record in records {
            if record.is_expired(now) {
                self.prune(&record).await?;
            } else {
                live.push(record);
            }
        }

        live.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
        Ok(live)
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<SignerRecord>> {
        Ok(self.list().await?.into_iter().find(|r| r.name == name))
    }

    fn lookup(&self, public_key: &PublicKey) -> Result<Lookup> {
        let key = public_key.to_base64();
        let record = match self.durable.get_json::<SignerRecord>(SIGNER_COLLECTION, &key)? {
            Some(record) => Some(record),
            None => self.session.get_json::<SignerRecord>(SIGNER_COLLECTION, &key)?,
        };

        Ok(match record {
            Some(record) if record.is_expired(self.clock.now()) => Lookup::Expired(record),
            Some(record) => Lookup::Live(record),
            None => Lookup::Missing,
        })
    }

    async fn prune(&self, record: &SignerRecord) -> Result<()> {
        let key = record.public_key.to_base64();
        self.boundary
            .delete_key(&record.id, vec![StoreOp::delete(SIGNER_COLLECTION, &key)])
            .await?;
        self.session.delete(SIGNER_COLLECTION, &key)?;
        tracing::info!(signer_id = %record.id, name = %record.name, "Expired signer pruned");
        Ok(())
    }

    // ─── Sign / Verify ───────────────────────────────────────────────────────

    /// Sign with an ephemeral or device-wrapped signer.
    pub async fn sign(&self, public_key: &PublicKey, message: &[u8]) -> Result<Signature> {
        self.sign_inner(public_key, message, None).await
    }

    /// Sign with a signer persisted under a password.
    pub async fn sign_with_password(
        &self,
        public_key: &PublicKey,
        message: &[u8],
        password: &str,
    ) -> Result<Signature> {
        self.sign_inner(public_key, message, Some(WrapSecret::password(password)))
            .await
    }

    async fn sign_inner(
        &self,
        public_key: &PublicKey,
        message: &[u8],
        unlock: Option<WrapSecret>,
    ) -> Result<Signature> {
        let record = match self.lookup(public_key)? {
            Lookup::Live(record) => record,
            Lookup::Expired(record) => {
                tracing::warn!(signer_id = %record.id, "Sign attempted on expired signer");
                self.prune(&record).await?;
                return Err(VaultError::SignerExpired(public_key.to_string()));
            }
            Lookup::Missing => return Err(VaultError::SignerNotFound(public_key.to_string())),
        };

        Ok(self
            .boundary
            .sign(&record.id, message.to_vec(), unlock)
            .await?)
    }

    /// Check a fixed-width signature against a registered signer's key.
    pub async fn verify(&self, public_key: &PublicKey, signature: &Signature) -> Result<bool> {
        let record = self.get(public_key).await?;
        Ok(verify_p256(
            record.public_key.as_bytes(),
            &signature.signature,
            &signature.data,
        )?)
    }

    // ─── Persist / Delete ────────────────────────────────────────────────────

    /// Seal the signer's key into the durable store under `secret`. The
    /// signer stops expiring and its live key is dropped from the boundary.
    pub async fn persist(&self, public_key: &PublicKey, secret: WrapSecret) -> Result<()> {
        let key = public_key.to_base64();
        let _guard = self.signer_locks.lock(&key).await;

        let record = match self.lookup(public_key)? {
            Lookup::Live(record) => record,
            Lookup::Expired(record) => {
                self.prune(&record).await?;
                return Err(VaultError::SignerNotFound(public_key.to_string()));
            }
            Lookup::Missing => return Err(VaultError::SignerNotFound(public_key.to_string())),
        };

        let persisted = SignerRecord {
            storage_mode: StorageMode::Persisted,
            session_expiry: None,
            ..record.clone()
        };
        let companion = vec![StoreOp::put_json(SIGNER_COLLECTION, &key, &persisted)?];

        self.boundary
            .persist_key(&record.id, secret, companion)
            .await?;
        self.session.delete(SIGNER_COLLECTION, &key)?;

        tracing::info!(signer_id = %record.id, name = %record.name, "Signer persisted");
        Ok(())
    }

    /// Remove the signer, its live key, and its envelope. Absent signers are a no-op.
    pub async fn delete(&self, public_key: &PublicKey) -> Result<()> {
        let key = public_key.to_base64();
        let _guard = self.signer_locks.lock(&key).await;

        let record = match self.lookup(public_key)? {
            Lookup::Live(record) | Lookup::Expired(record) => record,
            Lookup::Missing => return Ok(()),
        };

        self.boundary
            .delete_key(&record.id, vec![StoreOp::delete(SIGNER_COLLECTION, &key)])
            .await?;
        self.session.delete(SIGNER_COLLECTION, &key)?;

        tracing::info!(signer_id = %record.id, name = %record.name, "Signer deleted");
        Ok(())
    }

    /// The public key the boundary holds for this signer, if it still holds one.
    pub async fn address(&self, public_key: &PublicKey) -> Result<Option<PublicKey>> {
        let record = match self.lookup(public_key)? {
            Lookup::Live(record) => record,
            Lookup::Expired(record) => {
                self.prune(&record).await?;
                return Ok(None);
            }
            Lookup::Missing => return Ok(None),
        };

        match self.boundary.get_address(&record.id).await? {
            Some(held) if held != record.public_key.as_bytes() => {
                tracing::warn!(signer_id = %record.id, "Boundary key does not match signer record");
                Err(VaultError::AuthenticationFailed)
            }
            held => Ok(held.map(PublicKey::from_bytes)),
        }
    }

    /// End the session: stop the boundary and forget every ephemeral signer.
    pub fn close(&self) -> Result<()> {
        self.boundary.shutdown();
        self.session
            .list(SIGNER_COLLECTION)?
            .into_iter()
            .try_for_each(|(key, _)| self.session.delete(SIGNER_COLLECTION, &key).map(|_| ()))?;
        tracing::debug!("Signer registry closed");
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
