// Sigvault — Enclave Module
//
// The key custody boundary: an isolated task that owns every live private key,
// the envelope cipher that seals keys for durable storage, and the device
// master key behind the boundary's non-extractable wrap key. Callers only ever
// hold a `BoundaryClient`.

mod boundary;
mod client;
mod envelope;
mod error;
mod keys;
mod protocol;
mod provider;

pub use boundary::{BoundaryConfig, CustodyBoundary, ENVELOPE_COLLECTION};
pub use client::BoundaryClient;
pub use envelope::{
    DeviceWrap, EncryptedKeyEnvelope, EnvelopeCipher, KeyWrapStrategy, PasswordWrap,
    SealedKeyKind, WrapKind, WrapSecret, WrappedKey, MIN_PBKDF2_ITERATIONS,
};
pub use error::EnclaveError;
pub use keys::{KeyArena, LiveKeyHandle};
pub use protocol::{
    BoundaryCommand, BoundaryReply, BoundaryRequest, BoundaryResponse, Signature, SignerBackend,
};
pub use provider::{KeyringProvider, MasterKeyProvider, MemoryKeyProvider};
