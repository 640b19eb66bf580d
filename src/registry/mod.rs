// Sigvault — Registry Module
//
// The signer catalogue host applications talk to: create, look up, sign,
// verify, persist, and delete signers by public key.

mod lifecycle;
mod models;

pub use lifecycle::{SignerRegistry, SIGNER_COLLECTION};
pub use models::{PublicKey, SignerRecord, StorageMode};
