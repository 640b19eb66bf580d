// Sigvault — Library root
//
// Re-exports the registry, custody boundary, codec, store, gateway, and CLI
// modules.

pub mod authenticator;
pub mod cli;
pub mod clock;
pub mod codec;
pub mod config;
pub mod enclave;
pub mod entropy;
pub mod error;
pub mod gateway;
pub mod locks;
pub mod registry;
pub mod store;

pub use config::VaultConfig;
pub use error::{Result, VaultError};
pub use registry::{PublicKey, SignerRecord, SignerRegistry, StorageMode};
