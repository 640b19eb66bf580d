// Sigvault — Boundary Protocol
//
// The closed set of commands the custody boundary accepts and the replies it
// produces. Every request carries a correlation id chosen by the client; the
// boundary answers each id at most once, in whatever order the work finishes.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::envelope::WrapSecret;
use super::EnclaveError;
use crate::store::StoreOp;

/// Where a signer's private key lives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignerBackend {
    /// Device-bound credential in a platform authenticator.
    Authenticator,
    /// P-256 key generated in process memory.
    #[default]
    Software,
}

impl fmt::Display for SignerBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignerBackend::Authenticator => f.write_str("authenticator"),
            SignerBackend::Software => f.write_str("software"),
        }
    }
}

impl std::str::FromStr for SignerBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "authenticator" => Ok(SignerBackend::Authenticator),
            "software" => Ok(SignerBackend::Software),
            other => Err(format!("unknown signer backend '{}'", other)),
        }
    }
}

/// A fixed-width signature and the exact bytes it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// `r ‖ s`, each left-padded to the curve's coordinate width.
    pub signature: Vec<u8>,
    /// For software signers the message itself; for authenticator signers
    /// `authenticatorData ‖ SHA-256(clientDataJSON)`.
    pub data: Vec<u8>,
}

#[derive(Debug)]
pub enum BoundaryCommand {
    GenerateKey {
        signer_id: String,
        backend: SignerBackend,
        /// Shown to the user by the authenticator prompt.
        label: String,
    },
    GetAddress {
        signer_id: String,
    },
    Sign {
        signer_id: String,
        message: Vec<u8>,
        unlock: Option<WrapSecret>,
    },
    PersistKey {
        signer_id: String,
        wrap: WrapSecret,
        /// Written in the same transaction as the envelope.
        companion: Vec<StoreOp>,
    },
    DeleteKey {
        signer_id: String,
        companion: Vec<StoreOp>,
    },
}

impl BoundaryCommand {
    pub fn name(&self) -> &'static str {
        match self {
            BoundaryCommand::GenerateKey { .. } => "generateKey",
            BoundaryCommand::GetAddress { .. } => "getAddress",
            BoundaryCommand::Sign { .. } => "sign",
            BoundaryCommand::PersistKey { .. } => "persistKey",
            BoundaryCommand::DeleteKey { .. } => "deleteKey",
        }
    }

    pub fn signer_id(&self) -> &str {
        match self {
            BoundaryCommand::GenerateKey { signer_id, .. }
            | BoundaryCommand::GetAddress { signer_id }
            | BoundaryCommand::Sign { signer_id, .. }
            | BoundaryCommand::PersistKey { signer_id, .. }
            | BoundaryCommand::DeleteKey { signer_id, .. } => signer_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundaryReply {
    Generated {
        public_key: Vec<u8>,
        /// Authenticator credential id; `None` for software keys.
        credential_ref: Option<Vec<u8>>,
    },
    Address(Option<Vec<u8>>),
    Signed(Signature),
    Persisted,
    Deleted,
}

#[derive(Debug)]
pub struct BoundaryRequest {
    pub id: u64,
    pub command: BoundaryCommand,
}

#[derive(Debug)]
pub struct BoundaryResponse {
    pub id: u64,
    pub outcome: Result<BoundaryReply, EnclaveError>,
}

// ─── Tests ───────────────────────────────────────────────────────────────────
