// Sigvault — Live Key Arena
//
// Live private-key handles, indexed by signer id and owned by the custody
// boundary alone. For an ephemeral signer the handle is the only copy of its
// key; for a persisted signer a handle exists only while one operation runs.

use std::collections::HashMap;

use zeroize::Zeroizing;

use super::envelope::SealedKeyKind;
use super::EnclaveError;
use crate::authenticator::SoftwareKeyPair;

/// Key material for one signer.
#[derive(Debug)]
pub enum LiveKeyHandle {
    Software(SoftwareKeyPair),
    /// The private key lives in the platform authenticator; only its id is held.
    Authenticator {
        credential_id: Vec<u8>,
        public_key_spki: Vec<u8>,
    },
}

impl LiveKeyHandle {
    pub fn public_key(&self) -> &[u8] {
        match self {
            LiveKeyHandle::Software(pair) => pair.public_key_spki(),
            LiveKeyHandle::Authenticator {
                public_key_spki, ..
            } => public_key_spki,
        }
    }

    pub fn sealed_kind(&self) -> SealedKeyKind {
        match self {
            LiveKeyHandle::Software(_) => SealedKeyKind::Software,
            LiveKeyHandle::Authenticator { .. } => SealedKeyKind::Authenticator,
        }
    }

    /// The bytes an envelope seals for this handle.
    pub fn export_material(&self) -> Zeroizing<Vec<u8>> {
        match self {
            LiveKeyHandle::Software(pair) => pair.export_private_bytes(),
            LiveKeyHandle::Authenticator { credential_id, .. } => {
                Zeroizing::new(credential_id.clone())
            }
        }
    }

    /// Rebuild a handle from opened envelope plaintext.
    pub fn reconstitute(
        kind: SealedKeyKind,
        plaintext: &[u8],
        public_key: &[u8],
    ) -> Result<Self, EnclaveError> {
        match kind {
            SealedKeyKind::Software => {
                let pair = SoftwareKeyPair::from_private_bytes(plaintext)
                    .map_err(|_| EnclaveError::AuthenticationFailed)?;
                if pair.public_key_spki() != public_key {
                    return Err(EnclaveError::AuthenticationFailed);
                }
                Ok(LiveKeyHandle::Software(pair))
            }
            SealedKeyKind::Authenticator => Ok(LiveKeyHandle::Authenticator {
                credential_id: plaintext.to_vec(),
                public_key_spki: public_key.to_vec(),
            }),
        }
    }
}

/// All live handles inside one boundary.
#[derive(Debug, Default)]
pub struct KeyArena {
    handles: HashMap<String, LiveKeyHandle>,
}

impl KeyArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handle. An id that already holds one is refused.
    pub fn insert(&mut self, signer_id: &str, handle: LiveKeyHandle) -> Result<(), EnclaveError> {
        if self.handles.contains_key(signer_id) {
            return Err(EnclaveError::AlreadyExists(signer_id.to_string()));
        }
        self.handles.insert(signer_id.to_string(), handle);
        Ok(())
    }

    pub fn get(&self, signer_id: &str) -> Option<&LiveKeyHandle> {
        self.handles.get(signer_id)
    }

    pub fn contains(&self, signer_id: &str) -> bool {
        self.handles.contains_key(signer_id)
    }

    pub fn remove(&mut self, signer_id: &str) -> Option<LiveKeyHandle> {
        self.handles.remove(signer_id)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_refuses_duplicate_id() {
        let mut arena = KeyArena::new();
        arena
            .insert("a", LiveKeyHandle::Software(SoftwareKeyPair::generate().unwrap()))
            .unwrap();

        let result = arena.insert("a", LiveKeyHandle::Software(SoftwareKeyPair::generate().unwrap()));
        assert!(matches!(result, Err(EnclaveError::AlreadyExists(_))));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_remove_then_reinsert() {
        let mut arena = KeyArena::new();
        arena
            .insert("a", LiveKeyHandle::Software(SoftwareKeyPair::generate().unwrap()))
            .unwrap();
        assert!(arena.remove("a").is_some());
        assert!(arena.is_empty());
        assert!(arena.remove("a").is_none());
    }

    #[test]
    fn test_reconstitute_checks_public_key() {
        let pair = SoftwareKeyPair::generate().unwrap();
        let scalar = pair.export_private_bytes();

        let handle =
            LiveKeyHandle::reconstitute(SealedKeyKind::Software, &scalar, pair.public_key_spki())
                .unwrap();
        assert_eq!(handle.public_key(), pair.public_key_spki());

        let other = SoftwareKeyPair::generate().unwrap();
        let mismatch =
            LiveKeyHandle::reconstitute(SealedKeyKind::Software, &scalar, other.public_key_spki());
        assert!(matches!(mismatch, Err(EnclaveError::AuthenticationFailed)));
    }

    #[test]
    fn test_authenticator_handle_keeps_credential_id() {
        let handle =
            LiveKeyHandle::reconstitute(SealedKeyKind::Authenticator, b"cred", b"spki").unwrap();
        assert_eq!(handle.sealed_kind(), SealedKeyKind::Authenticator);
        assert_eq!(handle.public_key(), b"spki");
    }
}
