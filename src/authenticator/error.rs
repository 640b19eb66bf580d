// Sigvault — Authenticator error types

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum AuthenticatorError {
    #[error("Authenticator declined the operation: {0}")]
    NotAllowed(String),

    #[error("Authenticator timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Credential is not known to this authenticator")]
    UnknownCredential,

    #[error("No platform authenticator is available")]
    Unavailable,

    #[error("Key encoding error: {0}")]
    Encoding(String),
}
