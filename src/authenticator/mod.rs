// Sigvault — Authenticator Module
//
// The key primitives the custody boundary drives but does not implement: a
// platform authenticator (credential creation + assertions, private key never
// released) and a software P-256 key for hosts without one.

mod emulated;
mod error;
mod platform;
mod software;

pub use emulated::SoftwareAuthenticator;
pub use error::AuthenticatorError;
pub use platform::{
    Assertion, AssertionRequest, CreatedCredential, CredentialRequest, PlatformAuthenticator,
    RelyingParty, UnavailableAuthenticator, UserVerification, ES256,
};
pub use software::{encode_public_key, sign_der, SoftwareKeyPair};
