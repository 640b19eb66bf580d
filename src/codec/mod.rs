// Sigvault — Signature Codec
//
// Stateless conversion of authenticator DER signatures into the fixed-width
// `r ‖ s` form, and verification of that form against a stored public key.

mod der;
mod error;
mod verify;

pub use der::{normalize_der_signature, P256_COORDINATE_WIDTH};
pub use error::CodecError;
pub use verify::verify_p256;
