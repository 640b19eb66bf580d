// Sigvault — Signature codec error types

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("malformed signature: expected SEQUENCE tag 0x30, found {0:#04x}")]
    NotASequence(u8),

    #[error("malformed signature: expected INTEGER tag 0x02, found {0:#04x}")]
    NotAnInteger(u8),

    #[error("malformed signature: input truncated")]
    Truncated,

    #[error("malformed signature: unsupported length encoding")]
    BadLength,

    #[error("malformed signature: {0} trailing bytes after SEQUENCE")]
    TrailingBytes(usize),

    #[error("malformed signature: expected 2 INTEGER elements, found {0}")]
    ElementCount(usize),

    #[error("malformed signature: {component} is {len} bytes, expected {width}")]
    Width {
        component: &'static str,
        len: usize,
        width: usize,
    },

    #[error("malformed public key: {0}")]
    PublicKey(String),
}
