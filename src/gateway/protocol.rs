// Sigvault — JSON-RPC 2.0 Protocol Types
//
// Minimal JSON-RPC 2.0 implementation for the UDS gateway, plus the mapping
// from the vault's error taxonomy onto application error codes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::VaultError;

/// A JSON-RPC 2.0 request.
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    pub id: Value,
}

/// A JSON-RPC 2.0 success/error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Value,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// Standard JSON-RPC 2.0 error codes
pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

// Application error codes
pub const SIGNER_NOT_FOUND: i32 = -32001;
pub const SIGNER_EXPIRED: i32 = -32002;
pub const AUTHENTICATION_FAILED: i32 = -32003;
pub const ALREADY_EXISTS: i32 = -32004;
pub const AUTHENTICATOR_FAILURE: i32 = -32005;
pub const MALFORMED_SIGNATURE: i32 = -32006;

impl JsonRpcRequest {
    pub fn new(method: impl Into<String>, params: Value, id: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
            id,
        }
    }

    /// Validate that this is a proper JSON-RPC 2.0 request.
    pub fn validate(&self) -> Result<(), String> {
        if self.jsonrpc != "2.0" {
            return Err("jsonrpc must be \"2.0\"".to_string());
        }
        if self.method.is_empty() {
            return Err("method must not be empty".to_string());
        }
        Ok(())
    }
}

impl JsonRpcResponse {
    /// Create a success response.
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    /// Create an error response.
    pub fn error(id: Value, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
            id,
        }
    }

    /// Create a parse error response (id is null because we couldn't parse it).
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::error(Value::Null, PARSE_ERROR, message)
    }

    /// Map a vault error onto its application error code.
    pub fn from_vault_error(id: Value, err: &VaultError) -> Self {
        let code = match err {
            VaultError::SignerNotFound(_) => SIGNER_NOT_FOUND,
            VaultError::SignerExpired(_) => SIGNER_EXPIRED,
            VaultError::AuthenticationFailed => AUTHENTICATION_FAILED,
            VaultError::AlreadyExists(_) => ALREADY_EXISTS,
            VaultError::CredentialCreationFailed(_) | VaultError::AssertionFailed(_) => {
                AUTHENTICATOR_FAILURE
            }
            VaultError::MalformedSignature(_) => MALFORMED_SIGNATURE,
            VaultError::Config(_) => INVALID_PARAMS,
            _ => INTERNAL_ERROR,
        };
        Self::error(id, code, err.to_string())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
