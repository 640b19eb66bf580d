// Sigvault — Unix Domain Socket Server
//
// Listens on a Unix domain socket for JSON-RPC 2.0 requests from local
// processes. Each connection is handled in a spawned tokio task; every
// request is dispatched onto the shared signer registry.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

use crate::enclave::{Signature, SignerBackend, WrapSecret};
use crate::error::VaultError;
use crate::registry::{PublicKey, SignerRegistry};

use super::protocol::{
    JsonRpcRequest, JsonRpcResponse, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND,
};

/// Unix Domain Socket server for Sigvault.
pub struct UdsServer {
    registry: Arc<SignerRegistry>,
    socket_path: PathBuf,
}

impl UdsServer {
    pub fn new(registry: Arc<SignerRegistry>, socket_path: PathBuf) -> Self {
        Self {
            registry,
            socket_path,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Serve until `shutdown` resolves, then remove the socket file.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<(), VaultError> {
        // Ensure the socket directory exists
        if let Some(parent) = self.socket_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Remove stale socket file if it exists
        if self.socket_path.exists() {
            tokio::fs::remove_file(&self.socket_path).await?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;

        // Owner-only: anyone who can connect can sign.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&self.socket_path, perms)?;
        }

        tracing::info!(
            socket = %self.socket_path.display(),
            "Sigvault UDS server listening"
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => {
                    let (stream, _addr) = accepted?;
                    let registry = Arc::clone(&self.registry);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, &registry).await {
                            tracing::error!(error = %e, "Connection handler error");
                        }
                    });
                }
            }
        }

        drop(listener);
        if let Err(e) = tokio::fs::remove_file(&self.socket_path).await {
            tracing::debug!(error = %e, "Socket file already gone");
        }
        tracing::info!("Sigvault UDS server stopped");
        Ok(())
    }
}

/// Handle a single client connection.
/// Reads newline-delimited JSON-RPC requests and writes responses.
async fn handle_connection(stream: UnixStream, registry: &SignerRegistry) -> Result<(), VaultError> {
    #[cfg(target_os = "linux")]
    {
        if let Ok(cred) = stream.peer_cred() {
            tracing::debug!(pid = ?cred.pid(), uid = cred.uid(), "Client connected");
        }
    }

    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = process_request(&line, registry).await;
        let mut json = serde_json::to_string(&response)
            .map_err(|e| VaultError::Other(format!("response encoding: {}", e)))?;
        json.push('\n');
        writer.write_all(json.as_bytes()).await?;
        writer.flush().await?;
    }

    Ok(())
}

/// Parse and dispatch a single JSON-RPC request.
pub async fn process_request(raw: &str, registry: &SignerRegistry) -> JsonRpcResponse {
    let request: JsonRpcRequest = match serde_json::from_str(raw) {
        Ok(req) => req,
        Err(e) => return JsonRpcResponse::parse_error(format!("Parse error: {}", e)),
    };

    if let Err(e) = request.validate() {
        return JsonRpcResponse::error(request.id, INVALID_REQUEST, e);
    }

    tracing::debug!(method = %request.method, "Gateway request");

    let id = request.id;
    let params = &request.params;
    let outcome = match request.method.as_str() {
        "create" => handle_create(registry, params).await,
        "get" => handle_get(registry, params).await,
        "list" => handle_list(registry).await,
        "sign" => handle_sign(registry, params).await,
        "verify" => handle_verify(registry, params).await,
        "persist" => handle_persist(registry, params).await,
        "delete" => handle_delete(registry, params).await,
        "address" => handle_address(registry, params).await,
        _ => {
            return JsonRpcResponse::error(
                id,
                METHOD_NOT_FOUND,
                format!("Unknown method: {}", request.method),
            )
        }
    };

    match outcome {
        Ok(result) => JsonRpcResponse::success(id, result),
        Err(HandlerError::Params(message)) => JsonRpcResponse::error(id, INVALID_PARAMS, message),
        Err(HandlerError::Vault(e)) => {
            tracing::debug!(method = %request.method, error = %e, "Gateway request failed");
            JsonRpcResponse::from_vault_error(id, &e)
        }
    }
}

/// Send one request over the socket and wait for its response.
pub async fn send_request(
    socket_path: &Path,
    method: &str,
    params: Value,
) -> Result<JsonRpcResponse, VaultError> {
    let stream = UnixStream::connect(socket_path).await?;
    let (reader, mut writer) = stream.into_split();

    let request = JsonRpcRequest::new(method, params, Value::from(1));
    let mut json = serde_json::to_string(&request)
        .map_err(|e| VaultError::Other(format!("request encoding: {}", e)))?;
    json.push('\n');
    writer.write_all(json.as_bytes()).await?;
    writer.flush().await?;

    let mut lines = BufReader::new(reader).lines();
    let line = lines.next_line().await?.ok_or_else(|| {
        VaultError::Other("gateway closed the connection without replying".to_string())
    })?;
    serde_json::from_str(&line).map_err(|e| VaultError::Other(format!("bad response: {}", e)))
}

// ─── Method Handlers ─────────────────────────────────────────────────────────

enum HandlerError {
    Params(String),
    Vault(VaultError),
}

impl From<VaultError> for HandlerError {
    fn from(e: VaultError) -> Self {
        HandlerError::Vault(e)
    }
}

type HandlerResult = Result<Value, HandlerError>;

async fn handle_create(registry: &SignerRegistry, params: &Value) -> HandlerResult {
    let name = required_str(params, "name")?;
    let expiry = params
        .get("expiry_ms")
        .map(|v| {
            v.as_u64()
                .map(Duration::from_millis)
                .ok_or_else(|| HandlerError::Params("'expiry_ms' must be a positive integer".into()))
        })
        .transpose()?;
    let backend = match params.get("backend").and_then(|v| v.as_str()) {
        Some(raw) => raw.parse::<SignerBackend>().map_err(HandlerError::Params)?,
        None => registry.config().default_backend,
    };

    let public_key = registry.create_with_backend(name, backend, expiry).await?;
    Ok(json!({ "public_key": public_key.to_base64() }))
}

async fn handle_get(registry: &SignerRegistry, params: &Value) -> HandlerResult {
    let public_key = extract_public_key(params)?;
    let record = registry.get(&public_key).await?;
    to_json(&record)
}

async fn handle_list(registry: &SignerRegistry) -> HandlerResult {
    let records = registry.list().await?;
    to_json(&records)
}

async fn handle_sign(registry: &SignerRegistry, params: &Value) -> HandlerResult {
    let public_key = extract_public_key(params)?;
    let message = match (
        params.get("message").and_then(|v| v.as_str()),
        params.get("message_b64").and_then(|v| v.as_str()),
    ) {
        (Some(text), None) => text.as_bytes().to_vec(),
        (None, Some(encoded)) => decode_b64(encoded, "message_b64")?,
        (Some(_), Some(_)) => {
            return Err(HandlerError::Params(
                "Pass either 'message' or 'message_b64', not both".into(),
            ))
        }
        (None, None) => return Err(HandlerError::Params("Missing 'message'".into())),
    };

    let signature = match params.get("password").and_then(|v| v.as_str()) {
        Some(password) => {
            registry
                .sign_with_password(&public_key, &message, password)
                .await?
        }
        None => registry.sign(&public_key, &message).await?,
    };

    Ok(json!({
        "signature": STANDARD.encode(&signature.signature),
        "data": STANDARD.encode(&signature.data),
    }))
}

async fn handle_verify(registry: &SignerRegistry, params: &Value) -> HandlerResult {
    let public_key = extract_public_key(params)?;
    let signature = Signature {
        signature: decode_b64(required_str(params, "signature")?, "signature")?,
        data: decode_b64(required_str(params, "data")?, "data")?,
    };
    let valid = registry.verify(&public_key, &signature).await?;
    Ok(json!({ "valid": valid }))
}

async fn handle_persist(registry: &SignerRegistry, params: &Value) -> HandlerResult {
    let public_key = extract_public_key(params)?;
    let secret = match params.get("password").and_then(|v| v.as_str()) {
        Some(password) => WrapSecret::password(password),
        None => WrapSecret::Device,
    };
    let wrap = secret.kind();
    registry.persist(&public_key, secret).await?;
    Ok(json!({ "persisted": true, "wrap": wrap }))
}

async fn handle_delete(registry: &SignerRegistry, params: &Value) -> HandlerResult {
    let public_key = extract_public_key(params)?;
    registry.delete(&public_key).await?;
    Ok(json!({ "deleted": true }))
}

async fn handle_address(registry: &SignerRegistry, params: &Value) -> HandlerResult {
    let public_key = extract_public_key(params)?;
    let address = registry.address(&public_key).await?;
    Ok(json!({ "address": address.map(|key| key.to_base64()) }))
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn required_str<'a>(params: &'a Value, field: &str) -> Result<&'a str, HandlerError> {
    params
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerError::Params(format!("Missing '{}'", field)))
}

fn extract_public_key(params: &Value) -> Result<PublicKey, HandlerError> {
    let encoded = required_str(params, "public_key")?;
    PublicKey::from_base64(encoded)
        .map_err(|e| HandlerError::Params(format!("Invalid public key: {}", e)))
}

fn decode_b64(encoded: &str, field: &str) -> Result<Vec<u8>, HandlerError> {
    STANDARD
        .decode(encoded.trim())
        .map_err(|e| HandlerError::Params(format!("Invalid base64 in '{}': {}", field, e)))
}

fn to_json<T: serde::Serialize>(value: &T) -> HandlerResult {
    serde_json::to_value(value).map_err(|e| {
        HandlerError::Vault(VaultError::Other(format!("result encoding: {}", e)))
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authenticator::SoftwareAuthenticator;
    use crate::config::VaultConfig;
    use crate::enclave::{MemoryKeyProvider, MIN_PBKDF2_ITERATIONS};
    use crate::gateway::protocol::{
        ALREADY_EXISTS, AUTHENTICATION_FAILED, PARSE_ERROR, SIGNER_NOT_FOUND,
    };
    use crate::store::{SessionStore, SqliteKeyValueStore};

    fn setup_registry() -> Arc<SignerRegistry> {
        let config = VaultConfig {
            pbkdf2_iterations: MIN_PBKDF2_ITERATIONS,
            ..VaultConfig::default()
        };
        let registry = SignerRegistry::open(
            config,
            Arc::new(SessionStore::new()),
            Arc::new(SqliteKeyValueStore::in_memory()),
            Arc::new(SoftwareAuthenticator::default()),
            Arc::new(MemoryKeyProvider::new()),
        )
        .unwrap();
        Arc::new(registry)
    }

    fn request(method: &str, params: Value) -> String {
        serde_json::to_string(&JsonRpcRequest::new(method, params, Value::from(1))).unwrap()
    }

    async fn call(registry: &SignerRegistry, method: &str, params: Value) -> JsonRpcResponse {
        process_request(&request(method, params), registry).await
    }

    async fn create(registry: &SignerRegistry, name: &str) -> String {
        let resp = call(registry, "create", json!({ "name": name })).await;
        resp.result.unwrap()["public_key"]
            .as_str()
            .unwrap()
            .to_string()
    }

    fn error_code(resp: &JsonRpcResponse) -> i32 {
        resp.error.as_ref().map(|e| e.code).unwrap_or(0)
    }

    #[tokio::test]
    async fn test_create_sign_verify_over_gateway() {
        let registry = setup_registry();
        let public_key = create(&registry, "alice").await;

        let signed = call(
            &registry,
            "sign",
            json!({ "public_key": public_key, "message": "hello" }),
        )
        .await;
        let signed = signed.result.expect("sign should succeed");
        let signature = STANDARD
            .decode(signed["signature"].as_str().unwrap())
            .unwrap();
        assert_eq!(signature.len(), 64, "Signatures travel as fixed-width r||s");

        let verified = call(
            &registry,
            "verify",
            json!({
                "public_key": public_key,
                "signature": signed["signature"],
                "data": signed["data"],
            }),
        )
        .await;
        assert_eq!(verified.result.unwrap()["valid"], true);
    }

    #[tokio::test]
    async fn test_list_and_get_return_public_metadata() {
        let registry = setup_registry();
        let public_key = create(&registry, "bob").await;

        let listed = call(&registry, "list", Value::Null).await.result.unwrap();
        assert_eq!(listed.as_array().unwrap().len(), 1);

        let record = call(&registry, "get", json!({ "public_key": public_key }))
            .await
            .result
            .unwrap();
        assert_eq!(record["name"], "bob");
        assert_eq!(record["storage_mode"], "ephemeral");
        assert_eq!(record["public_key"], public_key.as_str());
    }

    #[tokio::test]
    async fn test_duplicate_name_maps_to_already_exists() {
        let registry = setup_registry();
        create(&registry, "carol").await;
        let resp = call(&registry, "create", json!({ "name": "carol" })).await;
        assert_eq!(error_code(&resp), ALREADY_EXISTS);
    }

    #[tokio::test]
    async fn test_password_persist_then_sign_requires_password() {
        let registry = setup_registry();
        let public_key = create(&registry, "dave").await;

        let persisted = call(
            &registry,
            "persist",
            json!({ "public_key": public_key, "password": "hunter2" }),
        )
        .await;
        assert_eq!(persisted.result.unwrap()["wrap"], "password");

        let without = call(
            &registry,
            "sign",
            json!({ "public_key": public_key, "message": "m" }),
        )
        .await;
        assert_eq!(error_code(&without), AUTHENTICATION_FAILED);

        let with = call(
            &registry,
            "sign",
            json!({ "public_key": public_key, "message_b64": "AAEC", "password": "hunter2" }),
        )
        .await;
        assert!(with.result.is_some(), "Correct password unlocks the signer");
    }

    #[tokio::test]
    async fn test_delete_then_get_is_not_found() {
        let registry = setup_registry();
        let public_key = create(&registry, "erin").await;

        let address = call(&registry, "address", json!({ "public_key": public_key }))
            .await
            .result
            .unwrap();
        assert_eq!(address["address"], public_key.as_str());

        let deleted = call(&registry, "delete", json!({ "public_key": public_key })).await;
        assert_eq!(deleted.result.unwrap()["deleted"], true);

        let resp = call(&registry, "get", json!({ "public_key": public_key })).await;
        assert_eq!(error_code(&resp), SIGNER_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_bad_requests() {
        let registry = setup_registry();

        let resp = process_request("not json", &registry).await;
        assert_eq!(error_code(&resp), PARSE_ERROR);

        let resp = call(&registry, "export_private_key", Value::Null).await;
        assert_eq!(error_code(&resp), METHOD_NOT_FOUND);

        let resp = call(&registry, "get", json!({ "public_key": "%%%" })).await;
        assert_eq!(error_code(&resp), INVALID_PARAMS);

        let resp = call(&registry, "create", json!({ "name": "x", "backend": "hsm" })).await;
        assert_eq!(error_code(&resp), INVALID_PARAMS);

        let resp = call(&registry, "sign", json!({ "public_key": "AQID" })).await;
        assert_eq!(error_code(&resp), INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_socket_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("run").join("sigvault.sock");
        let server = UdsServer::new(setup_registry(), socket_path.clone());

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            server
                .run(async {
                    let _ = stop_rx.await;
                })
                .await
        });

        for _ in 0..100 {
            if socket_path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&socket_path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600, "Socket must be owner-only");
        }

        let resp = send_request(&socket_path, "create", json!({ "name": "frank" }))
            .await
            .unwrap();
        assert!(resp.result.is_some(), "create over the socket: {:?}", resp.error);

        let resp = send_request(&socket_path, "list", Value::Null).await.unwrap();
        assert_eq!(resp.result.unwrap().as_array().unwrap().len(), 1);

        stop_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
        assert!(!socket_path.exists(), "Socket file is removed on shutdown");
    }

    struct Unencodable;

    impl serde::Serialize for Unencodable {
        fn serialize<S: serde::Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("not representable"))
        }
    }

    #[test]
    fn test_unencodable_result_is_an_error_not_null() {
        assert!(
            matches!(
                to_json(&Unencodable),
                Err(HandlerError::Vault(VaultError::Other(_)))
            ),
            "An encoding failure must not become a successful null result"
        );
    }
}
