// Sigvault — CLI Command Handlers
//
// Each function handles one CLI subcommand. `serve` wires the durable store,
// master-key provider, and authenticator into a signer registry and runs the
// UDS gateway over it; `call` is a one-shot client for that gateway.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

use crate::authenticator::{PlatformAuthenticator, SoftwareAuthenticator, UnavailableAuthenticator};
use crate::config::VaultConfig;
use crate::enclave::{KeyringProvider, MasterKeyProvider, MemoryKeyProvider, SignerBackend};
use crate::error::VaultError;
use crate::gateway::{send_request, UdsServer};
use crate::registry::SignerRegistry;
use crate::store::{Database, SessionStore, SqliteKeyValueStore};

use super::{Cli, Commands};

/// Execute the parsed CLI command.
pub async fn execute(cli: Cli) -> Result<(), VaultError> {
    let config = resolve_config(VaultConfig::from_env()?, cli.socket, cli.data_dir)?;

    match cli.command {
        Commands::Init => cmd_init(&config),
        Commands::Reset { yes } => cmd_reset(yes),
        Commands::Serve {
            memory_keyring,
            emulate_authenticator,
            backend,
        } => cmd_serve(config, memory_keyring, emulate_authenticator, backend).await,
        Commands::Call { method, params } => cmd_call(&config, &method, &params).await,
    }
}

/// Apply command-line overrides on top of the environment config.
fn resolve_config(
    mut config: VaultConfig,
    socket: Option<PathBuf>,
    data_dir: Option<PathBuf>,
) -> Result<VaultConfig, VaultError> {
    if let Some(socket) = socket {
        config.socket_path = socket;
    }
    if let Some(dir) = data_dir {
        config.data_dir = dir;
    }
    config.validate()?;
    Ok(config)
}

// ─── Init / Reset ────────────────────────────────────────────────────────────

fn cmd_init(config: &VaultConfig) -> Result<(), VaultError> {
    let provider = KeyringProvider::new();

    std::fs::create_dir_all(&config.data_dir)?;

    let existed = provider.has_master_secret()?;
    provider.get_or_create_master_secret()?;

    let path = config.db_path();
    let _db = Database::open(&path)?;

    println!("✓ Sigvault initialized");
    println!("  Database: {}", path.display());
    if existed {
        println!("  Device master secret already present in platform keyring");
    } else {
        println!("  Device master secret stored in platform keyring");
    }
    println!();
    println!("Next: start the daemon with `sigvault serve`");

    Ok(())
}

fn cmd_reset(confirmed: bool) -> Result<(), VaultError> {
    if !confirmed {
        return Err(VaultError::Other(
            "Reset makes every device-wrapped signer unreadable. Re-run with --yes to confirm."
                .to_string(),
        ));
    }

    KeyringProvider::new().delete_master_secret()?;
    println!("✓ Device master secret removed");
    println!("  Password-wrapped signers remain readable with their passwords");

    Ok(())
}

// ─── Serve ───────────────────────────────────────────────────────────────────

async fn cmd_serve(
    mut config: VaultConfig,
    memory_keyring: bool,
    emulate_authenticator: bool,
    backend: Option<SignerBackend>,
) -> Result<(), VaultError> {
    if let Some(backend) = backend {
        config.default_backend = backend;
    }

    let provider: Arc<dyn MasterKeyProvider> = if memory_keyring {
        tracing::warn!("Using in-memory keyring: device-wrapped signers will not survive restart");
        Arc::new(MemoryKeyProvider::new())
    } else {
        let provider = KeyringProvider::new();
        if !provider.has_master_secret()? {
            return Err(VaultError::Other(
                "Sigvault is not initialized. Run `sigvault init` first.".to_string(),
            ));
        }
        Arc::new(provider)
    };

    let authenticator: Arc<dyn PlatformAuthenticator> = if emulate_authenticator {
        Arc::new(SoftwareAuthenticator::new(format!(
            "https://{}",
            config.relying_party.id
        )))
    } else {
        Arc::new(UnavailableAuthenticator)
    };

    std::fs::create_dir_all(&config.data_dir)?;
    let durable = Arc::new(SqliteKeyValueStore::new(Database::open(&config.db_path())?));

    let socket_path = config.socket_path.clone();
    let registry = Arc::new(SignerRegistry::open(
        config,
        Arc::new(SessionStore::new()),
        durable,
        authenticator,
        provider,
    )?);

    println!("Starting Sigvault gateway at {}...", socket_path.display());
    let server = UdsServer::new(Arc::clone(&registry), socket_path);
    server
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await?;

    registry.close()?;
    Ok(())
}

// ─── Call ────────────────────────────────────────────────────────────────────

async fn cmd_call(config: &VaultConfig, method: &str, params: &str) -> Result<(), VaultError> {
    let params: Value = serde_json::from_str(params)
        .map_err(|e| VaultError::Config(format!("--params is not valid JSON: {}", e)))?;

    let response = send_request(&config.socket_path, method, params).await?;

    if let Some(error) = response.error {
        return Err(VaultError::Other(format!(
            "{} (code {})",
            error.message, error.code
        )));
    }

    let result = response.result.unwrap_or(Value::Null);
    let pretty = serde_json::to_string_pretty(&result)
        .map_err(|e| VaultError::Other(format!("response encoding: {}", e)))?;
    println!("{}", pretty);

    Ok(())
}

// ─── Tests ───────────────────────────────────────────────────────────────────
