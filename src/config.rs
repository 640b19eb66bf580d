// Sigvault — Configuration
//
// Runtime settings with defaults, `SIGVAULT_*` environment overrides, and
// validation. CLI flags are applied on top by the command handlers.

use std::path::PathBuf;
use std::time::Duration;

use crate::authenticator::RelyingParty;
use crate::codec::P256_COORDINATE_WIDTH;
use crate::enclave::{BoundaryConfig, SignerBackend, MIN_PBKDF2_ITERATIONS};
use crate::error::VaultError;

/// Original session lifetime for ephemeral signers: 24 hours.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

pub const DEFAULT_AUTHENTICATOR_TIMEOUT: Duration = Duration::from_secs(60);

pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 310_000;

#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Directory holding the durable SQLite store.
    pub data_dir: PathBuf,
    pub socket_path: PathBuf,
    /// Default lifetime of an ephemeral signer; `None` means no expiry.
    pub session_timeout: Option<Duration>,
    pub authenticator_timeout: Duration,
    pub pbkdf2_iterations: u32,
    pub coordinate_width: usize,
    pub relying_party: RelyingParty,
    pub default_backend: SignerBackend,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            socket_path: default_socket_path(),
            session_timeout: Some(DEFAULT_SESSION_TIMEOUT),
            authenticator_timeout: DEFAULT_AUTHENTICATOR_TIMEOUT,
            pbkdf2_iterations: DEFAULT_PBKDF2_ITERATIONS,
            coordinate_width: P256_COORDINATE_WIDTH,
            relying_party: RelyingParty::default(),
            default_backend: SignerBackend::default(),
        }
    }
}

impl VaultConfig {
    /// Defaults overridden by `SIGVAULT_*` variables from the process environment.
    pub fn from_env() -> Result<Self, VaultError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, VaultError> {
        let mut config = Self::default();

        if let Some(dir) = lookup("SIGVAULT_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(socket) = lookup("SIGVAULT_SOCKET") {
            config.socket_path = PathBuf::from(socket);
        }
        if let Some(secs) = lookup("SIGVAULT_SESSION_TIMEOUT_SECS") {
            let secs: u64 = parse_number("SIGVAULT_SESSION_TIMEOUT_SECS", &secs)?;
            config.session_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(ms) = lookup("SIGVAULT_AUTHENTICATOR_TIMEOUT_MS") {
            let ms: u64 = parse_number("SIGVAULT_AUTHENTICATOR_TIMEOUT_MS", &ms)?;
            config.authenticator_timeout = Duration::from_millis(ms);
        }
        if let Some(iterations) = lookup("SIGVAULT_PBKDF2_ITERATIONS") {
            config.pbkdf2_iterations = parse_number("SIGVAULT_PBKDF2_ITERATIONS", &iterations)?;
        }
        if let Some(rp_id) = lookup("SIGVAULT_RP_ID") {
            config.relying_party.id = rp_id;
        }
        if let Some(backend) = lookup("SIGVAULT_BACKEND") {
            config.default_backend = backend.parse().map_err(VaultError::Config)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), VaultError> {
        if self.pbkdf2_iterations < MIN_PBKDF2_ITERATIONS {
            return Err(VaultError::Config(format!(
                "pbkdf2_iterations must be at least {} (got {})",
                MIN_PBKDF2_ITERATIONS, self.pbkdf2_iterations
            )));
        }
        if self.coordinate_width == 0 {
            return Err(VaultError::Config("coordinate_width must be non-zero".into()));
        }
        if self.authenticator_timeout.is_zero() {
            return Err(VaultError::Config(
                "authenticator_timeout must be non-zero".into(),
            ));
        }
        if self.relying_party.id.is_empty() {
            return Err(VaultError::Config("relying party id must not be empty".into()));
        }
        Ok(())
    }

    /// Path of the durable store inside `data_dir`.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("sigvault.db")
    }

    /// The subset of settings the custody boundary needs.
    pub fn boundary(&self) -> BoundaryConfig {
        BoundaryConfig {
            relying_party: self.relying_party.clone(),
            authenticator_timeout: self.authenticator_timeout,
            pbkdf2_iterations: self.pbkdf2_iterations,
            coordinate_width: self.coordinate_width,
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, VaultError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| VaultError::Config(format!("{}: {}", key, e)))
}

/// Default directory for Sigvault data files.
fn default_data_dir() -> PathBuf {
    dirs_next::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sigvault")
}

/// `$XDG_RUNTIME_DIR/sigvault/sigvault.sock`, falling back to `/tmp`.
fn default_socket_path() -> PathBuf {
    let runtime_dir = std::env::var("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"));
    runtime_dir.join("sigvault").join("sigvault.sock")
}

// ─── Tests ───────────────────────────────────────────────────────────────────
