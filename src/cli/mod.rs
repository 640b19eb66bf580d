// Sigvault — CLI Module
//
// Command-line interface using clap derive macros.
// Subcommands: init, reset, serve, call.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::enclave::SignerBackend;

pub use commands::execute;

/// Sigvault — client-side signing-identity vault.
#[derive(Parser, Debug)]
#[command(name = "sigvault")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Override the gateway socket path (default: $SIGVAULT_SOCKET or the runtime dir).
    #[arg(long, global = true)]
    pub socket: Option<PathBuf>,

    /// Override the data directory holding the durable store.
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Provision the device master secret and create the durable store.
    Init,

    /// Delete the device master secret. Device-wrapped signers become unreadable.
    Reset {
        /// Confirm the reset.
        #[arg(long)]
        yes: bool,
    },

    /// Run the gateway daemon on the Unix socket.
    Serve {
        /// Keep the master secret in process memory instead of the OS keyring.
        #[arg(long)]
        memory_keyring: bool,

        /// Use the in-process software authenticator for authenticator-backed signers.
        #[arg(long)]
        emulate_authenticator: bool,

        /// Default backend for new signers ("software" or "authenticator").
        #[arg(long)]
        backend: Option<SignerBackend>,
    },

    /// Send one JSON-RPC request to a running daemon and print the result.
    Call {
        /// Method name (create, get, list, sign, verify, persist, delete, address).
        method: String,

        /// Request params as a JSON object.
        #[arg(long, default_value = "{}")]
        params: String,
    },
}

// ─── Tests ───────────────────────────────────────────────────────────────────
