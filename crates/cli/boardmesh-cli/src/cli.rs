//! Argument parsing: one subcommand per CLI operation.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about = "Operator tooling for a boardmesh node", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate a new Ed25519 keypair and print it.
    GenKey {
        /// Write the keypair as JSON to this file instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Create a new board: sign a BoardMeta, publish it to the content
    /// store, and register it in the local boards registry.
    InitBoard {
        #[arg(long)]
        board_id: String,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Signing key for the board (ed25519:... seed). Generated if omitted.
        #[arg(long)]
        private_key: Option<String>,
        #[arg(long)]
        content_store: String,
        #[arg(long, default_value = "./data")]
        data_dir: PathBuf,
    },

    /// Register a board this node learned about elsewhere by its
    /// BoardMeta CID, after loading and verifying it.
    AddBoard {
        #[arg(long)]
        board_meta_cid: String,
        #[arg(long)]
        content_store: String,
        #[arg(long, default_value = "./data")]
        data_dir: PathBuf,
    },

    /// List the trusted-indexer URLs this node currently trusts.
    ListTrustedIndexers {
        #[arg(long, default_value = "./data")]
        data_dir: PathBuf,
    },

    /// Add a trusted-indexer URL.
    AddTrustedIndexer {
        url: String,
        #[arg(long, default_value = "./data")]
        data_dir: PathBuf,
    },

    /// Remove a trusted-indexer URL.
    RemoveTrustedIndexer {
        url: String,
        #[arg(long, default_value = "./data")]
        data_dir: PathBuf,
    },

    /// Probe every trusted indexer's /healthz and report which respond.
    SyncTrustedIndexers {
        #[arg(long, default_value = "./data")]
        data_dir: PathBuf,
        #[arg(long, default_value_t = 3)]
        timeout_secs: u64,
    },
}
