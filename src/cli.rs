//! Command line of the `agent-control` utility.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Key management and inspection tools for agent-control servers.
#[derive(Debug, Parser)]
#[command(name = "agent-control", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file.
    #[arg(long, global = true, default_value = agent_control::config::CONFIG_FILE)]
    pub config: PathBuf,

    /// Enables debug logging.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Generate a private key and write it as PKCS#8 PEM.
    Keygen {
        #[arg(long)]
        out: PathBuf,

        /// Replace an existing file.
        #[arg(long, default_value_t = false)]
        force: bool,
    },

    /// Encrypt a value with the public half of a private key.
    Encrypt {
        value: String,

        /// PEM private key; defaults to the configured key.
        #[arg(long)]
        key: Option<PathBuf>,
    },

    /// Decrypt a base64 ciphertext.
    Decrypt {
        ciphertext: String,

        #[arg(long)]
        key: Option<PathBuf>,
    },

    /// Print the public key of a private key.
    PublicKey {
        #[arg(long)]
        key: Option<PathBuf>,
    },

    /// Print the job and case lifecycle as a Mermaid diagram.
    Lifecycle,

    /// Print the effective configuration.
    Config,
}
