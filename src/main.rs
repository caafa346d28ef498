mod cli;
mod ui;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use agent_control::config::ServerConfig;
use agent_control::vault::ServerKeys;
use cli::{Cli, Command};
use ui::Output;

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: &Path) -> Result<ServerConfig> {
    ServerConfig::load_with(path, |name| std::env::var(name).ok())
        .with_context(|| format!("failed to load {}", path.display()))
}

/// The key given on the command line, else the configured one.
fn load_keys(key: Option<PathBuf>, config_path: &Path) -> Result<ServerKeys> {
    let path = match key {
        Some(path) => path,
        None => match load_config(config_path)?.private_key_path {
            Some(path) => path,
            None => bail!("no key given and no private_key_path configured"),
        },
    };
    debug!(path = %path.display(), "loading private key");
    ServerKeys::load(&path).with_context(|| format!("failed to read key {}", path.display()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let out = Output::default();

    match cli.command {
        Command::Keygen { out: path, force } => {
            if path.exists() && !force {
                out.failure(&format!("{} exists, use --force to replace it", path.display()));
                bail!("refusing to overwrite {}", path.display());
            }
            info!("generating private key");
            let keys = ServerKeys::generate()?;
            std::fs::write(&path, keys.private_key_pem()?)
                .with_context(|| format!("failed to write {}", path.display()))?;
            out.success(&format!("Private key written to {}", path.display()));
            out.value(&keys.public_key_pem()?);
        }
        Command::Encrypt { value, key } => {
            let keys = load_keys(key, &cli.config)?;
            out.value(&keys.encrypt(&value)?);
        }
        Command::Decrypt { ciphertext, key } => {
            let keys = load_keys(key, &cli.config)?;
            out.value(&keys.decrypt(&ciphertext)?);
        }
        Command::PublicKey { key } => {
            let keys = load_keys(key, &cli.config)?;
            out.value(&keys.public_key_pem()?);
        }
        Command::Lifecycle => out.lifecycle(),
        Command::Config => {
            let config = load_config(&cli.config)?;
            out.config(&config);
        }
    }
    Ok(())
}
