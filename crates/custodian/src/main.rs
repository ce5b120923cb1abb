//! PreDAuth custodian - stores a user's encrypted fields and re-encrypts
//! them for relying parties the user authorizes.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use custodian::{spawn_service, Config};

/// PreDAuth custodian service
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML config file; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on for HTTP requests
    #[arg(short, long)]
    listen_addr: Option<SocketAddr>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<String>,

    /// Directory for daily log files
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Accepted clock skew for signed requests, in seconds
    #[arg(long)]
    replay_window_secs: Option<u64>,

    /// Distinct contacts that must present a code to recover
    #[arg(long)]
    threshold: Option<usize>,

    /// Recovery agent secret key, hex encoded (repeatable)
    #[arg(long = "agent-key")]
    agent_keys: Vec<String>,
}

impl Args {
    fn into_config(self) -> Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;

        if let Some(listen_addr) = self.listen_addr {
            config.listen_addr = listen_addr;
        }
        if let Some(log_level) = self.log_level {
            config.log_level = log_level;
        }
        if let Some(log_dir) = self.log_dir {
            config.log_dir = Some(log_dir);
        }
        if let Some(window) = self.replay_window_secs {
            config.replay_window_secs = window;
        }
        if let Some(threshold) = self.threshold {
            config.recovery.threshold = threshold;
        }
        if !self.agent_keys.is_empty() {
            config.recovery.agent_keys = self.agent_keys;
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Args::parse().into_config()?;
    spawn_service(&config).await?;
    Ok(())
}
