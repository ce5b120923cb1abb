//! PreDAuth reference relying party - asks users for fields and decrypts
//! what the custodian delivers to its callback.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use url::Url;

use custodian::process::{init_tracing, utils};
use custodian::CustodianClient;
use relying_party::{http_server, Config, State};

/// PreDAuth reference relying party
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML config file; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on for HTTP requests
    #[arg(short, long)]
    listen_addr: Option<SocketAddr>,

    /// Base URL the custodian reaches this service on
    #[arg(long)]
    public_url: Option<Url>,

    /// Custodian to cross-check generators with before serving
    #[arg(long)]
    custodian_url: Option<Url>,

    /// Field name to request (repeatable)
    #[arg(long = "data")]
    requested: Vec<String>,

    /// Group secret key, hex encoded
    #[arg(long)]
    secret_key: Option<String>,

    /// Seconds a session stays readable after it is opened
    #[arg(long)]
    session_ttl_secs: Option<u64>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    fn into_config(self) -> Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;

        if let Some(listen_addr) = self.listen_addr {
            config.listen_addr = listen_addr;
        }
        if self.public_url.is_some() {
            config.public_url = self.public_url;
        }
        if self.custodian_url.is_some() {
            config.custodian_url = self.custodian_url;
        }
        if !self.requested.is_empty() {
            config.requested = self.requested;
        }
        if self.secret_key.is_some() {
            config.secret_key = self.secret_key;
        }
        if let Some(ttl) = self.session_ttl_secs {
            config.session_ttl_secs = ttl;
        }
        if let Some(log_level) = self.log_level {
            config.log_level = log_level;
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Args::parse().into_config()?;
    let _guards = init_tracing(
        config.log_level()?,
        config.log_dir.as_deref(),
        "relying-party.log",
    );
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        name = env!("CARGO_PKG_NAME"),
        "service starting up"
    );

    if let Some(custodian_url) = &config.custodian_url {
        let generators = CustodianClient::new(custodian_url)?
            .check_generators()
            .await?;
        tracing::info!("generators agree with {}: g={}", custodian_url, generators.g);
    }

    let state = State::from_config(&config)?;
    let (graceful_waiter, _shutdown_tx, shutdown_rx) = utils::graceful_shutdown_blocker()?;
    let api_config = custodian::http_server::Config::new(config.listen_addr);
    http_server::run_api(api_config, state, shutdown_rx).await?;
    let _ = graceful_waiter.await;

    Ok(())
}
