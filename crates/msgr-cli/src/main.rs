//! msgr: interactive messaging client.
//!
//! Reads commands from stdin (REGISTER, CONNECT, SEND, ...), talks to the
//! msgr server over the control channel and prints pushed messages as they
//! arrive.

mod config;
mod repl;

use anyhow::{Context, Result};
use clap::Parser;
use msgr_client::{ClientConfig, ClientSession, MessengerClient, SoapNormalizer};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

/// msgr messaging client
#[derive(Parser)]
#[command(name = "msgr", version = "0.1.0", about = "Interactive msgr messaging client")]
struct Cli {
    /// Server host
    #[arg(short, long)]
    server: Option<String>,

    /// Server port
    #[arg(short, long)]
    port: Option<u16>,

    /// SOAP text normalizer URL
    #[arg(long)]
    normalizer: Option<String>,

    /// Config file path
    #[arg(long = "config")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing.
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("msgr=debug,msgr_client=debug,msgr_core=debug")
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("msgr=warn,msgr_client=error,msgr_core=warn")
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        eprintln!("msgr: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(config::default_path);
    let cfg = config::Config::load(&config_path)?.default;

    // CLI flags override config values.
    let host = cli.server.unwrap_or(cfg.server);
    let port = cli.port.unwrap_or(cfg.port);
    let timeout = Duration::from_secs(cfg.timeout_secs);

    let client_config = ClientConfig {
        server: format!("{host}:{port}"),
        request_timeout: timeout,
        push_bind: cfg.push_bind,
    };
    let mut client = MessengerClient::new(client_config, Arc::new(repl::StdoutSink));
    if let Some(url) = cli.normalizer.or(cfg.normalizer_url) {
        let normalizer = SoapNormalizer::new(&url, timeout)
            .with_context(|| format!("failed to set up normalizer at {url}"))?;
        client = client.with_normalizer(Arc::new(normalizer));
    }

    let mut session = ClientSession::new();
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    repl::run(&client, &mut session, stdin).await
}
