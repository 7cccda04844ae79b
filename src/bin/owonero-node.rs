#![forbid(unsafe_code)]
//! Owonero network node

use clap::Parser;
use colored::*;
use owonero::config::load_config;
use owonero::node::Node;
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about = "Run an Owonero node", long_about = None)]
struct Cli {
    /// TOML config file; missing file means defaults
    #[arg(long, default_value = "owonero.toml")]
    config: PathBuf,
    /// Address to listen on, e.g. 0.0.0.0:6969
    #[arg(long)]
    listen: Option<String>,
    /// Ledger file
    #[arg(long)]
    chain_file: Option<String>,
    /// Extra peer address (repeatable)
    #[arg(long = "peer")]
    peers: Vec<String>,
    /// Skip the sync pass at startup
    #[arg(long)]
    no_sync: bool,
    #[arg(long, default_value = "info")]
    log_level: tracing::Level,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    tracing_subscriber::fmt().with_max_level(cli.log_level).init();

    let mut config = load_config(&cli.config)?.node;
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if let Some(chain_file) = cli.chain_file {
        config.chain_file = chain_file;
    }
    config.peers.extend(cli.peers);
    if cli.no_sync {
        config.sync_on_startup = false;
    }

    println!("{}", "⛓  Owonero node".bright_cyan().bold());
    println!("Ledger: {}", config.chain_file.bright_yellow());

    let handle = Node::open(config).start().await?;
    println!("Listening on {}", handle.local_addr().to_string().bright_green());

    tokio::signal::ctrl_c().await?;
    println!("{}", "Shutting down...".yellow());
    handle.shutdown().await;
    Ok(())
}
