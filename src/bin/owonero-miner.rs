#![forbid(unsafe_code)]
//! Owonero miner

use clap::Parser;
use colored::*;
use owonero::config::load_config;
use owonero::miner::Miner;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Parser)]
#[command(author, version, about = "Mine Owonero blocks against a node", long_about = None)]
struct Cli {
    #[arg(long, default_value = "owonero.toml")]
    config: PathBuf,
    /// Node to mine against, host:port
    #[arg(long)]
    node: Option<String>,
    /// Payout address for block rewards
    #[arg(long)]
    address: Option<String>,
    #[arg(long)]
    workers: Option<usize>,
    /// Stop after this many accepted blocks (0 = forever)
    #[arg(long)]
    blocks: Option<u64>,
    #[arg(long, default_value = "info")]
    log_level: tracing::Level,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    tracing_subscriber::fmt().with_max_level(cli.log_level).init();

    let mut config = load_config(&cli.config)?.miner;
    if let Some(node) = cli.node {
        config.node_address = node;
    }
    if let Some(address) = cli.address {
        config.payout_address = address;
    }
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    if let Some(blocks) = cli.blocks {
        config.max_blocks = blocks;
    }

    println!("{}", "⛏  Owonero miner".bright_cyan().bold());
    let miner = Arc::new(Miner::new(config)?);

    let (shutdown, shutdown_rx) = watch::channel(false);
    let mut run = tokio::spawn(miner.clone().run(shutdown_rx));

    let stats = tokio::select! {
        finished = &mut run => finished?,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            println!("{}", "Stopping workers...".yellow());
            let _ = shutdown.send(true);
            run.await?
        }
    };

    println!(
        "Mined {} blocks ({} rejected), {:.1} H/s average",
        stats.blocks_found.to_string().bright_green(),
        stats.blocks_rejected,
        stats.hashrate()
    );
    Ok(())
}
