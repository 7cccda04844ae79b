#![forbid(unsafe_code)]
//! One-shot client for a running Owonero node

use clap::{Parser, Subcommand};
use colored::*;
use owonero::client::NodeClient;
use owonero::config::DEFAULT_PORT;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Node address, host:port
    #[arg(long, default_value_t = format!("localhost:{}", DEFAULT_PORT))]
    node: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the node's chain height
    Height,
    /// Print the tip block
    Latest,
    /// Print blocks START..=END
    Blocks { start: u64, end: u64 },
    /// List known peers
    Peers,
    /// Register a peer with the node
    Addpeer { address: String },
    /// Forget a peer
    Removepeer { address: String },
    /// Balance and recent history of an address
    Wallet { address: String },
    /// Ask the node to sync with its peers now
    Sync,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = NodeClient::new(cli.node);

    match cli.command {
        Commands::Height => println!("{}", client.get_height().await?),
        Commands::Latest => {
            let block = client.get_latest_block().await?;
            println!("{}", serde_json::to_string_pretty(&block)?);
        }
        Commands::Blocks { start, end } => {
            let blocks = client.get_blocks(start, end).await?;
            println!("{}", serde_json::to_string_pretty(&blocks)?);
        }
        Commands::Peers => {
            let peers = client.get_peers().await?;
            if peers.is_empty() {
                println!("{}", "No peers".yellow());
            }
            for peer in peers {
                println!("{}", peer);
            }
        }
        Commands::Addpeer { address } => {
            client.add_peer(&address).await?;
            println!("{} {}", "✅ Added".green(), address);
        }
        Commands::Removepeer { address } => {
            client.remove_peer(&address).await?;
            println!("{} {}", "✅ Removed".green(), address);
        }
        Commands::Wallet { address } => {
            let info = client.get_wallet(&address).await?;
            println!("{} {}", "Address:".bright_cyan(), info.address);
            println!("{} {}", "Balance:".bright_cyan(), info.balance.to_string().bright_green());
            println!("{} {}", "Transactions:".bright_cyan(), info.transaction_count);
            for entry in info.transactions {
                println!(
                    "  #{:<6} {:<8} {:>8}  {} -> {}",
                    entry.block_index,
                    format!("{:?}", entry.direction).to_lowercase(),
                    entry.amount,
                    entry.from,
                    entry.to
                );
            }
        }
        Commands::Sync => {
            client.trigger_sync().await?;
            println!("{}", "Sync initiated".green());
        }
    }
    Ok(())
}
