use clap::{Parser, Subcommand};

mod commands;
use commands::{handle_holders, handle_populate, handle_progress};

#[derive(Parser)]
#[command(name = "holderscope")]
#[command(about = "Holderscope CLI - trigger and inspect holder cache population")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Base URL of the holderscope server
    #[arg(long, default_value = "http://127.0.0.1:3030", global = true)]
    server: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Trigger a population run and poll progress until it settles
    Populate {
        /// Contract key (element280, element369, stax, flux)
        contract: String,

        /// Force a re-population even when the cache is fresh
        #[arg(long)]
        force: bool,
    },

    /// Show the current population progress for a contract
    Progress {
        /// Contract key
        contract: String,
    },

    /// Fetch and print a page of holder summaries
    Holders {
        /// Contract key
        contract: String,

        /// 1-based page number
        #[arg(long, default_value_t = 1)]
        page: u64,

        /// Holders per page
        #[arg(long, default_value_t = 25)]
        page_size: u64,

        /// Show a single wallet instead of a page
        #[arg(long)]
        wallet: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Populate { contract, force } => {
            handle_populate(&cli.server, &contract, force).await
        }
        Commands::Progress { contract } => handle_progress(&cli.server, &contract).await,
        Commands::Holders { contract, page, page_size, wallet } => {
            handle_holders(&cli.server, &contract, page, page_size, wallet.as_deref()).await
        }
    }
}
