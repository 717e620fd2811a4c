use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use env_logger::{Builder, WriteStyle};
use log::LevelFilter;

use crate::api::parse_address;
use crate::dashboard::Dashboard;
use crate::notifier::LogNotifier;
use crate::rpc::{HttpRpc, SharedRpc, SimRpc};

mod api;
mod contracts;
mod dashboard;
mod notifier;
mod rpc;

#[derive(Parser)]
struct Args {
    #[command(subcommand)]
    command: Commands,
    /// JSON-RPC endpoint of the wallet-managed node
    #[arg(short, long, default_value = "http://127.0.0.1:8545")]
    url: String,
    /// Address of the lottery contract
    #[arg(short, long)]
    contract: Option<String>,
    /// Run against the in-memory simulated chain instead of a node
    #[arg(short, long)]
    test: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the lottery state
    Status,
    /// Open the bets until now + duration
    OpenBets {
        #[arg(short, long)]
        duration: String,
    },
    /// Close the bets and run the draw
    CloseBets,
    /// Buy lottery tokens, paying in native currency
    BuyTokens {
        #[arg(short, long)]
        amount: String,
    },
    /// Place a batch of bets
    Bet {
        #[arg(short, long)]
        times: String,
    },
    /// Withdraw from your prize
    WithdrawPrize {
        #[arg(short, long)]
        amount: String,
    },
    /// Withdraw from the owner pool
    WithdrawOwnerPool {
        #[arg(short, long)]
        amount: String,
    },
    /// Burn lottery tokens (not wired up yet)
    BurnTokens {
        #[arg(short, long)]
        amount: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    Builder::default()
        .filter_level(LevelFilter::Info)
        .write_style(WriteStyle::Always)
        .init();
    let args = Args::parse();

    let mut dashboard = if args.test {
        let sim = SimRpc::seeded();
        let rpc: SharedRpc = Arc::new(Box::new(sim.clone()));
        Dashboard::new(rpc, sim.lottery_address(), Box::new(LogNotifier))
    } else {
        let contract = args
            .contract
            .as_deref()
            .context("--contract is required unless --test is set")?;
        let rpc: SharedRpc = Arc::new(Box::new(HttpRpc::new(args.url.clone())));
        Dashboard::new(rpc, parse_address(contract)?, Box::new(LogNotifier))
    };
    dashboard.initialize().await?;

    match args.command {
        Commands::Status => {}
        Commands::OpenBets { duration } => dashboard.open_bets(&duration).await,
        Commands::CloseBets => dashboard.close_bets().await,
        Commands::BuyTokens { amount } => dashboard.buy_tokens(&amount).await,
        Commands::Bet { times } => dashboard.bet(&times).await,
        Commands::WithdrawPrize { amount } => dashboard.withdraw_prize(&amount).await,
        Commands::WithdrawOwnerPool { amount } => dashboard.withdraw_owner_pool(&amount).await,
        Commands::BurnTokens { amount } => dashboard.burn_tokens(&amount).await,
    }
    println!("{}", dashboard.snapshot());
    Ok(())
}
