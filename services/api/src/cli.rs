use crate::commands::{
    run_dispatch, run_link_mint, run_link_verify, DispatchArgs, MintArgs, VerifyArgs,
};
use crate::server;
use budget_alerts::error::AppError;
use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "Budget Alerts",
    about = "Evaluate budgets and dispatch deduplicated threshold alerts",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Run one alert pass over a CSV export of budget snapshots
    Dispatch(DispatchArgs),
    /// Mint or verify budget access links
    Link {
        #[command(subcommand)]
        command: LinkCommand,
    },
}

#[derive(Subcommand, Debug)]
enum LinkCommand {
    /// Mint a signed access link for a budget and recipient
    Mint(MintArgs),
    /// Verify an access token and print its claims
    Verify(VerifyArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Dispatch(args) => run_dispatch(args).await,
        Command::Link {
            command: LinkCommand::Mint(args),
        } => run_link_mint(args),
        Command::Link {
            command: LinkCommand::Verify(args),
        } => run_link_verify(args),
    }
}
