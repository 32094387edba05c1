use crate::demo::{run_demo, run_nearby, DemoArgs, NearbyArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use roadside_dispatch::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "Roadside Dispatch",
    about = "Run or demonstrate the roadside assistance dispatch service",
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
    /// Walk one breakdown from creation to completion and print every fanned-out event
    Demo(DemoArgs),
    /// Rank the demo workshops around a point
    Nearby(NearbyArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Preload the Nagpur demo requester, vehicle and workshops
    #[arg(long)]
    pub(crate) seed_demo: bool,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Demo(args) => run_demo(args).await,
        Command::Nearby(args) => run_nearby(args),
    }
}
