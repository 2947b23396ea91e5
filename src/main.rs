use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use wealthpath::api::{self, OptimizeArgs};
use wealthpath::config::AppConfig;

#[derive(Parser, Debug)]
#[command(
    name = "wealthpath",
    version,
    about = "Lifetime consumption optimizer with a bequest target"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API.
    Serve {
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// Solve one parameter set and print the result.
    Optimize(OptimizeArgs),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve { port, db_path } => {
            let mut config = match AppConfig::from_env() {
                Ok(config) => config,
                Err(e) => {
                    tracing::error!("{e}");
                    std::process::exit(1);
                }
            };
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(db_path) = db_path {
                config.db_path = db_path;
            }
            if let Err(e) = api::run_http_server(config).await {
                tracing::error!("server error: {e}");
                std::process::exit(1);
            }
        }
        Command::Optimize(args) => match api::run_optimize_command(&args) {
            Ok(output) => print!("{output}"),
            Err(e) => {
                tracing::error!("{e}");
                std::process::exit(1);
            }
        },
    }
}
