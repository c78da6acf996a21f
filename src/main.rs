//! Herald broker daemon.

use clap::Parser;
use std::path::PathBuf;

use herald::config::Settings;
use herald::error::Result;
use herald::server::Server;
use herald::utils::logging::init_logging;

/// Herald CLI.
#[derive(Debug, Parser)]
#[command(name = "herald")]
#[command(about = "Message-routing broker for WebSocket links")]
struct Cli {
    /// TOML config file path. Without one, defaults plus `HERALD_*` variables apply.
    #[arg(long, env = "HERALD_CONFIG")]
    config: Option<PathBuf>,

    /// Print an example configuration file and exit.
    #[arg(long)]
    print_example: bool,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let cli = Cli::parse();

    if cli.print_example {
        println!("{}", Settings::example_config());
        return;
    }

    if let Err(err) = run(cli).await {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let settings = match &cli.config {
        Some(path) => Settings::from_file(path)?,
        None => Settings::default(),
    }
    .apply_env()?;

    settings.validate_strict()?;
    init_logging(&settings.logging)?;

    let server = Server::from_settings(&settings)?;
    server.run().await
}
