//! questkit CLI

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use questkit_cli::cmd;
use questkit_cli::session::SessionOptions;
use questkit_cli::{Cli, Commands};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over -v
    let default_level = if cli.verbose { "questkit=debug" } else { "questkit=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let opts = SessionOptions {
        app: cli.app,
        assume_yes: cli.yes,
    };

    match cli.command {
        Commands::Status => cmd::status::status(&opts).await,
        Commands::Patch => cmd::patch::patch(&opts).await,
        Commands::Mods => cmd::mods::list(&opts).await,
        Commands::Import { paths, destination } => {
            cmd::import::import(&opts, paths, destination).await
        }
        Commands::Install { id } => cmd::mods::install(&opts, &id).await,
        Commands::Uninstall { id } => cmd::mods::uninstall(&opts, &id).await,
        Commands::Remove { id } => cmd::mods::remove(&opts, &id).await,
        Commands::UninstallApp => cmd::uninstall_app::uninstall_app(&opts).await,
        Commands::CoreMods { fix } => cmd::core_mods::core_mods(&opts, fix).await,
    }
}
