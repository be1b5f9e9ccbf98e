use anyhow::Result;
use clap::Parser;
use multiview_vae::cli::{simulate, train, Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Simulate(args) => {
            simulate::run(args)?;
        }
        Commands::Train(args) => {
            train::run(args)?;
        }
    }

    Ok(())
}
