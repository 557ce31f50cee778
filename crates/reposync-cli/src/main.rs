//! reposync CLI

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use reposync_cli::cmd;
use reposync_cli::cmd::update::UpdateArgs;
use reposync_cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so `--json` output stays parseable
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Update {
            repo,
            scheduled,
            network,
            json,
        } => {
            cmd::update::update(&UpdateArgs {
                repo,
                scheduled,
                network,
                json,
                quiet: cli.quiet,
            })
            .await
        }
        Commands::Repos => cmd::repos::repos().await,
        Commands::Status => cmd::status::status().await,
        Commands::Installed { app, vercode } => cmd::installed::installed(&app, vercode).await,
        Commands::Completions { shell } => {
            cmd::completions::completions(shell);
            Ok(())
        }
    }
}
