use std::path::PathBuf;

use anyhow::Result;
use clap::{CommandFactory, Parser};

mod cli;

use cli::Commands;

#[derive(Parser)]
#[command(name = "dbfork")]
#[command(about = "Branch a Postgres-backed platform: isolated database branches with per-branch pooling")]
#[command(version = "0.2.0")]
#[command(disable_help_subcommand = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Path to the config file (defaults to ./dbfork.yml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Some(command) => cli::handle_command(command, cli.json, cli.config).await?,
        None => {
            // Print help when no command is provided
            let mut command = Cli::command();
            command.print_help()?;
        }
    }

    Ok(())
}
