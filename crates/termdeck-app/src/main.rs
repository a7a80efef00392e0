use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use std::time::Duration;

use termdeck::app::{init_logging, run_exec_mode, run_repl_mode};
use termdeck::{AppConfig, Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = AppConfig::resolve(&cli)?;
    init_logging(&config.log_level);

    match &cli.command {
        Some(Commands::Config) => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Some(Commands::Exec { command, timeout }) => {
            let timeout = timeout.map(Duration::from_secs);
            match run_exec_mode(&config, command, timeout).await {
                Ok(code) => std::process::exit(code),
                Err(e) => {
                    eprintln!("{} {:#}", "Error:".bright_red().bold(), e);
                    std::process::exit(1);
                }
            }
        }
        None => run_repl_mode(&config).await,
    }
}
