use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CLI arguments for termdeck
#[derive(Parser, Debug, Default)]
#[command(name = "termdeck")]
#[command(about = "termdeck - multi-session terminal for a remote command backend")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to a TOML config file (default: ./termdeck.toml if present)
    #[arg(long, short = 'c', value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Backend WebSocket URL (e.g. ws://127.0.0.1:8080/ws)
    #[arg(long, value_name = "URL", env = "TERMDECK_URL")]
    pub url: Option<String>,

    /// Log filter, e.g. "warn" or "termdeck_transport=debug"
    #[arg(long, value_name = "FILTER", env = "TERMDECK_LOG")]
    pub log_level: Option<String>,

    /// Lines of output kept per session and per background process
    #[arg(long, value_name = "N", env = "TERMDECK_MAX_OUTPUT_LINES")]
    pub max_output_lines: Option<usize>,

    /// Commands remembered for history recall
    #[arg(long, value_name = "N", env = "TERMDECK_HISTORY_LIMIT")]
    pub history_limit: Option<usize>,

    /// How long a closed session waits for its process before detaching it
    #[arg(long, value_name = "MS")]
    pub close_grace_ms: Option<u64>,

    /// Background process list polling interval
    #[arg(long, value_name = "MS")]
    pub poll_interval_ms: Option<u64>,

    /// Disable periodic background process polling
    #[arg(long)]
    pub no_auto_refresh: bool,

    /// Outbound messages held while disconnected
    #[arg(long, value_name = "N")]
    pub send_queue_limit: Option<usize>,

    /// File used to persist command history
    #[arg(long, value_name = "PATH", env = "TERMDECK_HISTORY_FILE")]
    pub history_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one command in a fresh session, stream its output and exit with its status
    Exec {
        /// Command line to run on the backend
        command: String,
        /// Give up after this many seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags() {
        let cli = Cli::try_parse_from([
            "termdeck",
            "--url",
            "ws://example:9000/ws",
            "--max-output-lines",
            "200",
            "--no-auto-refresh",
        ])
        .unwrap();
        assert_eq!(cli.url.as_deref(), Some("ws://example:9000/ws"));
        assert_eq!(cli.max_output_lines, Some(200));
        assert!(cli.no_auto_refresh);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_parse_exec_subcommand() {
        let cli = Cli::try_parse_from(["termdeck", "exec", "ls -la", "--timeout", "5"]).unwrap();
        match cli.command {
            Some(Commands::Exec { command, timeout }) => {
                assert_eq!(command, "ls -la");
                assert_eq!(timeout, Some(5));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_rejects_bad_number() {
        assert!(Cli::try_parse_from(["termdeck", "--history-limit", "lots"]).is_err());
    }
}
