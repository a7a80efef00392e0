pub mod helpers;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use termdeck_terminal::TerminalConfig;
use termdeck_transport::{
    TransportConfig, DEFAULT_INITIAL_BACKOFF_MS, DEFAULT_MAX_BACKOFF_MS, DEFAULT_SEND_QUEUE_LIMIT,
};
use termdeck_types::{
    DEFAULT_CLOSE_GRACE_MS, DEFAULT_HISTORY_LIMIT, DEFAULT_MAX_OUTPUT_LINES,
    DEFAULT_POLL_INTERVAL_MS,
};

use crate::cli::Cli;
use helpers::{config_file_path, expand_tilde, normalize_ws_url};

pub const DEFAULT_BACKEND_URL: &str = "ws://127.0.0.1:8080/ws";

/// Effective settings, layered: defaults, then the TOML file, then
/// environment and command line (clap reads the `TERMDECK_*` variables).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub backend_url: String,
    pub max_output_lines: usize,
    pub history_limit: usize,
    pub close_grace_ms: u64,
    pub poll_interval_ms: u64,
    pub auto_refresh: bool,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub send_queue_limit: usize,
    pub log_level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            max_output_lines: DEFAULT_MAX_OUTPUT_LINES,
            history_limit: DEFAULT_HISTORY_LIMIT,
            close_grace_ms: DEFAULT_CLOSE_GRACE_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            auto_refresh: true,
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
            send_queue_limit: DEFAULT_SEND_QUEUE_LIMIT,
            log_level: "warn".to_string(),
            history_file: None,
        }
    }
}

impl AppConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).context("Failed to parse config")
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("Invalid config in {}", path.display()))
    }

    /// Build the effective configuration for a command line
    pub fn resolve(cli: &Cli) -> Result<Self> {
        let mut config = match config_file_path(cli.config.as_deref()) {
            Some(path) => Self::load_file(&path)?,
            None => Self::default(),
        };
        config.apply_cli(cli);
        config.normalize()?;
        Ok(config)
    }

    /// Overlay values given on the command line or through the environment
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(url) = &cli.url {
            self.backend_url = url.clone();
        }
        if let Some(level) = &cli.log_level {
            self.log_level = level.clone();
        }
        if let Some(n) = cli.max_output_lines {
            self.max_output_lines = n;
        }
        if let Some(n) = cli.history_limit {
            self.history_limit = n;
        }
        if let Some(ms) = cli.close_grace_ms {
            self.close_grace_ms = ms;
        }
        if let Some(ms) = cli.poll_interval_ms {
            self.poll_interval_ms = ms;
        }
        if cli.no_auto_refresh {
            self.auto_refresh = false;
        }
        if let Some(n) = cli.send_queue_limit {
            self.send_queue_limit = n;
        }
        if let Some(path) = &cli.history_file {
            self.history_file = Some(path.clone());
        }
    }

    fn normalize(&mut self) -> Result<()> {
        self.backend_url = normalize_ws_url(&self.backend_url);
        if let Some(path) = &self.history_file {
            self.history_file = Some(expand_tilde(path)?);
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            self.max_backoff_ms = self.initial_backoff_ms;
        }
        Ok(())
    }

    pub fn terminal_config(&self) -> TerminalConfig {
        TerminalConfig {
            max_output_lines: self.max_output_lines,
            history_limit: self.history_limit,
            close_grace: Duration::from_millis(self.close_grace_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            auto_refresh: self.auto_refresh,
        }
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            url: self.backend_url.clone(),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            send_queue_limit: self.send_queue_limit,
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }
}
