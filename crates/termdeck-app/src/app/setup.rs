use anyhow::{Context, Result};
use colored::Colorize;
use env_logger::Env;
use log::info;

use termdeck_terminal::{KeyValueStore, Outbox, Terminal};
use termdeck_transport::TransportHandle;

use crate::config::AppConfig;
use crate::store::JsonFileStore;

/// Install the global logger. `RUST_LOG` wins over the configured filter.
pub fn init_logging(level: &str) {
    // A second init (tests, embedding) is harmless
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .try_init();
}

/// Open the history store, if one is configured
pub fn open_store(config: &AppConfig) -> Result<Option<Box<dyn KeyValueStore>>> {
    let Some(path) = &config.history_file else {
        return Ok(None);
    };
    let store = JsonFileStore::open(path)
        .with_context(|| format!("Failed to open history file {}", path.display()))?;
    info!("Persisting history to {}", store.path().display());
    Ok(Some(Box::new(store)))
}

/// A terminal core wired to a running transport
pub struct Wiring {
    pub terminal: Terminal,
    pub transport: TransportHandle,
}

/// Build the terminal core and spawn the connection loop feeding it.
/// Must be called inside a tokio runtime.
pub fn connect(config: &AppConfig) -> Wiring {
    let store = match open_store(config) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("{} {:#}", "History disabled:".yellow(), e);
            None
        }
    };

    let (outbox, outbound_rx) = Outbox::channel();
    let terminal = Terminal::new(config.terminal_config(), outbox, store);
    info!("Connecting to {}", config.backend_url);
    let transport = termdeck_transport::spawn(config.transport_config(), outbound_rx);

    Wiring { terminal, transport }
}
