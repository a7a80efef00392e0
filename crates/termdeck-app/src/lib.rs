//! termdeck application library
//!
//! Configuration, history persistence and the interactive front end built
//! on the terminal core.

pub mod app;
pub mod cli;
pub mod config;
pub mod store;

pub use cli::{Cli, Commands};
pub use config::AppConfig;
pub use store::JsonFileStore;
