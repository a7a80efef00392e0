pub mod commands;
pub mod render;
pub mod repl;
pub mod setup;
pub mod task;

pub use repl::run_repl_mode;
pub use setup::{connect, init_logging, open_store, Wiring};
pub use task::run_exec_mode;
