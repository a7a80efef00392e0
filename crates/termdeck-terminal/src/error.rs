use thiserror::Error;

use termdeck_types::{ProcessId, SessionId};

#[derive(Error, Debug)]
pub enum TerminalError {
    #[error("Session not found for ID: {0}")]
    SessionNotFound(SessionId),

    #[error("Background process not found: {0}")]
    ProcessNotFound(ProcessId),

    #[error("A command is already running in session {0}")]
    AlreadyRunning(SessionId),

    #[error("Empty command")]
    EmptyCommand,

    #[error("Process {0} is still active")]
    ProcessActive(ProcessId),

    #[error("Invalid output filter: {0}")]
    InvalidFilter(#[from] regex::Error),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

pub type Result<T> = std::result::Result<T, TerminalError>;
