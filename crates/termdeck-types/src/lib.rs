//! Core types and structures for termdeck
//!
//! This crate provides the identifiers, lifecycle enums and output records
//! shared by the protocol, terminal and transport crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Constants
// ============================================================================

/// Maximum number of output lines retained per buffer
pub const DEFAULT_MAX_OUTPUT_LINES: usize = 1000;

/// Maximum number of commands remembered per session
pub const DEFAULT_HISTORY_LIMIT: usize = 500;

/// How long a closing session waits for its process to exit
pub const DEFAULT_CLOSE_GRACE_MS: u64 = 3000;

/// Background process list polling interval
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

/// Working directory used before the backend reports one
pub const DEFAULT_WORKING_DIRECTORY: &str = "~";

// ============================================================================
// Identifiers
// ============================================================================

/// Session (tab) ID type
pub type SessionId = Uuid;

/// Backend-assigned process identifier.
///
/// Backends report these either as JSON numbers (OS pids) or as opaque
/// strings, so both forms are accepted and normalised to a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(String);

impl ProcessId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProcessId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<u32> for ProcessId {
    fn from(pid: u32) -> Self {
        Self(pid.to_string())
    }
}

impl Serialize for ProcessId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ProcessId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match serde_json::Value::deserialize(deserializer)? {
            serde_json::Value::String(s) if !s.is_empty() => Ok(ProcessId(s)),
            serde_json::Value::Number(n) => Ok(ProcessId(n.to_string())),
            other => Err(serde::de::Error::custom(format!(
                "invalid process id: {}",
                other
            ))),
        }
    }
}

// ============================================================================
// Process Lifecycle
// ============================================================================

/// Lifecycle state of a tracked process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Pending,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl ProcessState {
    /// Pending and Running are the only states that can still change.
    pub fn is_active(&self) -> bool {
        matches!(self, ProcessState::Pending | ProcessState::Running)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// State implied by an exit code: zero completes, anything else fails.
    pub fn from_exit_code(code: Option<i32>) -> Self {
        match code {
            Some(0) => ProcessState::Completed,
            _ => ProcessState::Failed,
        }
    }

    /// Map a backend status string onto a lifecycle state.
    pub fn from_status(status: &str) -> Option<Self> {
        match status.to_lowercase().as_str() {
            "pending" | "starting" | "queued" => Some(ProcessState::Pending),
            "running" | "active" => Some(ProcessState::Running),
            "completed" | "done" | "exited" | "finished" | "success" => {
                Some(ProcessState::Completed)
            }
            "failed" | "error" | "crashed" => Some(ProcessState::Failed),
            "stopped" | "killed" | "terminated" | "cancelled" => Some(ProcessState::Stopped),
            _ => None,
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessState::Pending => write!(f, "pending"),
            ProcessState::Running => write!(f, "running"),
            ProcessState::Completed => write!(f, "completed"),
            ProcessState::Failed => write!(f, "failed"),
            ProcessState::Stopped => write!(f, "stopped"),
        }
    }
}

// ============================================================================
// Output Types
// ============================================================================

/// Origin of an output line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputKind {
    Stdout,
    Stderr,
    SystemSuccess,
    SystemError,
    /// The prompt and command echoed at submission time
    Prompt,
}

impl OutputKind {
    pub fn is_system(&self) -> bool {
        matches!(self, OutputKind::SystemSuccess | OutputKind::SystemError)
    }
}

/// Basic ANSI foreground colours
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Color {
    Black,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
}

impl Color {
    /// Colour for an SGR foreground code in 30..=37
    pub fn from_sgr(code: u8) -> Option<Self> {
        match code {
            30 => Some(Color::Black),
            31 => Some(Color::Red),
            32 => Some(Color::Green),
            33 => Some(Color::Yellow),
            34 => Some(Color::Blue),
            35 => Some(Color::Magenta),
            36 => Some(Color::Cyan),
            37 => Some(Color::White),
            _ => None,
        }
    }
}

/// Text style applied to a span of an output line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Style {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub fg: Option<Color>,
    #[serde(default)]
    pub bold: bool,
}

impl Style {
    pub fn is_plain(&self) -> bool {
        self.fg.is_none() && !self.bold
    }
}

/// Styled byte range `[start, end)` within `OutputLine::content`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleSpan {
    pub start: usize,
    pub end: usize,
    pub style: Style,
}

/// A single line of process output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputLine {
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spans: Vec<StyleSpan>,
    pub timestamp: DateTime<Utc>,
    pub kind: OutputKind,
}

impl OutputLine {
    /// Plain line without style spans, stamped now
    pub fn plain(kind: OutputKind, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            spans: Vec::new(),
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn system_success(content: impl Into<String>) -> Self {
        Self::plain(OutputKind::SystemSuccess, content)
    }

    pub fn system_error(content: impl Into<String>) -> Self {
        Self::plain(OutputKind::SystemError, content)
    }
}

// ============================================================================
// Connection
// ============================================================================

/// Transport connection status as seen by the core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Reconnecting { attempt } => {
                write!(f, "reconnecting (attempt {})", attempt)
            }
        }
    }
}
