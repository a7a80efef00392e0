use termdeck_types::{ConnectionState, ProcessId, ProcessState, SessionId};

/// Notification of a change in terminal state.
///
/// Front-ends re-read whatever part of the state a change names; the change
/// itself only carries enough to decide what to redraw.
#[derive(Debug, Clone, PartialEq)]
pub enum StateChange {
    SessionCreated(SessionId),
    SessionClosed(SessionId),
    FocusChanged(SessionId),
    SessionRenamed(SessionId),
    OutputAppended { session_id: SessionId, lines: usize },
    OutputCleared(SessionId),
    ProcessStateChanged { session_id: SessionId, state: ProcessState },
    DraftChanged(SessionId),
    /// The auto-scroll signal of a session flipped
    FollowOutputChanged { session_id: SessionId, follow: bool },
    DirectoryChanged(String),
    BackgroundUpdated(ProcessId),
    BackgroundOutput { process_id: ProcessId, lines: usize },
    BackgroundRemoved(ProcessId),
    ConnectionChanged(ConnectionState),
}
