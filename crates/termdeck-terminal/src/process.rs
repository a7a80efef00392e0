use chrono::{DateTime, Utc};
use log::{debug, trace};
use serde::Serialize;

use termdeck_types::{ProcessId, ProcessState, SessionId};

/// Outcome of feeding an event to a [`ProcessHandle`].
///
/// Callers emit user-visible side effects (system lines, notifications) only
/// for `Applied`, which is what keeps duplicate exit events from printing
/// twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    Ignored,
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied)
    }
}

/// Lifecycle record of one process, foreground or background
#[derive(Debug, Clone, Serialize)]
pub struct ProcessHandle {
    /// Backend-assigned id, absent until the spawn is acknowledged
    pub process_id: Option<ProcessId>,
    pub command: String,
    /// Owning session for foreground processes
    pub session_id: Option<SessionId>,
    pub state: ProcessState,
    pub exit_code: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Set while the transport is down and the real state cannot be observed
    pub status_unknown: bool,
    pub kill_requested_at: Option<DateTime<Utc>>,
    /// The backend has reported the exit, or a kill confirmation
    pub exit_reported: bool,
}

impl ProcessHandle {
    /// A freshly submitted foreground command, waiting for the backend
    pub fn foreground(session_id: SessionId, command: impl Into<String>) -> Self {
        Self {
            process_id: None,
            command: command.into(),
            session_id: Some(session_id),
            state: ProcessState::Pending,
            exit_code: None,
            started_at: Utc::now(),
            completed_at: None,
            status_unknown: false,
            kill_requested_at: None,
            exit_reported: false,
        }
    }

    /// A process first seen through the background process reports
    pub fn background(process_id: ProcessId, command: impl Into<String>, state: ProcessState) -> Self {
        let now = Utc::now();
        Self {
            process_id: Some(process_id),
            command: command.into(),
            session_id: None,
            state,
            exit_code: None,
            started_at: now,
            completed_at: state.is_terminal().then_some(now),
            status_unknown: false,
            kill_requested_at: None,
            exit_reported: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Events without an id always match; otherwise both ids must agree
    /// once the backend has assigned one.
    pub fn matches_id(&self, pid: Option<&ProcessId>) -> bool {
        match (pid, self.process_id.as_ref()) {
            (Some(incoming), Some(known)) => incoming == known,
            _ => true,
        }
    }

    /// Killed locally while the backend has not yet confirmed the exit
    pub fn awaits_exit_report(&self) -> bool {
        self.kill_requested_at.is_some() && !self.exit_reported
    }

    fn label(&self) -> String {
        match &self.process_id {
            Some(pid) => pid.to_string(),
            None => format!("<pending:{}>", self.command),
        }
    }

    pub fn on_spawn_ack(&mut self, pid: Option<ProcessId>) -> Transition {
        if !self.matches_id(pid.as_ref()) {
            debug!("Ignoring spawn ack for stale process {:?} (tracking {})", pid, self.label());
            return Transition::Ignored;
        }
        if self.process_id.is_none() {
            self.process_id = pid;
        }
        self.status_unknown = false;

        match self.state {
            ProcessState::Pending => {
                self.state = ProcessState::Running;
                Transition::Applied
            }
            _ => Transition::Ignored,
        }
    }

    /// Output is accepted in every state, including after exit. The only
    /// rejection is a chunk addressed to a different process.
    pub fn on_output(&mut self, pid: Option<&ProcessId>, chunk: &str) -> Transition {
        if !self.matches_id(pid) {
            debug!("Dropping output for stale process {:?} (tracking {})", pid, self.label());
            return Transition::Ignored;
        }
        trace!("{}: {} bytes of output", self.label(), chunk.len());
        self.status_unknown = false;
        if self.state == ProcessState::Pending {
            self.state = ProcessState::Running;
        }
        Transition::Applied
    }

    pub fn on_exit(&mut self, pid: Option<&ProcessId>, exit_code: Option<i32>) -> Transition {
        if !self.matches_id(pid) {
            debug!("Ignoring exit for stale process {:?} (tracking {})", pid, self.label());
            return Transition::Ignored;
        }
        if self.process_id.is_none() {
            self.process_id = pid.cloned();
        }
        self.status_unknown = false;
        if self.state.is_terminal() {
            debug!("Duplicate exit for {} ignored (already {})", self.label(), self.state);
            return Transition::Ignored;
        }
        self.exit_reported = true;

        self.state = ProcessState::from_exit_code(exit_code);
        self.exit_code = exit_code;
        self.completed_at = Some(Utc::now());
        Transition::Applied
    }

    /// Local, optimistic termination
    pub fn on_kill_requested(&mut self) -> Transition {
        if self.state.is_terminal() {
            return Transition::Ignored;
        }
        let now = Utc::now();
        self.state = ProcessState::Stopped;
        self.kill_requested_at = Some(now);
        self.completed_at = Some(now);
        Transition::Applied
    }

    /// The backend reported the exit of a process already stopped locally.
    /// Only bookkeeping changes; the state stays Stopped.
    pub fn on_kill_confirmed(&mut self, pid: Option<&ProcessId>, exit_code: Option<i32>) -> Transition {
        if !self.matches_id(pid) || self.state != ProcessState::Stopped {
            return Transition::Ignored;
        }
        if self.process_id.is_none() {
            self.process_id = pid.cloned();
        }
        self.status_unknown = false;
        self.exit_reported = true;
        if self.exit_code.is_none() && exit_code.is_some() {
            self.exit_code = exit_code;
            return Transition::Applied;
        }
        Transition::Ignored
    }

    /// Apply a state reported by a status message
    pub fn on_status(&mut self, state: ProcessState, exit_code: Option<i32>) -> Transition {
        self.status_unknown = false;
        if self.state.is_terminal() {
            if self.exit_code.is_none() && exit_code.is_some() {
                self.exit_code = exit_code;
            }
            return Transition::Ignored;
        }
        if self.state == state {
            return Transition::Ignored;
        }

        self.state = state;
        if state.is_terminal() {
            self.exit_code = exit_code;
            self.completed_at = Some(Utc::now());
        }
        Transition::Applied
    }

    pub fn mark_status_unknown(&mut self) {
        if self.is_active() {
            self.status_unknown = true;
        }
    }
}
