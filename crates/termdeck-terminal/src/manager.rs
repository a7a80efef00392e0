use std::collections::VecDeque;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use uuid::Uuid;

use termdeck_protocol::{OutboundMessage, StreamKind};
use termdeck_types::{
    OutputLine, ProcessId, ProcessState, SessionId, DEFAULT_CLOSE_GRACE_MS,
    DEFAULT_HISTORY_LIMIT, DEFAULT_MAX_OUTPUT_LINES, DEFAULT_WORKING_DIRECTORY,
};

use crate::error::{Result, TerminalError};
use crate::events::StateChange;
use crate::history::{Direction, HistoryNavigator};
use crate::outbox::Outbox;
use crate::output_buffer::OutputBuffer;
use crate::process::{ProcessHandle, Transition};
use crate::session::Session;

/// Limits applied to every session
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub max_output_lines: usize,
    pub history_limit: usize,
    /// How long a closed session waits for its process before detaching it
    pub close_grace: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_output_lines: DEFAULT_MAX_OUTPUT_LINES,
            history_limit: DEFAULT_HISTORY_LIMIT,
            close_grace: Duration::from_millis(DEFAULT_CLOSE_GRACE_MS),
        }
    }
}

/// Result of an interrupt request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptOutcome {
    /// `interrupt_process` was sent to the backend
    Sent,
    /// No process was running; the unsent input was discarded instead
    DraftCleared,
}

/// A session removed from the tab list whose process has not exited yet
#[derive(Debug)]
struct ClosingSession {
    session: Session,
    deadline: Instant,
}

/// A closed session whose process outlived the grace period
#[derive(Debug)]
pub struct DetachedSession {
    pub session_id: SessionId,
    pub handle: ProcessHandle,
    pub output: OutputBuffer,
}

/// Owns every session and enforces one foreground process per session
#[derive(Debug)]
pub struct SessionManager {
    sessions: Vec<Session>,
    closing: Vec<ClosingSession>,
    focused: Option<SessionId>,
    last_directory: String,
    /// Commands from every session, oldest first, kept for persistence
    recent_commands: VecDeque<String>,
    /// History from a previous run, handed to the first session only
    restored_history: Vec<String>,
    config: ManagerConfig,
    outbox: Outbox,
    changes: Vec<StateChange>,
    created_count: usize,
}

impl SessionManager {
    pub fn new(config: ManagerConfig, outbox: Outbox) -> Self {
        Self::with_history(config, outbox, Vec::new())
    }

    /// Start with previously persisted commands. The first session created
    /// recalls them; later sessions start with an empty history.
    pub fn with_history(config: ManagerConfig, outbox: Outbox, history: Vec<String>) -> Self {
        let skip = history.len().saturating_sub(config.history_limit);
        let restored_history: Vec<String> = history.into_iter().skip(skip).collect();
        let recent_commands = restored_history.iter().cloned().collect();
        Self {
            sessions: Vec::new(),
            closing: Vec::new(),
            focused: None,
            last_directory: DEFAULT_WORKING_DIRECTORY.to_string(),
            recent_commands,
            restored_history,
            config,
            outbox,
            changes: Vec::new(),
            created_count: 0,
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Open sessions in creation order
    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn session(&self, id: SessionId) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id() == id)
    }

    pub fn focused(&self) -> Option<&Session> {
        self.focused.and_then(|id| self.session(id))
    }

    pub fn focused_id(&self) -> Option<SessionId> {
        self.focused
    }

    pub fn last_directory(&self) -> &str {
        &self.last_directory
    }

    /// Commands submitted across all sessions, oldest first
    pub fn recent_commands(&self) -> impl Iterator<Item = &String> {
        self.recent_commands.iter()
    }

    /// Number of closed sessions still waiting for their process to exit
    pub fn closing_count(&self) -> usize {
        self.closing.len()
    }

    pub fn should_auto_scroll(&self, id: SessionId) -> Result<bool> {
        Ok(self.get(id)?.follow_output())
    }

    /// Take the changes accumulated since the last call
    pub fn drain_changes(&mut self) -> Vec<StateChange> {
        std::mem::take(&mut self.changes)
    }

    fn get(&self, id: SessionId) -> Result<&Session> {
        self.session(id).ok_or(TerminalError::SessionNotFound(id))
    }

    fn get_mut(&mut self, id: SessionId) -> Result<&mut Session> {
        self.sessions
            .iter_mut()
            .find(|s| s.id() == id)
            .ok_or(TerminalError::SessionNotFound(id))
    }

    /// Open or parked session for an inbound event
    fn route_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        if let Some(pos) = self.sessions.iter().position(|s| s.id() == id) {
            return Some(&mut self.sessions[pos]);
        }
        self.closing
            .iter_mut()
            .find(|c| c.session.id() == id)
            .map(|c| &mut c.session)
    }

    // ------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------

    pub fn create_session(&mut self) -> SessionId {
        self.created_count += 1;
        let id = Uuid::new_v4();
        let history = HistoryNavigator::with_entries(
            self.config.history_limit,
            std::mem::take(&mut self.restored_history),
        );
        let session = Session::new(
            id,
            format!("Terminal {}", self.created_count),
            self.last_directory.clone(),
            self.config.max_output_lines,
            history,
        );
        info!("Created session {} in {}", id, self.last_directory);

        self.sessions.push(session);
        self.focused = Some(id);
        self.changes.push(StateChange::SessionCreated(id));
        self.changes.push(StateChange::FocusChanged(id));
        id
    }

    /// Close a session. A live process is killed and the session is parked
    /// until the process exits or the grace period runs out.
    pub fn close_session(&mut self, id: SessionId, now: Instant) -> Result<()> {
        let pos = self
            .sessions
            .iter()
            .position(|s| s.id() == id)
            .ok_or(TerminalError::SessionNotFound(id))?;
        let session = self.sessions.remove(pos);

        let live = session
            .active_process()
            .filter(|p| p.is_active())
            .map(|p| p.process_id.clone());

        if let Some(process_id) = live {
            info!("Closing session {} with live process, requesting kill", id);
            self.outbox.send(OutboundMessage::KillProcess {
                process_id,
                session_id: Some(id),
            });
            self.closing.push(ClosingSession {
                session,
                deadline: now + self.config.close_grace,
            });
        } else {
            info!("Closed session {}", id);
        }
        self.changes.push(StateChange::SessionClosed(id));

        if self.focused == Some(id) {
            match self.sessions.last().map(|s| s.id()) {
                Some(next) => self.focus(next)?,
                None => {
                    self.create_session();
                }
            }
        }
        Ok(())
    }

    /// Remove parked sessions whose grace period ended, handing back their
    /// still-running process for adoption as a background process.
    pub fn take_expired(&mut self, now: Instant) -> Vec<DetachedSession> {
        let mut detached = Vec::new();
        let mut i = 0;
        while i < self.closing.len() {
            if self.closing[i].deadline > now {
                i += 1;
                continue;
            }
            let parked = self.closing.remove(i);
            let session_id = parked.session.id();
            let (handle, output) = parked.session.into_detached();
            match handle {
                Some(handle) if handle.is_active() => {
                    warn!(
                        "Process of closed session {} did not exit within {:?}, detaching",
                        session_id, self.config.close_grace
                    );
                    detached.push(DetachedSession { session_id, handle, output });
                }
                _ => debug!("Parked session {} expired after exit", session_id),
            }
        }
        detached
    }

    pub fn focus(&mut self, id: SessionId) -> Result<()> {
        self.get(id)?;
        if self.focused != Some(id) {
            self.focused = Some(id);
            self.changes.push(StateChange::FocusChanged(id));
        }
        Ok(())
    }

    pub fn rename(&mut self, id: SessionId, title: impl Into<String>) -> Result<()> {
        self.get_mut(id)?.set_title(title.into());
        self.changes.push(StateChange::SessionRenamed(id));
        Ok(())
    }

    pub fn set_draft(&mut self, id: SessionId, text: impl Into<String>) -> Result<()> {
        self.get_mut(id)?.set_draft(text.into());
        self.changes.push(StateChange::DraftChanged(id));
        Ok(())
    }

    pub fn clear_output(&mut self, id: SessionId) -> Result<()> {
        self.get_mut(id)?.clear_output();
        self.changes.push(StateChange::OutputCleared(id));
        Ok(())
    }

    pub fn set_follow_output(&mut self, id: SessionId, follow: bool) -> Result<()> {
        let session = self.get_mut(id)?;
        if session.follow_output() != follow {
            session.set_follow_output(follow);
            self.changes.push(StateChange::FollowOutputChanged { session_id: id, follow });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Process control
    // ------------------------------------------------------------------

    pub fn submit(&mut self, id: SessionId, text: &str) -> Result<()> {
        let session = self.get_mut(id)?;
        if session.is_busy() {
            return Err(TerminalError::AlreadyRunning(id));
        }
        let command = text.trim();
        if command.is_empty() {
            return Err(TerminalError::EmptyCommand);
        }

        session.history_mut().record(command);
        session.start(ProcessHandle::foreground(id, command));
        let working_directory = session.working_directory().to_string();

        if self.recent_commands.back().map(|c| c.as_str()) != Some(command) {
            if self.recent_commands.len() >= self.config.history_limit.max(1) {
                self.recent_commands.pop_front();
            }
            self.recent_commands.push_back(command.to_string());
        }

        info!("Session {}: executing {:?} in {}", id, command, working_directory);
        self.outbox.send(OutboundMessage::ExecuteCommand {
            session_id: id,
            command: command.to_string(),
            working_directory,
        });

        self.changes.push(StateChange::OutputAppended { session_id: id, lines: 1 });
        self.changes.push(StateChange::ProcessStateChanged {
            session_id: id,
            state: ProcessState::Pending,
        });
        self.changes.push(StateChange::DraftChanged(id));
        Ok(())
    }

    pub fn interrupt(&mut self, id: SessionId) -> Result<InterruptOutcome> {
        let session = self.get_mut(id)?;
        let live = session
            .active_process()
            .filter(|p| p.is_active())
            .map(|p| p.process_id.clone());
        if let Some(process_id) = live {
            self.outbox.send(OutboundMessage::InterruptProcess {
                process_id,
                session_id: id,
            });
            return Ok(InterruptOutcome::Sent);
        }

        session.set_draft(String::new());
        session.history_mut().reset_cursor();
        self.changes.push(StateChange::DraftChanged(id));
        Ok(InterruptOutcome::DraftCleared)
    }

    /// Kill the active process. The session sees it as Stopped at once;
    /// the backend's exit report only fills in the exit code.
    pub fn kill(&mut self, id: SessionId) -> Result<Transition> {
        let session = self.get_mut(id)?;
        let process_id = match session.process_mut() {
            Some(handle) if handle.is_active() => {
                handle.on_kill_requested();
                handle.process_id.clone()
            }
            _ => return Ok(Transition::Ignored),
        };

        let flushed = session.flush_streams();
        session.push_line(OutputLine::system_error("Process killed"));
        info!("Session {}: kill requested ({:?})", id, process_id);

        self.outbox.send(OutboundMessage::KillProcess {
            process_id,
            session_id: Some(id),
        });
        self.changes.push(StateChange::OutputAppended { session_id: id, lines: flushed + 1 });
        self.changes.push(StateChange::ProcessStateChanged {
            session_id: id,
            state: ProcessState::Stopped,
        });
        Ok(Transition::Applied)
    }

    pub fn recall_history(&mut self, id: SessionId, direction: Direction) -> Result<String> {
        let session = self.get_mut(id)?;
        let draft = session.draft().to_string();
        let recalled = session.history_mut().recall(direction, &draft);
        session.set_draft(recalled.clone());
        self.changes.push(StateChange::DraftChanged(id));
        Ok(recalled)
    }

    // ------------------------------------------------------------------
    // Inbound events
    // ------------------------------------------------------------------

    /// Returns false when no open or parked session has this id.
    pub fn on_bash_started(&mut self, tab_id: SessionId, process_id: ProcessId) -> bool {
        let Some(session) = self.route_mut(tab_id) else {
            return false;
        };
        if session.claim_retired_start(&process_id) {
            debug!("Spawn ack {} belongs to a replaced process in session {}", process_id, tab_id);
            return true;
        }
        let applied = match session.process_mut() {
            Some(handle) => handle.on_spawn_ack(Some(process_id)),
            None => {
                debug!("Spawn ack for session {} without a process", tab_id);
                Transition::Ignored
            }
        };
        if applied.is_applied() {
            self.changes.push(StateChange::ProcessStateChanged {
                session_id: tab_id,
                state: ProcessState::Running,
            });
        }
        true
    }

    pub fn on_bash_output(&mut self, tab_id: SessionId, stream: StreamKind, chunk: &str) -> bool {
        let Some(session) = self.route_mut(tab_id) else {
            return false;
        };

        // Output carries no process id; while a killed predecessor may still
        // be talking it is not taken as an ack of the new process.
        let implicit_ack = !session.has_retired();
        let was_pending = implicit_ack
            && session
                .active_process()
                .map(|p| p.state == ProcessState::Pending)
                .unwrap_or(false);
        if implicit_ack {
            if let Some(handle) = session.process_mut() {
                handle.on_output(None, chunk);
            }
        }
        let lines = session.push_chunk(stream, chunk);

        if was_pending {
            self.changes.push(StateChange::ProcessStateChanged {
                session_id: tab_id,
                state: ProcessState::Running,
            });
        }
        if lines > 0 {
            self.changes.push(StateChange::OutputAppended { session_id: tab_id, lines });
        }
        true
    }

    pub fn on_bash_complete(
        &mut self,
        tab_id: SessionId,
        process_id: Option<ProcessId>,
        exit_code: Option<i32>,
    ) -> bool {
        if let Some(pos) = self.closing.iter().position(|c| c.session.id() == tab_id) {
            let parked = &mut self.closing[pos].session;
            if parked.claim_retired_exit(process_id.as_ref()) {
                // Exit of an older process; keep waiting for the current one
                return true;
            }
            if parked
                .active_process()
                .map(|p| p.matches_id(process_id.as_ref()))
                .unwrap_or(true)
            {
                info!("Process of closed session {} exited ({:?})", tab_id, exit_code);
                self.closing.remove(pos);
            }
            return true;
        }

        let Some(pos) = self.sessions.iter().position(|s| s.id() == tab_id) else {
            return false;
        };
        let session = &mut self.sessions[pos];
        if session.claim_retired_exit(process_id.as_ref()) {
            debug!("Completion {:?} belongs to a replaced process in session {}", process_id, tab_id);
            return true;
        }
        let Some(handle) = session.process_mut() else {
            debug!("Completion for session {} without a process", tab_id);
            return true;
        };

        if handle.state == ProcessState::Stopped {
            handle.on_kill_confirmed(process_id.as_ref(), exit_code);
            return true;
        }

        match handle.on_exit(process_id.as_ref(), exit_code) {
            Transition::Applied => {
                let state = handle.state;
                let line = match state {
                    ProcessState::Completed => OutputLine::system_success("Process completed"),
                    _ => match exit_code {
                        Some(code) => OutputLine::system_error(format!("Process exited with code {}", code)),
                        None => OutputLine::system_error("Process exited"),
                    },
                };
                let flushed = session.flush_streams();
                session.push_line(line);
                debug!("Session {}: process {} ({:?})", tab_id, state, exit_code);

                self.changes.push(StateChange::OutputAppended {
                    session_id: tab_id,
                    lines: flushed + 1,
                });
                self.changes.push(StateChange::ProcessStateChanged { session_id: tab_id, state });
            }
            Transition::Ignored => {
                debug!("Ignored completion for session {} ({:?})", tab_id, process_id);
            }
        }
        true
    }

    /// A process report names the process of a parked session. Its id is
    /// kept so a later detach tracks the process under it. Returns false
    /// when no session with this id is parked.
    pub fn on_parked_process_reported(&mut self, session_id: SessionId, pid: &ProcessId) -> bool {
        let Some(parked) = self.closing.iter_mut().find(|c| c.session.id() == session_id) else {
            return false;
        };
        if let Some(handle) = parked.session.process_mut() {
            if handle.process_id.is_none() && handle.is_active() {
                debug!("Parked session {} runs process {}", session_id, pid);
                handle.process_id = Some(pid.clone());
            }
        }
        true
    }

    /// The backend's working directory changed; every session follows it.
    pub fn on_directory_changed(&mut self, directory: &str) {
        self.last_directory = directory.to_string();
        for session in &mut self.sessions {
            session.set_working_directory(directory);
        }
        self.changes.push(StateChange::DirectoryChanged(directory.to_string()));
    }

    /// Report a backend error in the focused session
    pub fn on_backend_error(&mut self, message: &str) {
        let Some(id) = self.focused else {
            warn!("Backend error with no session to show it in: {}", message);
            return;
        };
        if let Ok(session) = self.get_mut(id) {
            session.push_line(OutputLine::system_error(message.to_string()));
            self.changes.push(StateChange::OutputAppended { session_id: id, lines: 1 });
        }
    }

    pub fn mark_status_unknown(&mut self) {
        let parked = self.closing.iter_mut().map(|c| &mut c.session);
        for session in self.sessions.iter_mut().chain(parked) {
            if let Some(handle) = session.process_mut() {
                handle.mark_status_unknown();
            }
        }
    }
}
