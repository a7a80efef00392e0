use std::time::{Duration, Instant};

use log::{debug, info, warn};
use tokio::sync::mpsc;

use termdeck_protocol::{InboundMessage, OutboundMessage, ProcessInfo};
use termdeck_types::{
    ConnectionState, OutputLine, ProcessId, SessionId, DEFAULT_CLOSE_GRACE_MS,
    DEFAULT_HISTORY_LIMIT, DEFAULT_MAX_OUTPUT_LINES, DEFAULT_POLL_INTERVAL_MS,
};

use crate::background::{BackgroundMonitor, MonitorConfig, OutputQuery};
use crate::error::Result;
use crate::events::StateChange;
use crate::history::Direction;
use crate::manager::{InterruptOutcome, ManagerConfig, SessionManager};
use crate::outbox::Outbox;
use crate::process::Transition;
use crate::session::Session;
use crate::store::{self, KeyValueStore};

#[derive(Debug, Clone)]
pub struct TerminalConfig {
    pub max_output_lines: usize,
    pub history_limit: usize,
    pub close_grace: Duration,
    pub poll_interval: Duration,
    pub auto_refresh: bool,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            max_output_lines: DEFAULT_MAX_OUTPUT_LINES,
            history_limit: DEFAULT_HISTORY_LIMIT,
            close_grace: Duration::from_millis(DEFAULT_CLOSE_GRACE_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            auto_refresh: true,
        }
    }
}

/// Terminal core: sessions, background processes and connection status.
///
/// All mutation goes through `&mut self` from a single task. Every public
/// operation publishes the resulting [`StateChange`]s to subscribers before
/// returning.
pub struct Terminal {
    manager: SessionManager,
    background: BackgroundMonitor,
    connection: ConnectionState,
    outbox: Outbox,
    store: Option<Box<dyn KeyValueStore>>,
    subscribers: Vec<mpsc::UnboundedSender<StateChange>>,
    pending: Vec<StateChange>,
}

impl std::fmt::Debug for Terminal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Terminal")
            .field("sessions", &self.manager.sessions().len())
            .field("background", &self.background.len())
            .field("connection", &self.connection)
            .field("persistent", &self.store.is_some())
            .finish()
    }
}

impl Terminal {
    /// Create the core with one open session. Command history is loaded
    /// from `store` when one is given.
    pub fn new(config: TerminalConfig, outbox: Outbox, store: Option<Box<dyn KeyValueStore>>) -> Self {
        let history = match store.as_deref() {
            Some(store) => store::load_history(store).unwrap_or_else(|e| {
                warn!("Failed to load command history: {}", e);
                Vec::new()
            }),
            None => Vec::new(),
        };
        debug!("Loaded {} history entries", history.len());

        let manager = SessionManager::with_history(
            ManagerConfig {
                max_output_lines: config.max_output_lines,
                history_limit: config.history_limit,
                close_grace: config.close_grace,
            },
            outbox.clone(),
            history,
        );
        let background = BackgroundMonitor::new(
            MonitorConfig {
                max_output_lines: config.max_output_lines,
                poll_interval: config.poll_interval,
                auto_refresh: config.auto_refresh,
            },
            outbox.clone(),
        );

        let mut terminal = Self {
            manager,
            background,
            connection: ConnectionState::Connecting,
            outbox,
            store,
            subscribers: Vec::new(),
            pending: Vec::new(),
        };
        terminal.manager.create_session();
        terminal.publish();
        terminal
    }

    /// Receive every state change from now on
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<StateChange> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    fn publish(&mut self) {
        let mut changes = std::mem::take(&mut self.pending);
        changes.extend(self.manager.drain_changes());
        changes.extend(self.background.drain_changes());
        if changes.is_empty() {
            return;
        }
        self.subscribers.retain(|tx| !tx.is_closed());
        for change in changes {
            for tx in &self.subscribers {
                let _ = tx.send(change.clone());
            }
        }
    }

    fn persist_history(&mut self) {
        let Some(store) = self.store.as_deref_mut() else {
            return;
        };
        if let Err(e) = store::save_history(store, self.manager.recent_commands()) {
            warn!("Failed to save command history: {}", e);
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn sessions(&self) -> &[Session] {
        self.manager.sessions()
    }

    pub fn session(&self, id: SessionId) -> Option<&Session> {
        self.manager.session(id)
    }

    pub fn focused(&self) -> Option<&Session> {
        self.manager.focused()
    }

    pub fn background(&self) -> &BackgroundMonitor {
        &self.background
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn should_auto_scroll(&self, id: SessionId) -> Result<bool> {
        self.manager.should_auto_scroll(id)
    }

    pub fn read_background_output(&self, id: &ProcessId, query: &OutputQuery) -> Result<Vec<OutputLine>> {
        self.background.read_output(id, query)
    }

    // ------------------------------------------------------------------
    // Session operations
    // ------------------------------------------------------------------

    pub fn create_session(&mut self) -> SessionId {
        let id = self.manager.create_session();
        self.publish();
        id
    }

    pub fn close_session(&mut self, id: SessionId) -> Result<()> {
        self.close_session_at(id, Instant::now())
    }

    pub fn close_session_at(&mut self, id: SessionId, now: Instant) -> Result<()> {
        let result = self.manager.close_session(id, now);
        self.publish();
        result
    }

    pub fn submit(&mut self, id: SessionId, text: &str) -> Result<()> {
        let result = self.manager.submit(id, text);
        if result.is_ok() {
            self.persist_history();
        }
        self.publish();
        result
    }

    pub fn interrupt(&mut self, id: SessionId) -> Result<InterruptOutcome> {
        let result = self.manager.interrupt(id);
        self.publish();
        result
    }

    pub fn kill(&mut self, id: SessionId) -> Result<Transition> {
        let result = self.manager.kill(id);
        self.publish();
        result
    }

    pub fn recall_history(&mut self, id: SessionId, direction: Direction) -> Result<String> {
        let result = self.manager.recall_history(id, direction);
        self.publish();
        result
    }

    pub fn focus(&mut self, id: SessionId) -> Result<()> {
        let result = self.manager.focus(id);
        self.publish();
        result
    }

    pub fn rename(&mut self, id: SessionId, title: impl Into<String>) -> Result<()> {
        let result = self.manager.rename(id, title);
        self.publish();
        result
    }

    pub fn set_draft(&mut self, id: SessionId, text: impl Into<String>) -> Result<()> {
        let result = self.manager.set_draft(id, text);
        self.publish();
        result
    }

    pub fn clear_output(&mut self, id: SessionId) -> Result<()> {
        let result = self.manager.clear_output(id);
        self.publish();
        result
    }

    pub fn set_follow_output(&mut self, id: SessionId, follow: bool) -> Result<()> {
        let result = self.manager.set_follow_output(id, follow);
        self.publish();
        result
    }

    // ------------------------------------------------------------------
    // Background operations
    // ------------------------------------------------------------------

    pub fn toggle_background_focus(&mut self, id: &ProcessId) -> Result<bool> {
        let result = self.background.toggle_focus(id);
        self.publish();
        result
    }

    pub fn stop_background(&mut self, id: &ProcessId) -> Result<()> {
        self.background.stop(id)
    }

    pub fn kill_background(&mut self, id: &ProcessId) -> Result<Transition> {
        let result = self.background.kill(id);
        self.publish();
        result
    }

    pub fn dismiss_background(&mut self, id: &ProcessId) -> Result<()> {
        let result = self.background.dismiss(id);
        self.publish();
        result
    }

    pub fn refresh_processes(&mut self) {
        self.background.refresh(Instant::now());
    }

    pub fn set_auto_refresh(&mut self, enabled: bool) {
        self.background.set_auto_refresh(enabled);
    }

    // ------------------------------------------------------------------
    // Transport side
    // ------------------------------------------------------------------

    /// Apply one message from the backend
    pub fn handle_inbound(&mut self, msg: InboundMessage) {
        match msg {
            InboundMessage::BashStarted { tab_id, process_id } => {
                if !self.manager.on_bash_started(tab_id, process_id.clone())
                    && !self.background.assign_detached_pid(tab_id, process_id)
                {
                    debug!("Spawn ack for unknown session {}", tab_id);
                }
            }
            InboundMessage::BashOutput { tab_id, output, stream } => {
                if !self.manager.on_bash_output(tab_id, stream, &output)
                    && !self.background.on_detached_output(tab_id, stream, &output)
                {
                    debug!("Dropping output for unknown session {}", tab_id);
                }
            }
            InboundMessage::BashComplete { tab_id, exit_code, process_id } => {
                if !self.manager.on_bash_complete(tab_id, process_id.clone(), exit_code)
                    && !self.background.on_detached_exit(tab_id, process_id.as_ref(), exit_code)
                {
                    debug!("Completion for unknown session {}", tab_id);
                }
            }
            InboundMessage::DirectoryChanged { directory } => {
                info!("Working directory is now {}", directory);
                self.manager.on_directory_changed(&directory);
            }
            InboundMessage::ProcessList { processes, incremental } => {
                let mut background = Vec::with_capacity(processes.len());
                for process in processes {
                    if !self.claim_foreground(&process) {
                        background.push(process);
                    }
                }
                self.background.apply_process_list(&background, incremental);
            }
            InboundMessage::ProcessOutput { process_id, line, stream } => {
                self.background.on_process_output(&process_id, &line, stream);
            }
            InboundMessage::ProcessStatus { process } => {
                self.background.on_process_status(&process);
            }
            InboundMessage::ProcessStarted { process } => {
                if !self.claim_foreground(&process) {
                    self.background.on_process_started(&process);
                }
            }
            InboundMessage::ProcessStopped { process_id, exit_code } => {
                self.background.on_process_stopped(&process_id, exit_code);
            }
            InboundMessage::Error { message } => {
                warn!("Backend error: {}", message);
                self.manager.on_backend_error(&message);
            }
        }
        self.publish();
    }

    /// Foreground processes of open and parked tabs are tracked by their
    /// session. A detached one learns its backend id here and is then
    /// updated like any background process, so this returns false for it.
    fn claim_foreground(&mut self, process: &ProcessInfo) -> bool {
        let Some(session_id) = process.session_id else {
            return false;
        };
        if self.manager.session(session_id).is_some()
            || self.manager.on_parked_process_reported(session_id, &process.id)
        {
            return true;
        }
        self.background.assign_detached_pid(session_id, process.id.clone());
        false
    }

    /// Record a transport status change. While disconnected, running
    /// processes are marked as having an unknown status; on reconnect the
    /// directory and process list are requested again.
    pub fn set_connection(&mut self, state: ConnectionState) {
        self.set_connection_at(state, Instant::now());
    }

    pub fn set_connection_at(&mut self, state: ConnectionState, now: Instant) {
        if state == self.connection {
            return;
        }
        let was_connected = self.connection.is_connected();
        self.connection = state;
        info!("Connection {}", state);

        if state.is_connected() {
            self.outbox.send(OutboundMessage::GetCurrentDirectory);
            self.background.refresh(now);
        } else if was_connected {
            self.manager.mark_status_unknown();
            self.background.mark_status_unknown();
        }
        self.pending.push(StateChange::ConnectionChanged(state));
        self.publish();
    }

    /// Drive timers: close grace deadlines and process list polling
    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    pub fn tick_at(&mut self, now: Instant) {
        for detached in self.manager.take_expired(now) {
            self.background
                .adopt(detached.session_id, detached.handle, detached.output);
        }
        if self.connection.is_connected() {
            self.background.poll(now);
        }
        self.publish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use termdeck_protocol::StreamKind;
    use termdeck_types::ProcessState;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn terminal() -> (Terminal, UnboundedReceiver<OutboundMessage>) {
        let (outbox, rx) = Outbox::channel();
        (Terminal::new(TerminalConfig::default(), outbox, None), rx)
    }

    fn drain<T>(rx: &mut UnboundedReceiver<T>) -> Vec<T> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn test_starts_with_one_focused_session() {
        let (t, _rx) = terminal();
        assert_eq!(t.sessions().len(), 1);
        assert_eq!(t.focused().unwrap().id(), t.sessions()[0].id());
        assert_eq!(t.connection(), ConnectionState::Connecting);
    }

    #[test]
    fn test_connect_requests_state() {
        let (mut t, mut rx) = terminal();
        t.set_connection(ConnectionState::Connected);
        assert_eq!(
            drain(&mut rx),
            vec![OutboundMessage::GetCurrentDirectory, OutboundMessage::GetProcessList]
        );
    }

    #[test]
    fn test_disconnect_marks_status_unknown() {
        let (mut t, _rx) = terminal();
        t.set_connection(ConnectionState::Connected);
        let id = t.focused().unwrap().id();
        t.submit(id, "sleep 5").unwrap();

        t.set_connection(ConnectionState::Reconnecting { attempt: 1 });
        let handle = t.session(id).unwrap().active_process().unwrap();
        assert!(handle.status_unknown);
        assert_eq!(handle.state, ProcessState::Pending);

        t.handle_inbound(InboundMessage::BashOutput {
            tab_id: id,
            output: "z\n".to_string(),
            stream: StreamKind::Stdout,
        });
        assert!(!t.session(id).unwrap().active_process().unwrap().status_unknown);
    }

    #[test]
    fn test_subscribers_receive_changes() {
        let (mut t, _rx) = terminal();
        let mut changes = t.subscribe();
        let id = t.create_session();
        let seen = drain(&mut changes);
        assert!(seen.contains(&StateChange::SessionCreated(id)));
        assert!(seen.contains(&StateChange::FocusChanged(id)));
    }

    #[test]
    fn test_process_list_skips_open_session_processes() {
        let (mut t, _rx) = terminal();
        let id = t.focused().unwrap().id();
        t.handle_inbound(InboundMessage::ProcessList {
            processes: vec![
                ProcessInfo {
                    id: ProcessId::from("1"),
                    command: "vim".to_string(),
                    status: Some("running".to_string()),
                    exit_code: None,
                    started_at: None,
                    session_id: Some(id),
                },
                ProcessInfo {
                    id: ProcessId::from("2"),
                    command: "npm run dev".to_string(),
                    status: Some("running".to_string()),
                    exit_code: None,
                    started_at: Some("2026-01-05T10:00:00Z".to_string()),
                    session_id: None,
                },
            ],
            incremental: false,
        });
        let ids: Vec<_> = t.background().processes().map(|p| p.id().to_string()).collect();
        assert_eq!(ids, vec!["2"]);
    }

    #[test]
    fn test_history_persisted_through_store() {
        let (outbox, _rx) = Outbox::channel();
        let mut t = Terminal::new(TerminalConfig::default(), outbox, Some(Box::new(MemoryStore::new())));
        let id = t.focused().unwrap().id();
        t.submit(id, "git log").unwrap();

        let store = t.store.as_deref().unwrap();
        assert_eq!(store::load_history(store).unwrap(), vec!["git log".to_string()]);
    }

    #[test]
    fn test_backend_error_shown_in_focused_session() {
        let (mut t, _rx) = terminal();
        t.handle_inbound(InboundMessage::Error { message: "no such shell".to_string() });
        let last = t.focused().unwrap().output().last().unwrap();
        assert_eq!(last.content, "no such shell");
    }
}
