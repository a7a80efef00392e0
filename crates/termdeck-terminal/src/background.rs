//! Background (detached) process monitoring.
//!
//! Processes are keyed by their backend id and kept in first-seen order.
//! Entries are never dropped implicitly: a process missing from a full
//! process list is marked Stopped and stays visible until dismissed.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{debug, info};
use regex::Regex;
use serde::{Deserialize, Serialize};

use termdeck_protocol::{OutboundMessage, ProcessInfo, ProcessUpdate, StreamKind};
use termdeck_types::{
    OutputKind, OutputLine, ProcessId, ProcessState, SessionId, DEFAULT_MAX_OUTPUT_LINES,
    DEFAULT_POLL_INTERVAL_MS,
};

use crate::error::{Result, TerminalError};
use crate::events::StateChange;
use crate::outbox::Outbox;
use crate::output_buffer::{OutputBuffer, OutputStreams};
use crate::process::{ProcessHandle, Transition};

/// How a background entry came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackgroundOrigin {
    /// Reported by the backend's process list or lifecycle events
    Reported,
    /// Foreground process of a closed session that outlived its grace period
    Detached { session_id: SessionId },
}

#[derive(Debug, Clone)]
pub struct BackgroundProcess {
    id: ProcessId,
    handle: ProcessHandle,
    origin: BackgroundOrigin,
    focused: bool,
    output: OutputBuffer,
    streams: OutputStreams,
}

impl BackgroundProcess {
    fn new(id: ProcessId, handle: ProcessHandle, origin: BackgroundOrigin, max_lines: usize) -> Self {
        Self {
            id,
            handle,
            origin,
            focused: false,
            output: OutputBuffer::new(max_lines),
            streams: OutputStreams::default(),
        }
    }

    pub fn id(&self) -> &ProcessId {
        &self.id
    }

    pub fn handle(&self) -> &ProcessHandle {
        &self.handle
    }

    pub fn command(&self) -> &str {
        &self.handle.command
    }

    pub fn state(&self) -> ProcessState {
        self.handle.state
    }

    pub fn origin(&self) -> BackgroundOrigin {
        self.origin
    }

    pub fn is_focused(&self) -> bool {
        self.focused
    }

    pub fn output(&self) -> &OutputBuffer {
        &self.output
    }

    fn flush(&mut self) -> usize {
        let lines = self.streams.flush();
        let count = lines.len();
        self.output.extend(lines);
        count
    }
}

/// Filter for [`BackgroundMonitor::read_output`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputQuery {
    /// Regular expression a line's content must match
    #[serde(default)]
    pub filter: Option<String>,
    /// Keep only the last N matching lines
    #[serde(default)]
    pub lines: Option<usize>,
    #[serde(default)]
    pub include_stderr: bool,
}

/// Polling and buffer settings for the monitor
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub max_output_lines: usize,
    pub poll_interval: Duration,
    pub auto_refresh: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_output_lines: DEFAULT_MAX_OUTPUT_LINES,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            auto_refresh: true,
        }
    }
}

#[derive(Debug)]
pub struct BackgroundMonitor {
    processes: HashMap<ProcessId, BackgroundProcess>,
    order: Vec<ProcessId>,
    config: MonitorConfig,
    next_poll: Option<Instant>,
    outbox: Outbox,
    changes: Vec<StateChange>,
}

fn parse_started_at(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

/// State described by a status string and/or exit code
fn reported_state(status: Option<&str>, exit_code: Option<i32>) -> Option<ProcessState> {
    status
        .and_then(ProcessState::from_status)
        .or_else(|| exit_code.map(|code| ProcessState::from_exit_code(Some(code))))
}

impl BackgroundMonitor {
    pub fn new(config: MonitorConfig, outbox: Outbox) -> Self {
        Self {
            processes: HashMap::new(),
            order: Vec::new(),
            config,
            next_poll: None,
            outbox,
            changes: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Entries in first-seen order
    pub fn processes(&self) -> impl Iterator<Item = &BackgroundProcess> {
        self.order.iter().filter_map(|id| self.processes.get(id))
    }

    pub fn get(&self, id: &ProcessId) -> Option<&BackgroundProcess> {
        self.processes.get(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn auto_refresh(&self) -> bool {
        self.config.auto_refresh
    }

    /// Background entry holding the process of a closed session
    pub fn find_detached(&self, session_id: SessionId) -> Option<&ProcessId> {
        self.processes().find_map(|p| match p.origin {
            BackgroundOrigin::Detached { session_id: s } if s == session_id => Some(&p.id),
            _ => None,
        })
    }

    /// Matching lines of a process's retained output, oldest first
    pub fn read_output(&self, id: &ProcessId, query: &OutputQuery) -> Result<Vec<OutputLine>> {
        let process = self
            .processes
            .get(id)
            .ok_or_else(|| TerminalError::ProcessNotFound(id.clone()))?;
        let filter = query.filter.as_deref().map(Regex::new).transpose()?;

        let mut lines: Vec<OutputLine> = process
            .output
            .iter()
            .filter(|line| query.include_stderr || line.kind != OutputKind::Stderr)
            .filter(|line| filter.as_ref().map(|re| re.is_match(&line.content)).unwrap_or(true))
            .cloned()
            .collect();

        if let Some(limit) = query.lines {
            let skip = lines.len().saturating_sub(limit);
            lines.drain(..skip);
        }
        Ok(lines)
    }

    pub fn drain_changes(&mut self) -> Vec<StateChange> {
        std::mem::take(&mut self.changes)
    }

    // ------------------------------------------------------------------
    // Inbound events
    // ------------------------------------------------------------------

    fn insert(&mut self, process: BackgroundProcess) {
        let id = process.id.clone();
        if self.processes.insert(id.clone(), process).is_none() {
            self.order.push(id.clone());
        }
        self.changes.push(StateChange::BackgroundUpdated(id));
    }

    fn upsert(&mut self, info: &ProcessInfo) {
        let state = reported_state(info.status.as_deref(), info.exit_code);

        if let Some(existing) = self.processes.get_mut(&info.id) {
            if !info.command.is_empty() {
                existing.handle.command = info.command.clone();
            }
            let applied = match state {
                Some(state) => existing.handle.on_status(state, info.exit_code),
                None => {
                    existing.handle.status_unknown = false;
                    Transition::Ignored
                }
            };
            if applied.is_applied() && existing.handle.state.is_terminal() {
                existing.flush();
            }
            self.changes.push(StateChange::BackgroundUpdated(info.id.clone()));
            return;
        }

        let state = state.unwrap_or(ProcessState::Running);
        let mut handle = ProcessHandle::background(info.id.clone(), info.command.clone(), state);
        handle.session_id = info.session_id;
        if state.is_terminal() {
            handle.exit_code = info.exit_code;
        }
        if let Some(started_at) = parse_started_at(info.started_at.as_deref()) {
            handle.started_at = started_at;
        }
        debug!("Tracking background process {} ({})", info.id, info.command);
        self.insert(BackgroundProcess::new(
            info.id.clone(),
            handle,
            BackgroundOrigin::Reported,
            self.config.max_output_lines,
        ));
    }

    /// Apply a process list. A full snapshot also marks every reported
    /// entry it no longer mentions as Stopped.
    pub fn apply_process_list(&mut self, processes: &[ProcessInfo], incremental: bool) {
        for info in processes {
            self.upsert(info);
        }
        if incremental {
            return;
        }

        let present: HashSet<&ProcessId> = processes.iter().map(|p| &p.id).collect();
        for id in &self.order {
            let Some(process) = self.processes.get_mut(id) else {
                continue;
            };
            if present.contains(id)
                || process.origin != BackgroundOrigin::Reported
                || process.handle.state.is_terminal()
            {
                continue;
            }
            debug!("Background process {} vanished from process list", id);
            process.handle.on_status(ProcessState::Stopped, None);
            process.flush();
            self.changes.push(StateChange::BackgroundUpdated(id.clone()));
        }
    }

    pub fn on_process_output(&mut self, id: &ProcessId, line: &str, stream: StreamKind) {
        if !self.processes.contains_key(id) {
            debug!("Output for unknown background process {}, tracking it", id);
            let handle = ProcessHandle::background(id.clone(), "", ProcessState::Running);
            self.insert(BackgroundProcess::new(
                id.clone(),
                handle,
                BackgroundOrigin::Reported,
                self.config.max_output_lines,
            ));
        }
        let Some(process) = self.processes.get_mut(id) else {
            return;
        };

        process.handle.on_output(None, line);
        let mut lines = process.streams.feed(stream, line);
        if !line.ends_with('\n') {
            lines.extend(process.streams.feed(stream, "\n"));
        }
        let count = lines.len();
        process.output.extend(lines);
        self.changes.push(StateChange::BackgroundOutput {
            process_id: id.clone(),
            lines: count,
        });
    }

    pub fn on_process_status(&mut self, update: &ProcessUpdate) {
        let info = ProcessInfo {
            id: update.id.clone(),
            command: update.command.clone().unwrap_or_default(),
            status: update.status.clone(),
            exit_code: update.exit_code,
            started_at: None,
            session_id: None,
        };
        self.upsert(&info);
    }

    /// A (re)started process. A terminal entry with the same id is
    /// replaced by a fresh handle but keeps its output.
    pub fn on_process_started(&mut self, info: &ProcessInfo) {
        if let Some(existing) = self.processes.get_mut(&info.id) {
            if existing.handle.state.is_terminal() {
                info!("Background process {} restarted", info.id);
                existing.flush();
                let mut handle = ProcessHandle::background(
                    info.id.clone(),
                    info.command.clone(),
                    ProcessState::Running,
                );
                handle.session_id = info.session_id;
                existing.handle = handle;
                existing.streams = OutputStreams::default();
                self.changes.push(StateChange::BackgroundUpdated(info.id.clone()));
                return;
            }
        }
        self.upsert(info);
    }

    pub fn on_process_stopped(&mut self, id: &ProcessId, exit_code: Option<i32>) {
        let Some(process) = self.processes.get_mut(id) else {
            debug!("Stop report for unknown background process {}", id);
            return;
        };
        let transition = if process.handle.state == ProcessState::Stopped {
            process.handle.on_kill_confirmed(Some(id), exit_code)
        } else {
            let state = match exit_code {
                Some(code) => ProcessState::from_exit_code(Some(code)),
                None => ProcessState::Stopped,
            };
            process.handle.on_status(state, exit_code)
        };
        process.flush();
        if transition.is_applied() {
            self.changes.push(StateChange::BackgroundUpdated(id.clone()));
        }
    }

    /// Output of a closed session's process, routed by session id
    pub fn on_detached_output(&mut self, session_id: SessionId, stream: StreamKind, chunk: &str) -> bool {
        let Some(id) = self.find_detached(session_id).cloned() else {
            return false;
        };
        let Some(process) = self.processes.get_mut(&id) else {
            return false;
        };
        process.handle.on_output(None, chunk);
        let lines = process.streams.feed(stream, chunk);
        let count = lines.len();
        process.output.extend(lines);
        if count > 0 {
            self.changes.push(StateChange::BackgroundOutput { process_id: id, lines: count });
        }
        true
    }

    pub fn on_detached_exit(
        &mut self,
        session_id: SessionId,
        process_id: Option<&ProcessId>,
        exit_code: Option<i32>,
    ) -> bool {
        let Some(id) = self.find_detached(session_id).cloned() else {
            return false;
        };
        let Some(process) = self.processes.get_mut(&id) else {
            return false;
        };
        let transition = if process.handle.state == ProcessState::Stopped {
            process.handle.on_kill_confirmed(process_id, exit_code)
        } else {
            process.handle.on_exit(process_id, exit_code)
        };
        process.flush();
        if transition.is_applied() {
            info!("Detached process {} of session {} exited ({:?})", id, session_id, exit_code);
            self.changes.push(StateChange::BackgroundUpdated(id));
        }
        true
    }

    pub fn mark_status_unknown(&mut self) {
        for process in self.processes.values_mut() {
            process.handle.mark_status_unknown();
        }
    }

    // ------------------------------------------------------------------
    // User actions
    // ------------------------------------------------------------------

    /// Take over the live process of a closed session. Returns the key
    /// it is tracked under.
    pub fn adopt(&mut self, session_id: SessionId, handle: ProcessHandle, output: OutputBuffer) -> ProcessId {
        let id = handle
            .process_id
            .clone()
            .unwrap_or_else(|| ProcessId::new(format!("detached-{}", session_id)));
        info!("Adopting process {} ({}) from closed session {}", id, handle.command, session_id);

        let origin = BackgroundOrigin::Detached { session_id };
        if let Some(existing) = self.processes.get_mut(&id) {
            existing.origin = origin;
            existing.output = output;
            self.changes.push(StateChange::BackgroundUpdated(id.clone()));
            return id;
        }

        let mut process = BackgroundProcess::new(id.clone(), handle, origin, self.config.max_output_lines);
        process.output = output;
        self.insert(process);
        id
    }

    /// The backend named the real id of a detached process; re-key its
    /// entry, folding in any entry already tracked under that id. Returns
    /// false when no process of this session is tracked.
    pub fn assign_detached_pid(&mut self, session_id: SessionId, pid: ProcessId) -> bool {
        let Some(old_id) = self.find_detached(session_id).cloned() else {
            return false;
        };
        if old_id == pid {
            return true;
        }
        let Some(mut process) = self.processes.remove(&old_id) else {
            return false;
        };
        if process.handle.process_id.is_some() {
            debug!("Detached process {} already has an id, ignoring {}", old_id, pid);
            self.processes.insert(old_id, process);
            return true;
        }

        if let Some(duplicate) = self.processes.remove(&pid) {
            self.order.retain(|id| id != &pid);
            process.focused |= duplicate.focused;
            self.changes.push(StateChange::BackgroundRemoved(pid.clone()));
        }
        info!("Detached process of session {} is {}", session_id, pid);
        process.id = pid.clone();
        process.handle.process_id = Some(pid.clone());
        if let Some(slot) = self.order.iter_mut().find(|id| **id == old_id) {
            *slot = pid.clone();
        }
        self.processes.insert(pid.clone(), process);
        self.changes.push(StateChange::BackgroundRemoved(old_id));
        self.changes.push(StateChange::BackgroundUpdated(pid));
        true
    }

    /// Toggle whether a process's output is shown. Unfocused processes
    /// keep buffering. Returns the new focus flag.
    pub fn toggle_focus(&mut self, id: &ProcessId) -> Result<bool> {
        let process = self
            .processes
            .get_mut(id)
            .ok_or_else(|| TerminalError::ProcessNotFound(id.clone()))?;
        process.focused = !process.focused;
        let focused = process.focused;
        self.changes.push(StateChange::BackgroundUpdated(id.clone()));
        Ok(focused)
    }

    /// Ask the backend to stop a process gracefully. Local state only
    /// changes when the backend reports back.
    pub fn stop(&mut self, id: &ProcessId) -> Result<()> {
        let process = self
            .processes
            .get(id)
            .ok_or_else(|| TerminalError::ProcessNotFound(id.clone()))?;
        if process.handle.state.is_terminal() {
            debug!("Stop for finished process {} skipped", id);
            return Ok(());
        }
        self.outbox.send(OutboundMessage::StopProcess { process_id: id.clone() });
        Ok(())
    }

    pub fn kill(&mut self, id: &ProcessId) -> Result<Transition> {
        let process = self
            .processes
            .get_mut(id)
            .ok_or_else(|| TerminalError::ProcessNotFound(id.clone()))?;
        if process.handle.on_kill_requested() == Transition::Ignored {
            return Ok(Transition::Ignored);
        }
        process.flush();
        process.output.append(OutputLine::system_error("Process killed"));

        let msg = match (process.handle.process_id.clone(), process.origin) {
            (Some(pid), _) => OutboundMessage::KillProcess {
                process_id: Some(pid),
                session_id: None,
            },
            (None, BackgroundOrigin::Detached { session_id }) => OutboundMessage::KillProcess {
                process_id: None,
                session_id: Some(session_id),
            },
            (None, BackgroundOrigin::Reported) => OutboundMessage::KillProcess {
                process_id: Some(id.clone()),
                session_id: None,
            },
        };
        self.outbox.send(msg);
        self.changes.push(StateChange::BackgroundUpdated(id.clone()));
        Ok(Transition::Applied)
    }

    /// Forget a finished process
    pub fn dismiss(&mut self, id: &ProcessId) -> Result<()> {
        let process = self
            .processes
            .get(id)
            .ok_or_else(|| TerminalError::ProcessNotFound(id.clone()))?;
        if process.handle.is_active() {
            return Err(TerminalError::ProcessActive(id.clone()));
        }
        self.processes.remove(id);
        self.order.retain(|p| p != id);
        self.changes.push(StateChange::BackgroundRemoved(id.clone()));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Polling
    // ------------------------------------------------------------------

    pub fn set_auto_refresh(&mut self, enabled: bool) {
        self.config.auto_refresh = enabled;
        if !enabled {
            self.next_poll = None;
        }
    }

    /// Request the process list now and restart the polling interval
    pub fn refresh(&mut self, now: Instant) {
        self.outbox.send(OutboundMessage::GetProcessList);
        self.next_poll = Some(now + self.config.poll_interval);
    }

    /// Poll if auto-refresh is on and the interval elapsed. Returns whether
    /// a request was sent.
    pub fn poll(&mut self, now: Instant) -> bool {
        if !self.config.auto_refresh {
            return false;
        }
        match self.next_poll {
            Some(due) if now < due => false,
            _ => {
                self.refresh(now);
                true
            }
        }
    }
}
