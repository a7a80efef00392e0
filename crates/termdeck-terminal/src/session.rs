use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use termdeck_protocol::StreamKind;
use termdeck_types::{OutputKind, OutputLine, ProcessId, SessionId};

use crate::history::HistoryNavigator;
use crate::output_buffer::{OutputBuffer, OutputStreams};
use crate::process::ProcessHandle;

/// Killed processes still awaiting their exit report, per session
const MAX_RETIRED: usize = 16;

/// Prompt shown for a working directory
pub fn prompt_for(working_directory: &str) -> String {
    format!("{} $ ", working_directory)
}

/// A single terminal tab
#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    title: String,
    working_directory: String,
    prompt: String,
    history: HistoryNavigator,
    active_process: Option<ProcessHandle>,
    /// Killed processes replaced by a newer command before the backend
    /// reported their exit, oldest first. `None` until the spawn is acked.
    retired: VecDeque<Option<ProcessId>>,
    output: OutputBuffer,
    streams: OutputStreams,
    draft: String,
    follow_output: bool,
    created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        id: SessionId,
        title: impl Into<String>,
        working_directory: impl Into<String>,
        max_output_lines: usize,
        history: HistoryNavigator,
    ) -> Self {
        let working_directory = working_directory.into();
        Self {
            id,
            title: title.into(),
            prompt: prompt_for(&working_directory),
            working_directory,
            history,
            active_process: None,
            retired: VecDeque::new(),
            output: OutputBuffer::new(max_output_lines),
            streams: OutputStreams::default(),
            draft: String::new(),
            follow_output: true,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn working_directory(&self) -> &str {
        &self.working_directory
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn history(&self) -> &HistoryNavigator {
        &self.history
    }

    pub fn active_process(&self) -> Option<&ProcessHandle> {
        self.active_process.as_ref()
    }

    pub fn output(&self) -> &OutputBuffer {
        &self.output
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn follow_output(&self) -> bool {
        self.follow_output
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Whether the session's process is Pending or Running
    pub fn is_busy(&self) -> bool {
        self.active_process
            .as_ref()
            .map(|p| p.is_active())
            .unwrap_or(false)
    }

    /// Whether a replaced process may still send events to this session
    pub fn has_retired(&self) -> bool {
        !self.retired.is_empty()
    }

    fn current_pid(&self) -> Option<&ProcessId> {
        self.active_process.as_ref().and_then(|p| p.process_id.as_ref())
    }

    /// Whether a spawn ack belongs to a replaced process. Acks arrive in
    /// spawn order, so an unknown id goes to the oldest unacked one.
    pub(crate) fn claim_retired_start(&mut self, pid: &ProcessId) -> bool {
        if self.retired.iter().any(|r| r.as_ref() == Some(pid)) {
            return true;
        }
        if self.current_pid() == Some(pid) {
            return false;
        }
        match self.retired.iter_mut().find(|r| r.is_none()) {
            Some(slot) => {
                *slot = Some(pid.clone());
                true
            }
            None => false,
        }
    }

    /// Whether an exit report belongs to a replaced process. A claimed
    /// report takes that process off the retired list.
    pub(crate) fn claim_retired_exit(&mut self, pid: Option<&ProcessId>) -> bool {
        if self.retired.is_empty() {
            return false;
        }
        let pos = match pid {
            Some(pid) => match self.retired.iter().position(|r| r.as_ref() == Some(pid)) {
                Some(pos) => Some(pos),
                None if self.current_pid().is_none() => self.retired.iter().position(|r| r.is_none()),
                None => None,
            },
            // The replaced process was killed first, so it exits first
            None => Some(0),
        };
        match pos {
            Some(pos) => {
                self.retired.remove(pos);
                true
            }
            None => false,
        }
    }

    pub(crate) fn set_title(&mut self, title: String) {
        self.title = title;
    }

    pub(crate) fn set_working_directory(&mut self, directory: &str) {
        self.working_directory = directory.to_string();
        self.prompt = prompt_for(directory);
    }

    pub(crate) fn set_draft(&mut self, draft: String) {
        self.draft = draft;
    }

    pub(crate) fn set_follow_output(&mut self, follow: bool) {
        self.follow_output = follow;
    }

    pub(crate) fn history_mut(&mut self) -> &mut HistoryNavigator {
        &mut self.history
    }

    pub(crate) fn process_mut(&mut self) -> Option<&mut ProcessHandle> {
        self.active_process.as_mut()
    }

    /// Replace the active process and echo the command under the prompt
    pub(crate) fn start(&mut self, handle: ProcessHandle) {
        if let Some(old) = self.active_process.take().filter(|p| p.awaits_exit_report()) {
            if self.retired.len() >= MAX_RETIRED {
                self.retired.pop_front();
            }
            self.retired.push_back(old.process_id);
        }
        self.flush_streams();
        let echo = OutputLine::plain(OutputKind::Prompt, format!("{}{}", self.prompt, handle.command));
        self.output.append(echo);
        self.streams = OutputStreams::default();
        self.active_process = Some(handle);
        self.draft.clear();
    }

    /// Append a streamed chunk, returning the number of complete lines added
    pub(crate) fn push_chunk(&mut self, stream: StreamKind, chunk: &str) -> usize {
        let lines = self.streams.feed(stream, chunk);
        let count = lines.len();
        self.output.extend(lines);
        count
    }

    /// Emit any partial lines held back by the stream assemblers
    pub(crate) fn flush_streams(&mut self) -> usize {
        let lines = self.streams.flush();
        let count = lines.len();
        self.output.extend(lines);
        count
    }

    pub(crate) fn push_line(&mut self, line: OutputLine) {
        self.output.append(line);
    }

    pub(crate) fn clear_output(&mut self) {
        self.output.clear();
    }

    /// Take the process and its output out of the session when it is
    /// dropped while the process may still be alive.
    pub(crate) fn into_detached(mut self) -> (Option<ProcessHandle>, OutputBuffer) {
        self.flush_streams();
        (self.active_process, self.output)
    }
}
