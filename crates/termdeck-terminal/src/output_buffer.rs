use std::collections::VecDeque;

use chrono::Utc;
use termdeck_protocol::StreamKind;
use termdeck_types::{OutputKind, OutputLine, Style, DEFAULT_MAX_OUTPUT_LINES};

use crate::ansi;

/// Bounded ring of output lines.
///
/// Once `capacity` lines are held, each append evicts the oldest line, so a
/// process that never stops printing cannot grow the buffer without limit.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    lines: VecDeque<OutputLine>,
    capacity: usize,
    total_appended: u64,
    dropped: u64,
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_OUTPUT_LINES)
    }
}

impl OutputBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
            total_appended: 0,
            dropped: 0,
        }
    }

    pub fn append(&mut self, line: OutputLine) {
        while self.lines.len() >= self.capacity {
            self.lines.pop_front();
            self.dropped += 1;
        }
        self.lines.push_back(line);
        self.total_appended += 1;
    }

    pub fn extend<I: IntoIterator<Item = OutputLine>>(&mut self, lines: I) {
        for line in lines {
            self.append(line);
        }
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// Copy of the retained lines, oldest first
    pub fn snapshot(&self) -> Vec<OutputLine> {
        self.lines.iter().cloned().collect()
    }

    /// Last `n` retained lines, oldest first
    pub fn tail(&self, n: usize) -> Vec<OutputLine> {
        let skip = self.lines.len().saturating_sub(n);
        self.lines.iter().skip(skip).cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OutputLine> {
        self.lines.iter()
    }

    pub fn last(&self) -> Option<&OutputLine> {
        self.lines.back()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Lines appended over the buffer's lifetime, including evicted ones
    pub fn total_appended(&self) -> u64 {
        self.total_appended
    }

    /// Lines evicted to respect the capacity
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Splits a streamed byte-oriented chunk sequence into complete lines.
///
/// A chunk boundary may fall anywhere, so the unterminated tail is held
/// back until the next newline or an explicit flush.
#[derive(Debug, Clone)]
pub struct LineAssembler {
    kind: OutputKind,
    pending: String,
    style: Style,
}

impl LineAssembler {
    pub fn new(kind: OutputKind) -> Self {
        Self {
            kind,
            pending: String::new(),
            style: Style::default(),
        }
    }

    pub fn push(&mut self, chunk: &str) -> Vec<OutputLine> {
        let mut lines = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.find('\n') {
            self.pending.push_str(&rest[..pos]);
            let raw = std::mem::take(&mut self.pending);
            lines.push(self.finish(&raw));
            rest = &rest[pos + 1..];
        }
        self.pending.push_str(rest);
        lines
    }

    /// Emit whatever partial line is held back
    pub fn flush(&mut self) -> Option<OutputLine> {
        if self.pending.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.pending);
        let line = self.finish(&raw);
        self.style = Style::default();
        Some(line)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    fn finish(&mut self, raw: &str) -> OutputLine {
        let raw = raw.strip_suffix('\r').unwrap_or(raw);
        let (annotated, style) = ansi::annotate_with(raw, self.style);
        self.style = style;
        OutputLine {
            content: annotated.text,
            spans: annotated.spans,
            timestamp: Utc::now(),
            kind: self.kind,
        }
    }
}

/// One assembler per output stream of a process
#[derive(Debug, Clone)]
pub struct OutputStreams {
    stdout: LineAssembler,
    stderr: LineAssembler,
}

impl Default for OutputStreams {
    fn default() -> Self {
        Self {
            stdout: LineAssembler::new(OutputKind::Stdout),
            stderr: LineAssembler::new(OutputKind::Stderr),
        }
    }
}

impl OutputStreams {
    pub fn feed(&mut self, stream: StreamKind, chunk: &str) -> Vec<OutputLine> {
        match stream {
            StreamKind::Stdout => self.stdout.push(chunk),
            StreamKind::Stderr => self.stderr.push(chunk),
        }
    }

    pub fn flush(&mut self) -> Vec<OutputLine> {
        self.stdout.flush().into_iter().chain(self.stderr.flush()).collect()
    }
}
