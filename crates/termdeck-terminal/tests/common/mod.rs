use termdeck_protocol::{InboundMessage, OutboundMessage, StreamKind};
use termdeck_terminal::{Outbox, Terminal, TerminalConfig};
use termdeck_types::{ProcessId, SessionId};
use tokio::sync::mpsc::UnboundedReceiver;

/// Terminal wired to an in-memory outbound queue
pub struct Harness {
    pub terminal: Terminal,
    pub outbound: UnboundedReceiver<OutboundMessage>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(TerminalConfig::default())
    }

    pub fn with_config(config: TerminalConfig) -> Self {
        let (outbox, outbound) = Outbox::channel();
        Self {
            terminal: Terminal::new(config, outbox, None),
            outbound,
        }
    }

    pub fn focused_id(&self) -> SessionId {
        self.terminal.focused().expect("a session is always focused").id()
    }

    /// Everything sent since the last call
    pub fn sent(&mut self) -> Vec<OutboundMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = self.outbound.try_recv() {
            out.push(msg);
        }
        out
    }

    pub fn started(&mut self, tab_id: SessionId, pid: &str) {
        self.terminal.handle_inbound(InboundMessage::BashStarted {
            tab_id,
            process_id: ProcessId::from(pid),
        });
    }

    pub fn output(&mut self, tab_id: SessionId, text: &str) {
        self.terminal.handle_inbound(InboundMessage::BashOutput {
            tab_id,
            output: text.to_string(),
            stream: StreamKind::Stdout,
        });
    }

    pub fn complete(&mut self, tab_id: SessionId, exit_code: Option<i32>) {
        self.terminal.handle_inbound(InboundMessage::BashComplete {
            tab_id,
            exit_code,
            process_id: None,
        });
    }

    pub fn lines(&self, id: SessionId) -> Vec<String> {
        self.terminal
            .session(id)
            .expect("session exists")
            .output()
            .iter()
            .map(|l| l.content.clone())
            .collect()
    }
}
