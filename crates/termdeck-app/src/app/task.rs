use anyhow::{bail, Result};
use colored::Colorize;
use log::{info, warn};
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use termdeck_terminal::{StateChange, Terminal};
use termdeck_transport::TransportEvent;
use termdeck_types::{OutputKind, ProcessState, SessionId};

use super::render::format_line;
use super::setup::{connect, Wiring};
use crate::config::AppConfig;

/// Exit status reported when the process was stopped rather than exiting
const STOPPED_EXIT_CODE: i32 = 130;

/// Shell-style exit status for a finished foreground process
fn exit_status(terminal: &Terminal, session_id: SessionId, state: ProcessState) -> i32 {
    let code = terminal
        .session(session_id)
        .and_then(|s| s.active_process())
        .and_then(|p| p.exit_code);
    match state {
        ProcessState::Completed => 0,
        ProcessState::Stopped => STOPPED_EXIT_CODE,
        _ => code.filter(|c| *c != 0).unwrap_or(1),
    }
}

fn print_new_output(terminal: &Terminal, session_id: SessionId, lines: usize) {
    let Some(session) = terminal.session(session_id) else {
        return;
    };
    for line in session.output().tail(lines) {
        match line.kind {
            OutputKind::Stdout => println!("{}", format_line(&line)),
            OutputKind::Prompt => {}
            _ => eprintln!("{}", format_line(&line)),
        }
    }
}

/// Run one command in a fresh session, stream its output and return its
/// exit status.
pub async fn run_exec_mode(config: &AppConfig, command: &str, timeout: Option<Duration>) -> Result<i32> {
    let Wiring { mut terminal, mut transport } = connect(config);
    let mut changes = terminal.subscribe();

    let Some(session_id) = terminal.focused().map(|s| s.id()) else {
        bail!("No session available");
    };
    // Queued by the transport until the connection is up
    terminal.submit(session_id, command)?;
    info!("Submitted {:?} in session {}", command, session_id);

    let deadline = async {
        match timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let status = loop {
        tokio::select! {
            event = transport.events.recv() => match event {
                Some(TransportEvent::ConnectionChanged(state)) => terminal.set_connection(state),
                Some(TransportEvent::Message(msg)) => terminal.handle_inbound(msg),
                Some(TransportEvent::ProtocolError(e)) => warn!("Ignoring backend frame: {}", e),
                None => bail!("Connection loop stopped before the command finished"),
            },
            Some(change) = changes.recv() => match change {
                StateChange::OutputAppended { session_id: id, lines } if id == session_id => {
                    print_new_output(&terminal, id, lines);
                }
                StateChange::ProcessStateChanged { session_id: id, state }
                    if id == session_id && state.is_terminal() =>
                {
                    break exit_status(&terminal, id, state);
                }
                StateChange::ConnectionChanged(state) if !state.is_connected() => {
                    eprintln!("{}", format!("Backend connection lost ({}), waiting…", state).yellow());
                }
                _ => {}
            },
            _ = ticker.tick() => terminal.tick(),
            _ = &mut deadline => {
                warn!("Timed out, killing {:?}", command);
                terminal.kill(session_id)?;
                // Let the kill request reach the backend
                tokio::time::sleep(Duration::from_millis(200)).await;
                transport.shutdown();
                bail!("Timed out after {}s", timeout.map(|t| t.as_secs()).unwrap_or_default());
            }
        }
    };

    transport.shutdown();
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use termdeck_protocol::InboundMessage;
    use termdeck_terminal::{Outbox, TerminalConfig};

    fn finished(exit_code: Option<i32>) -> (Terminal, SessionId) {
        let (outbox, _rx) = Outbox::channel();
        let mut terminal = Terminal::new(TerminalConfig::default(), outbox, None);
        let id = terminal.focused().map(|s| s.id()).unwrap();
        terminal.submit(id, "make").unwrap();
        terminal.handle_inbound(InboundMessage::BashComplete {
            tab_id: id,
            exit_code,
            process_id: None,
        });
        (terminal, id)
    }

    #[test]
    fn test_exit_status_follows_process() {
        let (terminal, id) = finished(Some(0));
        assert_eq!(exit_status(&terminal, id, ProcessState::Completed), 0);

        let (terminal, id) = finished(Some(3));
        assert_eq!(exit_status(&terminal, id, ProcessState::Failed), 3);

        let (terminal, id) = finished(None);
        assert_eq!(exit_status(&terminal, id, ProcessState::Failed), 1);
        assert_eq!(exit_status(&terminal, id, ProcessState::Stopped), STOPPED_EXIT_CODE);
    }
}
