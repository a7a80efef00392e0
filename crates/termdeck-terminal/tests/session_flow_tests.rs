mod common;

use std::time::{Duration, Instant};

use common::Harness;
use pretty_assertions::assert_eq;
use termdeck_protocol::{InboundMessage, OutboundMessage, ProcessInfo};
use termdeck_terminal::{
    BackgroundOrigin, Direction, OutputQuery, StateChange, TerminalConfig, TerminalError,
    Transition,
};
use termdeck_types::{ConnectionState, OutputKind, ProcessId, ProcessState, SessionId};

#[test]
fn test_echo_hi_scenario() {
    let mut h = Harness::new();
    let id = h.focused_id();

    h.terminal.submit(id, "echo hi").unwrap();
    assert_eq!(
        h.sent(),
        vec![OutboundMessage::ExecuteCommand {
            session_id: id,
            command: "echo hi".to_string(),
            working_directory: "~".to_string(),
        }]
    );

    h.started(id, "4711");
    h.output(id, "hi\n");
    h.complete(id, Some(0));

    let session = h.terminal.session(id).unwrap();
    let handle = session.active_process().unwrap();
    assert_eq!(handle.state, ProcessState::Completed);
    assert_eq!(handle.exit_code, Some(0));
    assert_eq!(handle.process_id, Some(ProcessId::from("4711")));

    let kinds: Vec<_> = session.output().iter().map(|l| l.kind).collect();
    assert_eq!(kinds, vec![OutputKind::Prompt, OutputKind::Stdout, OutputKind::SystemSuccess]);
    assert_eq!(h.lines(id)[..2].to_vec(), vec!["~ $ echo hi".to_string(), "hi".to_string()]);
}

#[test]
fn test_one_foreground_process_per_session() {
    let mut h = Harness::new();
    let id = h.focused_id();
    h.terminal.submit(id, "sleep 30").unwrap();
    h.sent();

    for _ in 0..3 {
        assert!(matches!(h.terminal.submit(id, "ls"), Err(TerminalError::AlreadyRunning(_))));
    }
    assert!(h.sent().is_empty());

    // other sessions are independent
    let other = h.terminal.create_session();
    h.terminal.submit(other, "ls").unwrap();
    assert_eq!(h.sent().len(), 1);

    h.complete(id, Some(0));
    h.terminal.submit(id, "ls").unwrap();
}

#[test]
fn test_duplicate_completion_reports_once() {
    let mut h = Harness::new();
    let id = h.focused_id();
    h.terminal.submit(id, "exit 3").unwrap();
    h.complete(id, Some(3));
    h.complete(id, Some(3));
    h.complete(id, Some(0));

    let session = h.terminal.session(id).unwrap();
    assert_eq!(session.active_process().unwrap().exit_code, Some(3));
    let system: Vec<_> = session.output().iter().filter(|l| l.kind.is_system()).collect();
    assert_eq!(system.len(), 1);
    assert_eq!(system[0].content, "Process exited with code 3");
}

#[test]
fn test_output_buffer_keeps_last_lines() {
    let mut h = Harness::with_config(TerminalConfig {
        max_output_lines: 50,
        ..TerminalConfig::default()
    });
    let id = h.focused_id();
    h.terminal.submit(id, "seq 200").unwrap();

    let chunk: String = (1..=200).map(|n| format!("{}\n", n)).collect();
    // split mid-line to exercise reassembly
    let (a, b) = chunk.split_at(301);
    h.output(id, a);
    h.output(id, b);

    let lines = h.lines(id);
    assert_eq!(lines.len(), 50);
    assert_eq!(lines.first().unwrap(), "151");
    assert_eq!(lines.last().unwrap(), "200");
}

#[test]
fn test_history_round_trip() {
    let mut h = Harness::new();
    let id = h.focused_id();
    for cmd in ["ls", "pwd", "git status"] {
        h.terminal.submit(id, cmd).unwrap();
        h.complete(id, Some(0));
    }

    let up: Vec<_> = (0..4)
        .map(|_| h.terminal.recall_history(id, Direction::Up).unwrap())
        .collect();
    assert_eq!(up, vec!["git status", "pwd", "ls", "ls"]);
    assert_eq!(h.terminal.recall_history(id, Direction::Down).unwrap(), "pwd");
}

#[test]
fn test_kill_before_ack_addresses_session() {
    let mut h = Harness::new();
    let id = h.focused_id();
    h.terminal.submit(id, "make -j8").unwrap();
    h.sent();

    assert_eq!(h.terminal.kill(id).unwrap(), Transition::Applied);
    assert_eq!(
        h.terminal.session(id).unwrap().active_process().unwrap().state,
        ProcessState::Stopped
    );
    assert_eq!(
        h.sent(),
        vec![OutboundMessage::KillProcess { process_id: None, session_id: Some(id) }]
    );

    // late output is still shown, the state does not move
    h.output(id, "make: *** [all] Terminated\n");
    h.complete(id, Some(143));
    let session = h.terminal.session(id).unwrap();
    assert_eq!(session.active_process().unwrap().state, ProcessState::Stopped);
    assert_eq!(session.output().last().unwrap().content, "make: *** [all] Terminated");
}

#[test]
fn test_close_detaches_process_after_grace() {
    let mut h = Harness::new();
    let id = h.focused_id();
    h.terminal.submit(id, "python -m http.server").unwrap();
    h.started(id, "900");
    h.output(id, "Serving HTTP on 0.0.0.0 port 8000\n");
    h.sent();

    let now = Instant::now();
    h.terminal.close_session_at(id, now).unwrap();
    assert!(h.terminal.session(id).is_none());
    assert_eq!(h.terminal.sessions().len(), 1);
    assert_eq!(
        h.sent(),
        vec![OutboundMessage::KillProcess {
            process_id: Some(ProcessId::from("900")),
            session_id: Some(id),
        }]
    );

    h.terminal.tick_at(now + Duration::from_millis(2999));
    assert!(h.terminal.background().is_empty());

    h.terminal.tick_at(now + Duration::from_millis(3000));
    let pid = ProcessId::from("900");
    let bg = h.terminal.background().get(&pid).unwrap();
    assert_eq!(bg.origin(), BackgroundOrigin::Detached { session_id: id });
    assert_eq!(bg.state(), ProcessState::Running);

    // foreground stream for the dropped tab now lands in the background entry
    h.output(id, "GET / 200\n");
    let lines = h
        .terminal
        .read_background_output(&pid, &OutputQuery { filter: Some("GET".to_string()), ..Default::default() })
        .unwrap();
    assert_eq!(lines.len(), 1);

    h.complete(id, Some(0));
    assert_eq!(h.terminal.background().get(&pid).unwrap().state(), ProcessState::Completed);
}

#[test]
fn test_close_resolved_within_grace_is_not_detached() {
    let mut h = Harness::new();
    let id = h.focused_id();
    h.terminal.submit(id, "sleep 100").unwrap();

    let now = Instant::now();
    h.terminal.close_session_at(id, now).unwrap();
    h.complete(id, None);
    h.terminal.tick_at(now + Duration::from_secs(5));
    assert!(h.terminal.background().is_empty());
}

fn listed(pid: &str, session_id: SessionId) -> ProcessInfo {
    ProcessInfo {
        id: ProcessId::from(pid),
        command: "tail -f app.log".to_string(),
        status: Some("running".to_string()),
        exit_code: None,
        started_at: None,
        session_id: Some(session_id),
    }
}

#[test]
fn test_detached_process_listed_once_under_backend_id() {
    let mut h = Harness::new();
    let id = h.focused_id();
    h.terminal.submit(id, "tail -f app.log").unwrap();

    let now = Instant::now();
    h.terminal.close_session_at(id, now).unwrap();
    h.terminal.tick_at(now + Duration::from_secs(3));
    let placeholder = ProcessId::new(format!("detached-{}", id));
    assert!(h.terminal.background().get(&placeholder).is_some());

    h.terminal.handle_inbound(InboundMessage::ProcessList {
        processes: vec![listed("500", id)],
        incremental: false,
    });
    assert_eq!(h.terminal.background().len(), 1);
    assert!(h.terminal.background().get(&placeholder).is_none());
    let bg = h.terminal.background().get(&ProcessId::from("500")).unwrap();
    assert_eq!(bg.origin(), BackgroundOrigin::Detached { session_id: id });
    assert_eq!(bg.handle().process_id, Some(ProcessId::from("500")));

    h.output(id, "still here\n");
    assert_eq!(h.terminal.background().get(&ProcessId::from("500")).unwrap().output().len(), 1);
}

#[test]
fn test_late_spawn_ack_names_detached_process() {
    let mut h = Harness::new();
    let id = h.focused_id();
    h.terminal.submit(id, "tail -f app.log").unwrap();

    let now = Instant::now();
    h.terminal.close_session_at(id, now).unwrap();
    h.terminal.tick_at(now + Duration::from_secs(3));
    h.started(id, "501");

    let pid = ProcessId::from("501");
    assert_eq!(h.terminal.background().len(), 1);
    assert_eq!(
        h.terminal.background().get(&pid).unwrap().origin(),
        BackgroundOrigin::Detached { session_id: id }
    );

    // the process list now refers to the same entry
    h.terminal.handle_inbound(InboundMessage::ProcessList {
        processes: vec![listed("501", id)],
        incremental: false,
    });
    assert_eq!(h.terminal.background().len(), 1);
}

#[test]
fn test_parked_session_owns_listed_process() {
    let mut h = Harness::new();
    let id = h.focused_id();
    h.terminal.submit(id, "tail -f app.log").unwrap();

    let now = Instant::now();
    h.terminal.close_session_at(id, now).unwrap();
    h.terminal.handle_inbound(InboundMessage::ProcessList {
        processes: vec![listed("502", id)],
        incremental: false,
    });
    assert!(h.terminal.background().is_empty());

    h.terminal.tick_at(now + Duration::from_secs(3));
    assert_eq!(h.terminal.background().len(), 1);
    assert!(h.terminal.background().get(&ProcessId::from("502")).is_some());
}

#[test]
fn test_kill_then_resubmit_ignores_old_exit() {
    let mut h = Harness::new();
    let id = h.focused_id();
    h.terminal.submit(id, "sleep 100").unwrap();
    h.started(id, "111");
    h.terminal.kill(id).unwrap();
    h.terminal.submit(id, "make").unwrap();

    h.terminal.handle_inbound(InboundMessage::BashComplete {
        tab_id: id,
        exit_code: Some(143),
        process_id: Some(ProcessId::from("111")),
    });
    let process = h.terminal.session(id).unwrap().active_process().unwrap();
    assert_eq!(process.command, "make");
    assert_eq!(process.state, ProcessState::Pending);
    assert!(matches!(h.terminal.submit(id, "ls"), Err(TerminalError::AlreadyRunning(_))));

    h.started(id, "222");
    let process = h.terminal.session(id).unwrap().active_process().unwrap();
    assert_eq!(process.state, ProcessState::Running);
    assert_eq!(process.process_id, Some(ProcessId::from("222")));
}

#[test]
fn test_reconnect_re_requests_state() {
    let mut h = Harness::new();
    h.terminal.set_connection(ConnectionState::Connected);
    h.sent();

    h.terminal.set_connection(ConnectionState::Reconnecting { attempt: 1 });
    h.terminal.set_connection(ConnectionState::Reconnecting { attempt: 2 });
    assert!(h.sent().is_empty());

    h.terminal.set_connection(ConnectionState::Connected);
    assert_eq!(
        h.sent(),
        vec![OutboundMessage::GetCurrentDirectory, OutboundMessage::GetProcessList]
    );
}

#[test]
fn test_directory_change_updates_prompts() {
    let mut h = Harness::new();
    let id = h.focused_id();
    h.terminal.handle_inbound(InboundMessage::DirectoryChanged {
        directory: "/home/dev/project".to_string(),
    });
    assert_eq!(h.terminal.session(id).unwrap().prompt(), "/home/dev/project $ ");

    h.terminal.submit(id, "ls").unwrap();
    match h.sent().pop() {
        Some(OutboundMessage::ExecuteCommand { working_directory, .. }) => {
            assert_eq!(working_directory, "/home/dev/project")
        }
        other => panic!("unexpected message: {:?}", other),
    }
}

#[tokio::test]
async fn test_subscriber_sees_process_lifecycle() {
    let mut h = Harness::new();
    let mut changes = h.terminal.subscribe();
    let id = h.focused_id();

    h.terminal.submit(id, "true").unwrap();
    h.complete(id, Some(0));

    let mut states = Vec::new();
    while let Ok(change) = changes.try_recv() {
        if let StateChange::ProcessStateChanged { session_id, state } = change {
            assert_eq!(session_id, id);
            states.push(state);
        }
    }
    assert_eq!(states, vec![ProcessState::Pending, ProcessState::Completed]);
}
