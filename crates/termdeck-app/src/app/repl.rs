use anyhow::{Context, Result};
use colored::Colorize;
use log::{debug, warn};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::sync::mpsc as std_mpsc;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use termdeck_terminal::{Direction, InterruptOutcome, OutputQuery, Terminal, Transition};
use termdeck_transport::TransportEvent;
use termdeck_types::SessionId;

use super::commands::{self, Command, HELP};
use super::render::{connection_banner, format_line, print_processes, print_tabs, render_change, replay_focused};
use super::setup::{connect, Wiring};
use crate::config::AppConfig;

/// How often timers (close grace, process polling) are checked
const TICK_INTERVAL: Duration = Duration::from_millis(250);

/// Ask the input thread for one line
struct PromptRequest {
    prompt: String,
    initial: String,
}

#[derive(Debug)]
enum InputEvent {
    Line(String),
    /// Ctrl-C
    Interrupt,
    /// Ctrl-D or a broken terminal
    Quit,
}

/// What the loop does after a command
#[derive(Debug, PartialEq)]
enum Flow {
    /// Prompt again, pre-filled with this text
    Prompt(String),
    Quit,
}

/// The line editor blocks, so it lives on its own thread and answers one
/// prompt request at a time.
fn spawn_input_thread() -> Result<(std_mpsc::Sender<PromptRequest>, mpsc::UnboundedReceiver<InputEvent>)> {
    let mut rl = DefaultEditor::new().context("Failed to initialize line editor")?;
    let (request_tx, request_rx) = std_mpsc::channel::<PromptRequest>();
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    thread::spawn(move || {
        while let Ok(request) = request_rx.recv() {
            let event = match rl.readline_with_initial(&request.prompt, (&request.initial, "")) {
                Ok(line) => {
                    if !line.trim().is_empty() {
                        let _ = rl.add_history_entry(line.as_str());
                    }
                    InputEvent::Line(line)
                }
                Err(ReadlineError::Interrupted) => InputEvent::Interrupt,
                Err(ReadlineError::Eof) => InputEvent::Quit,
                Err(e) => {
                    warn!("Line editor failed: {}", e);
                    InputEvent::Quit
                }
            };
            let quit = matches!(event, InputEvent::Quit);
            if event_tx.send(event).is_err() || quit {
                break;
            }
        }
    });

    Ok((request_tx, event_rx))
}

fn focused_id(terminal: &Terminal) -> Result<SessionId> {
    terminal.focused().map(|s| s.id()).context("No open session")
}

fn prompt_request(terminal: &Terminal, initial: String) -> PromptRequest {
    let prompt = match terminal.focused() {
        Some(session) if terminal.sessions().len() > 1 => {
            format!("[{}] {}", session.title(), session.prompt())
        }
        Some(session) => session.prompt().to_string(),
        None => "$ ".to_string(),
    };
    PromptRequest { prompt, initial }
}

/// Apply one parsed command to the terminal
fn dispatch(terminal: &mut Terminal, command: Command) -> Result<Flow> {
    let id = focused_id(terminal)?;
    match command {
        Command::Run(text) => {
            if !text.trim().is_empty() {
                terminal.submit(id, &text)?;
            }
        }
        Command::New => {
            terminal.create_session();
        }
        Command::Close => terminal.close_session(id)?,
        Command::Tab(n) => {
            let target = terminal
                .sessions()
                .get(n - 1)
                .map(|s| s.id())
                .with_context(|| format!("No session #{}", n))?;
            terminal.focus(target)?;
        }
        Command::Rename(title) => {
            terminal.rename(id, title)?;
            print_tabs(terminal);
        }
        Command::Interrupt => {
            if terminal.interrupt(id)? == InterruptOutcome::Sent {
                println!("{}", "^C".bright_black());
            }
        }
        Command::Kill => {
            if terminal.kill(id)? == Transition::Ignored {
                println!("{}", "Nothing is running".bright_black());
            }
        }
        Command::Up => return Ok(Flow::Prompt(terminal.recall_history(id, Direction::Up)?)),
        Command::Down => return Ok(Flow::Prompt(terminal.recall_history(id, Direction::Down)?)),
        Command::Clear => terminal.clear_output(id)?,
        Command::Follow(follow) => {
            terminal.set_follow_output(id, follow)?;
            if follow {
                replay_focused(terminal);
            }
        }
        Command::Ps => print_processes(terminal),
        Command::Refresh => terminal.refresh_processes(),
        Command::Focus(pid) => {
            let shown = terminal.toggle_background_focus(&pid)?;
            let note = if shown { "following" } else { "no longer following" };
            println!("{}", format!("{} output of {}", note, pid).bright_black());
        }
        Command::Stop(pid) => terminal.stop_background(&pid)?,
        Command::BgKill(pid) => {
            if terminal.kill_background(&pid)? == Transition::Ignored {
                println!("{}", format!("{} is not running", pid).bright_black());
            }
        }
        Command::BgLog { id: pid, filter } => {
            let query = OutputQuery {
                filter,
                lines: None,
                include_stderr: true,
            };
            for line in terminal.read_background_output(&pid, &query)? {
                println!("{}", format_line(&line));
            }
        }
        Command::Dismiss(pid) => terminal.dismiss_background(&pid)?,
        Command::Help => println!("{}", HELP),
        Command::Quit => return Ok(Flow::Quit),
    }
    Ok(Flow::Prompt(String::new()))
}

fn handle_input(terminal: &mut Terminal, event: InputEvent) -> Flow {
    let result = match event {
        InputEvent::Quit => return Flow::Quit,
        InputEvent::Interrupt => dispatch(terminal, Command::Interrupt),
        InputEvent::Line(line) => commands::parse(&line).and_then(|command| dispatch(terminal, command)),
    };
    match result {
        Ok(flow) => flow,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".bright_red().bold(), e);
            Flow::Prompt(String::new())
        }
    }
}

/// Run interactive REPL mode
pub async fn run_repl_mode(config: &AppConfig) -> Result<()> {
    println!("{}", "termdeck - multi-session terminal".bright_cyan().bold());
    println!("{}", format!("Backend: {}", config.backend_url).bright_black());
    println!("{}", "Type :help for commands, :quit or Ctrl-D to exit\n".bright_black());

    let Wiring { mut terminal, mut transport } = connect(config);
    let mut changes = terminal.subscribe();
    let (prompt_tx, mut input) = spawn_input_thread()?;

    println!("{}", connection_banner(terminal.connection()));
    let _ = prompt_tx.send(prompt_request(&terminal, String::new()));

    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            event = transport.events.recv() => match event {
                Some(TransportEvent::ConnectionChanged(state)) => terminal.set_connection(state),
                Some(TransportEvent::Message(msg)) => terminal.handle_inbound(msg),
                Some(TransportEvent::ProtocolError(e)) => warn!("Ignoring backend frame: {}", e),
                None => {
                    eprintln!("{}", "Connection loop stopped".bright_red());
                    break;
                }
            },
            event = input.recv() => {
                let Some(event) = event else {
                    break;
                };
                debug!("Input: {:?}", event);
                let flow = handle_input(&mut terminal, event);
                // Show what the command did before the next prompt
                while let Ok(change) = changes.try_recv() {
                    render_change(&terminal, &change);
                }
                match flow {
                    Flow::Prompt(initial) => {
                        if prompt_tx.send(prompt_request(&terminal, initial)).is_err() {
                            break;
                        }
                    }
                    Flow::Quit => break,
                }
            }
            _ = ticker.tick() => terminal.tick(),
            Some(change) = changes.recv() => render_change(&terminal, &change),
        }
    }

    transport.shutdown();
    println!("{}", "Goodbye!".bright_cyan());
    Ok(())
}
