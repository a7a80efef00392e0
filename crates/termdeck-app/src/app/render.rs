use colored::{ColoredString, Colorize};

use termdeck_terminal::{BackgroundOrigin, BackgroundProcess, Session, StateChange, Terminal};
use termdeck_types::{Color, ConnectionState, OutputKind, OutputLine, ProcessState, Style};

fn to_colored(color: Color) -> colored::Color {
    match color {
        Color::Black => colored::Color::Black,
        Color::Red => colored::Color::Red,
        Color::Green => colored::Color::Green,
        Color::Yellow => colored::Color::Yellow,
        Color::Blue => colored::Color::Blue,
        Color::Magenta => colored::Color::Magenta,
        Color::Cyan => colored::Color::Cyan,
        Color::White => colored::Color::White,
    }
}

fn paint(text: &str, style: Style) -> ColoredString {
    let mut out = ColoredString::from(text);
    if let Some(fg) = style.fg {
        out = out.color(to_colored(fg));
    }
    if style.bold {
        out = out.bold();
    }
    out
}

/// Render one output line for the terminal
pub fn format_line(line: &OutputLine) -> String {
    match line.kind {
        OutputKind::SystemSuccess => return format!("{} {}", "✓".green(), line.content.green()),
        OutputKind::SystemError => return format!("{} {}", "✗".red(), line.content.red()),
        OutputKind::Prompt => return line.content.bright_black().to_string(),
        OutputKind::Stderr if line.spans.is_empty() => return line.content.bright_red().to_string(),
        _ => {}
    }

    let mut out = String::with_capacity(line.content.len());
    let mut pos = 0;
    for span in &line.spans {
        // spans come from our own annotator, but stay safe on odd offsets
        let (Some(before), Some(styled)) = (
            line.content.get(pos..span.start),
            line.content.get(span.start..span.end),
        ) else {
            continue;
        };
        out.push_str(before);
        out.push_str(&paint(styled, span.style).to_string());
        pos = span.end;
    }
    out.push_str(line.content.get(pos..).unwrap_or_default());
    out
}

fn state_label(state: ProcessState, unknown: bool) -> ColoredString {
    let label = if unknown {
        format!("{}?", state)
    } else {
        state.to_string()
    };
    match state {
        ProcessState::Pending => label.yellow(),
        ProcessState::Running => label.cyan(),
        ProcessState::Completed => label.green(),
        ProcessState::Failed => label.red(),
        ProcessState::Stopped => label.bright_black(),
    }
}

pub fn connection_banner(state: ConnectionState) -> ColoredString {
    match state {
        ConnectionState::Connected => "● connected".green(),
        ConnectionState::Connecting => "○ connecting…".yellow(),
        ConnectionState::Reconnecting { attempt } => {
            format!("○ reconnecting (attempt {}) - running commands shown as unknown", attempt).yellow()
        }
    }
}

pub fn session_header(index: usize, session: &Session) -> String {
    let status = match session.active_process() {
        Some(p) => format!(" [{}: {}]", p.command, state_label(p.state, p.status_unknown)),
        None => String::new(),
    };
    format!(
        "── {} {} {}{} ──",
        format!("#{}", index + 1).bright_cyan().bold(),
        session.title().bold(),
        session.working_directory().bright_black(),
        status
    )
}

pub fn print_tabs(terminal: &Terminal) {
    let focused = terminal.focused().map(|s| s.id());
    for (i, session) in terminal.sessions().iter().enumerate() {
        let marker = if Some(session.id()) == focused { "*" } else { " " };
        println!("{} {}", marker, session_header(i, session));
    }
}

pub fn background_row(process: &BackgroundProcess) -> String {
    let handle = process.handle();
    let origin = match process.origin() {
        BackgroundOrigin::Reported => String::new(),
        BackgroundOrigin::Detached { .. } => " (detached)".bright_black().to_string(),
    };
    let exit = handle
        .exit_code
        .map(|c| format!(" exit {}", c))
        .unwrap_or_default();
    format!(
        "{} {:>8}  {:<10} {}{}{}",
        if process.is_focused() { "▶" } else { " " },
        process.id().to_string().bright_white(),
        state_label(handle.state, handle.status_unknown),
        process.command(),
        exit,
        origin
    )
}

pub fn print_processes(terminal: &Terminal) {
    let background = terminal.background();
    if background.is_empty() {
        println!("{}", "No background processes".bright_black());
        return;
    }
    for process in background.processes() {
        println!("{}", background_row(process));
    }
}

/// Print the whole retained output of the focused session
pub fn replay_focused(terminal: &Terminal) {
    let Some(session) = terminal.focused() else {
        return;
    };
    let index = terminal
        .sessions()
        .iter()
        .position(|s| s.id() == session.id())
        .unwrap_or(0);
    println!("{}", session_header(index, session));
    for line in session.output().iter() {
        println!("{}", format_line(line));
    }
}

/// Print what a state change means for the user
pub fn render_change(terminal: &Terminal, change: &StateChange) {
    let focused = terminal.focused().map(|s| s.id());
    match change {
        StateChange::OutputAppended { session_id, lines } if Some(*session_id) == focused => {
            let Some(session) = terminal.session(*session_id) else {
                return;
            };
            if !session.follow_output() {
                return;
            }
            for line in session.output().tail(*lines) {
                // the line editor already showed what was typed
                if line.kind != OutputKind::Prompt {
                    println!("{}", format_line(&line));
                }
            }
        }
        StateChange::BackgroundOutput { process_id, lines } => {
            let Some(process) = terminal.background().get(process_id) else {
                return;
            };
            if !process.is_focused() {
                return;
            }
            for line in process.output().tail(*lines) {
                println!("{} {}", format!("[{}]", process_id).magenta(), format_line(&line));
            }
        }
        StateChange::FocusChanged(_) => replay_focused(terminal),
        StateChange::SessionClosed(id) => {
            println!("{}", format!("Session {} closed", id).bright_black());
        }
        StateChange::ConnectionChanged(state) => println!("{}", connection_banner(*state)),
        StateChange::BackgroundRemoved(id) => {
            println!("{}", format!("Background process {} removed", id).bright_black());
        }
        _ => {}
    }
}
