use anyhow::{bail, Result};
use termdeck_types::ProcessId;

/// One line of user input, parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Plain input: run it in the focused session
    Run(String),
    New,
    Close,
    /// Focus the Nth session, 1-based
    Tab(usize),
    Rename(String),
    Interrupt,
    Kill,
    Up,
    Down,
    Clear,
    Follow(bool),
    Ps,
    Refresh,
    Focus(ProcessId),
    Stop(ProcessId),
    BgKill(ProcessId),
    BgLog { id: ProcessId, filter: Option<String> },
    Dismiss(ProcessId),
    Help,
    Quit,
}

pub const HELP: &str = "\
Commands:
  <command>              run in the focused session
  :new                   open a session
  :close                 close the focused session
  :tab N                 focus session N
  :rename TITLE          rename the focused session
  :int                   interrupt the running command (or clear input)
  :kill                  kill the running command
  :up / :down            recall command history
  :clear                 clear the session output
  :follow on|off         toggle auto-scroll
  :ps                    list background processes
  :refresh               request the process list now
  :focus PID             show/hide a background process's output
  :stop PID              ask a background process to stop
  :bgkill PID            kill a background process
  :bglog PID [REGEX]     print a background process's output
  :dismiss PID           forget a finished background process
  :help                  show this help
  :quit                  exit";

fn pid_arg(name: &str, rest: &str) -> Result<ProcessId> {
    let pid = rest.trim();
    if pid.is_empty() || pid.contains(char::is_whitespace) {
        bail!("usage: :{} PID", name);
    }
    Ok(ProcessId::from(pid))
}

pub fn parse(line: &str) -> Result<Command> {
    let trimmed = line.trim();
    let Some(body) = trimmed.strip_prefix(':') else {
        return Ok(Command::Run(line.to_string()));
    };

    let (name, rest) = match body.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (body, ""),
    };

    let command = match name {
        "new" => Command::New,
        "close" => Command::Close,
        "tab" => match rest.parse::<usize>() {
            Ok(n) if n > 0 => Command::Tab(n),
            _ => bail!("usage: :tab N (1-based)"),
        },
        "rename" if !rest.is_empty() => Command::Rename(rest.to_string()),
        "rename" => bail!("usage: :rename TITLE"),
        "int" | "interrupt" => Command::Interrupt,
        "kill" => Command::Kill,
        "up" => Command::Up,
        "down" => Command::Down,
        "clear" => Command::Clear,
        "follow" => match rest {
            "on" | "" => Command::Follow(true),
            "off" => Command::Follow(false),
            _ => bail!("usage: :follow on|off"),
        },
        "ps" => Command::Ps,
        "refresh" => Command::Refresh,
        "focus" => Command::Focus(pid_arg(name, rest)?),
        "stop" => Command::Stop(pid_arg(name, rest)?),
        "bgkill" => Command::BgKill(pid_arg(name, rest)?),
        "dismiss" => Command::Dismiss(pid_arg(name, rest)?),
        "bglog" => {
            let (pid, filter) = match rest.split_once(char::is_whitespace) {
                Some((pid, filter)) => (pid, Some(filter.trim().to_string())),
                None => (rest, None),
            };
            Command::BgLog {
                id: pid_arg(name, pid)?,
                filter: filter.filter(|f| !f.is_empty()),
            }
        }
        "help" | "h" | "?" => Command::Help,
        "quit" | "q" | "exit" => Command::Quit,
        other => bail!("unknown command :{} (try :help)", other),
    };
    Ok(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_input_runs() {
        assert_eq!(parse("ls -la").unwrap(), Command::Run("ls -la".to_string()));
        assert_eq!(parse("").unwrap(), Command::Run(String::new()));
    }

    #[test]
    fn test_session_commands() {
        assert_eq!(parse(":new").unwrap(), Command::New);
        assert_eq!(parse(" :tab 2 ").unwrap(), Command::Tab(2));
        assert_eq!(parse(":rename build box").unwrap(), Command::Rename("build box".to_string()));
        assert_eq!(parse(":follow off").unwrap(), Command::Follow(false));
        assert!(parse(":tab 0").is_err());
        assert!(parse(":tab x").is_err());
        assert!(parse(":rename").is_err());
    }

    #[test]
    fn test_background_commands() {
        assert_eq!(parse(":focus 4242").unwrap(), Command::Focus(ProcessId::from("4242")));
        assert_eq!(
            parse(":bglog 7 ^ERROR .*").unwrap(),
            Command::BgLog {
                id: ProcessId::from("7"),
                filter: Some("^ERROR .*".to_string()),
            }
        );
        assert_eq!(
            parse(":bglog 7").unwrap(),
            Command::BgLog { id: ProcessId::from("7"), filter: None }
        );
        assert!(parse(":stop").is_err());
        assert!(parse(":bgkill a b").is_err());
    }

    #[test]
    fn test_unknown_command() {
        let err = parse(":frobnicate").unwrap_err();
        assert!(err.to_string().contains("frobnicate"));
    }
}
