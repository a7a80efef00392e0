//! Wire protocol between the terminal core and the command-execution backend.
//!
//! Every frame is a JSON object tagged by `"type"` with camelCase fields.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use termdeck_types::{ProcessId, SessionId};

/// Output stream a chunk was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    #[default]
    Stdout,
    Stderr,
}

/// Messages sent from the core to the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum OutboundMessage {
    // Foreground processes
    ExecuteCommand {
        session_id: SessionId,
        command: String,
        working_directory: String,
    },
    InterruptProcess {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        process_id: Option<ProcessId>,
        session_id: SessionId,
    },
    /// Authoritative termination. `session_id` addresses a foreground
    /// process the backend has not yet assigned an id to.
    KillProcess {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        process_id: Option<ProcessId>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        session_id: Option<SessionId>,
    },

    // Queries
    GetCurrentDirectory,
    GetProcessList,

    // Background processes
    StopProcess {
        process_id: ProcessId,
    },
}

impl OutboundMessage {
    /// Wire tag, for logging
    pub fn tag(&self) -> &'static str {
        match self {
            OutboundMessage::ExecuteCommand { .. } => "execute_command",
            OutboundMessage::InterruptProcess { .. } => "interrupt_process",
            OutboundMessage::KillProcess { .. } => "kill_process",
            OutboundMessage::GetCurrentDirectory => "get_current_directory",
            OutboundMessage::GetProcessList => "get_process_list",
            OutboundMessage::StopProcess { .. } => "stop_process",
        }
    }

    /// Signal requests must survive a reconnect; everything else may be
    /// shed when the send queue overflows.
    pub fn is_signal(&self) -> bool {
        matches!(
            self,
            OutboundMessage::InterruptProcess { .. }
                | OutboundMessage::KillProcess { .. }
                | OutboundMessage::StopProcess { .. }
        )
    }

    /// Polling queries are idempotent and can be collapsed.
    pub fn is_query(&self) -> bool {
        matches!(
            self,
            OutboundMessage::GetCurrentDirectory | OutboundMessage::GetProcessList
        )
    }
}

/// Messages received from the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum InboundMessage {
    // Foreground process stream
    BashStarted {
        tab_id: SessionId,
        process_id: ProcessId,
    },
    BashOutput {
        tab_id: SessionId,
        output: String,
        #[serde(default)]
        stream: StreamKind,
    },
    BashComplete {
        tab_id: SessionId,
        #[serde(default)]
        exit_code: Option<i32>,
        #[serde(default)]
        process_id: Option<ProcessId>,
    },

    // Environment
    DirectoryChanged {
        directory: String,
    },

    // Background processes
    ProcessList {
        processes: Vec<ProcessInfo>,
        #[serde(default)]
        incremental: bool,
    },
    ProcessOutput {
        process_id: ProcessId,
        line: String,
        #[serde(default)]
        stream: StreamKind,
    },
    ProcessStatus {
        process: ProcessUpdate,
    },
    ProcessStarted {
        process: ProcessInfo,
    },
    ProcessStopped {
        process_id: ProcessId,
        #[serde(default)]
        exit_code: Option<i32>,
    },

    // Errors
    Error {
        message: String,
    },
}

impl InboundMessage {
    /// Every tag this side understands
    pub const TAGS: &'static [&'static str] = &[
        "bash_started",
        "bash_output",
        "bash_complete",
        "directory_changed",
        "process_list",
        "process_output",
        "process_status",
        "process_started",
        "process_stopped",
        "error",
    ];
}

/// Background process as reported by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInfo {
    #[serde(alias = "processId")]
    pub id: ProcessId,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    /// RFC 3339 start time, if the backend reports one
    #[serde(default)]
    pub started_at: Option<String>,
    /// Owning session, when the process belongs to an open tab
    #[serde(default, alias = "tabId")]
    pub session_id: Option<SessionId>,
}

/// Partial status delta for a background process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessUpdate {
    #[serde(alias = "processId")]
    pub id: ProcessId,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub exit_code: Option<i32>,
}

/// Errors decoding or encoding protocol frames
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Frame has no \"type\" tag")]
    MissingType,

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Unexpected binary frame ({0} bytes)")]
    Binary(usize),
}

/// Parse one inbound text frame
pub fn decode(text: &str) -> Result<InboundMessage, ProtocolError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let tag = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or(ProtocolError::MissingType)?
        .to_string();

    if !InboundMessage::TAGS.contains(&tag.as_str()) {
        return Err(ProtocolError::UnknownType(tag));
    }

    Ok(serde_json::from_value(value)?)
}

/// Serialize one outbound frame
pub fn encode(msg: &OutboundMessage) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(msg)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn test_execute_command_wire_shape() {
        let session_id = Uuid::new_v4();
        let msg = OutboundMessage::ExecuteCommand {
            session_id,
            command: "ls -la".to_string(),
            working_directory: "/tmp".to_string(),
        };
        let value: serde_json::Value = serde_json::from_str(&encode(&msg).unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "execute_command",
                "sessionId": session_id.to_string(),
                "command": "ls -la",
                "workingDirectory": "/tmp",
            })
        );
    }

    #[test]
    fn test_unit_queries_encode_as_bare_tags() {
        assert_eq!(
            encode(&OutboundMessage::GetProcessList).unwrap(),
            r#"{"type":"get_process_list"}"#
        );
        assert_eq!(
            encode(&OutboundMessage::GetCurrentDirectory).unwrap(),
            r#"{"type":"get_current_directory"}"#
        );
    }

    #[test]
    fn test_kill_without_process_id_omits_field() {
        let session_id = Uuid::new_v4();
        let msg = OutboundMessage::KillProcess {
            process_id: None,
            session_id: Some(session_id),
        };
        let value: serde_json::Value = serde_json::from_str(&encode(&msg).unwrap()).unwrap();
        assert_eq!(value, json!({"type": "kill_process", "sessionId": session_id.to_string()}));
        assert!(msg.is_signal());
        assert!(!msg.is_query());
    }

    #[test]
    fn test_decode_bash_stream() {
        let tab = Uuid::new_v4();
        let out = decode(&format!(
            r#"{{"type":"bash_output","tabId":"{}","output":"hi\n"}}"#,
            tab
        ))
        .unwrap();
        assert_eq!(
            out,
            InboundMessage::BashOutput {
                tab_id: tab,
                output: "hi\n".to_string(),
                stream: StreamKind::Stdout,
            }
        );

        let done = decode(&format!(
            r#"{{"type":"bash_complete","tabId":"{}","exitCode":0,"processId":991}}"#,
            tab
        ))
        .unwrap();
        assert_eq!(
            done,
            InboundMessage::BashComplete {
                tab_id: tab,
                exit_code: Some(0),
                process_id: Some(ProcessId::from("991")),
            }
        );
    }

    #[test]
    fn test_decode_process_list_with_aliases() {
        let msg = decode(
            r#"{"type":"process_list","processes":[
                {"processId":"p1","command":"npm run dev","status":"running"},
                {"id":12,"status":"exited","exitCode":0}
            ]}"#,
        )
        .unwrap();
        match msg {
            InboundMessage::ProcessList { processes, incremental } => {
                assert!(!incremental);
                assert_eq!(processes.len(), 2);
                assert_eq!(processes[0].id.as_str(), "p1");
                assert_eq!(processes[1].command, "");
                assert_eq!(processes[1].exit_code, Some(0));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(decode("not json"), Err(ProtocolError::Malformed(_))));
        assert!(matches!(decode(r#"{"output":"x"}"#), Err(ProtocolError::MissingType)));
        assert!(matches!(
            decode(r#"{"type":"file_changed","path":"/a"}"#),
            Err(ProtocolError::UnknownType(t)) if t == "file_changed"
        ));
        // known tag, missing required field
        assert!(matches!(
            decode(r#"{"type":"bash_output","output":"x"}"#),
            Err(ProtocolError::Malformed(_))
        ));
    }
}
