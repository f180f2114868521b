//! Wire format for agent lifecycle events.
//!
//! One JSON object per connection. Every message names an `event` and a
//! `session_id`; the remaining fields depend on the event:
//!
//! | event           | required | optional                                                 |
//! |-----------------|----------|----------------------------------------------------------|
//! | `session_start` | `cwd`    | `tty`, `terminal_pid`, `terminal_app`, `transcript_path` |
//! | `session_end`   |          |                                                          |
//! | `agent_idle`    |          | `last_message`                                           |
//! | `agent_active`  |          |                                                          |
//!
//! Decoding fails closed: a message with a missing required field or a field
//! of the wrong type is rejected as a whole.

use crate::data::TerminalInfo;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Largest accepted message. Longer messages are rejected, not truncated.
pub const MAX_MESSAGE_BYTES: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SessionStart {
        session_id: String,
        cwd: PathBuf,
        terminal: TerminalInfo,
        transcript_path: Option<String>,
    },
    SessionEnd {
        session_id: String,
    },
    AgentIdle {
        session_id: String,
        last_message: Option<String>,
    },
    AgentActive {
        session_id: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("message is empty")]
    Empty,
    #[error("message exceeds {limit} bytes")]
    TooLarge { limit: usize },
    #[error("invalid JSON message: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("unrecognized event `{0}`")]
    UnknownEvent(String),
    #[error("cwd must be an absolute path, got `{0}`")]
    RelativeCwd(String),
    #[error("timed out waiting for a complete message")]
    Timeout,
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// `terminal_pid` arrives as a number from some hooks and as a string from others.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum PidField {
    Number(u64),
    Text(String),
}

impl PidField {
    fn into_string(self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s,
        }
    }
}

#[derive(Debug, Deserialize)]
struct InboundMessage {
    event: Option<String>,
    session_id: Option<String>,
    cwd: Option<String>,
    tty: Option<String>,
    terminal_pid: Option<PidField>,
    terminal_app: Option<String>,
    transcript_path: Option<String>,
    last_message: Option<String>,
}

#[derive(Debug, Serialize)]
struct OutboundMessage<'a> {
    event: &'static str,
    session_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    cwd: Option<&'a Path>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tty: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    terminal_pid: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    terminal_app: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    transcript_path: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_message: Option<&'a str>,
}

impl SessionEvent {
    pub fn session_id(&self) -> &str {
        match self {
            Self::SessionStart { session_id, .. }
            | Self::SessionEnd { session_id }
            | Self::AgentIdle { session_id, .. }
            | Self::AgentActive { session_id } => session_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SessionStart { .. } => "session_start",
            Self::SessionEnd { .. } => "session_end",
            Self::AgentIdle { .. } => "agent_idle",
            Self::AgentActive { .. } => "agent_active",
        }
    }

    /// Decode and validate one message.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() > MAX_MESSAGE_BYTES {
            return Err(ProtocolError::TooLarge {
                limit: MAX_MESSAGE_BYTES,
            });
        }
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(ProtocolError::Empty);
        }

        let msg: InboundMessage = serde_json::from_slice(bytes)?;
        let event = non_empty(msg.event).ok_or(ProtocolError::MissingField("event"))?;
        let session_id =
            non_empty(msg.session_id).ok_or(ProtocolError::MissingField("session_id"))?;

        match event.as_str() {
            "session_start" => {
                let cwd = non_empty(msg.cwd).ok_or(ProtocolError::MissingField("cwd"))?;
                if !Path::new(&cwd).is_absolute() {
                    return Err(ProtocolError::RelativeCwd(cwd));
                }
                Ok(Self::SessionStart {
                    session_id,
                    cwd: PathBuf::from(cwd),
                    terminal: TerminalInfo {
                        tty: msg.tty,
                        terminal_pid: msg.terminal_pid.map(PidField::into_string),
                        terminal_app: msg.terminal_app,
                    },
                    transcript_path: non_empty(msg.transcript_path),
                })
            }
            "session_end" => Ok(Self::SessionEnd { session_id }),
            "agent_idle" => Ok(Self::AgentIdle {
                session_id,
                last_message: msg.last_message,
            }),
            "agent_active" => Ok(Self::AgentActive { session_id }),
            _ => Err(ProtocolError::UnknownEvent(event)),
        }
    }

    /// Serialize for sending to the daemon.
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        let mut out = OutboundMessage {
            event: self.name(),
            session_id: self.session_id(),
            cwd: None,
            tty: None,
            terminal_pid: None,
            terminal_app: None,
            transcript_path: None,
            last_message: None,
        };
        match self {
            Self::SessionStart {
                cwd,
                terminal,
                transcript_path,
                ..
            } => {
                out.cwd = Some(cwd.as_path());
                out.tty = terminal.tty.as_deref();
                out.terminal_pid = terminal.terminal_pid.as_deref();
                out.terminal_app = terminal.terminal_app.as_deref();
                out.transcript_path = transcript_path.as_deref();
            }
            Self::AgentIdle { last_message, .. } => {
                out.last_message = last_message.as_deref();
            }
            Self::SessionEnd { .. } | Self::AgentActive { .. } => {}
        }
        serde_json::to_vec(&out)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
