//! Parse the JSON Claude Code passes to hooks on stdin.

use serde::Deserialize;

/// Largest stdin payload read. Transcripts are referenced by path, so real
/// hook payloads are small.
const MAX_STDIN_BYTES: u64 = 1024 * 1024;

/// Fields herder uses from a hook payload. Others are ignored.
///
/// - All events: `session_id`, `cwd`, `transcript_path`
/// - Stop: `last_assistant_message`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct HookInput {
    pub session_id: Option<String>,
    pub transcript_path: Option<String>,
    pub cwd: Option<String>,
    pub last_assistant_message: Option<String>,
}

impl HookInput {
    /// Read and parse hook input from stdin.
    ///
    /// None when stdin is a terminal, empty, unreadable or not JSON.
    pub fn from_stdin() -> Option<Self> {
        use std::io::{IsTerminal, Read};

        if std::io::stdin().is_terminal() {
            return None;
        }

        let mut buffer = Vec::with_capacity(4096);
        match std::io::stdin()
            .lock()
            .take(MAX_STDIN_BYTES)
            .read_to_end(&mut buffer)
        {
            Ok(0) | Err(_) => None,
            Ok(_) => Self::parse(&buffer),
        }
    }

    pub fn parse(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }

    /// The last assistant message, trimmed to one short line for display.
    pub fn summary(&self) -> Option<String> {
        let message = self.last_assistant_message.as_deref()?;
        let line = message.lines().map(str::trim).find(|l| !l.is_empty())?;
        Some(truncate(line, 120))
    }
}

/// Truncate to `max_len` characters, adding "..." when cut.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }

    let prefix: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", prefix)
}
