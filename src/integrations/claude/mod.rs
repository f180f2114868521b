//! Claude Code hook client.
//!
//! Claude Code runs `herder hook --event <kind>` on session lifecycle events.
//! The hook turns its stdin payload into one protocol message and sends it
//! to the daemon socket.

pub mod hook_input;

use crate::data::TerminalInfo;
use crate::socket::protocol::SessionEvent;
use hook_input::HookInput;
use std::path::PathBuf;

/// Lifecycle points a hook can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum HookEvent {
    Start,
    End,
    Idle,
    Active,
}

/// Resolved hook context, with environment fallbacks already applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookContext {
    pub session_id: String,
    pub cwd: PathBuf,
    pub last_message: Option<String>,
    pub terminal: TerminalInfo,
    pub transcript_path: Option<String>,
}

impl HookContext {
    /// Combine stdin input with environment fallbacks.
    ///
    /// `env` is looked up by name so tests need not touch the process
    /// environment. Returns None without a session id.
    pub fn resolve(input: Option<&HookInput>, env: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let non_empty = |s: Option<String>| s.filter(|v| !v.trim().is_empty());

        let session_id = non_empty(input.and_then(|i| i.session_id.clone()))
            .or_else(|| non_empty(env("CLAUDE_SESSION_ID")))?;

        let cwd = non_empty(input.and_then(|i| i.cwd.clone()))
            .or_else(|| non_empty(env("PWD")))
            .map(PathBuf::from)
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_default();

        Some(Self {
            session_id,
            cwd,
            last_message: input.and_then(HookInput::summary),
            terminal: terminal_from_env(&env),
            transcript_path: non_empty(input.and_then(|i| i.transcript_path.clone())),
        })
    }

    pub fn into_event(self, event: HookEvent) -> SessionEvent {
        match event {
            HookEvent::Start => SessionEvent::SessionStart {
                session_id: self.session_id,
                cwd: self.cwd,
                terminal: self.terminal,
                transcript_path: self.transcript_path,
            },
            HookEvent::End => SessionEvent::SessionEnd {
                session_id: self.session_id,
            },
            HookEvent::Idle => SessionEvent::AgentIdle {
                session_id: self.session_id,
                last_message: self.last_message,
            },
            HookEvent::Active => SessionEvent::AgentActive {
                session_id: self.session_id,
            },
        }
    }
}

fn terminal_from_env(env: &impl Fn(&str) -> Option<String>) -> TerminalInfo {
    let terminal_app = env("TERM_PROGRAM").map(|program| {
        match program.as_str() {
            "WarpTerminal" => "warp",
            "iTerm.app" => "iterm2",
            "Apple_Terminal" => "terminal",
            "vscode" => match env("__CFBundleIdentifier").as_deref() {
                Some(id) if id.contains("cursor") => "cursor",
                _ => "vscode",
            },
            other => return other.to_lowercase(),
        }
        .to_string()
    });

    TerminalInfo {
        tty: env("TTY"),
        terminal_pid: None,
        terminal_app,
    }
}
