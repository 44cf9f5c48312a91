/// Routing of outbound instructions to the chat room or the shell
use sdfcom_types::{Result, SessionError};
use std::time::Duration;
use tracing::info;

use crate::room::ChatRoomSession;

/// Prefix addressing the chat room
pub const CHAT_PREFIX: &str = "com:";
/// Prefix addressing the shell
pub const SHELL_PREFIX: &str = "sh:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionKind {
    Chat,
    Shell,
    Plain,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub kind: InstructionKind,
    pub payload: String,
}

/// Classify outbound text by its case-insensitive prefix. Prefixed payloads
/// are trimmed; plain text is kept as given.
pub fn classify(text: &str) -> Instruction {
    let trimmed = text.trim_start();

    if let Some(rest) = strip_prefix_ignore_case(trimmed, CHAT_PREFIX) {
        return Instruction {
            kind: InstructionKind::Chat,
            payload: rest.trim().to_string(),
        };
    }
    if let Some(rest) = strip_prefix_ignore_case(trimmed, SHELL_PREFIX) {
        return Instruction {
            kind: InstructionKind::Shell,
            payload: rest.trim().to_string(),
        };
    }

    Instruction {
        kind: InstructionKind::Plain,
        payload: text.to_string(),
    }
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(&text[prefix.len()..])
    } else {
        None
    }
}

/// How shell instructions are run
#[derive(Debug, Clone)]
pub struct ShellDispatch {
    pub expect: String,
    pub timeout: Duration,
}

impl Default for ShellDispatch {
    fn default() -> Self {
        Self {
            expect: "$".to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Classify `text` and carry it out: chat and plain text go to the room,
/// shell commands run at the shell prompt.
pub async fn classify_and_dispatch(
    room: &ChatRoomSession,
    text: &str,
    shell: &ShellDispatch,
) -> Result<String> {
    let instruction = classify(text);

    match instruction.kind {
        InstructionKind::Chat | InstructionKind::Plain => {
            if instruction.payload.trim().is_empty() {
                return Err(SessionError::application("Empty chat message"));
            }
            room.send_message(&instruction.payload).await
        }
        InstructionKind::Shell => {
            if instruction.payload.is_empty() {
                return Err(SessionError::application("Empty shell command"));
            }
            info!("Running shell command: {}", instruction.payload);
            room.run_shell_command(&instruction.payload, &shell.expect, shell.timeout)
                .await
        }
    }
}
