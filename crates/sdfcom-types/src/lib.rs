//! Core types and structures for sdfcom
//!
//! This crate provides the records, constants and error taxonomy shared by
//! the terminal, session and application crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Constants
// ============================================================================

/// Default terminal width used by the remote screen-oriented application
pub const DEFAULT_COLS: u16 = 80;

/// Default terminal height
pub const DEFAULT_ROWS: u16 = 24;

/// Number of message keys the deduplication window holds before trimming
pub const DEDUP_CAPACITY: usize = 1000;

/// Number of most recent keys kept when the window is trimmed
pub const DEDUP_RETAIN: usize = 500;

/// Reconnection cycles attempted before giving up
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 3;

/// Delay between reconnection cycles, in seconds
pub const DEFAULT_RECONNECT_DELAY_SECS: u64 = 5;

/// Connect timeout for the transport, in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Poll interval of the room monitor, in seconds
pub const DEFAULT_MONITOR_INTERVAL_SECS: f64 = 3.0;

/// Consecutive monitor failures after which the monitor stops itself
pub const MAX_MONITOR_FAILURES: u32 = 5;

/// Channel key messages are published under
pub const CHANNEL_NAME: &str = "sdfshell";

// ============================================================================
// Message Types
// ============================================================================

/// A chat line extracted from the room screen
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatMessage {
    pub username: String,
    pub content: String,
    /// Time of day `HH:MM:SS` in the display timezone, when the line carried one
    pub timestamp: Option<String>,
}

impl ChatMessage {
    pub fn new(username: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            content: content.into(),
            timestamp: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    /// Identity used by the deduplication window
    pub fn dedup_key(&self) -> String {
        format!("{}:{}", self.username, self.content)
    }
}

impl std::fmt::Display for ChatMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.timestamp {
            Some(ts) => write!(f, "[{}] {}: {}", ts, self.username, self.content),
            None => write!(f, "{}: {}", self.username, self.content),
        }
    }
}

/// Record published to the message bus for every extracted chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub channel: String,
    pub username: String,
    pub content: String,
    pub timestamp: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl ChatRecord {
    pub fn from_message(channel: &str, message: ChatMessage) -> Self {
        Self {
            channel: channel.to_string(),
            username: message.username,
            content: message.content,
            timestamp: message.timestamp,
            received_at: Utc::now(),
        }
    }
}

// ============================================================================
// Connection Types
// ============================================================================

/// Parameters captured on the first successful connect and reused on reconnect
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl ConnectionParams {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
        }
    }

    /// `user@host:port`, safe to log
    pub fn target(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }
}

impl std::fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Combined state of a shell session and the chat room layered on it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Disconnected,
    Connected,
    InRoom,
    Monitoring,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connected => write!(f, "connected"),
            Self::InRoom => write!(f, "in room"),
            Self::Monitoring => write!(f, "monitoring"),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors surfaced by session operations
#[derive(Debug, Error)]
pub enum SessionError {
    /// Connect, IO or channel failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Automatic reconnection ran out of attempts
    #[error("Transport error: reconnection failed after {attempts} attempts: {last_error}")]
    ReconnectFailed { attempts: u32, last_error: String },

    /// An operation was called in the wrong session state
    #[error("Application error: {0}")]
    Application(String),

    /// Malformed terminal input; recovered inside the emulator
    #[error("Parse error: {0}")]
    Parse(String),
}

impl SessionError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn application(message: impl Into<String>) -> Self {
        Self::Application(message.into())
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::ReconnectFailed { .. })
    }

    pub fn is_application(&self) -> bool {
        matches!(self, Self::Application(_))
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
