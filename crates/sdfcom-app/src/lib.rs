//! sdfcom application library
//!
//! Channel adapter, message bus, configuration and logging setup for relaying
//! the SDF COM chat room.

// Re-export workspace crates
pub use sdfcom_session::{self as session, ChatRoomSession, InteractiveSession, PtyShellConnector};
pub use sdfcom_terminal as terminal;
pub use sdfcom_types::{self as types, ChatMessage, ChatRecord, SessionError, SessionState};

pub mod bus;
pub mod channel;
pub mod cli;
pub mod config;
pub mod logging;

pub use bus::{MemoryBus, MessageBus, RecordStream};
pub use channel::ComChannel;
pub use cli::Cli;
pub use config::ChannelConfig;
pub use logging::init_logging;
