//! Shell transport, interactive session and chat room layers for sdfcom

mod backend;
mod interactive;
mod mock_backend;
mod pty_backend;
mod room;
mod router;
mod transcript;

pub use backend::{channel_closed_error, is_channel_closed, ShellChannel, ShellConnector};
pub use interactive::{InteractiveSession, SessionSettings};
pub use pty_backend::{PtyChannel, PtyShellConnector};
pub use room::{
    default_login_predicate, ChatRoomSession, LoginPredicate, MessageCallback, RoomSettings,
};
pub use router::{
    classify, classify_and_dispatch, Instruction, InstructionKind, ShellDispatch, CHAT_PREFIX,
    SHELL_PREFIX,
};
pub use transcript::TranscriptLogger;

/// Scripted shells for tests and offline runs
pub mod mock {
    pub use crate::mock_backend::{LineHandler, MockChannel, MockConnector};
}
