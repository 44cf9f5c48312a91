// Terminal emulation and chat message extraction
//
// This crate turns the raw byte stream of a screen-oriented remote chat
// application into a fixed character grid, and the grid into deduplicated,
// timestamped chat messages.

mod dedup;
mod extractor;
mod screen_buffer;
pub mod text;
pub mod timestamp;

// Re-export public API
pub use dedup::DedupWindow;
pub use extractor::{ExtractorConfig, MessageExtractor, MESSAGE_PATTERNS};
pub use screen_buffer::TerminalScreen;
pub use timestamp::{TimestampParser, TIMESTAMP_PATTERNS};
