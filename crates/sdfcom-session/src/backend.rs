/// Shell transport abstraction for PTY-backed and scripted shells
use async_trait::async_trait;
use sdfcom_types::ConnectionParams;
use std::io;
use std::time::Duration;

/// A duplex byte channel to an interactive remote shell
#[async_trait]
pub trait ShellChannel: Send {
    /// Write raw bytes to the shell
    async fn send(&mut self, data: &[u8]) -> io::Result<()>;

    /// Wait up to `timeout` for the next chunk of output.
    /// Returns `None` when nothing arrived in time.
    async fn recv(&mut self, timeout: Duration) -> io::Result<Option<Vec<u8>>>;

    /// Take one chunk of already buffered output without waiting
    fn try_recv(&mut self) -> io::Result<Option<Vec<u8>>>;

    /// Close the channel; closing twice is not an error
    async fn close(&mut self) -> io::Result<()>;

    /// Whether the remote end is still attached
    fn is_open(&self) -> bool;
}

/// Opens shell channels
#[async_trait]
pub trait ShellConnector: Send + Sync {
    /// Establish a shell for `params` with a fixed terminal geometry
    async fn connect(
        &self,
        params: &ConnectionParams,
        cols: u16,
        rows: u16,
        timeout: Duration,
    ) -> io::Result<Box<dyn ShellChannel>>;

    /// Connector name for debugging
    fn name(&self) -> &str;
}

/// Whether an IO error means the channel to the shell is gone
pub fn is_channel_closed(err: &io::Error) -> bool {
    match err.kind() {
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::UnexpectedEof => true,
        _ => {
            let message = err.to_string().to_lowercase();
            message.contains("closed") || message.contains("eof")
        }
    }
}

/// Error returned by channels whose remote end has gone away
pub fn channel_closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "channel closed")
}
