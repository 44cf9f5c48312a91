/// PTY-based transport running the system ssh client
use async_trait::async_trait;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use sdfcom_types::ConnectionParams;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backend::{channel_closed_error, ShellChannel, ShellConnector};

/// Opens shells by running `ssh` inside a pseudo terminal and answering its
/// password prompt
#[derive(Debug, Clone)]
pub struct PtyShellConnector {
    program: String,
    extra_args: Vec<String>,
}

impl PtyShellConnector {
    pub fn new() -> Self {
        Self {
            program: "ssh".to_string(),
            extra_args: Vec::new(),
        }
    }

    /// Use a different client binary (for example a wrapper script)
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Extra arguments placed before the destination
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    fn build_command(&self, params: &ConnectionParams) -> CommandBuilder {
        let mut cmd = CommandBuilder::new(&self.program);
        cmd.args([
            "-tt",
            "-p",
            &params.port.to_string(),
            "-o",
            "StrictHostKeyChecking=accept-new",
            "-o",
            "PubkeyAuthentication=no",
            "-o",
            "PreferredAuthentications=password,keyboard-interactive",
            "-o",
            "NumberOfPasswordPrompts=1",
        ]);
        for arg in &self.extra_args {
            cmd.arg(arg);
        }
        cmd.arg(format!("{}@{}", params.username, params.host));
        cmd.env("TERM", "xterm");
        cmd
    }
}

impl Default for PtyShellConnector {
    fn default() -> Self {
        Self::new()
    }
}

fn pty_error(context: &str, err: impl std::fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::Other, format!("{}: {}", context, err))
}

#[async_trait]
impl ShellConnector for PtyShellConnector {
    async fn connect(
        &self,
        params: &ConnectionParams,
        cols: u16,
        rows: u16,
        timeout: Duration,
    ) -> io::Result<Box<dyn ShellChannel>> {
        let pty_system = native_pty_system();

        // Create PTY with the fixed screen geometry
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| pty_error("Failed to open PTY", e))?;

        let child = pair
            .slave
            .spawn_command(self.build_command(params))
            .map_err(|e| pty_error("Failed to spawn ssh", e))?;
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| pty_error("Failed to clone PTY reader", e))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| pty_error("Failed to take PTY writer", e))?;

        let rx = spawn_reader(reader);
        let mut channel = PtyChannel {
            _master: pair.master,
            child,
            writer,
            rx,
            pending: VecDeque::new(),
            open: true,
        };

        info!("Spawned {} for {}", self.program, params.target());
        if let Err(e) = channel.authenticate(&params.password, timeout).await {
            let _ = channel.close().await;
            return Err(e);
        }
        Ok(Box::new(channel))
    }

    fn name(&self) -> &str {
        "pty-ssh"
    }
}

/// Forward PTY output to the async side until EOF
fn spawn_reader(mut reader: Box<dyn Read + Send>) -> mpsc::UnboundedReceiver<Vec<u8>> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let mut buffer = vec![0u8; 4096];
        loop {
            match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(buffer[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!("PTY reader stopped: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

/// Shell channel over a PTY running ssh
pub struct PtyChannel {
    _master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
    writer: Box<dyn Write + Send>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    pending: VecDeque<Vec<u8>>,
    open: bool,
}

impl PtyChannel {
    /// Answer the password prompt and wait for the first post-login output
    async fn authenticate(&mut self, password: &str, timeout: Duration) -> io::Result<()> {
        let deadline = Instant::now() + timeout;
        let mut seen = String::new();
        let mut password_sent = false;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "timed out waiting for the remote shell",
                ));
            }

            let chunk = match self.recv(remaining).await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => continue,
                Err(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::ConnectionRefused,
                        format!("ssh exited during login: {}", tail(&seen)),
                    ));
                }
            };

            seen.push_str(&String::from_utf8_lossy(&chunk));
            let lower = seen.to_lowercase();

            if lower.contains("permission denied") {
                return Err(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "authentication rejected by remote host",
                ));
            }

            if !password_sent {
                if lower.contains("password:") {
                    self.send(format!("{}\n", password).as_bytes()).await?;
                    password_sent = true;
                    seen.clear();
                }
                continue;
            }

            if !seen.trim().is_empty() {
                // Keep the banner for the session to render
                self.pending.push_back(seen.into_bytes());
                return Ok(());
            }
        }
    }

    fn child_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }
}

fn tail(text: &str) -> String {
    let trimmed = text.trim();
    let start = trimmed
        .char_indices()
        .rev()
        .nth(199)
        .map(|(i, _)| i)
        .unwrap_or(0);
    trimmed[start..].to_string()
}

#[async_trait]
impl ShellChannel for PtyChannel {
    async fn send(&mut self, data: &[u8]) -> io::Result<()> {
        if !self.open {
            return Err(channel_closed_error());
        }
        let result = self
            .writer
            .write_all(data)
            .and_then(|_| self.writer.flush());

        match result {
            Ok(()) => Ok(()),
            Err(e) if self.child_exited() => {
                warn!("Write to exited ssh process failed: {}", e);
                self.open = false;
                Err(channel_closed_error())
            }
            Err(e) => Err(e),
        }
    }

    async fn recv(&mut self, timeout: Duration) -> io::Result<Option<Vec<u8>>> {
        if let Some(chunk) = self.pending.pop_front() {
            return Ok(Some(chunk));
        }
        if !self.open {
            return Err(channel_closed_error());
        }
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(chunk)) => Ok(Some(chunk)),
            Ok(None) => {
                self.open = false;
                Err(channel_closed_error())
            }
            Err(_) => Ok(None),
        }
    }

    fn try_recv(&mut self) -> io::Result<Option<Vec<u8>>> {
        if let Some(chunk) = self.pending.pop_front() {
            return Ok(Some(chunk));
        }
        if !self.open {
            return Err(channel_closed_error());
        }
        match self.rx.try_recv() {
            Ok(chunk) => Ok(Some(chunk)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => {
                self.open = false;
                Err(channel_closed_error())
            }
        }
    }

    async fn close(&mut self) -> io::Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        if !self.child_exited() {
            self.child.kill()?;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

impl Drop for PtyChannel {
    fn drop(&mut self) {
        if self.open {
            let _ = self.child.kill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_targets_user_at_host() {
        let connector = PtyShellConnector::new().with_args(vec!["-v".to_string()]);
        let params = ConnectionParams::new("sdf.org", 2222, "alice", "pw");
        let rendered = format!("{:?}", connector.build_command(&params));

        assert!(rendered.contains("\"ssh\""));
        assert!(rendered.contains("\"2222\""));
        assert!(rendered.contains("\"-v\""));
        assert!(rendered.contains("\"alice@sdf.org\""));
        assert!(!rendered.contains("\"pw\""));
    }

    #[test]
    fn test_tail_keeps_end_of_long_output() {
        let long = "x".repeat(500) + "Connection refused";
        let t = tail(&long);
        assert!(t.ends_with("Connection refused"));
        assert_eq!(t.chars().count(), 200);
    }
}
