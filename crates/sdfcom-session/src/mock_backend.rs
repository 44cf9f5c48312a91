//! Scripted in-process shell for tests and offline runs.
//!
//! Every complete line written to a [`MockChannel`] is passed to the
//! connector's handler, together with the channel's connection number, and
//! whatever it returns becomes readable output.
//! Failure switches on [`MockConnector`] simulate refused connects, dropped
//! channels and read errors.

use async_trait::async_trait;
use sdfcom_types::ConnectionParams;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::backend::{channel_closed_error, ShellChannel, ShellConnector};

/// Maps a connection number and one input line to the shell's response
pub type LineHandler = dyn Fn(u64, &str) -> String + Send + Sync;

const ALWAYS_FAIL: u32 = u32::MAX;
const IDLE_POLL: Duration = Duration::from_millis(5);

struct MockState {
    handler: Box<LineHandler>,
    banner: Mutex<Option<String>>,
    output: Mutex<VecDeque<Vec<u8>>>,
    written: Mutex<Vec<String>>,
    connect_attempts: AtomicU32,
    failing_connects: AtomicU32,
    generation: AtomicU64,
    broken_generation: AtomicU64,
    fail_reads: AtomicBool,
    fail_close: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Connector producing scripted shells; clones share one state
#[derive(Clone)]
pub struct MockConnector {
    state: Arc<MockState>,
}

impl MockConnector {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(u64, &str) -> String + Send + Sync + 'static,
    {
        Self {
            state: Arc::new(MockState {
                handler: Box::new(handler),
                banner: Mutex::new(None),
                output: Mutex::new(VecDeque::new()),
                written: Mutex::new(Vec::new()),
                connect_attempts: AtomicU32::new(0),
                failing_connects: AtomicU32::new(0),
                generation: AtomicU64::new(0),
                broken_generation: AtomicU64::new(0),
                fail_reads: AtomicBool::new(false),
                fail_close: AtomicBool::new(false),
            }),
        }
    }

    /// A shell with a `$ ` prompt and a chat room entered with `com` and
    /// left with `/q`. Lines typed in the room are echoed without a prompt.
    pub fn sdf_shell() -> Self {
        // Connection number the room was entered on; a new connection
        // starts at the shell prompt
        let room = AtomicU64::new(0);
        Self::new(move |generation, line| {
            let line = line.trim();
            if room.load(Ordering::SeqCst) == generation {
                if line == "/q" {
                    room.store(0, Ordering::SeqCst);
                    return "\x1b[H\x1b[2Jbye\r\n$ ".to_string();
                }
                return if line.is_empty() {
                    String::new()
                } else {
                    format!("{}\r\n", line)
                };
            }
            match line {
                "com" => {
                    room.store(generation, Ordering::SeqCst);
                    "\x1b[H\x1b[2J\x1b[7m COM - lobby \x1b[0m\r\n\r\n> ".to_string()
                }
                "" => "$ ".to_string(),
                other => format!("{}\r\n$ ", other),
            }
        })
        .with_banner("Welcome to SDF\r\n$ ")
    }

    /// Output delivered right after each successful connect
    pub fn with_banner(self, banner: impl Into<String>) -> Self {
        *lock(&self.state.banner) = Some(banner.into());
        self
    }

    /// Queue unsolicited output, as if another user typed in the room
    pub fn push_output(&self, text: &str) {
        lock(&self.state.output).push_back(text.as_bytes().to_vec());
    }

    /// Refuse the next `count` connection attempts
    pub fn fail_next_connects(&self, count: u32) {
        self.state.failing_connects.store(count, Ordering::SeqCst);
    }

    /// Refuse every connection attempt from now on
    pub fn fail_all_connects(&self) {
        self.state.failing_connects.store(ALWAYS_FAIL, Ordering::SeqCst);
    }

    /// Drop every channel opened so far
    pub fn break_channels(&self) {
        let current = self.state.generation.load(Ordering::SeqCst);
        self.state.broken_generation.store(current, Ordering::SeqCst);
    }

    /// Make reads fail without closing the channel
    pub fn set_fail_reads(&self, fail: bool) {
        self.state.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make closing a channel report an error after closing it
    pub fn set_fail_close(&self, fail: bool) {
        self.state.fail_close.store(fail, Ordering::SeqCst);
    }

    pub fn connect_attempts(&self) -> u32 {
        self.state.connect_attempts.load(Ordering::SeqCst)
    }

    /// Lines received by the shell, oldest first
    pub fn written_lines(&self) -> Vec<String> {
        lock(&self.state.written).clone()
    }
}

#[async_trait]
impl ShellConnector for MockConnector {
    async fn connect(
        &self,
        params: &ConnectionParams,
        _cols: u16,
        _rows: u16,
        _timeout: Duration,
    ) -> io::Result<Box<dyn ShellChannel>> {
        let state = &self.state;
        state.connect_attempts.fetch_add(1, Ordering::SeqCst);

        let failing = state.failing_connects.load(Ordering::SeqCst);
        if failing > 0 {
            if failing != ALWAYS_FAIL {
                state.failing_connects.store(failing - 1, Ordering::SeqCst);
            }
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("connection to {} refused", params.host),
            ));
        }

        let generation = state.generation.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut output = lock(&state.output);
            output.clear();
            if let Some(banner) = lock(&state.banner).as_ref() {
                output.push_back(banner.as_bytes().to_vec());
            }
        }

        Ok(Box::new(MockChannel {
            state: Arc::clone(state),
            generation,
            line: String::new(),
            open: true,
        }))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// One scripted shell session
pub struct MockChannel {
    state: Arc<MockState>,
    generation: u64,
    line: String,
    open: bool,
}

impl MockChannel {
    fn broken(&self) -> bool {
        self.state.broken_generation.load(Ordering::SeqCst) >= self.generation
    }

    fn check_readable(&self) -> io::Result<()> {
        if !self.open || self.broken() {
            return Err(channel_closed_error());
        }
        if self.state.fail_reads.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "simulated read failure"));
        }
        Ok(())
    }

    fn pop_output(&self) -> Option<Vec<u8>> {
        lock(&self.state.output).pop_front()
    }
}

#[async_trait]
impl ShellChannel for MockChannel {
    async fn send(&mut self, data: &[u8]) -> io::Result<()> {
        if !self.open || self.broken() {
            return Err(channel_closed_error());
        }

        for ch in String::from_utf8_lossy(data).chars() {
            if ch != '\n' && ch != '\r' {
                self.line.push(ch);
                continue;
            }
            let line = std::mem::take(&mut self.line);
            let response = (self.state.handler)(self.generation, &line);
            lock(&self.state.written).push(line);
            if !response.is_empty() {
                lock(&self.state.output).push_back(response.into_bytes());
            }
        }
        Ok(())
    }

    async fn recv(&mut self, timeout: Duration) -> io::Result<Option<Vec<u8>>> {
        self.check_readable()?;
        if let Some(chunk) = self.pop_output() {
            return Ok(Some(chunk));
        }
        tokio::time::sleep(timeout.min(IDLE_POLL)).await;
        self.check_readable()?;
        Ok(self.pop_output())
    }

    fn try_recv(&mut self) -> io::Result<Option<Vec<u8>>> {
        self.check_readable()?;
        Ok(self.pop_output())
    }

    async fn close(&mut self) -> io::Result<()> {
        self.open = false;
        if self.state.fail_close.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "simulated close failure"));
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open && !self.broken()
    }
}
