//! Interactive shell session with a terminal screen and bounded reconnect.
//!
//! All operations are serialized by one async lock, so a send and its
//! following read can never interleave with another caller's. A channel that
//! reports itself closed during an operation triggers a reconnect with the
//! saved parameters and a single retry of that operation. The `*_on`
//! variants are pinned to one connection: they still reconnect, but fail
//! instead of repeating the operation on the new shell.

use sdfcom_terminal::{ExtractorConfig, MessageExtractor, TerminalScreen};
use sdfcom_types::{
    ChatMessage, ConnectionParams, Result, SessionError, DEFAULT_COLS, DEFAULT_CONNECT_TIMEOUT_SECS,
    DEFAULT_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_DELAY_SECS, DEFAULT_ROWS,
};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::backend::{is_channel_closed, ShellChannel, ShellConnector};
use crate::transcript::TranscriptLogger;

/// Session tuning
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub cols: u16,
    pub rows: u16,
    /// Connection attempts made by one reconnect before giving up
    pub reconnect_attempts: u32,
    /// Pause before each reconnect attempt
    pub reconnect_delay: Duration,
    pub connect_timeout: Duration,
    /// Write a JSONL transcript of the shell traffic here when set
    pub transcript_dir: Option<PathBuf>,
    pub extractor: ExtractorConfig,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
            reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            reconnect_delay: Duration::from_secs(DEFAULT_RECONNECT_DELAY_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            transcript_dir: None,
            extractor: ExtractorConfig::default(),
        }
    }
}

struct SessionInner {
    channel: Option<Box<dyn ShellChannel>>,
    params: Option<ConnectionParams>,
    screen: TerminalScreen,
    extractor: MessageExtractor,
    transcript: Option<TranscriptLogger>,
}

impl SessionInner {
    fn record_input(&mut self, data: &[u8]) {
        if let Some(transcript) = self.transcript.as_mut() {
            if let Err(e) = transcript.log_input(data) {
                warn!("Transcript write failed: {:#}", e);
            }
        }
    }

    fn record_output(&mut self, data: &[u8]) {
        if let Some(transcript) = self.transcript.as_mut() {
            if let Err(e) = transcript.log_output(data) {
                warn!("Transcript write failed: {:#}", e);
            }
        }
    }

    fn record_event(&mut self, event: &str, detail: &str) {
        if let Some(transcript) = self.transcript.as_mut() {
            if let Err(e) = transcript.log_event(event, detail) {
                warn!("Transcript write failed: {:#}", e);
            }
        }
    }

    fn channel(&mut self) -> io::Result<&mut Box<dyn ShellChannel>> {
        self.channel.as_mut().ok_or_else(crate::backend::channel_closed_error)
    }
}

/// A remote interactive shell rendered through a fixed-size terminal screen
pub struct InteractiveSession {
    connector: Arc<dyn ShellConnector>,
    settings: SessionSettings,
    inner: Mutex<SessionInner>,
    connected: AtomicBool,
    epoch: AtomicU64,
}

impl InteractiveSession {
    pub fn new(connector: Arc<dyn ShellConnector>, settings: SessionSettings) -> Self {
        let inner = SessionInner {
            channel: None,
            params: None,
            screen: TerminalScreen::new(settings.cols, settings.rows),
            extractor: MessageExtractor::new(settings.extractor.clone()),
            transcript: None,
        };

        Self {
            connector,
            settings,
            inner: Mutex::new(inner),
            connected: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Whether a shell channel is currently established
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Incremented on every successful connect or reconnect
    pub fn connection_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Open the shell. Connecting while connected is a no-op.
    pub async fn connect(&self, params: ConnectionParams) -> Result<String> {
        let mut inner = self.inner.lock().await;

        if inner.channel.is_some() && self.is_connected() {
            let host = inner
                .params
                .as_ref()
                .map(|p| p.host.clone())
                .unwrap_or_default();
            return Ok(format!("Already connected to {}", host));
        }

        if inner.transcript.is_none() {
            if let Some(dir) = &self.settings.transcript_dir {
                match TranscriptLogger::create(dir, &params.username) {
                    Ok(logger) => {
                        info!("Writing transcript to {}", logger.path().display());
                        inner.transcript = Some(logger);
                    }
                    Err(e) => warn!("Transcript disabled: {:#}", e),
                }
            }
        }

        info!("Connecting to {} via {}", params.target(), self.connector.name());
        match self.open_channel(&mut inner, &params).await {
            Ok(()) => {
                let target = format!("{}:{}", params.host, params.port);
                inner.params = Some(params);
                Ok(format!("Connected to {}", target))
            }
            Err(e) => {
                error!("Connection to {} failed: {}", params.target(), e);
                inner.record_event("connect_failed", &e.to_string());
                Err(SessionError::transport(format!("Connection failed: {}", e)))
            }
        }
    }

    async fn open_channel(&self, inner: &mut SessionInner, params: &ConnectionParams) -> io::Result<()> {
        let channel = self
            .connector
            .connect(
                params,
                self.settings.cols,
                self.settings.rows,
                self.settings.connect_timeout,
            )
            .await?;

        inner.channel = Some(channel);
        inner.screen.reset();
        self.connected.store(true, Ordering::SeqCst);
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        inner.record_event("connect", &params.target());
        info!("Shell established to {} (epoch {})", params.target(), epoch);
        Ok(())
    }

    /// Close the shell. Disconnecting while disconnected is a no-op.
    pub async fn disconnect(&self) -> Result<String> {
        let mut inner = self.inner.lock().await;
        let Some(mut channel) = inner.channel.take() else {
            return Ok("Not connected".to_string());
        };

        self.connected.store(false, Ordering::SeqCst);
        if let Err(e) = channel.close().await {
            warn!("Error while closing shell: {}", e);
        }
        inner.record_event("disconnect", "");
        info!("Disconnected");
        Ok("Disconnected".to_string())
    }

    /// Send `text` plus a newline, then collect output until `expect`
    /// appears or `timeout` elapses. Returns the rendered screen; on timeout
    /// the screen holds whatever partial output arrived.
    pub async fn send_command(&self, text: &str, expect: &str, timeout: Duration) -> Result<String> {
        self.command(None, text, expect, timeout).await
    }

    /// [`send_command`](Self::send_command) on the shell opened at `epoch`
    pub async fn send_command_on(
        &self,
        epoch: u64,
        text: &str,
        expect: &str,
        timeout: Duration,
    ) -> Result<String> {
        self.command(Some(epoch), text, expect, timeout).await
    }

    async fn command(&self, pinned: Option<u64>, text: &str, expect: &str, timeout: Duration) -> Result<String> {
        let mut inner = self.inner.lock().await;
        self.require_connected(&inner, pinned)?;

        match Self::command_once(&mut inner, text, expect, timeout).await {
            Ok(display) => Ok(display),
            Err(e) if is_channel_closed(&e) => {
                self.recover(&mut inner, &e).await?;
                Self::check_repeatable(pinned)?;
                Self::command_once(&mut inner, text, expect, timeout)
                    .await
                    .map_err(|e| self.fail(&mut inner, e))
            }
            Err(e) => Err(self.fail(&mut inner, e)),
        }
    }

    /// Send `text` (nothing when empty), wait `wait`, then drain buffered
    /// output. Returns the rendered screen and the chat messages that
    /// appeared since the previous read.
    pub async fn send_and_read(&self, text: &str, wait: Duration) -> Result<(String, Vec<ChatMessage>)> {
        self.read(None, text, wait).await
    }

    /// [`send_and_read`](Self::send_and_read) on the shell opened at `epoch`
    pub async fn send_and_read_on(
        &self,
        epoch: u64,
        text: &str,
        wait: Duration,
    ) -> Result<(String, Vec<ChatMessage>)> {
        self.read(Some(epoch), text, wait).await
    }

    async fn read(&self, pinned: Option<u64>, text: &str, wait: Duration) -> Result<(String, Vec<ChatMessage>)> {
        let mut inner = self.inner.lock().await;
        self.require_connected(&inner, pinned)?;

        match Self::read_once(&mut inner, text, wait).await {
            Ok(result) => Ok(result),
            Err(e) if is_channel_closed(&e) => {
                self.recover(&mut inner, &e).await?;
                Self::check_repeatable(pinned)?;
                Self::read_once(&mut inner, text, wait)
                    .await
                    .map_err(|e| self.fail(&mut inner, e))
            }
            Err(e) => Err(self.fail(&mut inner, e)),
        }
    }

    fn require_connected(&self, inner: &SessionInner, pinned: Option<u64>) -> Result<()> {
        if inner.channel.is_none() || !self.is_connected() {
            return Err(SessionError::application("Not connected"));
        }
        match pinned {
            Some(epoch) if epoch != self.connection_epoch() => Err(SessionError::transport(format!(
                "Shell connection {} was replaced by {}",
                epoch,
                self.connection_epoch()
            ))),
            _ => Ok(()),
        }
    }

    fn check_repeatable(pinned: Option<u64>) -> Result<()> {
        match pinned {
            Some(epoch) => Err(SessionError::transport(format!(
                "Shell connection {} lost and replaced; operation not repeated",
                epoch
            ))),
            None => Ok(()),
        }
    }

    async fn command_once(
        inner: &mut SessionInner,
        text: &str,
        expect: &str,
        timeout: Duration,
    ) -> io::Result<String> {
        // Output that predates the command goes to the screen but is not
        // searched for `expect`
        let mut earlier = Vec::new();
        while let Some(chunk) = inner.channel()?.try_recv()? {
            earlier.extend_from_slice(&chunk);
        }
        if !earlier.is_empty() {
            inner.record_output(&earlier);
            inner.screen.feed(&earlier);
        }

        let line = format!("{}\n", text);
        inner.channel()?.send(line.as_bytes()).await?;
        inner.record_input(line.as_bytes());

        let deadline = Instant::now() + timeout;
        let mut output = Vec::new();
        let mut matched = false;

        while !matched {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            if let Some(chunk) = inner.channel()?.recv(remaining).await? {
                output.extend_from_slice(&chunk);
                matched = String::from_utf8_lossy(&output).contains(expect);
            }
        }

        if !matched {
            debug!("Timed out waiting for {:?}; returning partial output", expect);
        }
        inner.record_output(&output);
        inner.screen.feed(&output);
        Ok(inner.screen.display())
    }

    async fn read_once(
        inner: &mut SessionInner,
        text: &str,
        wait: Duration,
    ) -> io::Result<(String, Vec<ChatMessage>)> {
        if !text.is_empty() {
            let line = format!("{}\n", text);
            inner.channel()?.send(line.as_bytes()).await?;
            inner.record_input(line.as_bytes());
        }

        tokio::time::sleep(wait).await;

        let mut output = Vec::new();
        while let Some(chunk) = inner.channel()?.try_recv()? {
            output.extend_from_slice(&chunk);
        }

        if output.is_empty() {
            return Ok((inner.screen.display(), Vec::new()));
        }

        inner.record_output(&output);
        inner.screen.feed(&output);
        let lines = inner.screen.lines();
        let messages = inner.extractor.extract(&lines);
        Ok((inner.screen.display(), messages))
    }

    /// Reconnect after a dropped channel; the caller retries once on success
    async fn recover(&self, inner: &mut SessionInner, cause: &io::Error) -> Result<()> {
        warn!("Shell channel lost: {}", cause);
        self.connected.store(false, Ordering::SeqCst);
        inner.record_event("channel_lost", &cause.to_string());
        self.reconnect_locked(inner).await
    }

    fn fail(&self, inner: &mut SessionInner, err: io::Error) -> SessionError {
        if is_channel_closed(&err) {
            self.connected.store(false, Ordering::SeqCst);
            inner.channel = None;
            inner.record_event("channel_lost", &err.to_string());
        }
        SessionError::transport(err.to_string())
    }

    /// Re-establish the shell with the parameters of the last successful
    /// connect, making at most the configured number of attempts
    pub async fn reconnect(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.reconnect_locked(&mut inner).await
    }

    async fn reconnect_locked(&self, inner: &mut SessionInner) -> Result<()> {
        let params = inner
            .params
            .clone()
            .ok_or_else(|| SessionError::application("No saved connection parameters"))?;
        let attempts = self.settings.reconnect_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            info!("Reconnect attempt {}/{} to {}", attempt, attempts, params.target());

            if let Some(mut old) = inner.channel.take() {
                if let Err(e) = old.close().await {
                    warn!("Error while closing lost shell: {}", e);
                }
            }
            self.connected.store(false, Ordering::SeqCst);
            tokio::time::sleep(self.settings.reconnect_delay).await;

            match self.open_channel(inner, &params).await {
                Ok(()) => {
                    inner.record_event("reconnect", &format!("attempt {}", attempt));
                    return Ok(());
                }
                Err(e) => {
                    warn!("Reconnect attempt {} failed: {}", attempt, e);
                    last_error = e.to_string();
                }
            }
        }

        error!("Giving up on {} after {} attempts", params.target(), attempts);
        inner.record_event("reconnect_failed", &last_error);
        Err(SessionError::ReconnectFailed {
            attempts,
            last_error,
        })
    }

    /// Blank the terminal screen, for use before a full-screen application
    /// starts drawing
    pub async fn reset_screen(&self) {
        self.inner.lock().await.screen.reset();
    }

    /// Current rendered screen
    pub async fn screen_text(&self) -> String {
        self.inner.lock().await.screen.display()
    }

    /// `user@host:port` of the saved connection, if any
    pub async fn target(&self) -> Option<String> {
        self.inner.lock().await.params.as_ref().map(|p| p.target())
    }
}
