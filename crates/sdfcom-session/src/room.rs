//! Chat room state machine layered on an interactive shell.
//!
//! The room is entered with a shell command that starts a full-screen chat
//! program and left with that program's quit command. While inside, a
//! background monitor can poll the screen for new messages.
//!
//! Room traffic is pinned to the connection the room was entered on. When
//! the shell reconnects, pending room operations fail rather than typing
//! into the fresh shell, and a running monitor enters the room again.

use sdfcom_types::{ChatMessage, Result, SessionError, SessionState, MAX_MONITOR_FAILURES};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::interactive::InteractiveSession;

/// Decides from the rendered screen whether the room was entered
pub type LoginPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Receives each non-empty batch of new messages found by the monitor
pub type MessageCallback = Arc<dyn Fn(Vec<ChatMessage>) + Send + Sync>;

/// Room commands and timings
#[derive(Clone)]
pub struct RoomSettings {
    pub enter_command: String,
    pub exit_command: String,
    /// Shell prompt text awaited after leaving the room
    pub exit_expect: String,
    pub login_wait: Duration,
    pub send_wait: Duration,
    pub read_wait: Duration,
    pub exit_timeout: Duration,
    /// Default number of messages returned by [`ChatRoomSession::read_messages`]
    pub read_count: usize,
    pub login_predicate: LoginPredicate,
}

/// Room prompt or program name visible on screen
pub fn default_login_predicate(screen: &str) -> bool {
    screen.contains('>') || screen.to_uppercase().contains("COM")
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            enter_command: "com".to_string(),
            exit_command: "/q".to_string(),
            exit_expect: "$".to_string(),
            login_wait: Duration::from_secs(2),
            send_wait: Duration::from_millis(500),
            read_wait: Duration::from_millis(500),
            exit_timeout: Duration::from_secs(2),
            read_count: 10,
            login_predicate: Arc::new(default_login_predicate),
        }
    }
}

impl std::fmt::Debug for RoomSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomSettings")
            .field("enter_command", &self.enter_command)
            .field("exit_command", &self.exit_command)
            .field("exit_expect", &self.exit_expect)
            .field("login_wait", &self.login_wait)
            .field("send_wait", &self.send_wait)
            .field("read_wait", &self.read_wait)
            .field("exit_timeout", &self.exit_timeout)
            .field("read_count", &self.read_count)
            .finish_non_exhaustive()
    }
}

/// State shared with the monitor task
struct RoomCore {
    shell: Arc<InteractiveSession>,
    settings: RoomSettings,
    in_room: AtomicBool,
    monitoring: AtomicBool,
    login_epoch: AtomicU64,
}

impl RoomCore {
    /// In the room on the same connection the room was entered on
    fn in_room(&self) -> bool {
        if !self.in_room.load(Ordering::SeqCst) {
            return false;
        }
        let same_connection = self.shell.is_connected()
            && self.shell.connection_epoch() == self.login_epoch.load(Ordering::SeqCst);
        if !same_connection {
            info!("Shell connection changed; no longer in room");
            self.in_room.store(false, Ordering::SeqCst);
            return false;
        }
        true
    }

    fn room_epoch(&self) -> Result<u64> {
        if !self.in_room() {
            return Err(SessionError::application("Not in room"));
        }
        Ok(self.login_epoch.load(Ordering::SeqCst))
    }

    async fn enter(&self) -> Result<String> {
        if !self.shell.is_connected() {
            return Err(SessionError::application("Shell not connected"));
        }
        if self.in_room() {
            return Ok("Already in room".to_string());
        }

        self.shell.reset_screen().await;
        let (display, _) = self
            .shell
            .send_and_read(&self.settings.enter_command, self.settings.login_wait)
            .await?;

        if (self.settings.login_predicate)(&display) {
            self.login_epoch
                .store(self.shell.connection_epoch(), Ordering::SeqCst);
            self.in_room.store(true, Ordering::SeqCst);
            info!("Entered chat room");
            Ok(format!("Logged into COM\n{}", display))
        } else {
            warn!("Room prompt not found after {:?}", self.settings.enter_command);
            Ok(format!("Login may have failed\n{}", display))
        }
    }

    async fn new_messages(&self) -> Result<Vec<ChatMessage>> {
        let epoch = self.room_epoch()?;
        let (_, messages) = self
            .shell
            .send_and_read_on(epoch, "", self.settings.read_wait)
            .await?;
        Ok(messages)
    }

    /// New messages for the monitor, entering the room again first when
    /// the shell connection was replaced
    async fn poll(&self) -> Result<Vec<ChatMessage>> {
        if !self.in_room() {
            if !self.shell.is_connected() {
                return Err(SessionError::transport("Shell not connected"));
            }
            info!("Re-entering chat room on new shell connection");
            self.enter().await?;
            if !self.in_room() {
                return Err(SessionError::application("Could not re-enter room"));
            }
        }
        self.new_messages().await
    }
}

struct MonitorHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
    callback: MessageCallback,
    interval: Duration,
}

/// Chat room session over a shared interactive shell
pub struct ChatRoomSession {
    core: Arc<RoomCore>,
    monitor: Mutex<Option<MonitorHandle>>,
}

impl ChatRoomSession {
    pub fn new(shell: Arc<InteractiveSession>, settings: RoomSettings) -> Self {
        Self {
            core: Arc::new(RoomCore {
                shell,
                settings,
                in_room: AtomicBool::new(false),
                monitoring: AtomicBool::new(false),
                login_epoch: AtomicU64::new(0),
            }),
            monitor: Mutex::new(None),
        }
    }

    pub fn shell(&self) -> &Arc<InteractiveSession> {
        &self.core.shell
    }

    pub fn settings(&self) -> &RoomSettings {
        &self.core.settings
    }

    pub fn is_in_room(&self) -> bool {
        self.core.in_room()
    }

    pub fn is_monitoring(&self) -> bool {
        self.core.monitoring.load(Ordering::SeqCst) && self.core.in_room()
    }

    /// Combined shell and room state
    pub fn state(&self) -> SessionState {
        if !self.core.shell.is_connected() {
            SessionState::Disconnected
        } else if self.is_monitoring() {
            SessionState::Monitoring
        } else if self.is_in_room() {
            SessionState::InRoom
        } else {
            SessionState::Connected
        }
    }

    /// Enter the chat room.
    ///
    /// Succeeds without entering when the screen does not look like the
    /// room; the returned text then starts with "Login may have failed".
    pub async fn login(&self) -> Result<String> {
        self.core.enter().await
    }

    /// Leave the chat room, stopping the monitor first. Leaving while
    /// outside the room is a no-op.
    pub async fn logout(&self) -> Result<String> {
        let Ok(epoch) = self.core.room_epoch() else {
            return Ok("Not in room".to_string());
        };

        self.stop_monitor().await;

        let core = &self.core;
        let result = core
            .shell
            .send_command_on(
                epoch,
                &core.settings.exit_command,
                &core.settings.exit_expect,
                core.settings.exit_timeout,
            )
            .await;

        core.in_room.store(false, Ordering::SeqCst);
        core.shell.reset_screen().await;

        result?;
        info!("Left chat room");
        Ok("Logged out of COM".to_string())
    }

    /// Type a line into the room
    pub async fn send_message(&self, text: &str) -> Result<String> {
        let core = &self.core;
        let epoch = core.room_epoch()?;

        core.shell
            .send_and_read_on(epoch, text, core.settings.send_wait)
            .await?;
        debug!("Message sent: {}", preview(text));
        Ok(format!("Sent: {}", text))
    }

    /// The last `count` new messages visible since the previous read
    pub async fn read_messages(&self, count: usize) -> Result<Vec<ChatMessage>> {
        let mut messages = self.core.new_messages().await?;
        if messages.len() > count {
            messages.drain(..messages.len() - count);
        }
        Ok(messages)
    }

    /// Start polling the room every `interval`, handing new messages to
    /// `callback`. Starting while a monitor runs is a no-op.
    pub async fn start_monitor(&self, callback: MessageCallback, interval: Duration) -> Result<String> {
        let mut guard = self.monitor.lock().await;

        if let Some(handle) = guard.as_ref() {
            if self.core.monitoring.load(Ordering::SeqCst) && !handle.task.is_finished() {
                return Ok("Already monitoring".to_string());
            }
        }
        // Reap a monitor that gave up on its own
        if let Some(stale) = guard.take() {
            stale.token.cancel();
            let _ = stale.task.await;
        }

        if !self.core.in_room() {
            return Err(SessionError::application("Not in room"));
        }

        self.core.monitoring.store(true, Ordering::SeqCst);
        let token = CancellationToken::new();
        let task = tokio::spawn(monitor_loop(
            Arc::clone(&self.core),
            Arc::clone(&callback),
            interval,
            token.clone(),
        ));

        *guard = Some(MonitorHandle {
            token,
            task,
            callback,
            interval,
        });
        info!("Message monitor started ({:?} interval)", interval);
        Ok("Monitor started".to_string())
    }

    /// Stop the monitor and wait for it to exit. Idempotent.
    pub async fn stop_monitor(&self) -> String {
        self.core.monitoring.store(false, Ordering::SeqCst);

        let Some(handle) = self.monitor.lock().await.take() else {
            return "Monitor not running".to_string();
        };

        handle.token.cancel();
        if let Err(e) = handle.task.await {
            if e.is_panic() {
                error!("Message monitor panicked");
            }
        }
        info!("Message monitor stopped");
        "Monitor stopped".to_string()
    }

    /// Run a shell command outside the room. When inside, the room is left
    /// for the command and entered again afterwards, with the monitor
    /// restarted if it was running.
    pub async fn run_shell_command(&self, command: &str, expect: &str, timeout: Duration) -> Result<String> {
        let was_in_room = self.core.in_room();
        let resume = if self.is_monitoring() {
            self.monitor
                .lock()
                .await
                .as_ref()
                .map(|h| (Arc::clone(&h.callback), h.interval))
        } else {
            None
        };

        if was_in_room {
            self.logout().await?;
        }

        let output = self.core.shell.send_command(command, expect, timeout).await;

        if was_in_room {
            match self.login().await {
                Ok(_) if self.core.in_room() => {
                    if let Some((callback, interval)) = resume {
                        self.start_monitor(callback, interval).await?;
                    }
                }
                Ok(_) => warn!("Could not re-enter room after shell command"),
                Err(e) => warn!("Could not re-enter room after shell command: {}", e),
            }
        }

        output
    }
}

async fn monitor_loop(
    core: Arc<RoomCore>,
    callback: MessageCallback,
    interval: Duration,
    token: CancellationToken,
) {
    let mut failures = 0u32;

    while core.monitoring.load(Ordering::SeqCst) {
        let outcome = tokio::select! {
            _ = token.cancelled() => break,
            result = core.poll() => result,
        };

        let pause = match outcome {
            Ok(messages) => {
                failures = 0;
                if !messages.is_empty() {
                    debug!("Monitor found {} new messages", messages.len());
                    callback(messages);
                }
                interval
            }
            Err(e) => {
                failures += 1;
                warn!("Monitor read failed ({}/{}): {}", failures, MAX_MONITOR_FAILURES, e);
                if failures >= MAX_MONITOR_FAILURES {
                    error!("Message monitor giving up after {} consecutive failures", failures);
                    break;
                }
                interval * 2
            }
        };

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(pause) => {}
        }
    }

    core.monitoring.store(false, Ordering::SeqCst);
    debug!("Message monitor exited");
}

fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(50).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_login_predicate() {
        assert!(default_login_predicate("COM - lobby\n>"));
        assert!(default_login_predicate("welcome to com"));
        assert!(default_login_predicate("> "));
        assert!(!default_login_predicate("bash: ls: not found\n$"));
    }

    #[test]
    fn test_preview_truncates_long_text() {
        assert_eq!(preview("short"), "short");
        let long = "x".repeat(60);
        assert_eq!(preview(&long), format!("{}...", "x".repeat(50)));
    }
}
