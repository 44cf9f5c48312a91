//! Channel adapter exposing the COM room as a message source and sink.
//!
//! Messages found by the room monitor are published on the bus under
//! [`CHANNEL_NAME`]; outbound text is routed by its `com:` / `sh:` prefix.

use anyhow::{Context, Result};
use sdfcom_session::{
    classify_and_dispatch, ChatRoomSession, InteractiveSession, MessageCallback, RoomSettings,
    ShellConnector, ShellDispatch,
};
use sdfcom_types::{ChatMessage, ChatRecord, SessionState, CHANNEL_NAME};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::bus::{MessageBus, RecordStream};
use crate::config::ChannelConfig;

pub struct ComChannel {
    config: ChannelConfig,
    room: ChatRoomSession,
    bus: Arc<dyn MessageBus>,
    dispatch: ShellDispatch,
}

impl ComChannel {
    pub fn new(config: ChannelConfig, connector: Arc<dyn ShellConnector>, bus: Arc<dyn MessageBus>) -> Self {
        Self::with_room_settings(config, connector, bus, RoomSettings::default())
    }

    pub fn with_room_settings(
        config: ChannelConfig,
        connector: Arc<dyn ShellConnector>,
        bus: Arc<dyn MessageBus>,
        room_settings: RoomSettings,
    ) -> Self {
        let shell = Arc::new(InteractiveSession::new(connector, config.session_settings()));
        Self {
            room: ChatRoomSession::new(shell, room_settings),
            config,
            bus,
            dispatch: ShellDispatch::default(),
        }
    }

    pub fn name(&self) -> &str {
        CHANNEL_NAME
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn room(&self) -> &ChatRoomSession {
        &self.room
    }

    /// Connect, enter the room and start relaying. Does nothing but warn
    /// when credentials are not configured.
    pub async fn start(&self) -> Result<()> {
        let Some(params) = self.config.connection_params() else {
            warn!("SDF credentials not configured; {} channel not started", CHANNEL_NAME);
            return Ok(());
        };

        let target = params.target();
        let status = self
            .room
            .shell()
            .connect(params)
            .await
            .with_context(|| format!("Failed to connect to {}", target))?;
        info!("{}", status);

        let login = self.room.login().await.context("Failed to enter COM")?;
        if !self.room.is_in_room() {
            warn!("{}", login.lines().next().unwrap_or_default());
            return Ok(());
        }

        let bus = Arc::clone(&self.bus);
        let callback: MessageCallback = Arc::new(move |batch: Vec<ChatMessage>| {
            for message in batch {
                debug!("Relaying {}", message);
                bus.publish(ChatRecord::from_message(CHANNEL_NAME, message));
            }
        });

        let status = self
            .room
            .start_monitor(callback, self.config.monitor_interval())
            .await?;
        info!("{} channel started: {}", CHANNEL_NAME, status);
        Ok(())
    }

    /// Stop relaying, leave the room and disconnect. Safe to call repeatedly.
    pub async fn stop(&self) -> Result<()> {
        self.room.stop_monitor().await;

        if let Err(e) = self.room.logout().await {
            warn!("Error leaving COM: {}", e);
        }

        let status = self.room.shell().disconnect().await?;
        info!("{} channel stopped: {}", CHANNEL_NAME, status);
        Ok(())
    }

    /// Records relayed from the room from now on
    pub fn receive(&self) -> RecordStream {
        self.bus.subscribe(CHANNEL_NAME)
    }

    /// Route outbound text to the room or the shell
    pub async fn send(&self, text: &str) -> sdfcom_types::Result<String> {
        classify_and_dispatch(&self.room, text, &self.dispatch).await
    }

    pub fn is_connected(&self) -> bool {
        self.room.shell().is_connected()
    }

    pub fn state(&self) -> SessionState {
        self.room.state()
    }

    /// Inside the room, so chat text can go out and messages come in
    pub fn is_relaying(&self) -> bool {
        matches!(self.state(), SessionState::InRoom | SessionState::Monitoring)
    }
}
