use clap::Parser;
use sdfcom_types::{DEFAULT_MONITOR_INTERVAL_SECS, DEFAULT_RECONNECT_ATTEMPTS};
use std::path::PathBuf;

use crate::config::{ChannelConfig, DEFAULT_HOST, DEFAULT_PORT};

/// CLI arguments for sdfcom
#[derive(Parser, Debug)]
#[command(name = "sdfcom")]
#[command(about = "Relay the SDF COM chat room: messages out as JSON lines on stdout, instructions in on stdin")]
#[command(version)]
pub struct Cli {
    /// SSH host
    #[arg(long, env = "SDF_HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    /// SSH port
    #[arg(long, env = "SDF_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Account name
    #[arg(short, long, env = "SDF_USERNAME")]
    pub username: Option<String>,

    /// Account password
    #[arg(long, env = "SDF_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Seconds between room polls
    #[arg(long, env = "SDF_MONITOR_INTERVAL", default_value_t = DEFAULT_MONITOR_INTERVAL_SECS)]
    pub monitor_interval: f64,

    /// Connection attempts per reconnect
    #[arg(long, env = "SDF_RECONNECT_ATTEMPTS", default_value_t = DEFAULT_RECONNECT_ATTEMPTS)]
    pub reconnect_attempts: u32,

    /// Write JSONL transcripts of the shell traffic to this directory
    #[arg(long, value_name = "DIR")]
    pub transcript_dir: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
            monitor_interval: self.monitor_interval,
            reconnect_attempts: self.reconnect_attempts,
            transcript_dir: self.transcript_dir.clone(),
        }
    }
}
