use sdfcom_session::SessionSettings;
use sdfcom_types::{ConnectionParams, DEFAULT_MONITOR_INTERVAL_SECS, DEFAULT_RECONNECT_ATTEMPTS};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default SDF host
pub const DEFAULT_HOST: &str = "sdf.org";
/// Default SSH port
pub const DEFAULT_PORT: u16 = 22;

/// Shortest accepted monitor poll interval in seconds
const MIN_MONITOR_INTERVAL_SECS: f64 = 0.01;

/// Channel configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Seconds between room polls
    pub monitor_interval: f64,
    pub reconnect_attempts: u32,
    /// Directory for JSONL shell transcripts
    pub transcript_dir: Option<PathBuf>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            username: None,
            password: None,
            monitor_interval: DEFAULT_MONITOR_INTERVAL_SECS,
            reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            transcript_dir: None,
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl ChannelConfig {
    /// Both username and password are set and non-blank
    pub fn has_credentials(&self) -> bool {
        self.connection_params().is_some()
    }

    pub fn connection_params(&self) -> Option<ConnectionParams> {
        let username = non_empty(&self.username)?;
        // passwords are used verbatim; only an empty one counts as missing
        let password = self.password.as_deref().filter(|p| !p.is_empty())?;
        Some(ConnectionParams::new(
            self.host.clone(),
            self.port,
            username,
            password,
        ))
    }

    /// Poll interval, falling back to the default for unusable values
    pub fn monitor_interval(&self) -> Duration {
        let secs = if self.monitor_interval.is_finite() && self.monitor_interval > 0.0 {
            self.monitor_interval.max(MIN_MONITOR_INTERVAL_SECS)
        } else {
            DEFAULT_MONITOR_INTERVAL_SECS
        };
        Duration::from_secs_f64(secs)
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            reconnect_attempts: self.reconnect_attempts.max(1),
            transcript_dir: self.transcript_dir.clone(),
            ..SessionSettings::default()
        }
    }
}

impl std::fmt::Debug for ChannelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("monitor_interval", &self.monitor_interval)
            .field("reconnect_attempts", &self.reconnect_attempts)
            .field("transcript_dir", &self.transcript_dir)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = ChannelConfig::default();
        assert_eq!(config.host, "sdf.org");
        assert_eq!(config.port, 22);
        assert_eq!(config.monitor_interval(), Duration::from_secs(3));
        assert_eq!(config.session_settings().reconnect_attempts, 3);
        assert!(!config.has_credentials());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ChannelConfig =
            serde_json::from_str(r#"{"username": "alice", "password": "pw", "port": 2222}"#)
                .unwrap();
        assert_eq!(config.host, "sdf.org");
        assert_eq!(config.port, 2222);

        let params = config.connection_params().unwrap();
        assert_eq!(params.target(), "alice@sdf.org:2222");
        assert_eq!(params.password, "pw");
    }

    #[test]
    fn test_blank_credentials_are_missing() {
        let config = ChannelConfig {
            username: Some("  ".to_string()),
            password: Some("pw".to_string()),
            ..ChannelConfig::default()
        };
        assert!(!config.has_credentials());

        let config = ChannelConfig {
            username: Some("alice".to_string()),
            password: Some(String::new()),
            ..ChannelConfig::default()
        };
        assert!(!config.has_credentials());
    }

    #[test]
    fn test_unusable_monitor_interval_falls_back() {
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let config = ChannelConfig {
                monitor_interval: bad,
                ..ChannelConfig::default()
            };
            assert_eq!(config.monitor_interval(), Duration::from_secs(3));
        }

        let config = ChannelConfig {
            monitor_interval: 0.5,
            ..ChannelConfig::default()
        };
        assert_eq!(config.monitor_interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_debug_hides_password() {
        let config = ChannelConfig {
            username: Some("alice".to_string()),
            password: Some("hunter2".to_string()),
            ..ChannelConfig::default()
        };
        let shown = format!("{:?}", config);
        assert!(shown.contains("alice"));
        assert!(!shown.contains("hunter2"));
    }
}
