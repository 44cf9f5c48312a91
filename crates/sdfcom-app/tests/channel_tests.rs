use futures::StreamExt;
use sdfcom::session::mock::MockConnector;
use sdfcom::session::RoomSettings;
use sdfcom::{ChannelConfig, ComChannel, MemoryBus, MessageBus, SessionState};
use std::sync::Arc;
use std::time::Duration;

#[cfg(test)]
mod channel_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    fn config(with_credentials: bool) -> ChannelConfig {
        let mut config = ChannelConfig {
            monitor_interval: 0.01,
            ..ChannelConfig::default()
        };
        if with_credentials {
            config.username = Some("alice".to_string());
            config.password = Some("secret".to_string());
        }
        config
    }

    fn channel(connector: &MockConnector, config: ChannelConfig) -> ComChannel {
        let settings = RoomSettings {
            login_wait: ms(20),
            send_wait: ms(10),
            read_wait: ms(10),
            exit_timeout: ms(500),
            ..RoomSettings::default()
        };
        let bus: Arc<dyn MessageBus> = Arc::new(MemoryBus::new());
        ComChannel::with_room_settings(config, Arc::new(connector.clone()), bus, settings)
    }

    #[tokio::test]
    async fn test_start_without_credentials_does_nothing() {
        let connector = MockConnector::sdf_shell();
        let channel = channel(&connector, config(false));

        channel.start().await.unwrap();

        assert!(!channel.is_connected());
        assert_eq!(channel.state(), SessionState::Disconnected);
        assert_eq!(connector.connect_attempts(), 0);
        channel.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_failure_is_reported() {
        let connector = MockConnector::sdf_shell();
        connector.fail_all_connects();
        let channel = channel(&connector, config(true));

        let err = channel.start().await.unwrap_err();
        assert!(err.to_string().contains("alice@sdf.org:22"));
        assert!(!channel.is_connected());
    }

    #[tokio::test]
    async fn test_room_messages_are_published() {
        let connector = MockConnector::sdf_shell();
        let channel = channel(&connector, config(true));
        let mut records = channel.receive();

        channel.start().await.unwrap();
        assert_eq!(channel.state(), SessionState::Monitoring);
        assert!(channel.is_relaying());

        connector.push_output("\r\n[08:30] ann: morning all\r\n");
        let record = tokio::time::timeout(Duration::from_secs(2), records.next())
            .await
            .expect("no record published")
            .unwrap();

        assert_eq!(record.channel, "sdfshell");
        assert_eq!(record.username, "ann");
        assert_eq!(record.content, "morning all");
        assert_eq!(record.timestamp.as_deref(), Some("08:30:00"));

        channel.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_routes_by_prefix() {
        let connector = MockConnector::sdf_shell();
        let channel = channel(&connector, config(true));
        channel.start().await.unwrap();

        assert_eq!(channel.send("com: hello").await.unwrap(), "Sent: hello");
        let output = channel.send("sh: date").await.unwrap();
        assert!(output.contains("date"));
        assert_eq!(channel.state(), SessionState::Monitoring);

        assert_eq!(
            connector.written_lines(),
            vec!["com", "hello", "/q", "date", "com"]
        );
        channel.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_soft_login_failure_is_not_relaying() {
        let connector = MockConnector::new(|_, line| match line {
            "com" => "bash: no such program\r\n$ ".to_string(),
            _ => String::new(),
        });
        let channel = channel(&connector, config(true));

        channel.start().await.unwrap();
        assert!(channel.is_connected());
        assert!(!channel.is_relaying());
        assert_eq!(channel.state(), SessionState::Connected);
        channel.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let connector = MockConnector::sdf_shell();
        let channel = channel(&connector, config(true));
        channel.start().await.unwrap();

        channel.stop().await.unwrap();
        assert_eq!(channel.state(), SessionState::Disconnected);
        channel.stop().await.unwrap();

        assert!(channel.send("com: anyone?").await.unwrap_err().is_application());
        assert_eq!(connector.written_lines(), vec!["com", "/q"]);
    }
}
