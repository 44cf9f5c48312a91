use sdfcom_session::mock::MockConnector;
use sdfcom_session::{InteractiveSession, SessionSettings};
use sdfcom_types::{ChatMessage, ConnectionParams, SessionError};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(test)]
mod session_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn params() -> ConnectionParams {
        ConnectionParams::new("sdf.org", 22, "alice", "secret")
    }

    fn session(connector: &MockConnector) -> InteractiveSession {
        let settings = SessionSettings {
            reconnect_delay: Duration::from_millis(1),
            ..SessionSettings::default()
        };
        InteractiveSession::new(Arc::new(connector.clone()), settings)
    }

    #[tokio::test]
    async fn test_connect_and_disconnect_are_idempotent() {
        let connector = MockConnector::sdf_shell();
        let shell = session(&connector);

        assert_eq!(shell.connect(params()).await.unwrap(), "Connected to sdf.org:22");
        assert_eq!(
            shell.connect(params()).await.unwrap(),
            "Already connected to sdf.org"
        );
        assert_eq!(connector.connect_attempts(), 1);
        assert!(shell.is_connected());

        assert_eq!(shell.disconnect().await.unwrap(), "Disconnected");
        assert_eq!(shell.disconnect().await.unwrap(), "Not connected");
        assert!(!shell.is_connected());
    }

    #[tokio::test]
    async fn test_failed_connect_is_transport_error() {
        let connector = MockConnector::sdf_shell();
        connector.fail_next_connects(1);
        let shell = session(&connector);

        let err = shell.connect(params()).await.unwrap_err();
        assert!(err.is_transport());
        assert!(!shell.is_connected());

        // the next attempt goes through
        assert!(shell.connect(params()).await.is_ok());
    }

    #[tokio::test]
    async fn test_send_command_waits_for_expected_text() {
        let connector = MockConnector::new(|_, line| match line {
            "uptime" => "12:00 up 3 days, load average: 0.10\r\n$ ".to_string(),
            _ => String::new(),
        });
        let shell = session(&connector);
        shell.connect(params()).await.unwrap();

        let display = shell
            .send_command("uptime", "load", Duration::from_secs(2))
            .await
            .unwrap();
        assert!(display.contains("load average: 0.10"));
        assert_eq!(connector.written_lines(), vec!["uptime"]);
    }

    #[tokio::test]
    async fn test_send_command_returns_its_own_output() {
        let connector = MockConnector::sdf_shell();
        let shell = session(&connector);
        // banner is still unread when the first command goes out
        shell.connect(params()).await.unwrap();

        let first = shell
            .send_command("uptime", "$", Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(first, "Welcome to SDF\n$ uptime\n$");

        let second = shell
            .send_command("whoami", "$", Duration::from_secs(2))
            .await
            .unwrap();
        assert!(second.ends_with("$ uptime\n$ whoami\n$"));
    }

    #[tokio::test]
    async fn test_send_command_timeout_returns_partial_output() {
        let connector = MockConnector::new(|_, _| "still working".to_string());
        let shell = session(&connector);
        shell.connect(params()).await.unwrap();

        let started = Instant::now();
        let display = shell
            .send_command("make", "$", Duration::from_millis(100))
            .await
            .unwrap();

        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(display, "still working");
    }

    #[tokio::test]
    async fn test_send_and_read_extracts_new_messages_once() {
        let connector = MockConnector::sdf_shell();
        let shell = session(&connector);
        shell.connect(params()).await.unwrap();

        connector.push_output("\r\nalice: hello\r\nbob: hi there\r\n");
        let (display, messages) = shell
            .send_and_read("", Duration::from_millis(10))
            .await
            .unwrap();

        assert!(display.contains("alice: hello"));
        assert_eq!(
            messages,
            vec![
                ChatMessage::new("alice", "hello"),
                ChatMessage::new("bob", "hi there"),
            ]
        );
        assert!(connector.written_lines().is_empty());

        let (_, again) = shell
            .send_and_read("", Duration::from_millis(10))
            .await
            .unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_reconnect_gives_up_after_configured_attempts() {
        let connector = MockConnector::sdf_shell();
        let shell = session(&connector);
        shell.connect(params()).await.unwrap();

        connector.fail_all_connects();
        let err = shell.reconnect().await.unwrap_err();

        match err {
            SessionError::ReconnectFailed { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(connector.connect_attempts(), 1 + 3);
        assert!(!shell.is_connected());
    }

    #[tokio::test]
    async fn test_dropped_channel_is_retried_after_reconnect() {
        let connector = MockConnector::sdf_shell();
        let shell = session(&connector);
        shell.connect(params()).await.unwrap();
        assert_eq!(shell.connection_epoch(), 1);

        connector.break_channels();
        let result = shell
            .send_command("echo again", "$", Duration::from_secs(1))
            .await;

        assert!(result.is_ok());
        assert_eq!(connector.connect_attempts(), 2);
        assert_eq!(shell.connection_epoch(), 2);
        assert_eq!(connector.written_lines(), vec!["echo again"]);
    }

    #[tokio::test]
    async fn test_close_error_does_not_stop_reconnect() {
        let connector = MockConnector::sdf_shell();
        let shell = session(&connector);
        shell.connect(params()).await.unwrap();

        connector.break_channels();
        connector.set_fail_close(true);
        let display = shell
            .send_command("echo again", "$", Duration::from_secs(1))
            .await
            .unwrap();

        assert!(display.contains("echo again"));
        assert_eq!(shell.connection_epoch(), 2);
        assert!(shell.is_connected());
    }

    #[tokio::test]
    async fn test_dropped_channel_with_failed_reconnect() {
        let connector = MockConnector::sdf_shell();
        let shell = session(&connector);
        shell.connect(params()).await.unwrap();

        connector.break_channels();
        connector.fail_all_connects();
        let err = shell
            .send_and_read("hello", Duration::from_millis(10))
            .await
            .unwrap_err();

        assert!(err.is_transport());
        assert!(!shell.is_connected());

        // later calls fail fast without touching the transport
        let attempts = connector.connect_attempts();
        let err = shell
            .send_and_read("hello", Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(err.is_application());
        assert_eq!(connector.connect_attempts(), attempts);
    }

    #[tokio::test]
    async fn test_read_failure_is_not_retried() {
        let connector = MockConnector::sdf_shell();
        let shell = session(&connector);
        shell.connect(params()).await.unwrap();

        connector.set_fail_reads(true);
        let err = shell
            .send_and_read("", Duration::from_millis(10))
            .await
            .unwrap_err();

        assert!(err.is_transport());
        assert_eq!(connector.connect_attempts(), 1);
        assert!(shell.is_connected());
    }

    #[tokio::test]
    async fn test_transcript_records_traffic() {
        let dir = tempfile::tempdir().unwrap();
        let connector = MockConnector::sdf_shell();
        let settings = SessionSettings {
            transcript_dir: Some(dir.path().to_path_buf()),
            ..SessionSettings::default()
        };
        let shell = InteractiveSession::new(Arc::new(connector.clone()), settings);
        shell.connect(params()).await.unwrap();
        shell
            .send_command("whoami", "$", Duration::from_secs(1))
            .await
            .unwrap();
        shell.disconnect().await.unwrap();

        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
        let path = files[0].as_ref().unwrap().path();
        let text = std::fs::read_to_string(path).unwrap();

        assert!(text.contains("\"event\":\"connect\""));
        assert!(text.contains("whoami"));
        assert!(text.contains("\"event\":\"disconnect\""));
        assert!(!text.contains("secret"));
    }

    #[tokio::test]
    async fn test_reset_screen_blanks_display() {
        let connector = MockConnector::sdf_shell();
        let shell = session(&connector);
        shell.connect(params()).await.unwrap();
        shell
            .send_and_read("", Duration::from_millis(10))
            .await
            .unwrap();
        assert!(shell.screen_text().await.contains("Welcome to SDF"));

        shell.reset_screen().await;
        assert_eq!(shell.screen_text().await, "");
    }
}
