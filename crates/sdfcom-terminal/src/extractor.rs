/// Chat message extraction from rendered screen lines
use chrono::FixedOffset;
use regex::Regex;
use sdfcom_types::{ChatMessage, DEDUP_CAPACITY, DEDUP_RETAIN};
use tracing::debug;

use crate::dedup::DedupWindow;
use crate::text::clean_line;
use crate::timestamp::{default_display_offset, TimestampParser};

/// Username/content line forms, tried in this order; first match wins
pub const MESSAGE_PATTERNS: [(&str, &str); 6] = [
    ("colon", r"^([A-Za-z0-9_][\w.\-]*):\s*(.+)$"),
    ("angle", r"^<([^<>\s]+)>\s*(.+)$"),
    ("arrow", r"^([A-Za-z0-9_][\w.\-]*)\s*>\s*(.+)$"),
    ("bracket", r"^\[([^\[\]\s]+)\]\s*(.+)$"),
    ("pipe", r"^([A-Za-z0-9_][\w.\-]*)\s*\|\s*(.+)$"),
    ("spaced", r"^([A-Za-z0-9_][\w.\-]*)\s{2,}(.+)$"),
];

/// Lines shorter than this are treated as noise
const MIN_LINE_CHARS: usize = 3;

/// Extraction settings
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Lowercase substrings marking environment announcements
    pub system_keywords: Vec<String>,
    /// Lowercase usernames whose lines are never chat
    pub system_users: Vec<String>,
    /// Timezone timestamps are displayed in
    pub display_offset: FixedOffset,
    pub dedup_capacity: usize,
    pub dedup_retain: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        let to_strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            system_keywords: to_strings(&[
                "welcome",
                "connected",
                "disconnected",
                "system",
                "server",
                "online",
                "has joined",
                "has left",
            ]),
            system_users: to_strings(&["system", "server", "bot", "admin"]),
            display_offset: default_display_offset(),
            dedup_capacity: DEDUP_CAPACITY,
            dedup_retain: DEDUP_RETAIN,
        }
    }
}

/// Scans rendered lines for chat messages, emitting each message once
pub struct MessageExtractor {
    config: ExtractorConfig,
    timestamps: TimestampParser,
    patterns: Vec<(&'static str, Regex)>,
    window: DedupWindow,
}

impl MessageExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        let patterns = MESSAGE_PATTERNS
            .iter()
            .map(|(name, pattern)| (*name, Regex::new(pattern).expect("message pattern is valid")))
            .collect();

        Self {
            timestamps: TimestampParser::new(config.display_offset),
            window: DedupWindow::new(config.dedup_capacity, config.dedup_retain),
            patterns,
            config,
        }
    }

    /// Names of the line matchers in priority order
    pub fn pattern_names(&self) -> Vec<&'static str> {
        self.patterns.iter().map(|(name, _)| *name).collect()
    }

    /// New messages found in `lines` since the previous call
    pub fn extract<S: AsRef<str>>(&mut self, lines: &[S]) -> Vec<ChatMessage> {
        let mut messages = Vec::new();

        for line in lines {
            let Some(message) = self.parse_line(line.as_ref()) else {
                continue;
            };

            if self.window.insert(message.dedup_key()) {
                messages.push(message);
            }
        }

        if !messages.is_empty() {
            debug!("Extracted {} new chat messages", messages.len());
        }
        messages
    }

    /// Parse one line without touching the deduplication window
    pub fn parse_line(&self, raw: &str) -> Option<ChatMessage> {
        let line = clean_line(raw);
        if line.chars().count() < MIN_LINE_CHARS {
            return None;
        }

        let lower = line.to_lowercase();
        if self
            .config
            .system_keywords
            .iter()
            .any(|kw| lower.contains(kw.as_str()))
        {
            return None;
        }

        let (timestamp, body) = match self.timestamps.find(&line) {
            Some(found) => {
                let mut body = String::with_capacity(line.len());
                body.push_str(&line[..found.start]);
                body.push_str(&line[found.end..]);
                (Some(found.formatted), body.trim().to_string())
            }
            None => (None, line),
        };

        let (username, content) = self.match_patterns(&body)?;
        if self.is_system_user(&username) {
            return None;
        }

        Some(ChatMessage {
            username,
            content,
            timestamp,
        })
    }

    fn match_patterns(&self, body: &str) -> Option<(String, String)> {
        self.patterns.iter().find_map(|(_, regex)| {
            let caps = regex.captures(body)?;
            let username = caps.get(1)?.as_str().trim().to_string();
            let content = clean_line(caps.get(2)?.as_str());
            if username.is_empty() || content.is_empty() {
                return None;
            }
            Some((username, content))
        })
    }

    fn is_system_user(&self, username: &str) -> bool {
        let lower = username.to_lowercase();
        self.config.system_users.iter().any(|u| *u == lower)
    }

    /// Forget every message seen so far
    pub fn clear(&mut self) {
        self.window.clear();
    }

    pub fn seen_count(&self) -> usize {
        self.window.len()
    }
}

impl Default for MessageExtractor {
    fn default() -> Self {
        Self::new(ExtractorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_pattern_priority_order() {
        let extractor = MessageExtractor::default();
        assert_eq!(
            extractor.pattern_names(),
            vec!["colon", "angle", "arrow", "bracket", "pipe", "spaced"]
        );
    }

    #[test]
    fn test_each_line_form() {
        let extractor = MessageExtractor::default();
        let cases = [
            ("alice: hi there", "alice", "hi there"),
            ("<bob> hey", "bob", "hey"),
            ("carol > what's up", "carol", "what's up"),
            ("[dave] morning", "dave", "morning"),
            ("erin | ping", "erin", "ping"),
            ("frank   long gap", "frank", "long gap"),
        ];

        for (line, user, content) in cases {
            let msg = extractor.parse_line(line).unwrap_or_else(|| panic!("no match: {}", line));
            assert_eq!(msg.username, user, "line: {}", line);
            assert_eq!(msg.content, content, "line: {}", line);
            assert_eq!(msg.timestamp, None);
        }
    }

    #[test]
    fn test_first_match_wins() {
        let extractor = MessageExtractor::default();
        // colon form is tried before pipe form
        let msg = extractor.parse_line("alice: a | b").unwrap();
        assert_eq!(msg.username, "alice");
        assert_eq!(msg.content, "a | b");
    }

    #[test]
    fn test_short_and_unmatched_lines() {
        let extractor = MessageExtractor::default();
        assert!(extractor.parse_line("a:").is_none());
        assert!(extractor.parse_line(">").is_none());
        assert!(extractor.parse_line("just some words").is_none());
        assert!(extractor.parse_line("alice:   ").is_none());
    }

    #[test]
    fn test_system_keyword_filter() {
        let extractor = MessageExtractor::default();
        assert!(extractor.parse_line("Server: user has joined").is_none());
        assert!(extractor.parse_line("Welcome to COM, alice").is_none());
        assert!(extractor.parse_line("bob: I got DISCONNECTED earlier").is_none());
    }

    #[test]
    fn test_system_user_filter() {
        let extractor = MessageExtractor::default();
        assert!(extractor.parse_line("ADMIN: maintenance at noon").is_none());
        assert!(extractor.parse_line("<bot> beep").is_none());
        assert!(extractor.parse_line("robot: beep").is_some());
    }

    #[test]
    fn test_timestamp_normalized_and_stripped() {
        let extractor = MessageExtractor::default();
        let msg = extractor.parse_line("[09:15] alice: hi").unwrap();
        assert_eq!(
            msg,
            ChatMessage::new("alice", "hi").with_timestamp("09:15:00")
        );

        let msg = extractor.parse_line("<bob> see you (23:59:01)").unwrap();
        assert_eq!(msg.content, "see you");
        assert_eq!(msg.timestamp.as_deref(), Some("23:59:01"));
    }

    #[test]
    fn test_control_characters_removed_from_content() {
        let extractor = MessageExtractor::default();
        let msg = extractor.parse_line("alice: he\x07llo\x1b[0m").unwrap();
        assert_eq!(msg.content, "hello");
    }

    #[test]
    fn test_redraw_is_deduplicated() {
        let mut extractor = MessageExtractor::default();
        let screen = vec!["alice: hi", "bob: yo"];

        let first = extractor.extract(&screen);
        assert_eq!(first.len(), 2);

        let second = extractor.extract(&screen);
        assert!(second.is_empty());

        let third = extractor.extract(&["alice: hi", "carol: new"]);
        assert_eq!(third, vec![ChatMessage::new("carol", "new")]);
    }

    #[test]
    fn test_same_line_twice_in_one_pass() {
        let mut extractor = MessageExtractor::default();
        let out = extractor.extract(&["alice: hi", "alice: hi"]);
        assert_eq!(out.len(), 1);
        assert_eq!(extractor.seen_count(), 1);
    }

    #[test]
    fn test_clear_forgets_seen_messages() {
        let mut extractor = MessageExtractor::default();
        extractor.extract(&["alice: hi"]);
        extractor.clear();
        assert_eq!(extractor.extract(&["alice: hi"]).len(), 1);
    }
}
