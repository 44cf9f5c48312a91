//! Time-of-day extraction and normalization
use chrono::{FixedOffset, NaiveTime, TimeZone, Utc};
use regex::Regex;

/// Candidate timestamp forms, tried in this order
pub const TIMESTAMP_PATTERNS: [(&str, &str); 3] = [
    ("bracketed", r"\[(\d{1,2}):(\d{2})(?::(\d{2}))?\]"),
    ("parenthesized", r"\((\d{1,2}):(\d{2})(?::(\d{2}))?\)"),
    ("bare", r"\b(\d{1,2}):(\d{2})(?::(\d{2}))?\b"),
];

/// A timestamp found in a line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampMatch {
    /// Normalized `HH:MM:SS`
    pub formatted: String,
    /// Byte range of the matched text in the source line
    pub start: usize,
    pub end: usize,
}

/// Ordered timestamp matchers plus the display timezone
pub struct TimestampParser {
    patterns: Vec<(&'static str, Regex)>,
    display_offset: FixedOffset,
}

impl TimestampParser {
    pub fn new(display_offset: FixedOffset) -> Self {
        let patterns = TIMESTAMP_PATTERNS
            .iter()
            .map(|(name, pattern)| {
                (*name, Regex::new(pattern).expect("timestamp pattern is valid"))
            })
            .collect();

        Self {
            patterns,
            display_offset,
        }
    }

    /// Names of the matchers in priority order
    pub fn pattern_names(&self) -> Vec<&'static str> {
        self.patterns.iter().map(|(name, _)| *name).collect()
    }

    /// Find the first valid time of day, trying each pattern in priority order
    pub fn find(&self, line: &str) -> Option<TimestampMatch> {
        for (_, regex) in &self.patterns {
            for caps in regex.captures_iter(line) {
                let hour = caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok());
                let minute = caps.get(2).and_then(|m| m.as_str().parse::<u32>().ok());
                let second = caps
                    .get(3)
                    .map(|m| m.as_str().parse::<u32>().ok())
                    .unwrap_or(Some(0));

                let (Some(hour), Some(minute), Some(second)) = (hour, minute, second) else {
                    continue;
                };
                let Some(time) = NaiveTime::from_hms_opt(hour, minute, second) else {
                    continue;
                };

                let whole = caps.get(0)?;
                return Some(TimestampMatch {
                    formatted: self.normalize(time),
                    start: whole.start(),
                    end: whole.end(),
                });
            }
        }
        None
    }

    /// Anchor a time of day to today's date in the display timezone
    fn normalize(&self, time: NaiveTime) -> String {
        let today = Utc::now().with_timezone(&self.display_offset).date_naive();
        match self.display_offset.from_local_datetime(&today.and_time(time)).single() {
            Some(moment) => moment.format("%H:%M:%S").to_string(),
            None => time.format("%H:%M:%S").to_string(),
        }
    }
}

/// UTC+8, the display timezone of the chat relay
pub fn default_display_offset() -> FixedOffset {
    FixedOffset::east_opt(8 * 3600).expect("UTC+8 is a valid offset")
}

impl Default for TimestampParser {
    fn default() -> Self {
        Self::new(default_display_offset())
    }
}
