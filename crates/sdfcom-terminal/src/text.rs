//! Text cleanup helpers for rendered terminal rows
use regex::Regex;
use std::sync::OnceLock;

fn ansi_regex() -> &'static Regex {
    static ANSI: OnceLock<Regex> = OnceLock::new();
    ANSI.get_or_init(|| {
        // CSI sequences, OSC strings terminated by BEL or ST, charset selection
        Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[()][AB012]")
            .expect("ANSI pattern is valid")
    })
}

/// Remove ANSI escape sequences
pub fn strip_ansi(text: &str) -> String {
    ansi_regex().replace_all(text, "").into_owned()
}

/// Remove ANSI sequences and every control character, keeping spacing intact.
/// Tabs become a single space.
pub fn strip_control(text: &str) -> String {
    strip_ansi(text)
        .chars()
        .filter_map(|c| match c {
            '\t' => Some(' '),
            c if c.is_control() => None,
            c => Some(c),
        })
        .collect()
}

/// Printable text with whitespace runs collapsed to one space and trimmed
pub fn clean_text(text: &str) -> String {
    strip_control(text)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Printable text trimmed at both ends, inner spacing preserved
pub fn clean_line(text: &str) -> String {
    strip_control(text).trim().to_string()
}
