//! Two-state parser over newline-framed `text/event-stream` bodies
//!: accumulate `data:`
//! payload lines until a blank line delimits the event. Deliberately
//! decoupled from any HTTP client or transport so it can be exercised with
//! plain strings in tests.

/// Accumulates `data:` lines of one SSE event until a blank line delimiter.
#[derive(Debug, Default)]
pub struct SseEventParser {
    data_lines: Vec<String>,
}

impl SseEventParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one line (no trailing newline). Returns the joined payload when
    /// `line` is the blank delimiter and at least one `data:` line has been
    /// accumulated; comment lines (`:`-prefixed) and unrecognized fields are
    /// ignored, matching the one field this protocol actually uses.
    pub fn feed_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            if self.data_lines.is_empty() {
                return None;
            }
            return Some(self.data_lines.drain(..).collect::<Vec<_>>().join("\n"));
        }
        if let Some(rest) = line.strip_prefix("data:") {
            self.data_lines.push(rest.trim().to_string());
        }
        None
    }
}

/// `GET <agent.url>` event payload shape: `{rx:{...}, tx:{...}}`.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct RawBandwidthEvent {
    pub rx: RawDirection,
    pub tx: RawDirection,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct RawDirection {
    #[serde(rename = "bytespersecond")]
    pub bytes_per_second: u64,
    #[serde(rename = "ratestring", default)]
    pub rate_string: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_until_blank_line() {
        let mut parser = SseEventParser::new();
        assert_eq!(parser.feed_line("data: {\"rx\":{"), None);
        assert_eq!(parser.feed_line("data: \"bytespersecond\":1}}"), None);
        let payload = parser.feed_line("").unwrap();
        assert_eq!(payload, "{\"rx\":{\n\"bytespersecond\":1}}");
    }

    #[test]
    fn blank_line_with_no_data_yields_nothing() {
        let mut parser = SseEventParser::new();
        assert_eq!(parser.feed_line(""), None);
    }

    #[test]
    fn ignores_non_data_fields() {
        let mut parser = SseEventParser::new();
        assert_eq!(parser.feed_line(": keep-alive"), None);
        assert_eq!(parser.feed_line("event: sample"), None);
        assert_eq!(parser.feed_line("data: {}"), None);
        assert_eq!(parser.feed_line(""), Some("{}".to_string()));
    }

    #[test]
    fn malformed_json_is_rejected_by_the_caller_not_the_parser() {
        let mut parser = SseEventParser::new();
        parser.feed_line("data: {bad json}");
        let payload = parser.feed_line("").unwrap();
        let parsed: Result<RawBandwidthEvent, _> = serde_json::from_str(&payload);
        assert!(parsed.is_err());
    }
}
