//! Guild message of the day, as printed by `/guild motd preview`.
//!
//! The preview has a start marker but no terminator, so the command is sent
//! twice and the second marker closes the first response.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::text::{is_separator, strip_formatting};
use super::{LineOutcome, ResponseParser};

const START: &str = "MOTD (Preview):";

/// Snapshot of a guild's message of the day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuildMotd {
    /// MOTD lines with formatting stripped.
    pub lines: Vec<String>,
    /// When the snapshot was taken.
    pub fetched_at: DateTime<Utc>,
}

/// Parser for a doubled `/guild motd preview` response.
#[derive(Debug, Default)]
pub struct MotdParser {
    started: bool,
    lines: Vec<String>,
}

impl MotdParser {
    /// How many times the command must be sent for the response to close.
    pub const SENDS: usize = 2;

    /// Create a parser waiting for the first start marker.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResponseParser for MotdParser {
    type Output = GuildMotd;

    fn feed(&mut self, raw: &str) -> LineOutcome<GuildMotd> {
        let stripped = strip_formatting(raw);
        let line = stripped.trim();

        if line == START {
            if self.started {
                return LineOutcome::Complete(Ok(GuildMotd {
                    lines: core::mem::take(&mut self.lines),
                    fetched_at: Utc::now(),
                }));
            }
            self.started = true;
            return LineOutcome::Consumed;
        }
        if !self.started {
            return LineOutcome::Ignored;
        }
        if !line.is_empty() && !is_separator(line) {
            self.lines.push(line.to_owned());
        }
        LineOutcome::Consumed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_marker_closes_the_first_response() {
        let mut parser = MotdParser::new();
        assert_eq!(parser.feed("§bBob: hi"), LineOutcome::Ignored);
        assert_eq!(parser.feed("§b------------------"), LineOutcome::Ignored);
        assert_eq!(parser.feed("§aMOTD (Preview):"), LineOutcome::Consumed);
        assert_eq!(parser.feed("§6Welcome to §lFoo"), LineOutcome::Consumed);
        assert_eq!(parser.feed("Be nice."), LineOutcome::Consumed);
        assert_eq!(parser.feed("§b------------------"), LineOutcome::Consumed);
        assert_eq!(parser.feed("§b------------------"), LineOutcome::Consumed);

        assert!(matches!(
            parser.feed("§aMOTD (Preview):"),
            LineOutcome::Complete(Ok(GuildMotd { lines, .. }))
                if lines == ["Welcome to Foo", "Be nice."]
        ));
    }
}
