//! One page of the guild audit log, as printed by `/guild log <page>`.
//!
//! ```text
//! -----------------------------------------------------
//!              Guild Log (Page 1 of 14)
//!
//! Jan 01 2024 12:00 EST: Alice invited Bob
//! Jan 01 2024 12:05 EST: Bob joined the guild
//! -----------------------------------------------------
//! ```

use core::ops::RangeInclusive;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::text::{is_separator, parse_count, strip_formatting};
use super::{ChatProtocolError, LineOutcome, ResponseParser};

const HEADER_PREFIX: &str = "Guild Log (Page ";

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// One audit log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    /// Timestamp as printed by the server.
    pub timestamp: String,
    /// What happened.
    pub action: String,
}

/// Snapshot of one log page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuildLogPage {
    /// Page number, starting at 1.
    pub page: u32,
    /// Number of pages the server reported.
    pub total_pages: u32,
    /// Entries, newest first as printed.
    pub entries: Vec<LogEntry>,
    /// When the snapshot was taken.
    pub fetched_at: DateTime<Utc>,
}

/// Parser for `/guild log <page>` responses.
#[derive(Debug)]
pub struct LogParser {
    requested: u32,
    total_pages: Option<u32>,
    entries: Vec<LogEntry>,
}

impl LogParser {
    /// Create a parser expecting page `requested`.
    pub const fn new(requested: u32) -> Self {
        Self {
            requested,
            total_pages: None,
            entries: Vec::new(),
        }
    }
}

fn header(line: &str) -> Option<Result<(u32, u32), ChatProtocolError>> {
    let (page, total) = line
        .strip_prefix(HEADER_PREFIX)?
        .strip_suffix(')')?
        .split_once(" of ")?;
    let parse = || -> Result<(u32, u32), ChatProtocolError> {
        Ok((parse_count(page, line)?, parse_count(total, line)?))
    };
    Some(parse())
}

fn digits(token: &str, len: RangeInclusive<usize>) -> bool {
    len.contains(&token.len()) && token.bytes().all(|b| b.is_ascii_digit())
}

/// `Jan 01 2024 12:00 EST`. Guild chat interleaved with the response
/// (`Guild > Bob: hi`) has the same `": "` split but never this shape.
fn is_timestamp(text: &str) -> bool {
    let mut tokens = text.split_whitespace();
    let (Some(month), Some(day), Some(year), Some(time), Some(zone), None) = (
        tokens.next(),
        tokens.next(),
        tokens.next(),
        tokens.next(),
        tokens.next(),
        tokens.next(),
    ) else {
        return false;
    };
    MONTHS.contains(&month)
        && digits(day, 1..=2)
        && digits(year, 4..=4)
        && time
            .split_once(':')
            .is_some_and(|(hours, minutes)| digits(hours, 1..=2) && digits(minutes, 2..=2))
        && (2..=5).contains(&zone.len())
        && zone.bytes().all(|b| b.is_ascii_uppercase())
}

impl ResponseParser for LogParser {
    type Output = GuildLogPage;

    fn feed(&mut self, raw: &str) -> LineOutcome<GuildLogPage> {
        let stripped = strip_formatting(raw);
        let line = stripped.trim();

        if let Some(parsed) = header(line) {
            return match parsed {
                Ok((page, _)) if page != self.requested => {
                    LineOutcome::Complete(Err(ChatProtocolError::PageMismatch {
                        requested: self.requested,
                        received: page,
                    }))
                }
                Ok((_, total)) => {
                    self.total_pages = Some(total);
                    self.entries.clear();
                    LineOutcome::Consumed
                }
                Err(error) => LineOutcome::Complete(Err(error)),
            };
        }
        let Some(total_pages) = self.total_pages else {
            return LineOutcome::Ignored;
        };

        if is_separator(line) {
            return LineOutcome::Complete(Ok(GuildLogPage {
                page: self.requested,
                total_pages,
                entries: core::mem::take(&mut self.entries),
                fetched_at: Utc::now(),
            }));
        }
        match line.split_once(": ") {
            Some((timestamp, action)) if is_timestamp(timestamp) => {
                self.entries.push(LogEntry {
                    timestamp: timestamp.to_owned(),
                    action: action.to_owned(),
                });
                LineOutcome::Consumed
            }
            Some(_) | None => LineOutcome::Ignored,
        }
    }
}
