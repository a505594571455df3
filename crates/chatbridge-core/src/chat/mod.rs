//! Chat correlation: structured queries over an unstructured chat stream.
//!
//! A Minecraft instance has a single chat stream. Responses to commands
//! arrive there as plain lines, interleaved with whatever else players say,
//! and nothing ties a line to the command that caused it. The parsers in
//! this module recognise one response shape each; the [`engine`] serialises
//! queries per instance so at most one parser listens to a stream at a time.
//!
//! - [`roster`] -- `/guild list`
//! - [`motd`] -- `/guild motd preview`
//! - [`log`] -- `/guild log <page>`

pub mod engine;
pub mod log;
pub mod motd;
pub mod roster;
pub mod text;

pub use engine::{ChatCorrelator, CorrelationError, CorrelationTimeouts};
pub use log::{GuildLogPage, LogEntry, LogParser};
pub use motd::{GuildMotd, MotdParser};
pub use roster::{GuildMember, GuildRank, GuildRoster, RosterParser};

/// A response that does not match the grammar it claimed to follow.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatProtocolError {
    /// A member line arrived before any rank header.
    #[error("member line before any rank header: {line}")]
    MemberBeforeRank {
        /// The offending line, formatting stripped.
        line: String,
    },

    /// A member line without a usable name.
    #[error("malformed member line: {line}")]
    MalformedMember {
        /// The offending line, formatting stripped.
        line: String,
    },

    /// A declared count disagrees with what was parsed.
    #[error("{field} declared {declared} but {parsed} were parsed")]
    CountMismatch {
        /// Which count, e.g. `total members`.
        field: &'static str,
        /// The number the server printed.
        declared: usize,
        /// The number of entries actually parsed.
        parsed: usize,
    },

    /// The server answered with a different page than requested.
    #[error("requested page {requested} but received page {received}")]
    PageMismatch {
        /// Page that was asked for.
        requested: u32,
        /// Page the header announced.
        received: u32,
    },

    /// A number in a header or footer could not be parsed.
    #[error("invalid number in line: {line}")]
    InvalidCount {
        /// The offending line, formatting stripped.
        line: String,
    },
}

/// What a parser made of one chat line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome<T> {
    /// Not part of the response.
    Ignored,
    /// Part of the response; more lines are expected.
    Consumed,
    /// The response is complete, successfully or not.
    Complete(Result<T, ChatProtocolError>),
}

/// Incremental recogniser for one response shape.
///
/// Lines are fed raw, formatting codes included. After returning
/// [`LineOutcome::Complete`] a parser is spent; further lines may be ignored
/// or misread.
pub trait ResponseParser {
    /// The structured result.
    type Output;

    /// Feed the next chat line.
    fn feed(&mut self, raw: &str) -> LineOutcome<Self::Output>;
}
