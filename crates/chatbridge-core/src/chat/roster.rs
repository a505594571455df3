//! Guild member list, as printed by `/guild list`.
//!
//! ```text
//! -----------------------------------------------------
//!                  Guild Name: Foo
//!
//!                -- Guild Master --
//! [MVP+] Alice ●
//!
//!                  -- Member --
//! [VIP] Bob ●  Carol ●
//!
//! Total Members: 3
//! Online Members: 1
//! -----------------------------------------------------
//! ```
//!
//! The colour code right before each `●` carries presence: `§a` means
//! online, anything else offline.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::text::{last_format_code, parse_count, strip_formatting};
use super::{ChatProtocolError, LineOutcome, ResponseParser};

const START: &str = "Guild Name:";
const TOTAL: &str = "Total Members:";
const ONLINE: &str = "Online Members:";
const MEMBER_MARKER: char = '●';
const ONLINE_CODE: char = 'a';

/// One guild member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuildMember {
    /// Username without any rank prefix.
    pub username: String,
    /// Whether the member is currently online.
    pub online: bool,
}

/// A guild rank and the members holding it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuildRank {
    /// Rank name.
    pub name: String,
    /// Members, in listed order.
    pub members: Vec<GuildMember>,
}

/// Snapshot of a guild's member list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuildRoster {
    /// Guild name.
    pub name: String,
    /// Ranks, in listed order.
    pub ranks: Vec<GuildRank>,
    /// When the snapshot was taken.
    pub fetched_at: DateTime<Utc>,
}

impl GuildRoster {
    /// Every member, across ranks.
    pub fn members(&self) -> impl Iterator<Item = &GuildMember> {
        self.ranks.iter().flat_map(|rank| rank.members.iter())
    }

    /// Number of members.
    pub fn total_members(&self) -> usize {
        self.members().count()
    }

    /// Number of online members.
    pub fn online_members(&self) -> usize {
        self.members().filter(|member| member.online).count()
    }
}

/// Parser for `/guild list` responses.
#[derive(Debug, Default)]
pub struct RosterParser {
    name: Option<String>,
    ranks: Vec<GuildRank>,
}

impl RosterParser {
    /// Create a parser waiting for the start marker.
    pub fn new() -> Self {
        Self::default()
    }

    fn parsed_total(&self) -> usize {
        self.ranks.iter().map(|rank| rank.members.len()).sum()
    }

    fn parsed_online(&self) -> usize {
        self.ranks
            .iter()
            .flat_map(|rank| rank.members.iter())
            .filter(|member| member.online)
            .count()
    }

    fn members(&mut self, raw: &str, line: &str) -> Result<(), ChatProtocolError> {
        let Some(rank) = self.ranks.last_mut() else {
            return Err(ChatProtocolError::MemberBeforeRank {
                line: line.to_owned(),
            });
        };

        // Everything after the last marker is trailing padding.
        let mut rest = raw;
        while let Some((entry, tail)) = rest.split_once(MEMBER_MARKER) {
            rest = tail;
            let online = last_format_code(entry) == Some(ONLINE_CODE);
            let text = strip_formatting(entry);
            let text = text.trim();
            let username = match text.strip_prefix('[') {
                Some(ranked) => ranked.split_once(']').map_or("", |(_, name)| name.trim()),
                None => text,
            };
            if username.is_empty() {
                return Err(ChatProtocolError::MalformedMember {
                    line: line.to_owned(),
                });
            }
            rank.members.push(GuildMember {
                username: username.to_owned(),
                online,
            });
        }
        Ok(())
    }
}

fn rank_header(line: &str) -> Option<&str> {
    let name = line.strip_prefix("-- ")?.strip_suffix(" --")?.trim();
    (!name.is_empty()).then_some(name)
}

impl ResponseParser for RosterParser {
    type Output = GuildRoster;

    fn feed(&mut self, raw: &str) -> LineOutcome<GuildRoster> {
        let stripped = strip_formatting(raw);
        let line = stripped.trim();

        if let Some(name) = line.strip_prefix(START) {
            self.name = Some(name.trim().to_owned());
            self.ranks.clear();
            return LineOutcome::Consumed;
        }
        if self.name.is_none() {
            return LineOutcome::Ignored;
        }

        if let Some(rank) = rank_header(line) {
            self.ranks.push(GuildRank {
                name: rank.to_owned(),
                members: Vec::new(),
            });
            return LineOutcome::Consumed;
        }

        if line.contains(MEMBER_MARKER) {
            return match self.members(raw, line) {
                Ok(()) => LineOutcome::Consumed,
                Err(error) => LineOutcome::Complete(Err(error)),
            };
        }

        if let Some(count) = line.strip_prefix(TOTAL) {
            let parsed = self.parsed_total();
            return match parse_count(count, line) {
                Ok(declared) if declared == parsed => LineOutcome::Consumed,
                Ok(declared) => LineOutcome::Complete(Err(ChatProtocolError::CountMismatch {
                    field: "total members",
                    declared,
                    parsed,
                })),
                Err(error) => LineOutcome::Complete(Err(error)),
            };
        }

        if let Some(count) = line.strip_prefix(ONLINE) {
            let parsed = self.parsed_online();
            let outcome = match parse_count(count, line) {
                Ok(declared) if declared == parsed => Ok(GuildRoster {
                    name: self.name.take().unwrap_or_default(),
                    ranks: core::mem::take(&mut self.ranks),
                    fetched_at: Utc::now(),
                }),
                Ok(declared) => Err(ChatProtocolError::CountMismatch {
                    field: "online members",
                    declared,
                    parsed,
                }),
                Err(error) => Err(error),
            };
            return LineOutcome::Complete(outcome);
        }

        LineOutcome::Ignored
    }
}
