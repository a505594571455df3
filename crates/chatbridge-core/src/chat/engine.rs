//! Query engine: cache, per-instance serialisation and the send/listen
//! exchange.
//!
//! A query for instance `X`:
//!
//! 1. returns a cached snapshot of `X` if it is younger than the caller's
//!    `max_age`;
//! 2. otherwise queues behind any other query for `X` and checks the cache
//!    again once it runs, so concurrent callers share one exchange;
//! 3. listens to `X`'s raw chat, sends the command to `X` only, and feeds
//!    every line to the parser until it completes or the deadline passes
//!    without a recognised line;
//! 4. caches the snapshot on success only.
//!
//! The chat listener is a scoped subscription, so it is removed on every
//! exit path including cancellation of the calling future.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chatbridge_types::{BusEvent, Channel, CommandPriority, MinecraftSendEvent};
use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, warn};

use super::log::{GuildLogPage, LogParser};
use super::motd::{GuildMotd, MotdParser};
use super::roster::{GuildRoster, RosterParser};
use super::{ChatProtocolError, LineOutcome, ResponseParser};
use crate::bus::{Bus, BusError};
use crate::config::CorrelationConfig;
use crate::correlator::Correlator;
use crate::instances::InstanceHandle;
use crate::queue::SerialQueue;

const ROSTER_COMMAND: &str = "/guild list";
const MOTD_COMMAND: &str = "/guild motd preview";

/// Errors surfaced by chat queries. A timeout is not an error: it yields
/// `Ok(None)`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CorrelationError {
    /// The response did not match its grammar.
    #[error("chat protocol error: {0}")]
    Protocol(#[from] ChatProtocolError),

    /// Publishing the command failed.
    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Per-query deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelationTimeouts {
    /// `/guild list`.
    pub roster: Duration,
    /// `/guild motd preview`.
    pub motd: Duration,
    /// `/guild log`.
    pub log: Duration,
}

impl Default for CorrelationTimeouts {
    fn default() -> Self {
        Self::from(&CorrelationConfig::default())
    }
}

impl From<&CorrelationConfig> for CorrelationTimeouts {
    fn from(config: &CorrelationConfig) -> Self {
        Self {
            roster: Duration::from_millis(config.roster_timeout_ms),
            motd: Duration::from_millis(config.motd_timeout_ms),
            log: Duration::from_millis(config.log_timeout_ms),
        }
    }
}

trait Snapshot {
    fn fetched_at(&self) -> DateTime<Utc>;
}

impl Snapshot for GuildRoster {
    fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }
}

impl Snapshot for GuildMotd {
    fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }
}

impl Snapshot for GuildLogPage {
    fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }
}

struct SnapshotCache<T> {
    entries: Mutex<HashMap<String, Arc<T>>>,
}

impl<T: Snapshot> SnapshotCache<T> {
    fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn fresh(&self, key: &str, max_age: Duration) -> Option<Arc<T>> {
        let max_age = TimeDelta::from_std(max_age).unwrap_or(TimeDelta::MAX);
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(key)
            .filter(|snapshot| Utc::now().signed_duration_since(snapshot.fetched_at()) < max_age)
            .map(Arc::clone)
    }

    fn store(&self, key: &str, snapshot: T) -> Arc<T> {
        let snapshot = Arc::new(snapshot);
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_owned(), Arc::clone(&snapshot));
        snapshot
    }
}

type Exchange<T> = Option<Result<T, ChatProtocolError>>;

fn log_key(instance: &str, page: u32) -> String {
    format!("{instance}#{page}")
}

/// Structured guild queries against Minecraft instances reachable on the
/// bus.
pub struct ChatCorrelator {
    bus: Arc<Bus>,
    sender: Arc<InstanceHandle>,
    timeouts: CorrelationTimeouts,
    queue: SerialQueue,
    rosters: SnapshotCache<GuildRoster>,
    motds: SnapshotCache<GuildMotd>,
    logs: SnapshotCache<GuildLogPage>,
}

impl ChatCorrelator {
    /// Create an engine that sends commands as `sender`.
    pub fn new(bus: Arc<Bus>, sender: Arc<InstanceHandle>, timeouts: CorrelationTimeouts) -> Self {
        Self {
            bus,
            sender,
            timeouts,
            queue: SerialQueue::new(),
            rosters: SnapshotCache::new(),
            motds: SnapshotCache::new(),
            logs: SnapshotCache::new(),
        }
    }

    /// Member list of the guild `instance` is in. `Ok(None)` when the
    /// instance did not answer in time.
    pub async fn guild_roster(
        &self,
        instance: &str,
        max_age: Duration,
    ) -> Result<Option<Arc<GuildRoster>>, CorrelationError> {
        if let Some(hit) = self.rosters.fresh(instance, max_age) {
            return Ok(Some(hit));
        }
        self.queue
            .run(instance, || self.fetch_roster(instance, max_age))
            .await
    }

    async fn fetch_roster(
        &self,
        instance: &str,
        max_age: Duration,
    ) -> Result<Option<Arc<GuildRoster>>, CorrelationError> {
        if let Some(hit) = self.rosters.fresh(instance, max_age) {
            return Ok(Some(hit));
        }
        let parser = RosterParser::new();
        let roster = self
            .exchange(instance, ROSTER_COMMAND, 1, self.timeouts.roster, parser)
            .await?;
        Ok(roster.map(|roster| self.rosters.store(instance, roster)))
    }

    /// Message of the day of the guild `instance` is in.
    pub async fn guild_motd(
        &self,
        instance: &str,
        max_age: Duration,
    ) -> Result<Option<Arc<GuildMotd>>, CorrelationError> {
        if let Some(hit) = self.motds.fresh(instance, max_age) {
            return Ok(Some(hit));
        }
        self.queue
            .run(instance, || self.fetch_motd(instance, max_age))
            .await
    }

    async fn fetch_motd(
        &self,
        instance: &str,
        max_age: Duration,
    ) -> Result<Option<Arc<GuildMotd>>, CorrelationError> {
        if let Some(hit) = self.motds.fresh(instance, max_age) {
            return Ok(Some(hit));
        }
        let parser = MotdParser::new();
        let motd = self
            .exchange(
                instance,
                MOTD_COMMAND,
                MotdParser::SENDS,
                self.timeouts.motd,
                parser,
            )
            .await?;
        Ok(motd.map(|motd| self.motds.store(instance, motd)))
    }

    /// One page of the audit log of the guild `instance` is in. Pages are
    /// cached independently.
    pub async fn guild_log(
        &self,
        instance: &str,
        page: u32,
        max_age: Duration,
    ) -> Result<Option<Arc<GuildLogPage>>, CorrelationError> {
        if let Some(hit) = self.logs.fresh(&log_key(instance, page), max_age) {
            return Ok(Some(hit));
        }
        self.queue
            .run(instance, || self.fetch_log(instance, page, max_age))
            .await
    }

    async fn fetch_log(
        &self,
        instance: &str,
        page: u32,
        max_age: Duration,
    ) -> Result<Option<Arc<GuildLogPage>>, CorrelationError> {
        let key = log_key(instance, page);
        if let Some(hit) = self.logs.fresh(&key, max_age) {
            return Ok(Some(hit));
        }
        let command = format!("/guild log {page}");
        let log = self
            .exchange(instance, &command, 1, self.timeouts.log, LogParser::new(page))
            .await?;
        Ok(log.map(|log| self.logs.store(&key, log)))
    }

    async fn exchange<P>(
        &self,
        instance: &str,
        command: &str,
        sends: usize,
        timeout: Duration,
        parser: P,
    ) -> Result<Option<P::Output>, CorrelationError>
    where
        P: ResponseParser + Send + 'static,
        P::Output: Clone + Send + Sync + 'static,
    {
        let correlator: Correlator<Exchange<P::Output>> = Correlator::new(timeout, None);
        let parser = Mutex::new(parser);

        let _listener = {
            let correlator = correlator.clone();
            let instance = instance.to_owned();
            self.bus
                .subscribe_scoped(Channel::MinecraftChat, move |event| {
                    let BusEvent::MinecraftChat(chat) = event else {
                        return Ok(());
                    };
                    if chat.meta.instance_name != instance || correlator.is_settled() {
                        return Ok(());
                    }
                    let outcome = parser
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .feed(&chat.message);
                    let settled = match outcome {
                        LineOutcome::Ignored => Ok(()),
                        LineOutcome::Consumed => correlator.refresh(),
                        LineOutcome::Complete(result) => correlator.resolve(Some(result)),
                    };
                    if let Err(error) = settled {
                        debug!(%instance, %error, "chat line arrived after the query settled");
                    }
                    Ok(())
                })
        };

        let targets = Some(vec![instance.to_owned()]);
        for _ in 0..sends {
            self.bus.publish(&BusEvent::from(MinecraftSendEvent {
                meta: self.sender.event_meta(),
                targets: targets.clone(),
                priority: CommandPriority::High,
                command: command.to_owned(),
            }))?;
        }
        debug!(%instance, command, sends, "chat query sent");

        match correlator.wait().await {
            Some(Ok(output)) => Ok(Some(output)),
            Some(Err(error)) => {
                warn!(%instance, command, %error, "chat response did not match");
                Err(error.into())
            }
            None => {
                warn!(
                    %instance,
                    command,
                    timeout_ms = timeout.as_millis(),
                    "chat query timed out"
                );
                Ok(None)
            }
        }
    }
}

impl core::fmt::Debug for ChatCorrelator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ChatCorrelator")
            .field("sender", self.sender.identity())
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}
