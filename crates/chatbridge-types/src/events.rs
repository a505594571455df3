//! Bus event payloads.
//!
//! Every payload embeds an [`EventMeta`] header and is wrapped in the
//! [`BusEvent`] sum type, whose serde representation *is* the replication
//! wire format: `{"name": <channel>, "data": <payload>}`.
//!
//! # Origin tagging
//!
//! [`EventMeta`] carries an [`Origin`] that is deliberately not serialized.
//! Constructing a header through [`EventMeta::local`] yields
//! [`Origin::Local`]; any header produced by deserialization yields
//! [`Origin::Remote`]. Nothing can turn a remote header back into a local
//! one, so an event that arrived over a replication link can never be
//! mistaken for a locally originated event and re-broadcast.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::{
    Channel, ChannelType, CommandPriority, EventKind, InstanceStatus, InstanceType, ReactionType,
    SignalType, StatusVisibility,
};
use crate::ids::{EventId, InstanceIdentity, is_internal_name};

/// Where an event was created relative to the current process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Minted by an instance living in this process.
    Local,
    /// Received over a replication link.
    Remote,
}

const fn remote_origin() -> Origin {
    Origin::Remote
}

/// Header shared by every event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMeta {
    /// Id unique within the originating instance.
    pub event_id: EventId,
    /// Name of the originating instance.
    pub instance_name: String,
    /// Type of the originating instance.
    pub instance_type: InstanceType,
    /// Creation time at the origin.
    pub created_at: DateTime<Utc>,
    #[serde(skip, default = "remote_origin")]
    origin: Origin,
}

impl EventMeta {
    /// Header for an event minted in this process by `identity`.
    pub fn local(identity: &InstanceIdentity, event_id: EventId) -> Self {
        Self {
            event_id,
            instance_name: identity.instance_name.clone(),
            instance_type: identity.instance_type,
            created_at: Utc::now(),
            origin: Origin::Local,
        }
    }

    /// Whether the event was minted here or received from a peer.
    pub const fn origin(&self) -> Origin {
        self.origin
    }

    /// Identity of the originating instance.
    pub fn identity(&self) -> InstanceIdentity {
        InstanceIdentity::new(self.instance_name.clone(), self.instance_type)
    }
}

/// An instance announces itself, typically on startup or rebroadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceAnnouncementEvent {
    /// Event header.
    #[serde(flatten)]
    pub meta: EventMeta,
}

/// An instance moved from one lifecycle status to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStatusEvent {
    /// Event header.
    #[serde(flatten)]
    pub meta: EventMeta,
    /// Previous status.
    pub from: InstanceStatus,
    /// New status.
    pub to: InstanceStatus,
    /// Human-readable reason.
    pub message: String,
    /// How presentation instances should surface the change.
    pub visibility: StatusVisibility,
}

/// Control signal addressed to instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSignalEvent {
    /// Event header.
    #[serde(flatten)]
    pub meta: EventMeta,
    /// Targeted instance names; `None` addresses every instance.
    pub targets: Option<Vec<String>>,
    /// The requested action.
    #[serde(rename = "type")]
    pub signal: SignalType,
}

/// A raw chat line read from a Minecraft instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinecraftChatEvent {
    /// Event header. `instance_name` is the instance the line was read from.
    #[serde(flatten)]
    pub meta: EventMeta,
    /// The unmodified line, formatting codes included.
    pub message: String,
}

/// A command to type into one or more Minecraft instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinecraftSendEvent {
    /// Event header.
    #[serde(flatten)]
    pub meta: EventMeta,
    /// Targeted instance names; `None` addresses every instance.
    pub targets: Option<Vec<String>>,
    /// Send priority.
    pub priority: CommandPriority,
    /// The command text, e.g. `/guild list`.
    pub command: String,
}

/// The game rejected something an earlier event caused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinecraftReactionEvent {
    /// Event header.
    #[serde(flatten)]
    pub meta: EventMeta,
    /// The event that caused the reaction, possibly minted in another process.
    pub origin_event_id: EventId,
    /// What the game reported.
    #[serde(rename = "type")]
    pub reaction: ReactionType,
}

/// A chat message in platform-neutral form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEvent {
    /// Event header.
    #[serde(flatten)]
    pub meta: EventMeta,
    /// Guild channel the message belongs to.
    pub channel_type: ChannelType,
    /// Sender display name.
    pub username: String,
    /// Message text.
    pub message: String,
}

/// Any event that can travel on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "data", rename_all = "kebab-case")]
pub enum BusEvent {
    /// See [`Channel::InstanceAnnouncement`].
    InstanceAnnouncement(InstanceAnnouncementEvent),
    /// See [`Channel::InstanceStatus`].
    InstanceStatus(InstanceStatusEvent),
    /// See [`Channel::InstanceSignal`].
    InstanceSignal(InstanceSignalEvent),
    /// See [`Channel::MinecraftChat`].
    MinecraftChat(MinecraftChatEvent),
    /// See [`Channel::MinecraftSend`].
    MinecraftSend(MinecraftSendEvent),
    /// See [`Channel::MinecraftReaction`].
    MinecraftReaction(MinecraftReactionEvent),
    /// See [`Channel::Chat`].
    Chat(ChatEvent),
}

impl BusEvent {
    /// The channel this event is published on.
    pub const fn channel(&self) -> Channel {
        match self {
            Self::InstanceAnnouncement(_) => Channel::InstanceAnnouncement,
            Self::InstanceStatus(_) => Channel::InstanceStatus,
            Self::InstanceSignal(_) => Channel::InstanceSignal,
            Self::MinecraftChat(_) => Channel::MinecraftChat,
            Self::MinecraftSend(_) => Channel::MinecraftSend,
            Self::MinecraftReaction(_) => Channel::MinecraftReaction,
            Self::Chat(_) => Channel::Chat,
        }
    }

    /// The event header.
    pub const fn meta(&self) -> &EventMeta {
        match self {
            Self::InstanceAnnouncement(event) => &event.meta,
            Self::InstanceStatus(event) => &event.meta,
            Self::InstanceSignal(event) => &event.meta,
            Self::MinecraftChat(event) => &event.meta,
            Self::MinecraftSend(event) => &event.meta,
            Self::MinecraftReaction(event) => &event.meta,
            Self::Chat(event) => &event.meta,
        }
    }

    /// Notification or addressed signal.
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::InstanceSignal(_) | Self::MinecraftSend(_) => EventKind::Signal,
            Self::InstanceAnnouncement(_)
            | Self::InstanceStatus(_)
            | Self::MinecraftChat(_)
            | Self::MinecraftReaction(_)
            | Self::Chat(_) => EventKind::Inform,
        }
    }

    /// Target list of a signal. `None` for informs and for signals
    /// addressed to everyone.
    pub fn targets(&self) -> Option<&[String]> {
        match self {
            Self::InstanceSignal(event) => event.targets.as_deref(),
            Self::MinecraftSend(event) => event.targets.as_deref(),
            Self::InstanceAnnouncement(_)
            | Self::InstanceStatus(_)
            | Self::MinecraftChat(_)
            | Self::MinecraftReaction(_)
            | Self::Chat(_) => None,
        }
    }

    /// Whether an instance called `instance_name` should act on this event.
    pub fn is_addressed_to(&self, instance_name: &str) -> bool {
        self.targets()
            .is_none_or(|targets| targets.iter().any(|target| target == instance_name))
    }

    /// Whether this event must stay inside its process: it was minted by an
    /// internal instance, or it is a signal naming an internal instance.
    pub fn is_internal(&self) -> bool {
        self.meta().identity().is_internal()
            || self
                .targets()
                .is_some_and(|targets| targets.iter().any(|target| is_internal_name(target)))
    }

    /// Whether this event should be forwarded to replication peers.
    pub fn is_replicable(&self) -> bool {
        self.meta().origin() == Origin::Local && !self.is_internal()
    }
}

macro_rules! impl_from_payload {
    ($($variant:ident => $payload:ty),+ $(,)?) => {
        $(
            impl From<$payload> for BusEvent {
                fn from(event: $payload) -> Self {
                    Self::$variant(event)
                }
            }
        )+
    };
}

impl_from_payload! {
    InstanceAnnouncement => InstanceAnnouncementEvent,
    InstanceStatus => InstanceStatusEvent,
    InstanceSignal => InstanceSignalEvent,
    MinecraftChat => MinecraftChatEvent,
    MinecraftSend => MinecraftSendEvent,
    MinecraftReaction => MinecraftReactionEvent,
    Chat => ChatEvent,
}
