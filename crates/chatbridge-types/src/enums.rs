//! Enumeration types carried by bus events.
//!
//! [`Channel`] is the discriminant every bus consumer matches on. Adding a
//! channel means adding a variant here and a payload in
//! [`events`](crate::events); the compiler then points at every exhaustive
//! match that has to learn about it.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

/// Named bus channel. The wire name is the kebab-case form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Channel {
    /// An instance announces that it exists.
    InstanceAnnouncement,
    /// An instance changed its lifecycle status.
    InstanceStatus,
    /// Control signal (shutdown, restart) addressed to instances.
    InstanceSignal,
    /// A raw, unmodified line read from a Minecraft chat stream.
    MinecraftChat,
    /// A command to be typed into a Minecraft chat stream.
    MinecraftSend,
    /// The game's reaction to something an earlier event caused.
    MinecraftReaction,
    /// Platform-neutral chat message for presentation instances.
    Chat,
}

impl Channel {
    /// Every channel, in declaration order.
    pub const ALL: [Self; 7] = [
        Self::InstanceAnnouncement,
        Self::InstanceStatus,
        Self::InstanceSignal,
        Self::MinecraftChat,
        Self::MinecraftSend,
        Self::MinecraftReaction,
        Self::Chat,
    ];

    /// The wire name of this channel.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InstanceAnnouncement => "instance-announcement",
            Self::InstanceStatus => "instance-status",
            Self::InstanceSignal => "instance-signal",
            Self::MinecraftChat => "minecraft-chat",
            Self::MinecraftSend => "minecraft-send",
            Self::MinecraftReaction => "minecraft-reaction",
            Self::Chat => "chat",
        }
    }

    /// Look a channel up by its wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|channel| channel.as_str() == name)
    }
}

impl core::fmt::Display for Channel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an event is a plain notification or an addressed signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Pure notification, observed by anyone interested.
    Inform,
    /// Addressed to a list of instance names, or to all instances.
    Signal,
}

// ---------------------------------------------------------------------------
// Instances
// ---------------------------------------------------------------------------

/// The kind of a logical instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceType {
    /// The node's own application instance.
    Main,
    /// A plugin loaded into the node.
    Plugin,
    /// The command dispatcher.
    Commands,
    /// Moderation tooling.
    Moderation,
    /// A Minecraft client connected to a guild.
    Minecraft,
    /// A Discord-like chat platform bridge.
    Discord,
    /// Metrics collection.
    Metrics,
    /// A replication socket endpoint.
    Socket,
}

impl InstanceType {
    /// Lower-case name used in event ids and on the wire.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Plugin => "plugin",
            Self::Commands => "commands",
            Self::Moderation => "moderation",
            Self::Minecraft => "minecraft",
            Self::Discord => "discord",
            Self::Metrics => "metrics",
            Self::Socket => "socket",
        }
    }

    /// Process-local instance types. They never cross a replication link.
    pub const fn is_internal(self) -> bool {
        matches!(self, Self::Main | Self::Plugin | Self::Commands)
    }
}

impl core::fmt::Display for InstanceType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of an instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    /// Created but never started.
    #[default]
    Fresh,
    /// Starting or reconnecting.
    Connecting,
    /// Up and serving.
    Connected,
    /// Lost its connection; may come back on its own.
    Disconnected,
    /// Stopped because of an unrecoverable error.
    Failed,
    /// Stopped on request.
    Ended,
}

/// How loudly a status change should be presented to humans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusVisibility {
    /// Post the change where users can see it.
    Show,
    /// Record it without notifying anyone.
    Silent,
    /// Internal bookkeeping only.
    Hidden,
}

/// Control actions carried by [`Channel::InstanceSignal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalType {
    /// Stop the targeted instances.
    Shutdown,
    /// Restart the targeted instances.
    Restart,
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// Priority of an outbound chat command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandPriority {
    /// Queued behind everything else.
    #[default]
    Default,
    /// Jumps ahead of default traffic.
    High,
    /// Sent immediately, bypassing the send queue.
    Instant,
}

/// Rejections the game reports for an earlier outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReactionType {
    /// The account is muted.
    Muted,
    /// The same message was sent twice in a row.
    RepeatedMessage,
    /// The message was flagged as advertising.
    Advertise,
    /// The message was blocked by the chat filter.
    Blocked,
}

/// Which guild channel a chat message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    /// Regular guild chat.
    Public,
    /// Officer-only chat.
    Officer,
    /// Direct message.
    Private,
}
