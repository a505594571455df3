//! Shared type definitions for chatbridge nodes.
//!
//! Every node process (Minecraft relay, Discord-facing bridge, metrics)
//! speaks the same event vocabulary. This crate is the single source of
//! truth for that vocabulary and for its JSON wire representation.
//!
//! # Modules
//!
//! - [`ids`] -- Instance identities, event ids and replication socket ids
//! - [`enums`] -- Channel discriminant and the small closed vocabularies
//!   carried by events (statuses, priorities, signal kinds)
//! - [`events`] -- The event payloads and the [`BusEvent`] sum type
//! - [`packet`] -- Text frames exchanged over a replication link

pub mod enums;
pub mod events;
pub mod ids;
pub mod packet;

// Re-export all public types at crate root for convenience.
pub use enums::{
    Channel, ChannelType, CommandPriority, EventKind, InstanceStatus, InstanceType, ReactionType,
    SignalType, StatusVisibility,
};
pub use events::{
    BusEvent, ChatEvent, EventMeta, InstanceAnnouncementEvent, InstanceSignalEvent,
    InstanceStatusEvent, MinecraftChatEvent, MinecraftReactionEvent, MinecraftSendEvent, Origin,
};
pub use ids::{EventId, INTERNAL_PREFIX, InstanceIdentity, SocketId};
pub use packet::{CONNECTION_INFO, Frame, PacketError, SocketConnectionInfo};
