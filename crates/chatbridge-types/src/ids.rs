//! Identifiers for instances, events and replication sessions.
//!
//! Event ids are scoped to the instance that minted them: the
//! `<instanceType>:<instanceName>:<counter>` shape makes them unique across
//! a whole deployment without any shared counter.

use serde::{Deserialize, Serialize};

use crate::enums::InstanceType;

/// Instance names starting with this prefix never leave their process.
pub const INTERNAL_PREFIX: &str = "internal";

/// The `(name, type)` pair that identifies a logical actor on the bus.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceIdentity {
    /// Unique instance name within a deployment.
    pub instance_name: String,
    /// The kind of instance.
    pub instance_type: InstanceType,
}

impl InstanceIdentity {
    /// Create a new identity.
    pub fn new(instance_name: impl Into<String>, instance_type: InstanceType) -> Self {
        Self {
            instance_name: instance_name.into(),
            instance_type,
        }
    }

    /// Whether this identity is confined to its own process.
    ///
    /// Internal identities are never claimed during a replication handshake
    /// and their events are never forwarded over the wire.
    pub fn is_internal(&self) -> bool {
        is_internal_name(&self.instance_name) || self.instance_type.is_internal()
    }
}

impl core::fmt::Display for InstanceIdentity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.instance_type, self.instance_name)
    }
}

/// Whether an instance name carries the internal prefix.
pub fn is_internal_name(instance_name: &str) -> bool {
    instance_name.starts_with(INTERNAL_PREFIX)
}

/// Identifier of a single event, unique per originating instance.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    /// Compose the id of the `counter`-th event minted by `identity`.
    pub fn compose(identity: &InstanceIdentity, counter: u64) -> Self {
        Self(format!(
            "{}:{}:{counter}",
            identity.instance_type, identity.instance_name
        ))
    }

    /// Borrow the textual form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for EventId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for EventId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Session id assigned by a replication server to a connected peer.
///
/// Ids start at zero. On the wire "no previous session" is spelled `-1`,
/// which is why the header form is signed while this type is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SocketId(pub u32);

impl SocketId {
    /// Header value announcing "no previous session".
    pub const NONE_HEADER: i64 = -1;

    /// Return the inner value.
    pub const fn into_inner(self) -> u32 {
        self.0
    }

    /// Encode an optional previous id as its signed header value.
    pub fn to_header(previous: Option<Self>) -> i64 {
        previous.map_or(Self::NONE_HEADER, |id| i64::from(id.0))
    }

    /// Decode a signed header value. `-1` means none; other negative or
    /// oversized values are rejected.
    pub fn from_header(value: i64) -> Option<Option<Self>> {
        if value == Self::NONE_HEADER {
            return Some(None);
        }
        u32::try_from(value).ok().map(|id| Some(Self(id)))
    }
}

impl core::fmt::Display for SocketId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}
