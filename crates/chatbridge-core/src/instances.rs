//! Instances owned by this process.
//!
//! An [`InstanceHandle`] owns the event-id counter of one logical actor and
//! its current lifecycle status. The [`InstanceBook`] lists every handle the
//! node created so the replication transport can claim their identities and
//! replay their state to a freshly connected peer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chatbridge_types::{
    BusEvent, EventId, EventMeta, InstanceAnnouncementEvent, InstanceIdentity, InstanceStatus,
    InstanceStatusEvent, StatusVisibility,
};
use tracing::debug;

use crate::bus::{Bus, BusError};

/// A locally owned instance.
pub struct InstanceHandle {
    identity: InstanceIdentity,
    counter: AtomicU64,
    status: Mutex<InstanceStatus>,
}

impl InstanceHandle {
    /// Create a handle in the [`InstanceStatus::Fresh`] state.
    pub fn new(identity: InstanceIdentity) -> Self {
        Self {
            identity,
            counter: AtomicU64::new(0),
            status: Mutex::new(InstanceStatus::default()),
        }
    }

    /// The identity this handle mints events for.
    pub const fn identity(&self) -> &InstanceIdentity {
        &self.identity
    }

    /// Mint the next event id. Ids are never reused within this handle.
    pub fn next_event_id(&self) -> EventId {
        EventId::compose(&self.identity, self.counter.fetch_add(1, Ordering::Relaxed))
    }

    /// A fresh local header for an event created by this instance.
    pub fn event_meta(&self) -> EventMeta {
        EventMeta::local(&self.identity, self.next_event_id())
    }

    /// Current lifecycle status.
    pub fn status(&self) -> InstanceStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `to` and publish the transition.
    pub fn set_status(
        &self,
        bus: &Bus,
        to: InstanceStatus,
        message: impl Into<String>,
        visibility: StatusVisibility,
    ) -> Result<(), BusError> {
        let from = {
            let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
            core::mem::replace(&mut *status, to)
        };
        debug!(instance = %self.identity, ?from, ?to, "instance status changed");
        bus.publish(&BusEvent::from(InstanceStatusEvent {
            meta: self.event_meta(),
            from,
            to,
            message: message.into(),
            visibility,
        }))
    }

    /// Publish an announcement for this instance.
    pub fn announce(&self, bus: &Bus) -> Result<(), BusError> {
        bus.publish(&BusEvent::from(InstanceAnnouncementEvent {
            meta: self.event_meta(),
        }))
    }
}

impl core::fmt::Debug for InstanceHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InstanceHandle")
            .field("identity", &self.identity)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

/// Every instance this process owns.
#[derive(Debug, Default)]
pub struct InstanceBook {
    handles: RwLock<Vec<Arc<InstanceHandle>>>,
}

impl InstanceBook {
    /// Create an empty book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an instance and return its handle.
    pub fn register(&self, identity: InstanceIdentity) -> Arc<InstanceHandle> {
        let handle = Arc::new(InstanceHandle::new(identity));
        self.handles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&handle));
        handle
    }

    /// Snapshot of every registered handle, in registration order.
    pub fn handles(&self) -> Vec<Arc<InstanceHandle>> {
        self.handles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Identities a replication peer may learn about.
    pub fn replicable_identities(&self) -> Vec<InstanceIdentity> {
        self.handles()
            .iter()
            .map(|handle| handle.identity().clone())
            .filter(|identity| !identity.is_internal())
            .collect()
    }

    /// Re-announce every non-internal instance and replay its current
    /// status, so a peer that just connected catches up on local state.
    pub fn rebroadcast(&self, bus: &Bus) -> Result<(), BusError> {
        for handle in self.handles() {
            if handle.identity().is_internal() {
                continue;
            }
            handle.announce(bus)?;
            let status = handle.status();
            bus.publish(&BusEvent::from(InstanceStatusEvent {
                meta: handle.event_meta(),
                from: status,
                to: status,
                message: String::from("state rebroadcast"),
                visibility: StatusVisibility::Hidden,
            }))?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chatbridge_types::{Channel, InstanceType};

    use super::*;

    #[test]
    fn event_ids_are_monotonic_per_instance() {
        let book = InstanceBook::new();
        let a = book.register(InstanceIdentity::new("guild-a", InstanceType::Minecraft));
        let b = book.register(InstanceIdentity::new("guild-b", InstanceType::Minecraft));

        assert_eq!(a.next_event_id().as_str(), "minecraft:guild-a:0");
        assert_eq!(a.next_event_id().as_str(), "minecraft:guild-a:1");
        assert_eq!(b.next_event_id().as_str(), "minecraft:guild-b:0");
    }

    #[test]
    fn status_transition_is_published() {
        let bus = Bus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            bus.subscribe(Channel::InstanceStatus, move |event| {
                if let BusEvent::InstanceStatus(status) = event {
                    seen.lock().unwrap().push((status.from, status.to));
                }
                Ok(())
            });
        }

        let handle = InstanceHandle::new(InstanceIdentity::new("guild-a", InstanceType::Minecraft));
        handle
            .set_status(&bus, InstanceStatus::Connecting, "login", StatusVisibility::Show)
            .unwrap();
        assert_eq!(handle.status(), InstanceStatus::Connecting);
        assert_eq!(
            *seen.lock().unwrap(),
            [(InstanceStatus::Fresh, InstanceStatus::Connecting)]
        );
    }

    #[test]
    fn rebroadcast_skips_internal_instances() {
        let bus = Bus::new();
        let book = InstanceBook::new();
        book.register(InstanceIdentity::new("node", InstanceType::Main));
        book.register(InstanceIdentity::new("internal-cache", InstanceType::Metrics));
        book.register(InstanceIdentity::new("guild-a", InstanceType::Minecraft));

        let names = Arc::new(Mutex::new(Vec::new()));
        {
            let names = Arc::clone(&names);
            bus.subscribe_all(move |event| {
                names
                    .lock()
                    .unwrap()
                    .push((event.channel(), event.meta().instance_name.clone()));
                Ok(())
            });
        }

        book.rebroadcast(&bus).unwrap();
        assert_eq!(
            *names.lock().unwrap(),
            [
                (Channel::InstanceAnnouncement, String::from("guild-a")),
                (Channel::InstanceStatus, String::from("guild-a")),
            ]
        );
        assert_eq!(
            book.replicable_identities(),
            [InstanceIdentity::new("guild-a", InstanceType::Minecraft)]
        );
    }
}
