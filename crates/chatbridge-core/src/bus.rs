//! Process-local publish/subscribe dispatcher.
//!
//! [`Bus::publish`] calls handlers in-line on the publisher's task:
//!
//! 1. every wildcard handler ([`Bus::subscribe_all`]), in registration order;
//! 2. every handler of the event's [`Channel`], in registration order.
//!
//! The replication transport relies on (1): it installs one wildcard handler
//! at bootstrap and therefore sees each event before any domain handler can
//! react to it.
//!
//! # Handler contract
//!
//! Handlers are synchronous. A handler that needs to await something spawns
//! a task and logs that task's failures itself; the bus never observes them.
//! A handler that returns `Err` aborts the rest of that publish call and the
//! error surfaces to the publisher as [`BusError::Handler`].
//!
//! The handler list is snapshotted when a publish starts, so handlers may
//! subscribe or unsubscribe (including themselves) while being dispatched.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chatbridge_types::{BusEvent, Channel};
use tracing::trace;

/// A subscribed event handler.
pub type Handler = Arc<dyn Fn(&BusEvent) -> Result<(), HandlerError> + Send + Sync>;

/// Handle returned by every subscribe call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

/// Failure reported synchronously by a handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    /// Create a handler error with a description.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors surfaced to a publisher.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    /// A handler failed while dispatching on `channel`; later handlers were
    /// not called.
    #[error("handler failed on {channel}: {source}")]
    Handler {
        /// Channel of the event being dispatched.
        channel: Channel,
        /// The handler's error.
        source: HandlerError,
    },
}

struct Entry {
    id: SubscriptionId,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    wildcard: Vec<Entry>,
    channels: HashMap<Channel, Vec<Entry>>,
}

/// In-process event bus.
pub struct Bus {
    registry: RwLock<Registry>,
    next_id: AtomicU64,
}

impl Bus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            next_id: AtomicU64::new(0),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn entry<F>(&self, handler: F) -> Entry
    where
        F: Fn(&BusEvent) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        Entry {
            id: SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed)),
            handler: Arc::new(handler),
        }
    }

    /// Subscribe to one channel.
    pub fn subscribe<F>(&self, channel: Channel, handler: F) -> SubscriptionId
    where
        F: Fn(&BusEvent) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let entry = self.entry(handler);
        let id = entry.id;
        self.write().channels.entry(channel).or_default().push(entry);
        trace!(?id, %channel, "bus subscription added");
        id
    }

    /// Subscribe to every publish, whatever its channel.
    pub fn subscribe_all<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&BusEvent) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let entry = self.entry(handler);
        let id = entry.id;
        self.write().wildcard.push(entry);
        trace!(?id, "bus wildcard subscription added");
        id
    }

    /// Subscribe to one channel for as long as the returned guard lives.
    pub fn subscribe_scoped<F>(self: &Arc<Self>, channel: Channel, handler: F) -> Subscription
    where
        F: Fn(&BusEvent) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        Subscription {
            bus: Arc::clone(self),
            id: self.subscribe(channel, handler),
        }
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self.write();
        let Registry { wildcard, channels } = &mut *registry;
        core::iter::once(wildcard)
            .chain(channels.values_mut())
            .any(|entries| {
                let before = entries.len();
                entries.retain(|entry| entry.id != id);
                entries.len() != before
            })
    }

    /// Dispatch an event to the wildcard handlers, then to its channel's
    /// handlers. Stops at the first handler error.
    pub fn publish(&self, event: &BusEvent) -> Result<(), BusError> {
        let channel = event.channel();
        let handlers: Vec<Handler> = {
            let registry = self.read();
            registry
                .wildcard
                .iter()
                .chain(registry.channels.get(&channel).into_iter().flatten())
                .map(|entry| Arc::clone(&entry.handler))
                .collect()
        };

        trace!(
            %channel,
            event_id = %event.meta().event_id,
            handlers = handlers.len(),
            "publishing"
        );

        for handler in handlers {
            handler(event).map_err(|source| BusError::Handler { channel, source })?;
        }
        Ok(())
    }

    /// Number of handlers subscribed to `channel` (wildcards excluded).
    pub fn subscriber_count(&self, channel: Channel) -> usize {
        self.read().channels.get(&channel).map_or(0, Vec::len)
    }

    /// Number of wildcard handlers.
    pub fn wildcard_count(&self) -> usize {
        self.read().wildcard.len()
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for Bus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let registry = self.read();
        f.debug_struct("Bus")
            .field("wildcard", &registry.wildcard.len())
            .field("channels", &registry.channels.len())
            .finish_non_exhaustive()
    }
}

/// Guard that unsubscribes its handler when dropped.
#[must_use = "dropping the guard unsubscribes immediately"]
pub struct Subscription {
    bus: Arc<Bus>,
    id: SubscriptionId,
}

impl Subscription {
    /// The underlying subscription id.
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
    }
}

impl core::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use chatbridge_types::{
        EventId, EventMeta, InstanceIdentity, InstanceType, MinecraftChatEvent, MinecraftSendEvent,
    };

    use super::*;

    fn chat(counter: u64) -> BusEvent {
        let identity = InstanceIdentity::new("guild-a", InstanceType::Minecraft);
        BusEvent::from(MinecraftChatEvent {
            meta: EventMeta::local(&identity, EventId::compose(&identity, counter)),
            message: format!("line {counter}"),
        })
    }

    fn send(counter: u64) -> BusEvent {
        let identity = InstanceIdentity::new("guild-query", InstanceType::Discord);
        BusEvent::from(MinecraftSendEvent {
            meta: EventMeta::local(&identity, EventId::compose(&identity, counter)),
            targets: None,
            priority: chatbridge_types::CommandPriority::Default,
            command: String::from("/guild list"),
        })
    }

    fn recorder(
        log: Arc<Mutex<Vec<String>>>,
        tag: &'static str,
    ) -> impl Fn(&BusEvent) -> Result<(), HandlerError> {
        move |event| {
            log.lock()
                .unwrap()
                .push(format!("{tag}:{}", event.meta().event_id));
            Ok(())
        }
    }

    #[test]
    fn wildcard_sees_every_publish_once_and_first() {
        let bus = Bus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(Channel::MinecraftChat, recorder(Arc::clone(&log), "named"));
        bus.subscribe_all(recorder(Arc::clone(&log), "wild"));

        let events: Vec<BusEvent> = (0..5)
            .map(|i| if i % 2 == 0 { chat(i) } else { send(i) })
            .collect();
        for event in &events {
            bus.publish(event).unwrap();
        }

        let log = log.lock().unwrap();
        let wild: Vec<&String> = log.iter().filter(|entry| entry.starts_with("wild:")).collect();
        assert_eq!(wild.len(), events.len());

        for event in events.iter().filter(|event| event.channel() == Channel::MinecraftChat) {
            let id = &event.meta().event_id;
            let wild_at = log.iter().position(|entry| *entry == format!("wild:{id}"));
            let named_at = log.iter().position(|entry| *entry == format!("named:{id}"));
            assert!(wild_at.is_some() && named_at.is_some());
            assert!(wild_at < named_at);
        }
    }

    #[test]
    fn handlers_fire_in_registration_order() {
        let bus = Bus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(Channel::MinecraftChat, recorder(Arc::clone(&log), "first"));
        bus.subscribe(Channel::MinecraftChat, recorder(Arc::clone(&log), "second"));
        bus.subscribe(Channel::MinecraftSend, recorder(Arc::clone(&log), "other"));

        bus.publish(&chat(1)).unwrap();
        let log = log.lock().unwrap();
        assert_eq!(
            *log,
            vec![
                String::from("first:minecraft:guild-a:1"),
                String::from("second:minecraft:guild-a:1"),
            ]
        );
    }

    #[test]
    fn failing_handler_aborts_remaining_dispatch() {
        let bus = Bus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(Channel::MinecraftChat, |_| Err(HandlerError::new("boom")));
        bus.subscribe(Channel::MinecraftChat, recorder(Arc::clone(&log), "after"));

        let result = bus.publish(&chat(1));
        assert_eq!(
            result,
            Err(BusError::Handler {
                channel: Channel::MinecraftChat,
                source: HandlerError::new("boom"),
            })
        );
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn unsubscribe_and_scoped_guard() {
        let bus = Arc::new(Bus::new());
        let id = bus.subscribe(Channel::MinecraftChat, |_| Ok(()));
        assert_eq!(bus.subscriber_count(Channel::MinecraftChat), 1);
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));

        {
            let _guard = bus.subscribe_scoped(Channel::MinecraftChat, |_| Ok(()));
            assert_eq!(bus.subscriber_count(Channel::MinecraftChat), 1);
        }
        assert_eq!(bus.subscriber_count(Channel::MinecraftChat), 0);

        let wild = bus.subscribe_all(|_| Ok(()));
        assert_eq!(bus.wildcard_count(), 1);
        assert!(bus.unsubscribe(wild));
        assert_eq!(bus.wildcard_count(), 0);
    }

    #[test]
    fn handler_may_unsubscribe_itself_during_dispatch() {
        let bus = Arc::new(Bus::new());
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicU64::new(0));

        let id = {
            let bus_ref = Arc::downgrade(&bus);
            let slot = Arc::clone(&slot);
            let calls = Arc::clone(&calls);
            bus.subscribe(Channel::MinecraftChat, move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                if let (Some(bus), Some(id)) = (bus_ref.upgrade(), *slot.lock().unwrap()) {
                    bus.unsubscribe(id);
                }
                Ok(())
            })
        };
        *slot.lock().unwrap() = Some(id);

        bus.publish(&chat(1)).unwrap();
        bus.publish(&chat(2)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
