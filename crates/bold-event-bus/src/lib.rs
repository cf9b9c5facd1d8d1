//! Event bus for the Bold integration host
//!
//! Entities write their state into the state store, which announces every
//! change here as a `state_changed` event. The entry store announces
//! credential merges as `config_entry_updated`. Listeners subscribe per
//! event type or to everything.

use bold_core::{Context, Event, EventData, EventType};
use dashmap::DashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Default channel capacity for event subscriptions
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

type RawEvent = Event<serde_json::Value>;

/// Broadcast pub/sub keyed by event type
pub struct EventBus {
    channels: DashMap<EventType, broadcast::Sender<RawEvent>>,
    all: broadcast::Sender<RawEvent>,
    capacity: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (all, _) = broadcast::channel(capacity);
        Self {
            channels: DashMap::new(),
            all,
            capacity,
        }
    }

    /// Subscribe to one event type
    pub fn subscribe(&self, event_type: impl Into<EventType>) -> broadcast::Receiver<RawEvent> {
        let event_type = event_type.into();
        trace!(event_type = %event_type, "subscribing");

        self.channels
            .entry(event_type)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Subscribe to one event type with the payload parsed into `T`
    pub fn subscribe_typed<T>(&self) -> TypedReceiver<T>
    where
        T: EventData + serde::de::DeserializeOwned,
    {
        TypedReceiver {
            rx: self.subscribe(T::event_type()),
            _marker: PhantomData,
        }
    }

    /// Subscribe to every event
    pub fn subscribe_all(&self) -> broadcast::Receiver<RawEvent> {
        self.all.subscribe()
    }

    /// Deliver an event to its type's subscribers and to catch-all subscribers
    pub fn fire(&self, event: RawEvent) {
        debug!(event_type = %event.event_type, "firing event");

        if let Some(sender) = self.channels.get(&event.event_type) {
            // A send error only means nobody is listening right now
            let _ = sender.send(event.clone());
        }
        let _ = self.all.send(event);
    }

    /// Fire a typed payload
    pub fn fire_typed<T: EventData + serde::Serialize>(&self, data: T, context: Context) {
        let event = Event::typed(data, context)
            .map(|data| serde_json::to_value(&data).unwrap_or_default());
        self.fire(event);
    }

    /// Number of event types somebody subscribed to
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver that yields events whose payload parses as `T`
pub struct TypedReceiver<T> {
    rx: broadcast::Receiver<RawEvent>,
    _marker: PhantomData<T>,
}

impl<T: EventData + serde::de::DeserializeOwned> TypedReceiver<T> {
    /// Wait for the next event with a parseable payload.
    ///
    /// Events whose payload does not parse as `T` are skipped.
    pub async fn recv(&mut self) -> Result<Event<T>, broadcast::error::RecvError> {
        loop {
            let event = self.rx.recv().await?;
            if let Ok(data) = serde_json::from_value::<T>(event.data.clone()) {
                return Ok(event.map(|_| data));
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv)
    pub fn try_recv(&mut self) -> Result<Event<T>, broadcast::error::TryRecvError> {
        loop {
            let event = self.rx.try_recv()?;
            if let Ok(data) = serde_json::from_value::<T>(event.data.clone()) {
                return Ok(event.map(|_| data));
            }
        }
    }
}

pub type SharedEventBus = Arc<EventBus>;
