//! Core types for the Bold integration host
//!
//! This crate provides the value types shared by every other crate in the
//! workspace: EntityId, State, Event, Context, the Clock abstraction used by
//! timers and lock-expiry checks, and the platform/state constants.

mod clock;
mod context;
mod entity_id;
mod event;
mod slug;
mod state;

pub use clock::{Clock, MockClock, SharedClock, SystemClock};
pub use context::Context;
pub use entity_id::{EntityId, EntityIdError};
pub use event::{Event, EventData, EventType};
pub use slug::slugify;
pub use state::State;

/// Entity platforms the integration can provide
pub mod platforms {
    pub const LOCK: &str = "lock";
    pub const BUTTON: &str = "button";
}

/// State values written by entities
pub mod states {
    pub const LOCKED: &str = "locked";
    pub const UNLOCKED: &str = "unlocked";
    pub const UNAVAILABLE: &str = "unavailable";
    pub const UNKNOWN: &str = "unknown";
}

/// Standard event types fired on the bus
pub mod events {
    use super::*;

    /// Event type for state changes
    pub const STATE_CHANGED: &str = "state_changed";

    /// Event type for config entry data updates (credential refresh etc.)
    pub const CONFIG_ENTRY_UPDATED: &str = "config_entry_updated";

    /// Data for STATE_CHANGED events
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    pub struct StateChangedData {
        pub entity_id: EntityId,
        pub old_state: Option<State>,
        pub new_state: Option<State>,
    }

    impl EventData for StateChangedData {
        fn event_type() -> &'static str {
            STATE_CHANGED
        }
    }
}
