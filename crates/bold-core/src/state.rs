//! State type representing an entity's current state

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{states, Context, EntityId};

/// The state of an entity at a point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    pub entity_id: EntityId,

    /// The state value (e.g., "locked", "unlocked", "unavailable")
    pub state: String,

    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,

    /// When the state value last changed
    pub last_changed: DateTime<Utc>,

    /// When the state or attributes were last written
    pub last_updated: DateTime<Utc>,

    pub context: Context,
}

impl State {
    pub fn new(
        entity_id: EntityId,
        state: impl Into<String>,
        attributes: HashMap<String, serde_json::Value>,
        context: Context,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            entity_id,
            state: state.into(),
            attributes,
            last_changed: now,
            last_updated: now,
            context,
        }
    }

    /// Create the successor of this state, keeping `last_changed` when the
    /// value itself did not change.
    pub fn with_update(
        &self,
        new_state: impl Into<String>,
        new_attributes: HashMap<String, serde_json::Value>,
        context: Context,
        now: DateTime<Utc>,
    ) -> Self {
        let new_state = new_state.into();
        let last_changed = if self.state == new_state {
            self.last_changed
        } else {
            now
        };

        Self {
            entity_id: self.entity_id.clone(),
            state: new_state,
            attributes: new_attributes,
            last_changed,
            last_updated: now,
            context,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        self.state == states::UNAVAILABLE
    }

    /// Get an attribute value by key
    pub fn attribute<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.attributes
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        // Timestamps and context are not compared
        self.entity_id == other.entity_id
            && self.state == other.state
            && self.attributes == other.attributes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn lock_id() -> EntityId {
        EntityId::new("lock", "front_door").unwrap()
    }

    #[test]
    fn test_with_update_keeps_last_changed_for_same_value() {
        let t0 = Utc::now();
        let state = State::new(lock_id(), "locked", HashMap::new(), Context::new(), t0);

        let t1 = t0 + Duration::seconds(30);
        let mut attrs = HashMap::new();
        attrs.insert("battery_level".to_string(), serde_json::json!(80));
        let next = state.with_update("locked", attrs, Context::new(), t1);

        assert_eq!(next.last_changed, t0);
        assert_eq!(next.last_updated, t1);
        assert_eq!(next.attribute::<u8>("battery_level"), Some(80));
    }

    #[test]
    fn test_with_update_moves_last_changed_on_new_value() {
        let t0 = Utc::now();
        let state = State::new(lock_id(), "locked", HashMap::new(), Context::new(), t0);

        let t1 = t0 + Duration::seconds(5);
        let next = state.with_update("unlocked", HashMap::new(), Context::new(), t1);

        assert_eq!(next.last_changed, t1);
        assert!(!next.is_unavailable());
    }
}
