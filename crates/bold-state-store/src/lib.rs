//! Entity state storage for the Bold integration host
//!
//! Lock, gateway and button entities write their computed state here.
//! Every write and removal is announced on the event bus as
//! `state_changed`, carrying the old and new state.

use bold_core::events::StateChangedData;
use bold_core::{Context, EntityId, SharedClock, State};
use bold_event_bus::EventBus;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Current state of every entity, indexed by platform
pub struct StateStore {
    states: DashMap<String, State>,
    by_platform: DashMap<String, Vec<String>>,
    event_bus: Arc<EventBus>,
    clock: SharedClock,
}

impl StateStore {
    pub fn new(event_bus: Arc<EventBus>, clock: SharedClock) -> Self {
        Self {
            states: DashMap::new(),
            by_platform: DashMap::new(),
            event_bus,
            clock,
        }
    }

    /// Write the state of an entity and fire `state_changed`
    #[instrument(skip(self, state, attributes, context), fields(entity_id = %entity_id))]
    pub fn set(
        &self,
        entity_id: EntityId,
        state: impl Into<String>,
        attributes: HashMap<String, serde_json::Value>,
        context: Context,
    ) -> State {
        let key = entity_id.to_string();
        let now = self.clock.now();
        let old_state = self.get(&key);

        let new_state = match &old_state {
            Some(existing) => existing.with_update(state, attributes, context.clone(), now),
            None => State::new(entity_id.clone(), state, attributes, context.clone(), now),
        };

        debug!(
            state = %new_state.state,
            changed = old_state.as_ref().map_or(true, |s| s.state != new_state.state),
            "writing entity state"
        );

        self.states.insert(key.clone(), new_state.clone());
        if old_state.is_none() {
            self.by_platform
                .entry(entity_id.domain().to_string())
                .or_default()
                .push(key);
        }

        self.event_bus.fire_typed(
            StateChangedData {
                entity_id,
                old_state,
                new_state: Some(new_state.clone()),
            },
            context,
        );

        new_state
    }

    pub fn get(&self, entity_id: &str) -> Option<State> {
        self.states.get(entity_id).map(|s| s.clone())
    }

    /// The state value, or None if the entity has no state
    pub fn get_state(&self, entity_id: &str) -> Option<String> {
        self.states.get(entity_id).map(|s| s.state.clone())
    }

    pub fn is_state(&self, entity_id: &str, state: &str) -> bool {
        self.get_state(entity_id).as_deref() == Some(state)
    }

    /// Entity IDs written for a platform (e.g. "lock")
    pub fn entity_ids(&self, platform: &str) -> Vec<String> {
        self.by_platform
            .get(platform)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    /// Remove an entity's state, firing `state_changed` with no new state
    #[instrument(skip(self, context), fields(entity_id = %entity_id))]
    pub fn remove(&self, entity_id: &EntityId, context: Context) -> Option<State> {
        let key = entity_id.to_string();
        let (_, old_state) = self.states.remove(&key)?;

        if let Some(mut ids) = self.by_platform.get_mut(entity_id.domain()) {
            ids.retain(|id| id != &key);
        }

        self.event_bus.fire_typed(
            StateChangedData {
                entity_id: entity_id.clone(),
                old_state: Some(old_state.clone()),
                new_state: None,
            },
            context,
        );

        Some(old_state)
    }

    pub fn entity_count(&self) -> usize {
        self.states.len()
    }
}

pub type SharedStateStore = Arc<StateStore>;
