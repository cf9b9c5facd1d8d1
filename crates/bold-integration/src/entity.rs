//! Shared entity plumbing
//!
//! Entities read their device record from the coordinator snapshot and
//! write their computed state to the state store. The lock state is never
//! reported by the server: after a remote activation the device counts as
//! unlocked until a locally predicted end time, tracked by
//! [`ActivationWindow`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use bold_api::{ApiError, DevicePermission};
use bold_core::{Context, EntityId, SharedClock, State};
use bold_state_store::StateStore;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use crate::consts::MAX_ACTIVATION_SECS;
use crate::coordinator::BoldCoordinator;

/// Collaborators every entity of an entry shares
#[derive(Clone)]
pub struct EntityContext {
    pub coordinator: Arc<BoldCoordinator>,
    pub states: Arc<StateStore>,
    pub clock: SharedClock,
}

pub trait BoldEntity: Send + Sync {
    fn entity_id(&self) -> &EntityId;

    fn unique_id(&self) -> &str;

    /// Bold device id backing this entity
    fn device_id(&self) -> u64;

    fn name(&self) -> String;

    fn state(&self) -> String;

    fn attributes(&self) -> HashMap<String, serde_json::Value>;

    fn context(&self) -> &EntityContext;

    fn set_device(&self, device: DevicePermission);

    /// Cancel timers owned by the entity
    fn shutdown(&self) {}

    fn write_state(&self) -> State {
        self.context().states.set(
            self.entity_id().clone(),
            self.state(),
            self.attributes(),
            Context::new(),
        )
    }

    /// Pick up this device's record from a new snapshot and re-write state
    fn handle_coordinator_update(&self, snapshot: &[DevicePermission]) {
        if let Some(device) = snapshot.iter().find(|d| d.id == self.device_id()) {
            self.set_device(device.clone());
        }
        self.write_state();
    }
}

/// Local prediction of how long a remotely activated device stays open
pub struct ActivationWindow {
    clock: SharedClock,
    end: RwLock<DateTime<Utc>>,
    expiry: Mutex<Option<JoinHandle<()>>>,
}

impl ActivationWindow {
    pub fn new(clock: SharedClock) -> Self {
        let now = clock.now();
        Self {
            clock,
            end: RwLock::new(now),
            expiry: Mutex::new(None),
        }
    }

    pub fn end(&self) -> DateTime<Utc> {
        *self.end.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Still inside the window
    pub fn is_open(&self) -> bool {
        self.clock.now() < self.end()
    }

    /// Open the window for `seconds` from now and run `on_expiry` when it
    /// closes, replacing any callback already pending.
    ///
    /// Durations above [`MAX_ACTIVATION_SECS`] are rejected and leave the
    /// window untouched.
    pub fn open<F>(&self, seconds: u64, on_expiry: F) -> Result<DateTime<Utc>, ApiError>
    where
        F: FnOnce() + Send + 'static,
    {
        let end = Some(seconds)
            .filter(|s| *s <= MAX_ACTIVATION_SECS)
            .and_then(|s| i64::try_from(s).ok())
            .and_then(chrono::Duration::try_seconds)
            .and_then(|d| self.clock.now().checked_add_signed(d))
            .ok_or(ApiError::InvalidActivationTime(seconds))?;
        *self.end.write().unwrap_or_else(|e| e.into_inner()) = end;

        let task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            on_expiry();
        });
        self.replace_expiry(Some(task));
        Ok(end)
    }

    /// Close the window now and drop the pending expiry callback
    pub fn close(&self) {
        *self.end.write().unwrap_or_else(|e| e.into_inner()) = self.clock.now();
        self.cancel();
    }

    pub fn cancel(&self) {
        self.replace_expiry(None);
    }

    fn replace_expiry(&self, task: Option<JoinHandle<()>>) {
        let previous = {
            let mut expiry = self.expiry.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *expiry, task)
        };
        if let Some(previous) = previous {
            previous.abort();
        }
    }
}

impl Drop for ActivationWindow {
    fn drop(&mut self) {
        self.cancel();
    }
}
