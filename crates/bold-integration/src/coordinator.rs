//! Polling coordinator
//!
//! One coordinator per entry owns the device-permissions snapshot. Polling
//! and remote activation share a single API lock so a poll never overlaps
//! an unlock. Failed polls keep the previous snapshot and flip
//! `last_update_success`; nothing propagates as a panic.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use bold_api::{ActivationResponse, ApiError, ApiResult, BoldApi, DevicePermission};
use bold_config_entries::SetupError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument};

use crate::consts::REQUEST_TIMEOUT;
use crate::error::UpdateFailed;

/// Latest device-permissions listing
pub type Snapshot = Arc<Vec<DevicePermission>>;

pub struct BoldCoordinator {
    name: String,
    api: Arc<dyn BoldApi>,
    api_lock: tokio::sync::Mutex<()>,
    update_interval: Duration,
    request_timeout: Duration,
    data: watch::Sender<Snapshot>,
    last_update_success: AtomicBool,
    last_error: RwLock<Option<UpdateFailed>>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl BoldCoordinator {
    pub fn new(name: impl Into<String>, api: Arc<dyn BoldApi>, update_interval: Duration) -> Self {
        let (data, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            name: name.into(),
            api,
            api_lock: tokio::sync::Mutex::new(()),
            update_interval,
            request_timeout: REQUEST_TIMEOUT,
            data,
            last_update_success: AtomicBool::new(true),
            last_error: RwLock::new(None),
            poll_task: Mutex::new(None),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn api(&self) -> &Arc<dyn BoldApi> {
        &self.api
    }

    pub fn update_interval(&self) -> Duration {
        self.update_interval
    }

    /// Current snapshot (empty until the first successful refresh)
    pub fn data(&self) -> Snapshot {
        self.data.borrow().clone()
    }

    /// Device record by id from the current snapshot
    pub fn device(&self, device_id: u64) -> Option<DevicePermission> {
        self.data.borrow().iter().find(|d| d.id == device_id).cloned()
    }

    /// Receiver notified on every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.data.subscribe()
    }

    pub fn last_update_success(&self) -> bool {
        self.last_update_success.load(Ordering::SeqCst)
    }

    pub fn last_error(&self) -> Option<UpdateFailed> {
        self.last_error
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Run `call` under the API lock with the request timeout
    async fn locked<T, F>(&self, call: F) -> ApiResult<T>
    where
        F: Future<Output = ApiResult<T>>,
    {
        let _guard = self.api_lock.lock().await;
        tokio::time::timeout(self.request_timeout, call)
            .await
            .map_err(|_| ApiError::Timeout)?
    }

    /// Fetch the device permissions and publish them
    #[instrument(skip(self), fields(coordinator = %self.name))]
    pub async fn refresh(&self) -> Result<Snapshot, UpdateFailed> {
        match self.locked(self.api.get_device_permissions()).await {
            Ok(devices) => {
                let snapshot: Snapshot = Arc::new(devices);
                if !self.last_update_success.swap(true, Ordering::SeqCst) {
                    info!("Fetching {} data recovered", self.name);
                }
                *self.last_error.write().unwrap_or_else(|e| e.into_inner()) = None;
                debug!(devices = snapshot.len(), "fetched device permissions");
                self.data.send_replace(snapshot.clone());
                Ok(snapshot)
            }
            Err(e) => {
                let failed = UpdateFailed::from_api(&e);
                if self.last_update_success.swap(false, Ordering::SeqCst) {
                    error!(error = %failed, "Error fetching {} data", self.name);
                } else {
                    debug!(error = %failed, "refresh still failing");
                }
                *self.last_error.write().unwrap_or_else(|e| e.into_inner()) =
                    Some(failed.clone());
                // Same snapshot, but listeners re-write availability
                self.data.send_modify(|_| {});
                Err(failed)
            }
        }
    }

    /// Initial refresh during entry setup; any failure means "not ready yet"
    pub async fn first_refresh(&self) -> Result<(), SetupError> {
        self.refresh().await.map(|_| ()).map_err(SetupError::from)
    }

    /// Start polling; the first tick comes one interval from now
    pub fn start(self: &Arc<Self>) {
        let coordinator: Weak<Self> = Arc::downgrade(self);
        let period = self.update_interval;

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(coordinator) = coordinator.upgrade() else {
                    return;
                };
                // Failures are recorded on the coordinator
                let _ = coordinator.refresh().await;
            }
        });

        let previous = self
            .poll_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
        debug!(coordinator = %self.name, interval = ?period, "polling started");
    }

    pub fn is_polling(&self) -> bool {
        self.poll_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    pub fn shutdown(&self) {
        let task = self.poll_task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            task.abort();
            debug!(coordinator = %self.name, "polling stopped");
        }
    }

    #[instrument(skip(self), fields(coordinator = %self.name))]
    pub async fn remote_activation(&self, device_id: u64) -> ApiResult<ActivationResponse> {
        self.locked(self.api.remote_activation(device_id)).await
    }

    #[instrument(skip(self), fields(coordinator = %self.name))]
    pub async fn remote_deactivation(&self, device_id: u64) -> ApiResult<bool> {
        self.locked(self.api.remote_deactivation(device_id)).await
    }
}

impl Drop for BoldCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
