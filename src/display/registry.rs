/*!
 * Signal Registry
 *
 * Device-keyed set of signal managers. Managers are created lazily on the
 * first subscription for a device and removed once empty and inactive.
 *
 * Tick dispatch follows a snapshot / invoke / reconcile protocol: due
 * callbacks are collected under the registry lock, invoked with the lock
 * released, then scheduled flags and deferred removals are settled under
 * the lock again.
 *
 * # Performance
 *
 * Critical sections are short and never run user code. One registry lock
 * covers every device; dispatch for different devices still runs
 * concurrently on their own queues.
 */

use super::manager::{ManagerShared, ManagerState, SubscriptionMap, TickOutcome};
use super::subscription::{Callback, SubscriptionHandle, SubscriptionState};
use super::traits::{TickHandlerRef, TimerSourceFactory};
use super::types::{DeviceId, ManagerStats, SignalConfig, SubscriptionId};
use crate::core::errors::{SignalError, SignalResult};
use crate::core::executor::SerialQueue;
use crate::core::time::{Deadline, Timestamp};
use crate::monitoring::span_operation;
use ahash::RandomState;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

struct RegistryState {
    managers: HashMap<DeviceId, ManagerState, RandomState>,
    subscriptions: SubscriptionMap,
    closed: bool,
}

pub(crate) struct RegistryInner {
    state: Mutex<RegistryState>,
    factory: Arc<dyn TimerSourceFactory>,
    config: SignalConfig,
    next_subscription: AtomicU64,
    next_epoch: AtomicU64,
}

/// Multiplexes per-device periodic sources to any number of listeners
///
/// Cloning shares the same registry. Independent registries never share
/// managers or sources.
#[derive(Clone)]
pub struct SignalRegistry {
    inner: Arc<RegistryInner>,
}

impl SignalRegistry {
    pub fn new(factory: Arc<dyn TimerSourceFactory>, config: SignalConfig) -> Self {
        info!(
            restart_budget = config.budget(),
            "Signal registry created"
        );
        Self {
            inner: Arc::new(RegistryInner {
                state: Mutex::new(RegistryState {
                    managers: HashMap::with_hasher(RandomState::new()),
                    subscriptions: HashMap::with_hasher(RandomState::new()),
                    closed: false,
                }),
                factory,
                config,
                next_subscription: AtomicU64::new(1),
                next_epoch: AtomicU64::new(1),
            }),
        }
    }

    /// Register `callback` for ticks on `device`
    ///
    /// The subscription starts idle; arm it with
    /// [`SubscriptionHandle::set_next_deadline`]. Returns `None` when the
    /// device's periodic source could not be created.
    pub fn subscribe<F>(&self, device: DeviceId, callback: F) -> Option<SubscriptionHandle>
    where
        F: Fn(&SubscriptionHandle, Timestamp) + Send + Sync + 'static,
    {
        match self.try_subscribe(device, callback) {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(device = %device, error = %e, "Subscription unavailable");
                None
            }
        }
    }

    /// Like [`subscribe`](Self::subscribe) but reports why it failed
    #[instrument(level = "debug", skip_all, fields(device = %device))]
    pub fn try_subscribe<F>(&self, device: DeviceId, callback: F) -> SignalResult<SubscriptionHandle>
    where
        F: Fn(&SubscriptionHandle, Timestamp) + Send + Sync + 'static,
    {
        let callback: Callback = Arc::new(callback);
        let id = self.inner.subscribe(device, callback)?;
        Ok(SubscriptionHandle::new(id, device, self.inner.clone()))
    }

    pub fn manager_count(&self) -> usize {
        self.inner.state.lock().managers.len()
    }

    pub fn has_manager(&self, device: DeviceId) -> bool {
        self.inner.state.lock().managers.contains_key(&device)
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.state.lock().subscriptions.len()
    }

    pub fn stats(&self, device: DeviceId) -> Option<ManagerStats> {
        self.inner
            .state
            .lock()
            .managers
            .get(&device)
            .map(ManagerState::stats)
    }

    pub fn config(&self) -> &SignalConfig {
        &self.inner.config
    }

    /// Wait until every job queued on `device`'s dispatch queue has run
    ///
    /// Returns `true` immediately when the device has no manager.
    pub fn flush(&self, device: DeviceId, timeout: Duration) -> bool {
        let shared = {
            let state = self.inner.state.lock();
            match state.managers.get(&device) {
                Some(manager) => manager.shared.clone(),
                None => return true,
            }
        };

        match shared.submit_barrier() {
            Ok(done) => done.recv_timeout(timeout).is_ok(),
            Err(_) => true,
        }
    }

    /// Remove every manager and release its source
    ///
    /// Outstanding handles become inactive. Later subscriptions fail with
    /// [`SignalError::RegistryClosed`].
    pub fn shutdown(&self) {
        let released = self.inner.close();
        info!(managers = released, "Signal registry shut down");
    }
}

impl fmt::Debug for SignalRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("SignalRegistry")
            .field("managers", &state.managers.len())
            .field("subscriptions", &state.subscriptions.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl RegistryInner {
    fn subscribe(self: &Arc<Self>, device: DeviceId, callback: Callback) -> SignalResult<SubscriptionId> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.closed {
            return Err(SignalError::RegistryClosed);
        }

        if !state.managers.contains_key(&device) {
            let manager = self.create_manager(device)?;
            state.managers.insert(device, manager);
        }
        let Some(manager) = state.managers.get_mut(&device) else {
            return Err(SignalError::RegistryClosed);
        };

        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        state
            .subscriptions
            .insert(id, SubscriptionState::new(device, manager.epoch(), callback));
        manager.attach(id);

        debug!(
            device = %device,
            subscription = %id,
            total = manager.total,
            "Subscription registered"
        );
        Ok(id)
    }

    /// Build a manager and start its source; runs under the registry lock
    fn create_manager(self: &Arc<Self>, device: DeviceId) -> SignalResult<ManagerState> {
        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
        let queue = SerialQueue::spawn(format!("{}.{}", self.config.queue_name_prefix, device.0))?;
        let shared = Arc::new(ManagerShared::new(
            device,
            epoch,
            queue,
            Arc::downgrade(self),
        ));

        let weak: Weak<ManagerShared> = Arc::downgrade(&shared);
        let handler: TickHandlerRef = Arc::new(move |timestamp: Timestamp| {
            ManagerShared::on_tick(&weak, timestamp)
        });

        let source = self.factory.create(device, handler)?;
        if let Err((source, e)) = shared.install_source(source) {
            source.release();
            return Err(e);
        }

        info!(device = %device, epoch, "Signal manager created");
        Ok(ManagerState::new(shared, self.config.budget()))
    }

    /// One tick for `manager`; runs on its serial queue
    pub(super) fn dispatch(self: &Arc<Self>, manager: &Arc<ManagerShared>) {
        let span = span_operation("display.dispatch");
        let _entered = span.enter();
        let timestamp = manager.in_flight_timestamp();
        let budget = self.config.budget();

        let due = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            match state.managers.get_mut(&manager.device) {
                Some(current) if current.epoch() == manager.epoch => {
                    current.snapshot(&mut state.subscriptions, budget)
                }
                _ => {
                    manager.clear_in_flight();
                    return;
                }
            }
        };

        manager.ticks_dispatched.fetch_add(1, Ordering::Relaxed);
        span.record_items(due.len());

        for entry in &due {
            let handle = SubscriptionHandle::new(entry.id, manager.device, self.clone());
            let callback = &entry.callback;
            if catch_unwind(AssertUnwindSafe(|| callback(&handle, timestamp))).is_err() {
                warn!(
                    device = %manager.device,
                    subscription = %entry.id,
                    "Signal callback panicked"
                );
            }
            manager.callbacks_invoked.fetch_add(1, Ordering::Relaxed);
        }

        let dispatched: Vec<SubscriptionId> = due.iter().map(|entry| entry.id).collect();
        drop(due);

        let outcome = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            match state.managers.get_mut(&manager.device) {
                Some(current) if current.epoch() == manager.epoch => {
                    let outcome = current.reconcile(&dispatched, &mut state.subscriptions);
                    if outcome.release {
                        state.managers.remove(&manager.device);
                    }
                    outcome
                }
                _ => {
                    // Manager already gone; settle our own subscriptions only
                    for id in &dispatched {
                        let destroyed = match state.subscriptions.get_mut(id) {
                            Some(sub) if sub.epoch == manager.epoch => {
                                sub.scheduled = false;
                                sub.destroyed
                            }
                            _ => false,
                        };
                        if destroyed {
                            state.subscriptions.remove(id);
                        }
                    }
                    TickOutcome::default()
                }
            }
        };

        if outcome.pause {
            manager.apply_paused(true);
        }
        manager.clear_in_flight();
        if outcome.release {
            manager.apply_release();
            info!(device = %manager.device, epoch = manager.epoch, "Signal manager removed after last tick");
        }
    }

    pub(super) fn unsubscribe(&self, id: SubscriptionId) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let Some(sub) = state.subscriptions.get_mut(&id) else {
            return;
        };
        if sub.destroyed {
            return;
        }
        sub.destroyed = true;
        if sub.scheduled {
            debug!(subscription = %id, "Unsubscribe deferred until dispatch completes");
            return;
        }

        let (device, epoch) = (sub.device, sub.epoch);
        let reclaim = match state.managers.get_mut(&device) {
            Some(manager) if manager.epoch() == epoch => {
                manager.detach(id, &mut state.subscriptions);
                manager.is_reclaimable()
            }
            _ => {
                state.subscriptions.remove(&id);
                false
            }
        };
        debug!(device = %device, subscription = %id, "Subscription removed");

        if reclaim {
            if let Some(manager) = state.managers.remove(&device) {
                manager.shared.schedule_release();
                info!(device = %device, epoch, "Signal manager removed");
            }
        }
    }

    pub(super) fn set_next_deadline(&self, id: SubscriptionId, deadline: Deadline) {
        let budget = self.config.budget();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let Some(sub) = state.subscriptions.get_mut(&id) else {
            return;
        };
        if sub.destroyed || sub.next_deadline == deadline {
            return;
        }

        match state.managers.get_mut(&sub.device) {
            Some(manager) if manager.epoch() == sub.epoch => {
                if manager.rearm(sub, deadline, budget) {
                    debug!(device = %manager.device(), "Resuming periodic source");
                    manager.shared.schedule_resume();
                }
            }
            _ => sub.next_deadline = deadline,
        }
    }

    pub(super) fn next_deadline(&self, id: SubscriptionId) -> Deadline {
        self.state
            .lock()
            .subscriptions
            .get(&id)
            .filter(|sub| !sub.destroyed)
            .map(|sub| sub.next_deadline)
            .unwrap_or_default()
    }

    pub(super) fn is_active(&self, id: SubscriptionId) -> bool {
        self.state
            .lock()
            .subscriptions
            .get(&id)
            .is_some_and(|sub| !sub.destroyed)
    }

    /// Drop every manager and subscription; returns managers released
    fn close(&self) -> usize {
        let managers: Vec<ManagerState> = {
            let mut state = self.state.lock();
            state.closed = true;
            state.subscriptions.clear();
            state.managers.drain().map(|(_, manager)| manager).collect()
        };

        for manager in &managers {
            manager.shared.schedule_release();
        }
        managers.len()
    }
}

impl Drop for RegistryInner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for (_, manager) in state.managers.drain() {
            manager.shared.schedule_release();
        }
    }
}
