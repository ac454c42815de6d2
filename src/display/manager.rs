/*!
 * Signal Manager
 *
 * Per-device owner of a periodic source: subscriber bookkeeping, the
 * single-flight tick guard, and demand-based pause/resume.
 *
 * A manager is split in two:
 * - `ManagerShared`: what the driver thread and the serial queue touch
 *   (in-flight guard, source handle, counters)
 * - `ManagerState`: subscriber list and counts, only mutated under the
 *   registry lock
 */

use super::registry::RegistryInner;
use super::subscription::{Callback, SubscriptionState};
use super::traits::TimerSource;
use super::types::{DeviceId, ManagerStats, SubscriptionId};
use crate::core::errors::ExecutorError;
use crate::core::executor::SerialQueue;
use crate::core::time::{Deadline, Timestamp};
use ahash::RandomState;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, trace, warn};

pub(super) type SubscriptionMap = HashMap<SubscriptionId, SubscriptionState, RandomState>;

/// One snapshotted callback for the current tick
pub(super) struct DueCallback {
    pub id: SubscriptionId,
    pub callback: Callback,
}

/// Source-side work to do after a tick has been reconciled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(super) struct TickOutcome {
    pub pause: bool,
    pub release: bool,
}

pub(super) struct ManagerShared {
    pub device: DeviceId,
    /// Distinguishes successive managers for the same device
    pub epoch: u64,
    /// Timestamp of the tick being dispatched; 0 when idle
    in_flight: AtomicU64,
    queue: SerialQueue,
    source: Mutex<Option<Box<dyn TimerSource>>>,
    source_paused: AtomicBool,
    registry: Weak<RegistryInner>,
    pub ticks_dispatched: AtomicU64,
    pub ticks_coalesced: AtomicU64,
    pub callbacks_invoked: AtomicU64,
}

impl ManagerShared {
    pub fn new(
        device: DeviceId,
        epoch: u64,
        queue: SerialQueue,
        registry: Weak<RegistryInner>,
    ) -> Self {
        Self {
            device,
            epoch,
            in_flight: AtomicU64::new(0),
            queue,
            source: Mutex::new(None),
            source_paused: AtomicBool::new(false),
            registry,
            ticks_dispatched: AtomicU64::new(0),
            ticks_coalesced: AtomicU64::new(0),
            callbacks_invoked: AtomicU64::new(0),
        }
    }

    /// Install and start the source; only called during manager creation
    pub fn install_source(
        &self,
        mut source: Box<dyn TimerSource>,
    ) -> Result<(), (Box<dyn TimerSource>, crate::core::errors::SignalError)> {
        if let Err(e) = source.start() {
            return Err((source, e));
        }
        *self.source.lock() = Some(source);
        Ok(())
    }

    /// Driver-thread tick entry: test-and-set the in-flight slot, hand off
    pub fn on_tick(manager: &Weak<ManagerShared>, timestamp: Timestamp) {
        let Some(manager) = manager.upgrade() else {
            return;
        };

        let stamp = timestamp.as_nanos().max(1);
        if manager
            .in_flight
            .compare_exchange(0, stamp, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            manager.ticks_coalesced.fetch_add(1, Ordering::Relaxed);
            trace!(device = %manager.device, "Tick coalesced; dispatch already in flight");
            return;
        }

        let Some(registry) = manager.registry.upgrade() else {
            manager.in_flight.store(0, Ordering::Release);
            return;
        };

        let job_manager = manager.clone();
        if let Err(e) = manager
            .queue
            .submit(move || registry.dispatch(&job_manager))
        {
            warn!(device = %manager.device, error = %e, "Dropping tick: dispatch queue closed");
            manager.in_flight.store(0, Ordering::Release);
        }
    }

    pub fn in_flight_timestamp(&self) -> Timestamp {
        Timestamp(self.in_flight.load(Ordering::Acquire))
    }

    pub fn clear_in_flight(&self) {
        self.in_flight.store(0, Ordering::Release);
    }

    pub fn is_source_paused(&self) -> bool {
        self.source_paused.load(Ordering::Acquire)
    }

    /// Pause or resume the source; must run on the manager queue
    pub fn apply_paused(&self, paused: bool) {
        let mut source = self.source.lock();
        let Some(source) = source.as_mut() else {
            return;
        };
        match source.set_paused(paused) {
            Ok(()) => {
                self.source_paused.store(paused, Ordering::Release);
                debug!(device = %self.device, paused, "Periodic source state changed");
            }
            Err(e) => warn!(device = %self.device, error = %e, "Periodic source control failed"),
        }
    }

    /// Release the source; later calls are no-ops. Must run on the manager queue
    pub fn apply_release(&self) {
        let released = self.source.lock().take();
        if let Some(source) = released {
            source.release();
            info!(device = %self.device, epoch = self.epoch, "Released periodic source");
        }
    }

    pub fn schedule_resume(self: &Arc<Self>) {
        let manager = self.clone();
        self.run_on_queue(move || manager.apply_paused(false));
    }

    pub fn schedule_release(self: &Arc<Self>) {
        let manager = self.clone();
        self.run_on_queue(move || manager.apply_release());
    }

    /// Barrier: completes once every job queued before it has run
    pub fn submit_barrier(&self) -> Result<flume::Receiver<()>, ExecutorError> {
        let (tx, rx) = flume::bounded(1);
        self.queue.submit(move || {
            let _ = tx.send(());
        })?;
        Ok(rx)
    }

    fn run_on_queue<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Err(e) = self.queue.submit(job) {
            warn!(device = %self.device, error = %e, "Manager queue closed; source control dropped");
        }
    }
}

pub(super) struct ManagerState {
    pub shared: Arc<ManagerShared>,
    /// Registration order
    pub subscriptions: Vec<SubscriptionId>,
    pub total: u32,
    pub paused: u32,
    pub activity_countdown: u32,
}

impl ManagerState {
    pub fn new(shared: Arc<ManagerShared>, budget: u32) -> Self {
        Self {
            shared,
            subscriptions: Vec::new(),
            total: 0,
            paused: 0,
            activity_countdown: budget,
        }
    }

    pub fn device(&self) -> DeviceId {
        self.shared.device
    }

    pub fn epoch(&self) -> u64 {
        self.shared.epoch
    }

    /// New subscriptions start idle and counted as paused
    pub fn attach(&mut self, id: SubscriptionId) {
        self.subscriptions.push(id);
        self.total += 1;
        self.paused += 1;
    }

    /// Unlink `id` and fix up counts; returns the freed record
    pub fn detach(
        &mut self,
        id: SubscriptionId,
        subscriptions: &mut SubscriptionMap,
    ) -> Option<SubscriptionState> {
        let removed = subscriptions.remove(&id)?;
        self.subscriptions.retain(|s| *s != id);
        self.total = self.total.saturating_sub(1);
        if removed.is_paused() {
            self.paused = self.paused.saturating_sub(1);
        }
        Some(removed)
    }

    /// Collect due callbacks and age idle subscriptions
    ///
    /// Armed subscriptions are marked scheduled and disarmed (they must
    /// re-arm for another tick). Idle ones count down and become paused at
    /// zero, which also refreshes the manager's activity window.
    pub fn snapshot(&mut self, subscriptions: &mut SubscriptionMap, budget: u32) -> Vec<DueCallback> {
        let mut due = Vec::new();

        for id in &self.subscriptions {
            let Some(sub) = subscriptions.get_mut(id) else {
                continue;
            };
            if sub.destroyed {
                continue;
            }

            match sub.next_deadline {
                Deadline::Never => {
                    if sub.idle_countdown != 0 {
                        sub.idle_countdown -= 1;
                        if sub.idle_countdown == 0 {
                            self.paused += 1;
                            self.activity_countdown = budget;
                        }
                    }
                }
                Deadline::At(_) => {
                    sub.next_deadline = Deadline::Never;
                    sub.scheduled = true;
                    due.push(DueCallback {
                        id: *id,
                        callback: sub.callback.clone(),
                    });
                }
            }
        }

        due
    }

    /// Clear scheduled flags, free deferred removals, decide pause/release
    pub fn reconcile(
        &mut self,
        dispatched: &[SubscriptionId],
        subscriptions: &mut SubscriptionMap,
    ) -> TickOutcome {
        for id in dispatched {
            let destroyed = match subscriptions.get_mut(id) {
                Some(sub) => {
                    sub.scheduled = false;
                    sub.destroyed
                }
                None => false,
            };
            if destroyed {
                self.detach(*id, subscriptions);
                debug!(device = %self.device(), subscription = %id, "Freed deferred subscription");
            }
        }

        let mut outcome = TickOutcome::default();
        if self.paused == self.total && self.activity_countdown != 0 {
            self.activity_countdown -= 1;
            if self.activity_countdown == 0 && self.paused != 0 {
                outcome.pause = true;
            }
        }
        if self.total == 0 && self.paused == 0 {
            outcome.release = true;
        }
        outcome
    }

    /// Arm/disarm `sub`; returns true if the source must be resumed
    pub fn rearm(&mut self, sub: &mut SubscriptionState, deadline: Deadline, budget: u32) -> bool {
        let mut resume = false;
        if deadline.is_finite() && sub.is_paused() {
            self.paused = self.paused.saturating_sub(1);
            resume = self.activity_countdown == 0;
            self.activity_countdown = budget;
            sub.idle_countdown = budget;
        }
        sub.next_deadline = deadline;
        resume
    }

    /// Empty with no activity left: safe to remove without a pending tick
    pub fn is_reclaimable(&self) -> bool {
        self.total == 0 && self.activity_countdown == 0
    }

    pub fn stats(&self) -> ManagerStats {
        let shared = &self.shared;
        ManagerStats {
            device: shared.device,
            total: self.total,
            paused: self.paused,
            activity_countdown: self.activity_countdown,
            tick_in_flight: !shared.in_flight_timestamp().is_zero(),
            source_paused: shared.is_source_paused(),
            ticks_dispatched: shared.ticks_dispatched.load(Ordering::Relaxed),
            ticks_coalesced: shared.ticks_coalesced.load(Ordering::Relaxed),
            callbacks_invoked: shared.callbacks_invoked.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::Timestamp;

    fn manager(budget: u32) -> ManagerState {
        let queue = SerialQueue::spawn("test-manager").unwrap();
        let shared = Arc::new(ManagerShared::new(DeviceId(0), 1, queue, Weak::new()));
        ManagerState::new(shared, budget)
    }

    fn add(m: &mut ManagerState, subs: &mut SubscriptionMap, raw: u64) -> SubscriptionId {
        let id = SubscriptionId(raw);
        let callback: Callback = Arc::new(|_, _| {});
        subs.insert(id, SubscriptionState::new(m.device(), m.epoch(), callback));
        m.attach(id);
        id
    }

    #[test]
    fn test_snapshot_takes_only_armed() {
        let mut m = manager(3);
        let mut subs = SubscriptionMap::default();
        let a = add(&mut m, &mut subs, 1);
        let b = add(&mut m, &mut subs, 2);

        let sub = subs.get_mut(&a).unwrap();
        m.rearm(sub, Deadline::At(Timestamp(10)), 3);

        let due = m.snapshot(&mut subs, 3);
        assert_eq!(due.iter().map(|d| d.id).collect::<Vec<_>>(), vec![a]);
        assert!(subs[&a].scheduled);
        assert_eq!(subs[&a].next_deadline, Deadline::Never);
        assert!(!subs[&b].scheduled);
    }

    #[test]
    fn test_idle_subscription_pauses_after_budget() {
        let budget = 3;
        let mut m = manager(budget);
        let mut subs = SubscriptionMap::default();
        let a = add(&mut m, &mut subs, 1);
        assert_eq!((m.total, m.paused), (1, 1));

        let sub = subs.get_mut(&a).unwrap();
        assert!(!m.rearm(sub, Deadline::At(Timestamp(1)), budget));
        assert_eq!(m.paused, 0);

        // Fires once, then idles for `budget` ticks
        let due = m.snapshot(&mut subs, budget);
        m.reconcile(&[due[0].id], &mut subs);
        for _ in 0..budget {
            let due = m.snapshot(&mut subs, budget);
            assert!(due.is_empty());
        }
        assert_eq!(m.paused, 1);
    }

    #[test]
    fn test_reconcile_frees_deferred_and_reports_release() {
        let mut m = manager(2);
        let mut subs = SubscriptionMap::default();
        let a = add(&mut m, &mut subs, 1);
        let sub = subs.get_mut(&a).unwrap();
        m.rearm(sub, Deadline::At(Timestamp(1)), 2);

        let due = m.snapshot(&mut subs, 2);
        subs.get_mut(&a).unwrap().destroyed = true;

        let outcome = m.reconcile(&[due[0].id], &mut subs);
        assert!(subs.is_empty());
        assert_eq!((m.total, m.paused), (0, 0));
        assert!(outcome.release);
    }

    #[test]
    fn test_pause_when_all_idle_and_countdown_expires() {
        let mut m = manager(2);
        let mut subs = SubscriptionMap::default();
        add(&mut m, &mut subs, 1);

        assert_eq!(m.reconcile(&[], &mut subs), TickOutcome::default());
        let outcome = m.reconcile(&[], &mut subs);
        assert!(outcome.pause);
        assert!(!outcome.release);
        assert_eq!(m.activity_countdown, 0);
    }

    #[test]
    fn test_rearm_from_paused_requests_resume_when_idle() {
        let mut m = manager(1);
        let mut subs = SubscriptionMap::default();
        let a = add(&mut m, &mut subs, 1);
        m.activity_countdown = 0;

        let sub = subs.get_mut(&a).unwrap();
        assert!(m.rearm(sub, Deadline::At(Timestamp(5)), 1));
        assert_eq!(m.activity_countdown, 1);
        assert_eq!(m.paused, 0);
    }
}
