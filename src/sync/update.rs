/*!
 * Update Cycle
 *
 * Host update transactions layered on a RendezvousLock: nested begin/end
 * pairs, deferred actions flushed on the main thread when the outermost
 * update ends, and main-thread hops for background work.
 */

use super::rendezvous::RendezvousLock;
use crate::core::limits::ASSERT_LOCKS_ENV;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{error, trace};

/// Deferred action run after the outermost update ends
pub type Action = Box<dyn FnOnce() + Send + 'static>;

/// Update cycle configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Panic from `assert_is_locked` when the lock is not held
    pub assert_locks: bool,
}

impl UpdateConfig {
    /// Read `FRAME_SYNC_ASSERT_LOCKS` (`1`/`true` enables assertions)
    pub fn from_env() -> Self {
        let assert_locks = std::env::var(ASSERT_LOCKS_ENV)
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        Self { assert_locks }
    }

    pub const fn strict() -> Self {
        Self { assert_locks: true }
    }
}

struct UpdateInner {
    lock: RendezvousLock,
    depth: AtomicU32,
    dispatch_depth: AtomicU32,
    actions: Mutex<Vec<Action>>,
    config: UpdateConfig,
}

/// Nested update transactions guarded by a [`RendezvousLock`]
#[derive(Clone)]
pub struct UpdateCycle {
    inner: Arc<UpdateInner>,
}

impl UpdateCycle {
    pub fn new(lock: RendezvousLock, config: UpdateConfig) -> Self {
        Self {
            inner: Arc::new(UpdateInner {
                lock,
                depth: AtomicU32::new(0),
                dispatch_depth: AtomicU32::new(0),
                actions: Mutex::new(Vec::new()),
                config,
            }),
        }
    }

    pub fn lock_handle(&self) -> &RendezvousLock {
        &self.inner.lock
    }

    pub fn is_active(&self) -> bool {
        self.depth() != 0
    }

    pub fn depth(&self) -> u32 {
        self.inner.depth.load(Ordering::SeqCst)
    }

    /// Whether the calling thread is inside an update that is not an
    /// action dispatch
    pub fn thread_is_updating(&self) -> bool {
        self.depth() > self.inner.dispatch_depth.load(Ordering::SeqCst) && self.is_owner()
    }

    pub fn lock(&self) {
        self.inner.lock.lock();
    }

    pub fn unlock(&self) {
        self.inner.lock.unlock();
    }

    pub fn is_owner(&self) -> bool {
        self.inner.lock.is_owner()
    }

    pub fn wait(&self) {
        self.inner.lock.wait();
    }

    pub fn broadcast(&self) {
        self.inner.lock.broadcast();
    }

    pub fn assert_is_locked(&self) {
        if !self.inner.config.assert_locks {
            return;
        }
        assert!(
            self.is_owner(),
            "update cycle is active without holding its lock; missing ensure()?"
        );
    }

    pub fn begin(&self) {
        self.inner.lock.lock();
        let depth = self.inner.depth.fetch_add(1, Ordering::SeqCst) + 1;
        if depth == 1 {
            trace!("Update began");
        }
    }

    pub fn end(&self) {
        if self.depth() == 1 {
            self.dispatch_actions();
            trace!("Update ended");
        }
        self.inner.depth.fetch_sub(1, Ordering::SeqCst);
        self.inner.lock.unlock();
    }

    /// Run `body` inside a begin/end pair
    pub fn perform<R>(&self, body: impl FnOnce() -> R) -> R {
        self.begin();
        let _scope = EndOnDrop(self);
        body()
    }

    /// Run `body` while holding the lock, without starting an update
    pub fn locked<R>(&self, body: impl FnOnce() -> R) -> R {
        self.inner.lock.locked(body)
    }

    /// Run `body` inside an update, taking the lock first if needed
    pub fn ensure<R>(&self, body: impl FnOnce() -> R) -> R {
        self.locked(|| self.perform(body))
    }

    /// Queue `action` to run once the outermost update ends
    pub fn enqueue_action<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.begin();
        self.inner.actions.lock().push(Box::new(action));
        self.end();
    }

    pub fn pending_actions(&self) -> usize {
        self.inner.actions.lock().len()
    }

    /// Run `body` on the main thread and wait for it
    ///
    /// Runs inline when already on the main thread. `body` must be `'static`
    /// even though it finishes before this returns, so borrowed state has to
    /// be moved in behind an `Arc` or similar.
    pub fn sync_main<F>(&self, body: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.lock.sync_on_main(body);
    }

    pub fn can_dispatch(&self) -> bool {
        self.assert_is_locked();
        if self.depth() != 1 {
            return false;
        }
        !self.inner.actions.lock().is_empty()
    }

    /// Flush queued actions in batches on the main thread
    ///
    /// Only effective at depth 1. Batches run inline when already on the
    /// main thread, otherwise they are submitted to the main executor.
    pub fn dispatch_actions(&self) {
        if !self.can_dispatch() {
            return;
        }
        loop {
            let batch = std::mem::take(&mut *self.inner.actions.lock());
            trace!(count = batch.len(), "Dispatching update actions");
            let cycle = self.clone();
            self.on_main_thread(move || cycle.run_batch(batch));

            if self.inner.actions.lock().is_empty() {
                break;
            }
        }
    }

    /// Run `body` inside an update marked as an action dispatch
    pub fn dispatch_immediately<R>(&self, body: impl FnOnce() -> R) -> R {
        self.begin();
        let depth = self.depth();
        let previous = self.inner.dispatch_depth.swap(depth, Ordering::SeqCst);
        let result = body();
        self.inner.dispatch_depth.store(previous, Ordering::SeqCst);
        self.end();
        result
    }

    fn run_batch(&self, batch: Vec<Action>) {
        self.begin();
        let depth = self.depth();
        let previous = self.inner.dispatch_depth.swap(depth, Ordering::SeqCst);

        for action in batch {
            action();
            assert_eq!(self.depth(), depth, "Action caused unbalanced updates.");
        }

        self.inner.dispatch_depth.store(previous, Ordering::SeqCst);
        self.end();
    }

    fn on_main_thread<F>(&self, body: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.inner.lock.is_main_thread() {
            body();
        } else if let Err(e) = self.inner.lock.main_executor().exec_async(Box::new(body)) {
            error!(error = %e, "Dropping update actions: main executor unavailable");
        }
    }
}

impl fmt::Debug for UpdateCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateCycle")
            .field("depth", &self.depth())
            .field("dispatch_depth", &self.inner.dispatch_depth.load(Ordering::SeqCst))
            .field("pending_actions", &self.pending_actions())
            .finish()
    }
}

struct EndOnDrop<'a>(&'a UpdateCycle);

impl Drop for EndOnDrop<'_> {
    fn drop(&mut self) {
        self.0.end();
    }
}
