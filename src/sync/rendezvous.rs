/*!
 * Rendezvous Lock
 *
 * Reentrant mutex with a one-slot channel for running work on the designated
 * main thread while that thread is itself blocked acquiring the lock.
 *
 * # Protocol
 *
 * - Ownership is logical (`owner` + `depth`); the internal mutex only guards
 *   the bookkeeping and is never held across user code.
 * - A background caller of `sync_on_main` installs its call in the slot and
 *   either wakes the parked main thread or schedules a hop onto the main
 *   executor that briefly locks and unlocks.
 * - The main thread serves the slot whenever it is waiting in `lock` and
 *   the lock is free, held by the caller, or held by main itself: it borrows
 *   ownership (depth + 1), runs the call, restores the previous owner/depth,
 *   and wakes the caller. A call from a thread that does not own the lock
 *   waits until the current owner releases it.
 */

use crate::core::executor::MainExecutorRef;
use crate::core::thread::{MainThreadProbe, RecordedMainThread};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::fmt;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use tracing::{error, trace};

type PendingCall = Box<dyn FnOnce() + Send + 'static>;

struct LockState {
    owner: Option<ThreadId>,
    depth: u32,
    waiters: usize,
    /// Main thread is parked in `lock` and can be woken directly
    main_parked: bool,
    pending: Option<PendingCall>,
    /// Thread that installed `pending`
    pending_caller: Option<ThreadId>,
    /// Slot busy from installation until the call has completed
    call_active: bool,
    calls_issued: u64,
    calls_completed: u64,
    /// A main-executor hop is queued and has not run yet
    hop_scheduled: bool,
}

struct Inner {
    state: Mutex<LockState>,
    /// Non-main threads waiting for ownership
    released: Condvar,
    /// The main thread waiting for ownership
    main_wake: Condvar,
    call_done: Condvar,
    /// `wait`/`broadcast` condition, independent of acquisition
    signal: Condvar,
    probe: Box<dyn MainThreadProbe>,
    main: MainExecutorRef,
}

/// Reentrant lock that can borrow the main thread
///
/// Cloning yields another handle to the same lock. All OS resources are
/// released when the last handle is dropped; callers must ensure nobody
/// holds or waits on the lock at that point.
#[derive(Clone)]
pub struct RendezvousLock {
    inner: Arc<Inner>,
}

impl RendezvousLock {
    /// Create a lock whose main thread is the calling thread
    pub fn new(main: MainExecutorRef) -> Self {
        Self::with_probe(main, RecordedMainThread::current())
    }

    /// Create a lock with an injected main-thread probe
    pub fn with_probe<P>(main: MainExecutorRef, probe: P) -> Self
    where
        P: MainThreadProbe + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(LockState {
                    owner: None,
                    depth: 0,
                    waiters: 0,
                    main_parked: false,
                    pending: None,
                    pending_caller: None,
                    call_active: false,
                    calls_issued: 0,
                    calls_completed: 0,
                    hop_scheduled: false,
                }),
                released: Condvar::new(),
                main_wake: Condvar::new(),
                call_done: Condvar::new(),
                signal: Condvar::new(),
                probe: Box::new(probe),
                main,
            }),
        }
    }

    /// Acquire the lock, reentrantly for the current owner
    ///
    /// The main thread keeps serving pending `sync_on_main` calls while it
    /// waits, so it can never deadlock against a background owner that is
    /// waiting on it.
    pub fn lock(&self) {
        let me = thread::current().id();
        let is_main = self.inner.probe.is_main();
        let mut state = self.inner.state.lock();

        if state.owner == Some(me) {
            if is_main {
                self.serve_pending(&mut state, me);
            }
            state.depth += 1;
            return;
        }

        self.acquire(&mut state, me, is_main);
        state.depth = 1;
    }

    /// Release one level of ownership
    ///
    /// Must be paired with exactly one successful [`lock`](Self::lock).
    pub fn unlock(&self) {
        let mut state = self.inner.state.lock();
        debug_assert_eq!(
            state.owner,
            Some(thread::current().id()),
            "unlock called by a thread that does not own the lock"
        );

        state.depth = state.depth.saturating_sub(1);
        if state.depth != 0 {
            return;
        }
        state.owner = None;
        self.wake_one_waiter(&state);
    }

    pub fn is_owner(&self) -> bool {
        self.inner.state.lock().owner == Some(thread::current().id())
    }

    pub fn is_outermost_owner(&self) -> bool {
        let state = self.inner.state.lock();
        state.owner == Some(thread::current().id()) && state.depth == 1
    }

    /// Run `f` on the main thread and block until it has completed
    ///
    /// Runs in place when called on the main thread. From any other thread
    /// the call is handed over through the single pending slot; concurrent
    /// callers queue for the slot. A panic in `f` is re-raised here after
    /// the main thread has cleaned up.
    pub fn sync_on_main<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.inner.probe.is_main() {
            return f();
        }

        let (tx, rx) = flume::bounded(1);
        let call: PendingCall = Box::new(move || {
            let outcome = catch_unwind(AssertUnwindSafe(f));
            let _ = tx.send(outcome);
        });

        let mut state = self.inner.state.lock();
        while state.call_active {
            self.inner.call_done.wait(&mut state);
        }

        state.pending = Some(call);
        state.pending_caller = Some(thread::current().id());
        state.call_active = true;
        state.calls_issued += 1;
        let ticket = state.calls_issued;

        if state.main_parked {
            trace!(ticket, "Waking parked main thread for pending call");
            self.inner.main_wake.notify_one();
        } else if !state.hop_scheduled {
            state.hop_scheduled = true;
            self.schedule_hop(&mut state);
        }

        while state.calls_completed < ticket {
            self.inner.call_done.wait(&mut state);
        }
        drop(state);

        match rx.recv() {
            Ok(Ok(value)) => value,
            Ok(Err(payload)) => resume_unwind(payload),
            Err(_) => unreachable!("served call always reports its outcome"),
        }
    }

    /// Release ownership, sleep until [`broadcast`](Self::broadcast), then
    /// reacquire at the previous depth
    pub fn wait(&self) {
        let me = thread::current().id();
        let is_main = self.inner.probe.is_main();
        let mut state = self.inner.state.lock();
        debug_assert_eq!(state.owner, Some(me), "wait called without owning the lock");

        let depth = state.depth;
        state.depth = 0;
        state.owner = None;
        if state.waiters != 0 {
            self.inner.released.notify_all();
            self.inner.main_wake.notify_all();
        }

        self.inner.signal.wait(&mut state);

        self.acquire(&mut state, me, is_main);
        state.depth = depth;
    }

    /// Wake every thread parked in [`wait`](Self::wait)
    pub fn broadcast(&self) {
        let _state = self.inner.state.lock();
        self.inner.signal.notify_all();
    }

    /// Acquire and return an RAII guard
    pub fn guard(&self) -> super::guard::RendezvousGuard<'_> {
        super::guard::RendezvousGuard::new(self)
    }

    /// Run `f` while holding the lock
    pub fn locked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.guard();
        f()
    }

    /// Recursion depth of the current owner, 0 when unlocked
    pub fn depth(&self) -> u32 {
        self.inner.state.lock().depth
    }

    /// Threads currently parked waiting for ownership
    pub fn waiter_count(&self) -> usize {
        self.inner.state.lock().waiters
    }

    pub fn has_pending_call(&self) -> bool {
        self.inner.state.lock().call_active
    }

    /// Whether the calling thread is this lock's designated main thread
    pub fn is_main_thread(&self) -> bool {
        self.inner.probe.is_main()
    }

    pub fn main_executor(&self) -> &MainExecutorRef {
        &self.inner.main
    }

    /// Wait until unowned, then claim ownership (depth is set by the caller)
    fn acquire(&self, state: &mut MutexGuard<'_, LockState>, me: ThreadId, is_main: bool) {
        loop {
            if is_main {
                self.serve_pending(state, me);
            }
            if state.owner.is_none() {
                break;
            }
            self.park(state, is_main);
        }
        state.owner = Some(me);
    }

    fn park(&self, state: &mut MutexGuard<'_, LockState>, is_main: bool) {
        state.waiters += 1;
        if is_main {
            state.main_parked = true;
            self.inner.main_wake.wait(state);
            state.main_parked = false;
        } else {
            self.inner.released.wait(state);
        }
        state.waiters -= 1;
    }

    /// Run the pending call with borrowed ownership; main thread only
    ///
    /// Ownership is only borrowed from nobody, from the caller, or from main
    /// itself. A call installed by a non-owner stays pending until the
    /// current owner releases the lock.
    fn serve_pending(&self, state: &mut MutexGuard<'_, LockState>, me: ThreadId) -> bool {
        if state.pending.is_none() {
            return false;
        }
        let servable = match state.owner {
            None => true,
            Some(owner) => owner == me || Some(owner) == state.pending_caller,
        };
        if !servable {
            trace!("Pending call deferred; lock held by another thread");
            return false;
        }
        let Some(call) = state.pending.take() else {
            return false;
        };
        state.pending_caller = None;

        let prior_owner = state.owner;
        let prior_depth = state.depth;
        state.owner = Some(me);
        state.depth = prior_depth + 1;

        MutexGuard::unlocked(state, call);

        state.owner = prior_owner;
        state.depth = prior_depth;
        state.call_active = false;
        state.calls_completed += 1;
        trace!(completed = state.calls_completed, "Served pending main-thread call");

        self.inner.call_done.notify_all();
        if state.owner.is_none() {
            // Threads that arrived while main borrowed a free lock
            self.wake_one_waiter(state);
        }
        true
    }

    fn wake_one_waiter(&self, state: &LockState) {
        if state.main_parked {
            self.inner.main_wake.notify_one();
        }
        if state.waiters > usize::from(state.main_parked) {
            self.inner.released.notify_one();
        }
    }

    fn schedule_hop(&self, state: &mut MutexGuard<'_, LockState>) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let hop = Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                let lock = RendezvousLock { inner };
                lock.lock();
                lock.inner.state.lock().hop_scheduled = false;
                lock.unlock();
            }
        });

        if let Err(e) = self.inner.main.exec_async(hop) {
            // The call can still be served if main contends for the lock
            error!(error = %e, "Failed to schedule main-thread hop");
            state.hop_scheduled = false;
        } else {
            trace!("Scheduled main-thread hop for pending call");
        }
    }
}

impl fmt::Debug for RendezvousLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("RendezvousLock")
            .field("owner", &state.owner)
            .field("depth", &state.depth)
            .field("waiters", &state.waiters)
            .field("call_active", &state.call_active)
            .finish_non_exhaustive()
    }
}
