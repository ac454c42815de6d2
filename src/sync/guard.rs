/*!
 * Rendezvous Guard
 * RAII ownership of a RendezvousLock level
 */

use super::rendezvous::RendezvousLock;
use std::fmt;
use std::marker::PhantomData;

/// Holds one level of a [`RendezvousLock`] until dropped
///
/// `!Send`: ownership is per thread, so the guard must be released on the
/// thread that acquired it.
pub struct RendezvousGuard<'a> {
    lock: &'a RendezvousLock,
    _not_send: PhantomData<*const ()>,
}

impl<'a> RendezvousGuard<'a> {
    pub(super) fn new(lock: &'a RendezvousLock) -> Self {
        lock.lock();
        Self {
            lock,
            _not_send: PhantomData,
        }
    }

    pub fn lock(&self) -> &'a RendezvousLock {
        self.lock
    }

    /// Release ownership, sleep until broadcast, reacquire
    pub fn wait(&self) {
        self.lock.wait();
    }
}

impl Drop for RendezvousGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

impl fmt::Debug for RendezvousGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RendezvousGuard")
            .field("depth", &self.lock.depth())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::core::executor::MainQueue;
    use crate::sync::RendezvousLock;

    #[test]
    fn test_guard_nests_and_releases() {
        let queue = MainQueue::new();
        let lock = RendezvousLock::new(queue.handle());

        {
            let outer = lock.guard();
            assert!(lock.is_outermost_owner());
            {
                let _inner = outer.lock().guard();
                assert_eq!(lock.depth(), 2);
            }
            assert_eq!(lock.depth(), 1);
        }
        assert!(!lock.is_owner());
    }

    #[test]
    fn test_locked_returns_value() {
        let queue = MainQueue::new();
        let lock = RendezvousLock::new(queue.handle());
        let value = lock.locked(|| lock.depth());
        assert_eq!(value, 1);
        assert_eq!(lock.depth(), 0);
    }
}
