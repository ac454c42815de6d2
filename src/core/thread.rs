/*!
 * Thread Identity
 * Pluggable "is this the designated main thread?" capability
 */

use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// Answers whether the calling thread is the process's designated main thread
///
/// Injected into [`RendezvousLock`](crate::sync::RendezvousLock) so tests can
/// appoint any thread as "main" without a platform run loop.
pub trait MainThreadProbe: Send + Sync {
    fn is_main(&self) -> bool;
}

/// Probe that pins "main" to one recorded thread
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RecordedMainThread {
    id: ThreadId,
}

impl RecordedMainThread {
    /// Record the calling thread as main
    pub fn current() -> Self {
        Self {
            id: thread::current().id(),
        }
    }

    pub fn from_id(id: ThreadId) -> Self {
        Self { id }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }
}

impl fmt::Debug for RecordedMainThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordedMainThread").field("id", &self.id).finish()
    }
}

impl MainThreadProbe for RecordedMainThread {
    #[inline]
    fn is_main(&self) -> bool {
        thread::current().id() == self.id
    }
}

impl<T: MainThreadProbe + ?Sized> MainThreadProbe for Arc<T> {
    #[inline]
    fn is_main(&self) -> bool {
        (**self).is_main()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorded_probe_only_matches_recording_thread() {
        let probe = RecordedMainThread::current();
        assert!(probe.is_main());

        let other = thread::spawn(move || probe.is_main()).join().unwrap();
        assert!(!other);
    }
}
