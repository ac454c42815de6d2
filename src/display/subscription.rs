/*!
 * Display Subscriptions
 * Per-listener bookkeeping and the public handle
 */

use super::registry::RegistryInner;
use super::types::{DeviceId, SubscriptionId};
use crate::core::time::{Deadline, Timestamp};
use std::fmt;
use std::sync::Arc;

/// Listener callback: `(handle, tick timestamp)`
pub type Callback = Arc<dyn Fn(&SubscriptionHandle, Timestamp) + Send + Sync>;

/// Registry-owned record for one subscription
pub(super) struct SubscriptionState {
    pub device: DeviceId,
    /// Epoch of the manager this subscription belongs to
    pub epoch: u64,
    pub callback: Callback,
    pub next_deadline: Deadline,
    /// Idle ticks left before this subscription counts as paused; 0 = paused
    pub idle_countdown: u32,
    /// Callback queued or running for the in-flight tick
    pub scheduled: bool,
    /// Removal requested; freed once no longer scheduled
    pub destroyed: bool,
}

impl SubscriptionState {
    pub fn new(device: DeviceId, epoch: u64, callback: Callback) -> Self {
        Self {
            device,
            epoch,
            callback,
            next_deadline: Deadline::Never,
            idle_countdown: 0,
            scheduled: false,
            destroyed: false,
        }
    }

    #[inline]
    pub fn is_paused(&self) -> bool {
        self.idle_countdown == 0
    }
}

/// Handle to a registered periodic-signal listener
///
/// Cloning is cheap. Dropping a handle does not unsubscribe; call
/// [`unsubscribe`](Self::unsubscribe) explicitly. A callback that captures
/// its own handle keeps the registry alive until it unsubscribes.
#[derive(Clone)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    device: DeviceId,
    registry: Arc<RegistryInner>,
}

impl SubscriptionHandle {
    pub(super) fn new(id: SubscriptionId, device: DeviceId, registry: Arc<RegistryInner>) -> Self {
        Self {
            id,
            device,
            registry,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Request removal; idempotent
    ///
    /// Frees the subscription immediately unless its callback is in flight,
    /// in which case it is freed when that tick's dispatch completes.
    pub fn unsubscribe(&self) {
        self.registry.unsubscribe(self.id);
    }

    /// Arm (`At`) or idle (`Never`) the subscription
    pub fn set_next_deadline(&self, deadline: Deadline) {
        self.registry.set_next_deadline(self.id, deadline);
    }

    /// `Never` once the subscription has been removed
    pub fn next_deadline(&self) -> Deadline {
        self.registry.next_deadline(self.id)
    }

    /// Registered and not yet unsubscribed
    pub fn is_active(&self) -> bool {
        self.registry.is_active(self.id)
    }
}

impl PartialEq for SubscriptionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Arc::ptr_eq(&self.registry, &other.registry)
    }
}

impl Eq for SubscriptionHandle {}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}
