/*!
 * Display Signal Types
 * Device/subscription identifiers, manager statistics and policy config
 */

use crate::core::limits::{
    DEFAULT_RESTART_BUDGET, DISPLAY_QUEUE_PREFIX, LOW_POWER_RESTART_BUDGET,
    STICKY_RESTART_BUDGET,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a physical output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "display-{}", self.0)
    }
}

/// Stable handle key for a subscription; never reused within a registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Point-in-time view of one device's manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    pub device: DeviceId,
    pub total: u32,
    pub paused: u32,
    pub activity_countdown: u32,
    pub tick_in_flight: bool,
    pub source_paused: bool,
    pub ticks_dispatched: u64,
    pub ticks_coalesced: u64,
    pub callbacks_invoked: u64,
}

/// Demand-based pause/resume policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalConfig {
    /// Extra ticks a source keeps running once every subscriber is idle,
    /// and the idle allowance each subscription gets when re-armed
    pub restart_budget: u32,
    /// Thread name prefix for per-device dispatch queues
    pub queue_name_prefix: String,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            restart_budget: DEFAULT_RESTART_BUDGET,
            queue_name_prefix: DISPLAY_QUEUE_PREFIX.to_string(),
        }
    }
}

impl SignalConfig {
    /// Pause the hardware as soon as demand drops
    pub fn low_power() -> Self {
        Self {
            restart_budget: LOW_POWER_RESTART_BUDGET,
            ..Self::default()
        }
    }

    /// Keep sources running through long gaps between re-arms
    pub fn sticky() -> Self {
        Self {
            restart_budget: STICKY_RESTART_BUDGET,
            ..Self::default()
        }
    }

    /// Budget is clamped to at least one tick
    pub fn with_restart_budget(mut self, budget: u32) -> Self {
        self.restart_budget = budget.max(1);
        self
    }

    pub fn with_queue_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.queue_name_prefix = prefix.into();
        self
    }

    pub(crate) fn budget(&self) -> u32 {
        self.restart_budget.max(1)
    }
}
