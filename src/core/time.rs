/*!
 * Time Types
 * Monotonic tick timestamps and subscription deadlines
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

fn epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

/// Monotonic timestamp in nanoseconds since the process clock epoch
///
/// Zero is reserved as the "no tick in flight" sentinel, so [`Timestamp::now`]
/// never returns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    /// Current monotonic time
    pub fn now() -> Self {
        let nanos = epoch().elapsed().as_nanos().min(u64::MAX as u128) as u64;
        Timestamp(nanos.saturating_add(1))
    }

    #[inline]
    pub const fn from_nanos(nanos: u64) -> Self {
        Timestamp(nanos)
    }

    #[inline]
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn as_secs_f64(self) -> f64 {
        Duration::from_nanos(self.0).as_secs_f64()
    }

    pub fn saturating_add(self, d: Duration) -> Self {
        let nanos = d.as_nanos().min(u64::MAX as u128) as u64;
        Timestamp(self.0.saturating_add(nanos))
    }

    pub fn saturating_duration_since(self, earlier: Timestamp) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}s", self.as_secs_f64())
    }
}

/// When a subscription next wants a signal
///
/// `Never` is the idle state: the subscription stays registered but receives
/// nothing until it is re-armed with `At`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Deadline {
    #[default]
    Never,
    At(Timestamp),
}

impl Deadline {
    /// Deadline for the very next tick
    pub fn asap() -> Self {
        Deadline::At(Timestamp::now())
    }

    #[inline]
    pub const fn is_finite(&self) -> bool {
        matches!(self, Deadline::At(_))
    }

    #[inline]
    pub const fn time(&self) -> Option<Timestamp> {
        match self {
            Deadline::At(ts) => Some(*ts),
            Deadline::Never => None,
        }
    }
}

impl From<Option<Timestamp>> for Deadline {
    fn from(value: Option<Timestamp>) -> Self {
        value.map_or(Deadline::Never, Deadline::At)
    }
}
