/*!
 * Synchronization Primitives
 *
 * - `RendezvousLock`: reentrant lock that lets background threads run work on
 *   the designated main thread without deadlocking against it
 * - `RendezvousGuard`: RAII ownership of one lock level
 * - `UpdateCycle`: nested update transactions with deferred main-thread actions
 */

mod guard;
mod rendezvous;
mod update;

pub use guard::RendezvousGuard;
pub use rendezvous::RendezvousLock;
pub use update::{Action, UpdateConfig, UpdateCycle};
