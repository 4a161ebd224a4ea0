//! # Scheduling Drivers
//!
//! Drivers decide which thread runs a root's update cycles.
//!
//! ## Key Concepts
//! - Shared: a fixed set of worker threads, each ticking many roots
//! - Dedicated: one thread ticking a single root
//! - Manual: no periodic driver; cycles come only from delegates
//!
//! Whatever the driver, a root's cycles never overlap: every tick only
//! tries the root's core lock and skips the root if someone else holds it.

use std::fmt;
use std::time::Duration;

pub(crate) mod dedicated;
pub mod shared;
mod worker;

pub use shared::SharedScheduler;

/// How a started root is driven.
#[derive(Clone)]
pub enum Driver {
    /// Ticked by the shared scheduler's worker threads.
    Shared(SharedScheduler),
    /// Ticked by its own thread.
    Dedicated { tick: Duration },
    /// Only driven by delegates.
    Manual,
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Driver::Shared(scheduler) => f.debug_tuple("Shared").field(scheduler).finish(),
            Driver::Dedicated { tick } => f.debug_struct("Dedicated").field("tick", tick).finish(),
            Driver::Manual => f.write_str("Manual"),
        }
    }
}

/// Result of one scheduled tick of a root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A cycle ran.
    Ran,
    /// Another thread holds the root.
    Busy,
    /// A live delegate drives the root.
    Delegated,
    /// The root is terminated and can be forgotten.
    Finished,
}
