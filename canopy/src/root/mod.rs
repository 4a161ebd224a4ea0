//! # Roots
//!
//! A root is an independently scheduled actor with its own address
//! namespace and local clock. All work for one root runs strictly
//! serially, whichever thread happens to drive it.
//!
//! ## Core Components
//!
//! - [`Root`]: the execution engine (queue, holding queue, update cycle)
//! - [`Controller`]: thread-safe handle used to feed, start and stop a root
//! - [`Delegate`]: an external driver running cycles on its own thread
//! - [`RootBehavior`] / [`RootContext`]: the behavior a root executes and
//!   its view of the root while running
//! - [`RootState`]: the lifecycle state machine

mod context;
mod controller;
mod core;
mod delegate;
mod envelope;
mod queue;
mod state;

pub use context::{ClockListener, RootBehavior, RootContext};
pub use controller::Controller;
pub use self::core::Root;
pub use delegate::Delegate;
pub use envelope::{ControlMessage, Envelope, Task};
pub use state::RootState;

pub(crate) use self::core::Timing;
