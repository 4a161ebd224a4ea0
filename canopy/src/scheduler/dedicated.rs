//! # Dedicated Driver
//!
//! Runs a single root on its own OS thread. The thread exits by itself once
//! the root terminates.

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::time::Duration;

use crate::error::SchedulerError;
use crate::logging;
use crate::root::Controller;
use crate::root::Timing;

use super::worker::TickLoop;

/// Spawns the thread driving `controller` every `tick`.
pub(crate) fn spawn(controller: Controller, tick: Duration, timing: Timing) -> Result<(), SchedulerError> {
    let name = format!("canopy-root-{}", controller.id());
    let tick_loop = TickLoop {
        name: name.clone(),
        commands: None,
        roots: vec![controller],
        tick,
        clock: timing.clock,
        load: Arc::new(AtomicUsize::new(1)),
        exit_when_empty: true,
    };
    let dispatch = logging::current_subscriber();
    std::thread::Builder::new()
        .name(name)
        .spawn(move || tracing::dispatcher::with_default(&dispatch, || tick_loop.run()))
        .map(|_| ())
        .map_err(|e| SchedulerError::ThreadSpawn(e.to_string()))
}
