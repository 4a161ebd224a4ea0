//! # Tick Loop
//!
//! The loop run by every scheduler thread, shared and dedicated alike.
//!
//! ## Core Algorithm
//! 1. Wait for a command or the next tick deadline
//! 2. On a tick, read hub time once and tick every assigned root
//! 3. Forget roots that report `Finished`
//! 4. Schedule the next deadline, skipping missed ticks instead of bursting

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError};
use tracing::{debug, trace};

use crate::clock::Clock;
use crate::root::Controller;

use super::TickOutcome;

/// Commands accepted by a shared worker.
pub(crate) enum WorkerCommand {
    Attach(Controller),
    Stop,
}

pub(crate) struct TickLoop {
    pub(crate) name: String,
    /// Absent for dedicated threads, which never receive commands
    pub(crate) commands: Option<Receiver<WorkerCommand>>,
    pub(crate) roots: Vec<Controller>,
    pub(crate) tick: Duration,
    pub(crate) clock: Arc<dyn Clock>,
    /// Number of roots assigned, read by the least-loaded placement
    pub(crate) load: Arc<AtomicUsize>,
    /// Exit once no root is left
    pub(crate) exit_when_empty: bool,
}

impl TickLoop {
    pub(crate) fn run(mut self) {
        debug!(worker = %self.name, "Scheduler thread started");
        let mut deadline = Instant::now() + self.tick;
        loop {
            let due = match &self.commands {
                Some(commands) => match commands.recv_deadline(deadline) {
                    Ok(WorkerCommand::Attach(controller)) => {
                        trace!(worker = %self.name, root = %controller.address(), "Root attached");
                        self.roots.push(controller);
                        self.load.store(self.roots.len(), Ordering::SeqCst);
                        false
                    }
                    Ok(WorkerCommand::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => true,
                },
                None => {
                    let now = Instant::now();
                    if deadline > now {
                        std::thread::sleep(deadline - now);
                    }
                    true
                }
            };
            if !due {
                continue;
            }

            let hub_time = self.clock.now();
            self.roots
                .retain(|controller| controller.tick(hub_time) != TickOutcome::Finished);
            self.load.store(self.roots.len(), Ordering::SeqCst);
            if self.exit_when_empty && self.roots.is_empty() {
                break;
            }

            deadline += self.tick;
            let now = Instant::now();
            if deadline < now {
                deadline = now + self.tick;
            }
        }
        debug!(worker = %self.name, roots = self.roots.len(), "Scheduler thread stopped");
    }
}
