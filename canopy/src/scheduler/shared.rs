use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use flume::Sender;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::SchedulerError;
use crate::logging;
use crate::root::Controller;

use super::worker::{TickLoop, WorkerCommand};

/// One worker thread of the shared scheduler.
struct WorkerSlot {
    commands: Sender<WorkerCommand>,
    load: Arc<AtomicUsize>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

struct SchedulerInner {
    workers: Vec<WorkerSlot>,
    stopped: AtomicBool,
    tick: Duration,
}

/// # Shared Scheduler
///
/// A fixed pool of threads, each ticking its assigned roots at a fixed
/// interval.
///
/// ## Key Responsibilities
/// - Placing new roots on the least loaded worker
/// - Ticking every assigned root once per interval
/// - Forgetting roots once they terminate
///
/// Cloning yields another handle to the same pool.
#[derive(Clone)]
pub struct SharedScheduler {
    inner: Arc<SchedulerInner>,
}

impl SharedScheduler {
    /// Starts `threads` workers ticking every `tick`.
    ///
    /// # Arguments
    /// * `threads` - Number of worker threads
    /// * `tick` - Interval between two cycles of a root
    /// * `clock` - Hub clock supplying cycle times
    pub fn new(threads: usize, tick: Duration, clock: Arc<dyn Clock>) -> Result<Self, SchedulerError> {
        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads {
            let (commands, receiver) = flume::unbounded();
            let load = Arc::new(AtomicUsize::new(0));
            let tick_loop = TickLoop {
                name: format!("shared-{index}"),
                commands: Some(receiver),
                roots: Vec::new(),
                tick,
                clock: Arc::clone(&clock),
                load: Arc::clone(&load),
                exit_when_empty: false,
            };
            let dispatch = logging::current_subscriber();
            let thread = std::thread::Builder::new()
                .name(format!("canopy-scheduler-{index}"))
                .spawn(move || tracing::dispatcher::with_default(&dispatch, || tick_loop.run()))
                .map_err(|e| SchedulerError::ThreadSpawn(e.to_string()))?;
            workers.push(WorkerSlot {
                commands,
                load,
                thread: Mutex::new(Some(thread)),
            });
        }
        debug!(threads, ?tick, "Shared scheduler started");
        Ok(Self {
            inner: Arc::new(SchedulerInner {
                workers,
                stopped: AtomicBool::new(false),
                tick,
            }),
        })
    }

    /// Assigns a started root to the least loaded worker.
    pub fn attach(&self, controller: Controller) -> Result<(), SchedulerError> {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return Err(SchedulerError::ShutDown);
        }
        let worker = self
            .inner
            .workers
            .iter()
            .min_by_key(|worker| worker.load.load(Ordering::SeqCst))
            .ok_or(SchedulerError::ShutDown)?;
        // Count the root right away so concurrent placements spread out.
        worker.load.fetch_add(1, Ordering::SeqCst);
        worker
            .commands
            .send(WorkerCommand::Attach(controller))
            .map_err(|_| SchedulerError::ShutDown)
    }

    /// Number of roots currently assigned to any worker.
    pub fn root_count(&self) -> usize {
        self.inner
            .workers
            .iter()
            .map(|worker| worker.load.load(Ordering::SeqCst))
            .sum()
    }

    pub fn tick(&self) -> Duration {
        self.inner.tick
    }

    /// Stops every worker and joins its thread.
    pub fn shutdown(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        for worker in &self.inner.workers {
            let _ = worker.commands.send(WorkerCommand::Stop);
        }
        for worker in &self.inner.workers {
            let thread = worker
                .thread
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(thread) = thread {
                // A worker may release the last hub handle itself.
                if thread.thread().id() == std::thread::current().id() {
                    continue;
                }
                if thread.join().is_err() {
                    warn!("Scheduler thread panicked");
                }
            }
        }
        debug!("Shared scheduler stopped");
    }
}

impl fmt::Debug for SharedScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedScheduler")
            .field("workers", &self.inner.workers.len())
            .field("roots", &self.root_count())
            .field("tick", &self.inner.tick)
            .finish()
    }
}
