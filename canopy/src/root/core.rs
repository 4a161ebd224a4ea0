//! # Root Core
//!
//! The serial execution engine behind every root.
//!
//! ## Key Concepts
//! - Inbound queue: lock-free, fed from any thread
//! - Pending list: private FIFO the current cycle works through
//! - Holding queue: packets whose time code lies in the future
//! - Local time: advanced once per cycle, never backwards
//!
//! ## Update Cycle
//! 1. Drain the inbound queue into the pending list
//! 2. Process pending items; future packets are parked, tasks and control
//!    messages run immediately
//! 3. Advance local time to the driving time
//! 4. Fire clock listeners (running sub-state only), then the update hook,
//!    then deliver parked packets that have become due
//!
//! A cycle stops early when interrupted; unprocessed items stay in the
//! pending list for the next cycle.
//!
//! ## Design Principles
//! - At most one cycle per root at a time: every cycle holds the core lock
//! - Failures stay inside the root: panics and errors become error replies
//! - Termination always drains: queued requests get a `terminated` error

use std::collections::{BinaryHeap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError, TryLockError};
use std::time::Duration;

use canopy_api::{Call, ComponentAddress, Time};
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, nanos};
use crate::error::RootError;
use crate::hub::Hub;
use crate::kinds;
use crate::scheduler::TickOutcome;

use super::context::{RootBehavior, RootContext, RootEnv};
use super::controller::Controller;
use super::envelope::{ControlMessage, Envelope, Held, Task};
use super::queue::InboundQueue;
use super::state::{RootState, StateCell};

/// Who is currently driving the root's cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriveMode {
    /// The root's driver (shared or dedicated scheduler, if any)
    Scheduled,
    /// An attached delegate
    Delegated {
        token: u64,
        /// Hub time of the delegate's last cycle
        last_update: Time,
        /// Set once the stall warning has been logged
        stalled: bool,
    },
}

/// Signals termination to waiting threads.
#[derive(Debug, Default)]
struct Latch {
    done: Mutex<bool>,
    signal: Condvar,
}

impl Latch {
    fn release(&self) {
        *self.done.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.signal.notify_all();
    }

    fn wait(&self, timeout: Duration) -> bool {
        let guard = self.done.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .signal
            .wait_timeout_while(guard, timeout, |done| !*done)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

/// Hub timing a root is bound to at initialization.
#[derive(Debug, Clone)]
pub(crate) struct Timing {
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) delegate_grace: Time,
}

/// State reachable without holding the core lock.
#[derive(Debug)]
pub(crate) struct RootShared {
    pub(crate) queue: InboundQueue,
    pub(crate) state: StateCell,
    /// Asks the running cycle to stop after the current item
    interrupted: AtomicBool,
    /// Set once a periodic driver ticks this root
    pub(crate) driven: AtomicBool,
    next_token: AtomicU64,
    latch: Latch,
    pub(crate) timing: OnceLock<Timing>,
}

/// State owned by whichever thread runs the current cycle.
struct RootCore {
    behavior: Box<dyn RootBehavior>,
    /// Present once initialized
    env: Option<RootEnv>,
    pending: VecDeque<Envelope>,
    held: BinaryHeap<Held>,
    held_seq: u64,
    drive: DriveMode,
    max_clock_drift: Time,
}

/// A root actor: one behavior, executed strictly serially.
pub struct Root {
    pub(crate) shared: RootShared,
    core: Mutex<RootCore>,
}

impl Root {
    /// Wraps a behavior in a new, uninitialized root.
    pub fn new(behavior: Box<dyn RootBehavior>) -> Arc<Self> {
        Arc::new(Self {
            shared: RootShared {
                queue: InboundQueue::new(),
                state: StateCell::new(),
                interrupted: AtomicBool::new(false),
                driven: AtomicBool::new(false),
                next_token: AtomicU64::new(1),
                latch: Latch::default(),
                timing: OnceLock::new(),
            },
            core: Mutex::new(RootCore {
                behavior,
                env: None,
                pending: VecDeque::new(),
                held: BinaryHeap::new(),
                held_seq: 0,
                drive: DriveMode::Scheduled,
                max_clock_drift: Time::MAX,
            }),
        })
    }

    /// Binds the root to its id and hub.
    ///
    /// # Returns
    /// The controller through which the root is started and fed.
    ///
    /// # Errors
    /// `StateConflict` if the root was already initialized.
    pub fn initialize(self: &Arc<Self>, id: &str, hub: &Arc<Hub>) -> Result<Controller, RootError> {
        let address = ComponentAddress::root(id)?;
        self.shared
            .state
            .transition(RootState::New, RootState::Initializing)
            .map_err(|actual| RootError::StateConflict {
                expected: RootState::New,
                actual,
            })?;

        {
            let mut core = self.lock_core();
            let clock = hub.clock();
            core.env = Some(RootEnv {
                address: address.clone(),
                hub: Arc::downgrade(hub),
                time: clock.now(),
                clock,
                listeners: Vec::new(),
            });
            core.max_clock_drift = nanos(hub.config().max_clock_drift);
        }
        let _ = self.shared.timing.set(Timing {
            clock: hub.clock(),
            delegate_grace: nanos(hub.config().delegate_grace),
        });

        self.shared
            .state
            .transition(RootState::Initializing, RootState::Initialized)
            .map_err(|actual| RootError::StateConflict {
                expected: RootState::Initializing,
                actual,
            })?;
        debug!(root = %address, "Root initialized");
        Ok(Controller::new(Arc::clone(self), address))
    }

    fn lock_core(&self) -> MutexGuard<'_, RootCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs the activation hook and enters `ActiveIdle`.
    pub(crate) fn activate(self: &Arc<Self>) -> Result<(), RootError> {
        self.shared
            .state
            .transition(RootState::Initialized, RootState::ActiveIdle)
            .map_err(|actual| RootError::StateConflict {
                expected: RootState::Initialized,
                actual,
            })?;

        let mut guard = self.lock_core();
        let core = &mut *guard;
        let Some(env) = core.env.as_mut() else {
            return Err(RootError::Detached);
        };
        let address = env.address.clone();
        let behavior = &mut core.behavior;
        let outcome = {
            let mut ctx = RootContext::new(self, env);
            panic::catch_unwind(AssertUnwindSafe(|| behavior.activate(&mut ctx)))
        };
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(payload) => Some(panic_message(payload.as_ref())),
        };
        match failure {
            None => {
                crate::log_lifecycle!(address.as_str(), "activated");
                Ok(())
            }
            Some(reason) => {
                error!(root = %address, error = %reason, "Activation failed; terminating root");
                self.shared.state.request_termination();
                self.finish(core);
                Err(RootError::ActivationFailed(reason))
            }
        }
    }

    /// One scheduled tick.
    ///
    /// Skips the cycle if another thread holds the root, or if a live
    /// delegate drives it. A delegate silent for longer than the grace period is
    /// considered stalled and the cycle is forced at hub time.
    pub(crate) fn tick(self: &Arc<Self>, hub_time: Time) -> TickOutcome {
        if self.shared.state.get() == RootState::Terminated {
            return TickOutcome::Finished;
        }
        let grace = self.shared.timing.get().map_or(Time::MAX, |timing| timing.delegate_grace);
        let mut guard = match self.core.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return TickOutcome::Busy,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };
        let core = &mut *guard;
        if let DriveMode::Delegated {
            last_update,
            stalled,
            ..
        } = &mut core.drive
        {
            if hub_time.saturating_sub(*last_update) <= grace {
                return TickOutcome::Delegated;
            }
            if !*stalled {
                *stalled = true;
                if let Some(env) = core.env.as_ref() {
                    warn!(
                        root = %env.address,
                        silent_ns = hub_time.saturating_sub(*last_update),
                        "Delegate stalled; forcing a scheduler cycle"
                    );
                }
            }
        }
        self.run_cycle(core, hub_time);
        if self.shared.state.get() == RootState::Terminated {
            TickOutcome::Finished
        } else {
            TickOutcome::Ran
        }
    }

    /// One cycle driven by the delegate holding `token`.
    ///
    /// The supplied time is clamped to hub time ± the maximum clock drift
    /// before the forward-only rule is applied.
    pub(crate) fn delegate_cycle(self: &Arc<Self>, token: u64, time: Time) -> bool {
        let mut guard = self.lock_core();
        let core = &mut *guard;
        if self.shared.state.get() == RootState::Terminated {
            return false;
        }
        let Some(hub_now) = core.env.as_ref().map(|env| env.clock.now()) else {
            return false;
        };
        let low = hub_now.saturating_sub(core.max_clock_drift);
        let high = hub_now.saturating_add(core.max_clock_drift);
        let corrected = time.clamp(low, high);
        if corrected != time {
            debug!(supplied = time, corrected, "Delegate time clamped to hub drift bounds");
        }
        if let DriveMode::Delegated {
            token: current,
            last_update,
            stalled,
        } = &mut core.drive
        {
            if *current == token {
                *last_update = hub_now;
                *stalled = false;
            }
        }
        self.run_cycle(core, corrected);
        self.shared.state.get() != RootState::Terminated
    }

    pub(crate) fn next_delegate_token(&self) -> u64 {
        self.shared.next_token.fetch_add(1, Ordering::Relaxed)
    }

    /// Asks the running cycle, if any, to stop early.
    pub(crate) fn interrupt(&self) {
        self.shared.interrupted.store(true, Ordering::SeqCst);
    }

    /// Requests termination without waiting for it.
    ///
    /// A root that no periodic driver or delegate will visit again is
    /// drained on the calling thread.
    pub(crate) fn request_shutdown(self: &Arc<Self>) {
        let Some(previous) = self.shared.state.request_termination() else {
            return;
        };
        self.interrupt();
        if matches!(previous, RootState::New | RootState::Initializing) {
            self.shared.queue.close();
            self.shared.state.set(RootState::Terminated);
            self.shared.latch.release();
            return;
        }
        if self.shared.driven.load(Ordering::SeqCst) {
            return;
        }
        let mut guard = match self.core.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };
        if guard.drive == DriveMode::Scheduled {
            self.finish(&mut guard);
        }
    }

    pub(crate) fn await_termination(&self, timeout: Duration) -> bool {
        self.shared.latch.wait(timeout)
    }

    fn run_cycle(self: &Arc<Self>, core: &mut RootCore, time: Time) {
        self.shared.interrupted.store(false, Ordering::SeqCst);
        while let Some(envelope) = self.shared.queue.pop() {
            core.pending.push_back(envelope);
        }
        if self.shared.state.get().is_ending() {
            self.finish(core);
            return;
        }

        while let Some(envelope) = core.pending.pop_front() {
            if self.shared.interrupted.load(Ordering::SeqCst) {
                core.pending.push_front(envelope);
                return;
            }
            match envelope {
                Envelope::Packet(call) => {
                    let now = core.env.as_ref().map_or(Time::MIN, |env| env.time);
                    if call.time_code() > now {
                        core.held_seq += 1;
                        core.held.push(Held {
                            time: call.time_code(),
                            seq: core.held_seq,
                            call,
                        });
                    } else {
                        self.deliver(core, call);
                    }
                }
                Envelope::Task(task) => run_task(task),
                Envelope::Control(message) => self.apply_control(core, message),
            }
        }

        let running = self.shared.state.get() == RootState::ActiveRunning;
        if let Some(env) = core.env.as_mut() {
            if time < env.time {
                warn!(
                    root = %env.address,
                    supplied = time,
                    local = env.time,
                    "Driver time went backwards; nudging local time forward"
                );
                env.time += 1;
            } else {
                env.time = time;
            }
            if running {
                let now = env.time;
                for listener in env.listeners.iter_mut() {
                    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| listener(now))) {
                        error!(root = %env.address, error = %panic_message(payload.as_ref()), "Clock listener panicked");
                    }
                }
            }
        }

        self.run_update_hook(core);

        loop {
            let now = core.env.as_ref().map_or(Time::MIN, |env| env.time);
            match core.held.peek() {
                Some(top) if top.time <= now => {}
                _ => break,
            }
            if let Some(held) = core.held.pop() {
                self.deliver(core, held.call);
            }
        }

        if self.shared.state.get().is_ending() {
            self.finish(core);
        }
    }

    fn run_update_hook(self: &Arc<Self>, core: &mut RootCore) {
        let Some(env) = core.env.as_mut() else {
            return;
        };
        let address = env.address.clone();
        let behavior = &mut core.behavior;
        let mut ctx = RootContext::new(self, env);
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| behavior.update(&mut ctx))) {
            error!(root = %address, error = %panic_message(payload.as_ref()), "Update hook panicked");
        }
    }

    /// Hands one call to the behavior, converting failures to error replies.
    fn deliver(self: &Arc<Self>, core: &mut RootCore, call: Call) {
        let Some(env) = core.env.as_mut() else {
            return;
        };
        let span = crate::root_span!(env.address.as_str(), call_id = %call.id());
        let _guard = span.enter();

        let behavior = &mut core.behavior;
        let mut ctx = RootContext::new(self, env);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| behavior.process_call(&mut ctx, call.clone())));
        let failure = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(payload) => panic_message(payload.as_ref()),
        };
        error!(root = %ctx.address(), call = %call, error = %failure, "Call processing failed");
        ctx.fail(&call, kinds::PROCESSING_FAILED, failure);
    }

    fn apply_control(&self, core: &mut RootCore, message: ControlMessage) {
        match message {
            ControlMessage::AttachDelegate(token) => {
                let last_update = core.env.as_ref().map_or(0, |env| env.clock.now());
                core.drive = DriveMode::Delegated {
                    token,
                    last_update,
                    stalled: false,
                };
                debug!(token, "Delegate attached");
            }
            ControlMessage::DetachDelegate(token) => {
                if matches!(core.drive, DriveMode::Delegated { token: current, .. } if current == token) {
                    core.drive = DriveMode::Scheduled;
                    debug!(token, "Delegate detached");
                }
            }
            ControlMessage::SetRunning => {
                let _ = self
                    .shared
                    .state
                    .transition(RootState::ActiveIdle, RootState::ActiveRunning);
            }
            ControlMessage::SetIdle => {
                let _ = self
                    .shared
                    .state
                    .transition(RootState::ActiveRunning, RootState::ActiveIdle);
            }
        }
    }

    /// Runs the terminate hook and drains everything still queued.
    fn finish(self: &Arc<Self>, core: &mut RootCore) {
        if self.shared.state.get() == RootState::Terminated {
            return;
        }
        if let Some(env) = core.env.as_mut() {
            let behavior = &mut core.behavior;
            let mut ctx = RootContext::new(self, env);
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| behavior.terminate(&mut ctx))) {
                error!(root = %ctx.address(), error = %panic_message(payload.as_ref()), "Terminate hook panicked");
            }
        }

        self.shared.queue.close();
        while let Some(envelope) = self.shared.queue.pop() {
            core.pending.push_back(envelope);
        }
        let mut drained: Vec<Envelope> = core.pending.drain(..).collect();
        while let Some(held) = core.held.pop() {
            drained.push(Envelope::Packet(held.call));
        }

        let mut rejected = 0usize;
        for envelope in drained {
            match envelope {
                Envelope::Packet(call) => {
                    rejected += 1;
                    match core.env.as_mut() {
                        Some(env) => {
                            let ctx = RootContext::new(self, env);
                            if call.is_request() {
                                ctx.fail(&call, kinds::TERMINATED, "root terminated");
                            } else {
                                debug!(root = %ctx.address(), call = %call, "Dropping answer queued for terminated root");
                            }
                        }
                        None => debug!(call = %call, "Dropping call queued for uninitialized root"),
                    }
                }
                Envelope::Task(task) => run_task(task),
                Envelope::Control(_) => {}
            }
        }

        self.shared.state.set(RootState::Terminated);
        if let Some(env) = core.env.as_ref() {
            if let Some(hub) = env.hub.upgrade() {
                hub.unregister(env.address.root_id(), self);
            }
            info!(root = %env.address, drained = rejected, "Root terminated");
        }
        self.shared.latch.release();
    }
}

fn run_task(task: Task) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
        error!(error = %panic_message(payload.as_ref()), "Deferred task panicked");
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
