use std::fmt;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use canopy_api::{Call, ComponentAddress, Time};
use tracing::debug;

use crate::error::{RootError, SchedulerError};
use crate::scheduler::{Driver, TickOutcome, dedicated};

use super::core::Root;
use super::delegate::Delegate;
use super::envelope::{ControlMessage, Envelope};
use super::state::RootState;

/// # Root Controller
///
/// Thread-safe handle to an initialized root. Every method may be called
/// from any thread; none of them touches the root's internal state
/// directly, they only enqueue work or flip atomic flags.
#[derive(Clone)]
pub struct Controller {
    root: Arc<Root>,
    address: ComponentAddress,
}

impl Controller {
    pub(crate) fn new(root: Arc<Root>, address: ComponentAddress) -> Self {
        Self { root, address }
    }

    pub fn address(&self) -> &ComponentAddress {
        &self.address
    }

    pub fn id(&self) -> &str {
        self.address.root_id()
    }

    pub fn state(&self) -> RootState {
        self.root.shared.state.get()
    }

    /// Enqueues a call without blocking.
    ///
    /// # Returns
    /// `false` if the root no longer accepts work.
    pub fn submit_packet(&self, call: Call) -> bool {
        self.root.shared.queue.push(Envelope::Packet(call)).is_ok()
    }

    /// Enqueues a task to run on the root's own thread.
    pub fn invoke_later(&self, task: impl FnOnce() + Send + 'static) -> bool {
        self.root.shared.queue.push(Envelope::Task(Box::new(task))).is_ok()
    }

    /// Activates the root and hands it to `driver`.
    ///
    /// # Errors
    /// - `StateConflict` if the root was started before
    /// - `ActivationFailed` if the activation hook failed; the root is
    ///   terminated in that case
    pub fn start(&self, driver: Driver) -> Result<(), RootError> {
        self.root.activate()?;
        let attached = match driver {
            Driver::Shared(scheduler) => {
                self.root.shared.driven.store(true, Ordering::SeqCst);
                scheduler.attach(self.clone())
            }
            Driver::Dedicated { tick } => match self.root.shared.timing.get() {
                Some(timing) => {
                    self.root.shared.driven.store(true, Ordering::SeqCst);
                    dedicated::spawn(self.clone(), tick, timing.clone())
                }
                None => Err(SchedulerError::ShutDown),
            },
            Driver::Manual => Ok(()),
        };
        if let Err(e) = attached {
            self.root.shared.driven.store(false, Ordering::SeqCst);
            self.root.request_shutdown();
            return Err(e.into());
        }
        Ok(())
    }

    /// Requests termination. Returns immediately.
    pub fn shutdown(&self) {
        debug!(root = %self.address, "Shutdown requested");
        self.root.request_shutdown();
    }

    /// Blocks until the root is terminated or `timeout` elapses.
    ///
    /// # Returns
    /// `true` if the root terminated.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        self.root.await_termination(timeout)
    }

    /// Hands the root's cycles to the calling thread.
    ///
    /// Any in-progress scheduled cycle is interrupted; the delegate takes
    /// over from its first `update`.
    pub fn attach_delegate(&self) -> Result<Delegate, RootError> {
        let state = self.state();
        if !state.is_active() {
            return Err(RootError::StateConflict {
                expected: RootState::ActiveIdle,
                actual: state,
            });
        }
        let token = self.root.next_delegate_token();
        if self
            .root
            .shared
            .queue
            .push(Envelope::Control(ControlMessage::AttachDelegate(token)))
            .is_err()
        {
            return Err(RootError::StateConflict {
                expected: RootState::ActiveIdle,
                actual: self.state(),
            });
        }
        self.root.interrupt();
        Ok(Delegate::new(Arc::clone(&self.root), token))
    }

    /// Enters the running sub-state on the next cycle.
    pub fn set_running(&self) -> bool {
        self.control(ControlMessage::SetRunning)
    }

    /// Enters the idle sub-state on the next cycle.
    pub fn set_idle(&self) -> bool {
        self.control(ControlMessage::SetIdle)
    }

    fn control(&self, message: ControlMessage) -> bool {
        self.root.shared.queue.push(Envelope::Control(message)).is_ok()
    }

    pub(crate) fn tick(&self, hub_time: Time) -> TickOutcome {
        self.root.tick(hub_time)
    }

    /// True if both controllers drive the same root instance.
    pub fn same_root(&self, other: &Controller) -> bool {
        Arc::ptr_eq(&self.root, &other.root)
    }

    pub(crate) fn is_root(&self, root: &Arc<Root>) -> bool {
        Arc::ptr_eq(&self.root, root)
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("address", &self.address.as_str())
            .field("state", &self.state())
            .field("queued", &self.root.shared.queue.len())
            .finish()
    }
}
