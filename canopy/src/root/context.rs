use std::sync::{Arc, Weak};

use canopy_api::{Call, ComponentAddress, Time, Value};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::RootError;
use crate::hub::Hub;

use super::controller::Controller;
use super::core::Root;
use super::envelope::Envelope;
use super::state::RootState;

/// Listener fired with the root's local time on every running cycle.
pub type ClockListener = Box<dyn FnMut(Time) + Send + 'static>;

/// Behavior executed by a root.
///
/// All methods run on whichever thread currently drives the root, but never
/// concurrently: a root's behavior is only ever entered by one update cycle
/// at a time.
///
/// # Failure handling
/// An error or panic escaping `process_call` is logged and, if the call is a
/// request, answered with a `processing-failed` error. A failure escaping
/// `activate` aborts startup and terminates the root.
pub trait RootBehavior: Send + 'static {
    /// Called once when the root is started.
    fn activate(&mut self, _ctx: &mut RootContext<'_>) -> Result<(), RootError> {
        Ok(())
    }

    /// Handles a call whose time code has been reached.
    fn process_call(&mut self, ctx: &mut RootContext<'_>, call: Call) -> Result<(), RootError>;

    /// Called once per update cycle after the clock listeners.
    fn update(&mut self, _ctx: &mut RootContext<'_>) {}

    /// Called once when the root terminates, before its queue is drained.
    fn terminate(&mut self, _ctx: &mut RootContext<'_>) {}
}

/// Root-local state reachable from a behavior.
pub(crate) struct RootEnv {
    pub(crate) address: ComponentAddress,
    pub(crate) hub: Weak<Hub>,
    pub(crate) clock: Arc<dyn Clock>,
    /// Local time, never decreasing
    pub(crate) time: Time,
    pub(crate) listeners: Vec<ClockListener>,
}

/// # Root Context
///
/// The view a behavior gets of its root while it is being driven.
///
/// ## Key Concepts
/// - Local time: the root's own monotonic clock, advanced once per cycle
/// - Dispatch: calls sent from here are routed by the hub
/// - Deferred work: tasks queued with `invoke_later` run on a later cycle
pub struct RootContext<'a> {
    root: &'a Arc<Root>,
    env: &'a mut RootEnv,
}

impl<'a> RootContext<'a> {
    pub(crate) fn new(root: &'a Arc<Root>, env: &'a mut RootEnv) -> Self {
        Self { root, env }
    }

    pub fn address(&self) -> &ComponentAddress {
        &self.env.address
    }

    /// The root's local time.
    pub fn time(&self) -> Time {
        self.env.time
    }

    /// Current hub time, which may be ahead of local time.
    pub fn hub_time(&self) -> Time {
        self.env.clock.now()
    }

    pub fn hub(&self) -> Option<Arc<Hub>> {
        self.env.hub.upgrade()
    }

    /// A controller for this root.
    pub fn controller(&self) -> Controller {
        Controller::new(Arc::clone(self.root), self.env.address.clone())
    }

    pub fn state(&self) -> RootState {
        self.root.shared.state.get()
    }

    /// Routes a call through the hub.
    pub fn send(&self, call: Call) {
        match self.env.hub.upgrade() {
            Some(hub) => hub.dispatch(call),
            None => warn!(root = %self.env.address, call = %call, "Hub is gone; dropping call"),
        }
    }

    /// Sends a successful reply if the call requires one.
    pub fn reply(&self, call: &Call, args: Vec<Value>) {
        if !call.requires_reply() {
            return;
        }
        match call.reply(args) {
            Ok(reply) => self.send(reply),
            Err(e) => warn!(root = %self.env.address, error = %e, "Cannot reply"),
        }
    }

    /// Sends an error reply for a request; answers are ignored.
    pub fn fail(&self, call: &Call, kind: &str, message: impl Into<String>) {
        if !call.is_request() {
            debug!(root = %self.env.address, call = %call, kind, "Not answering a reply with an error");
            return;
        }
        match call.error_with(kind, message) {
            Ok(error) => self.send(error),
            Err(e) => warn!(root = %self.env.address, error = %e, "Cannot send error reply"),
        }
    }

    /// Queues a task to run on a later cycle of this root.
    pub fn invoke_later(&self, task: impl FnOnce() + Send + 'static) -> bool {
        self.root.shared.queue.push(Envelope::Task(Box::new(task))).is_ok()
    }

    pub fn add_clock_listener(&mut self, listener: impl FnMut(Time) + Send + 'static) {
        self.env.listeners.push(Box::new(listener));
    }

    pub fn set_running(&self) {
        let _ = self
            .root
            .shared
            .state
            .transition(RootState::ActiveIdle, RootState::ActiveRunning);
    }

    pub fn set_idle(&self) {
        let _ = self
            .root
            .shared
            .state
            .transition(RootState::ActiveRunning, RootState::ActiveIdle);
    }

    pub fn is_running(&self) -> bool {
        self.state() == RootState::ActiveRunning
    }

    /// Requests termination; it completes at the end of the current cycle.
    pub fn shutdown(&self) {
        if self.root.shared.state.request_termination().is_some() {
            debug!(root = %self.env.address, "Termination requested from within the root");
        }
    }
}
