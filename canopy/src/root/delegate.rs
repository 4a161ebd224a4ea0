use std::fmt;
use std::sync::Arc;

use canopy_api::Time;

use super::core::Root;
use super::envelope::{ControlMessage, Envelope};

/// # Delegate
///
/// An external driver of a root, e.g. an audio callback or a UI timer.
/// Each `update` runs one full cycle on the calling thread.
///
/// Dropping the delegate detaches it.
pub struct Delegate {
    root: Arc<Root>,
    token: u64,
    detached: bool,
}

impl Delegate {
    pub(crate) fn new(root: Arc<Root>, token: u64) -> Self {
        Self {
            root,
            token,
            detached: false,
        }
    }

    /// Runs one cycle at `time`.
    ///
    /// # Returns
    /// `false` once the root has terminated.
    pub fn update(&self, time: Time) -> bool {
        self.root.delegate_cycle(self.token, time)
    }

    /// Hands the root back to its scheduler.
    pub fn detach(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.detached {
            return;
        }
        self.detached = true;
        let queued = self
            .root
            .shared
            .queue
            .push(Envelope::Control(ControlMessage::DetachDelegate(self.token)))
            .is_ok();
        if queued {
            // Run the detach now; the scheduler skips a delegated root.
            let now = self
                .root
                .shared
                .timing
                .get()
                .map_or(Time::MIN, |timing| timing.clock.now());
            self.root.delegate_cycle(self.token, now);
        }
    }
}

impl Drop for Delegate {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Delegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delegate")
            .field("token", &self.token)
            .field("detached", &self.detached)
            .finish()
    }
}
