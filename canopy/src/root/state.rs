use std::sync::atomic::{AtomicUsize, Ordering};

/// Lifecycle state of a root.
///
/// States are strictly ordered except for the `ActiveIdle`/`ActiveRunning`
/// oscillation inside the active super-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RootState {
    New = 0,
    Initializing = 1,
    Initialized = 2,
    ActiveIdle = 3,
    ActiveRunning = 4,
    Terminating = 5,
    Terminated = 6,
}

impl RootState {
    fn from_usize(value: usize) -> Self {
        match value {
            0 => RootState::New,
            1 => RootState::Initializing,
            2 => RootState::Initialized,
            3 => RootState::ActiveIdle,
            4 => RootState::ActiveRunning,
            5 => RootState::Terminating,
            _ => RootState::Terminated,
        }
    }

    pub fn is_active(self) -> bool {
        matches!(self, RootState::ActiveIdle | RootState::ActiveRunning)
    }

    /// True once termination has been requested.
    pub fn is_ending(self) -> bool {
        self >= RootState::Terminating
    }
}

/// Atomic cell holding a [`RootState`].
#[derive(Debug)]
pub(crate) struct StateCell {
    value: AtomicUsize,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        Self {
            value: AtomicUsize::new(RootState::New as usize),
        }
    }

    pub(crate) fn get(&self) -> RootState {
        RootState::from_usize(self.value.load(Ordering::SeqCst))
    }

    pub(crate) fn set(&self, state: RootState) {
        self.value.store(state as usize, Ordering::SeqCst);
    }

    /// Moves from `expected` to `next`, returning the actual state on failure.
    pub(crate) fn transition(&self, expected: RootState, next: RootState) -> Result<(), RootState> {
        self.value
            .compare_exchange(expected as usize, next as usize, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(RootState::from_usize)
    }

    /// Requests termination from any non-terminal state.
    ///
    /// Returns the state that was replaced, or `None` if termination was
    /// already requested.
    pub(crate) fn request_termination(&self) -> Option<RootState> {
        let mut current = self.get();
        loop {
            if current.is_ending() {
                return None;
            }
            match self.transition(current, RootState::Terminating) {
                Ok(()) => return Some(current),
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_reports_actual_state() {
        let cell = StateCell::new();
        assert_eq!(
            cell.transition(RootState::Initialized, RootState::ActiveIdle),
            Err(RootState::New)
        );
        assert!(cell.transition(RootState::New, RootState::Initializing).is_ok());
        assert_eq!(cell.get(), RootState::Initializing);
    }

    #[test]
    fn test_termination_requested_once() {
        let cell = StateCell::new();
        cell.set(RootState::ActiveRunning);
        assert_eq!(cell.request_termination(), Some(RootState::ActiveRunning));
        assert_eq!(cell.request_termination(), None);
        assert_eq!(cell.get(), RootState::Terminating);
    }

    #[test]
    fn test_ordering() {
        assert!(RootState::ActiveIdle.is_active());
        assert!(!RootState::Terminating.is_active());
        assert!(RootState::Terminated.is_ending());
        assert!(!RootState::ActiveRunning.is_ending());
    }
}
