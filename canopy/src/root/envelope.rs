use std::cmp::Ordering;
use std::fmt;

use canopy_api::{Call, Time};

/// Deferred work run on the root's own thread.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Internal control messages used for driver and sub-state changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// A delegate takes over driving the root.
    AttachDelegate(u64),

    /// The delegate hands control back to the scheduler.
    DetachDelegate(u64),

    /// Enter the running sub-state.
    SetRunning,

    /// Enter the idle sub-state.
    SetIdle,
}

/// An item in a root's inbound queue.
pub enum Envelope {
    /// A time-stamped call
    Packet(Call),

    /// A deferred task
    Task(Task),

    Control(ControlMessage),
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Envelope::Packet(call) => f.debug_tuple("Packet").field(call).finish(),
            Envelope::Task(_) => f.write_str("Task(<closure>)"),
            Envelope::Control(control) => f.debug_tuple("Control").field(control).finish(),
        }
    }
}

/// A packet parked until local time reaches its time code.
///
/// Ordered so that a `BinaryHeap` pops the earliest time first and, for
/// equal times, the packet that arrived first.
pub(crate) struct Held {
    pub(crate) time: Time,
    pub(crate) seq: u64,
    pub(crate) call: Call,
}

impl PartialEq for Held {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for Held {}

impl PartialOrd for Held {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Held {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_api::ControlAddress;
    use std::collections::BinaryHeap;

    fn call(time: Time) -> Call {
        let to: ControlAddress = "/a!b".parse().unwrap();
        Call::invoke_quiet(to.clone(), to, time, vec![])
    }

    #[test]
    fn test_heap_pops_earliest_then_first_arrived() {
        let mut heap = BinaryHeap::new();
        heap.push(Held { time: 30, seq: 0, call: call(30) });
        heap.push(Held { time: 10, seq: 2, call: call(10) });
        heap.push(Held { time: 10, seq: 1, call: call(10) });
        let order: Vec<(Time, u64)> = std::iter::from_fn(|| heap.pop().map(|h| (h.time, h.seq))).collect();
        assert_eq!(order, vec![(10, 1), (10, 2), (30, 0)]);
    }
}
