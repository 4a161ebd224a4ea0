use std::collections::{HashMap, VecDeque};

use canopy_api::{Call, CallId, Time};

#[derive(Debug)]
struct SentCall {
    call: Call,
    sent_at: Time,
}

/// Calls sent to a peer and still waiting for an answer.
///
/// Entries are kept in insertion order. Send times are taken from the
/// owning root's monotonic clock, so insertion order is also time order and
/// expiry can stop at the first live entry that has not expired.
#[derive(Debug, Default)]
pub struct SentCalls {
    entries: HashMap<CallId, SentCall>,
    /// Insertion order; may hold ids already answered
    order: VecDeque<CallId>,
}

impl SentCalls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, call: Call, sent_at: Time) {
        let id = call.id();
        if self.entries.insert(id, SentCall { call, sent_at }).is_none() {
            self.order.push_back(id);
        }
    }

    /// Removes the call answered by `match_id`.
    pub fn take(&mut self, match_id: CallId) -> Option<Call> {
        let entry = self.entries.remove(&match_id)?;
        self.compact();
        Some(entry.call)
    }

    /// Removes every call sent at or before `cutoff`, oldest first.
    pub fn expire(&mut self, cutoff: Time) -> Vec<Call> {
        let mut expired = Vec::new();
        while let Some(id) = self.order.front().copied() {
            match self.entries.get(&id) {
                None => {
                    self.order.pop_front();
                }
                Some(entry) if entry.sent_at <= cutoff => {
                    self.order.pop_front();
                    if let Some(entry) = self.entries.remove(&id) {
                        expired.push(entry.call);
                    }
                }
                Some(_) => break,
            }
        }
        expired
    }

    /// Removes every call, oldest first.
    pub fn drain(&mut self) -> Vec<Call> {
        let mut calls = Vec::with_capacity(self.entries.len());
        for id in self.order.drain(..) {
            if let Some(entry) = self.entries.remove(&id) {
                calls.push(entry.call);
            }
        }
        calls
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops answered ids once they dominate the order queue.
    fn compact(&mut self) {
        if self.order.len() > 2 * self.entries.len() + 64 {
            let entries = &self.entries;
            self.order.retain(|id| entries.contains_key(id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_api::ControlAddress;

    fn call() -> Call {
        let to: ControlAddress = "/peer/osc1!frequency".parse().unwrap();
        let from: ControlAddress = "/local/ctl!out".parse().unwrap();
        Call::invoke(to, from, 0, vec![])
    }

    #[test]
    fn test_expire_in_insertion_order() {
        let mut sent = SentCalls::new();
        let first = call();
        let second = call();
        let third = call();
        sent.insert(first.clone(), 100);
        sent.insert(second.clone(), 150);
        sent.insert(third.clone(), 300);

        let expired: Vec<CallId> = sent.expire(150).iter().map(Call::id).collect();
        assert_eq!(expired, vec![first.id(), second.id()]);
        assert_eq!(sent.len(), 1);
        assert!(sent.take(third.id()).is_some());
    }

    #[test]
    fn test_answered_calls_skipped() {
        let mut sent = SentCalls::new();
        let first = call();
        let second = call();
        sent.insert(first.clone(), 10);
        sent.insert(second.clone(), 20);
        assert!(sent.take(first.id()).is_some());
        assert!(sent.take(first.id()).is_none());

        let expired = sent.expire(100);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id(), second.id());
        assert!(sent.is_empty());
    }

    #[test]
    fn test_drain_keeps_order() {
        let mut sent = SentCalls::new();
        let calls: Vec<Call> = (0..5).map(|_| call()).collect();
        for (index, call) in calls.iter().enumerate() {
            sent.insert(call.clone(), index as Time);
        }
        sent.take(calls[2].id());
        let drained: Vec<CallId> = sent.drain().iter().map(Call::id).collect();
        assert_eq!(drained, vec![calls[0].id(), calls[1].id(), calls[3].id(), calls[4].id()]);
    }

    #[test]
    fn test_order_compacted() {
        let mut sent = SentCalls::new();
        for _ in 0..500 {
            let call = call();
            sent.insert(call.clone(), 0);
            sent.take(call.id());
        }
        assert!(sent.order.len() <= 64);
    }
}
