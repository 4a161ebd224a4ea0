use std::collections::HashMap;

use canopy_api::CallId;

use crate::proxy::PeerId;
use crate::wire::Message;

/// A peer message turned into a local call that awaits its answer.
#[derive(Debug, Clone)]
pub struct ReceivedCall {
    pub message: Message,
    pub peer: PeerId,
}

/// Local call id to the peer message it was created from.
#[derive(Debug, Default)]
pub struct ReceivedCalls {
    entries: HashMap<CallId, ReceivedCall>,
}

impl ReceivedCalls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, local_id: CallId, message: Message, peer: PeerId) {
        self.entries.insert(local_id, ReceivedCall { message, peer });
    }

    pub fn take(&mut self, local_id: CallId) -> Option<ReceivedCall> {
        self.entries.remove(&local_id)
    }

    /// Forgets every call received from `peer`.
    pub fn remove_peer(&mut self, peer: PeerId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, received| received.peer != peer);
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
