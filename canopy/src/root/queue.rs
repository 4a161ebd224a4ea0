use std::sync::{PoisonError, RwLock};

use crossbeam_queue::SegQueue;

use super::envelope::Envelope;

/// Multi-producer inbound queue of a root.
///
/// Pushing never blocks on other producers: pushes share a read latch and
/// only `close` takes it exclusively, so nothing can slip in after the
/// final drain.
#[derive(Debug, Default)]
pub(crate) struct InboundQueue {
    items: SegQueue<Envelope>,
    closed: RwLock<bool>,
}

impl InboundQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Enqueues an item, handing it back if the queue is closed.
    pub(crate) fn push(&self, envelope: Envelope) -> Result<(), Envelope> {
        let closed = self.closed.read().unwrap_or_else(PoisonError::into_inner);
        if *closed {
            return Err(envelope);
        }
        self.items.push(envelope);
        Ok(())
    }

    pub(crate) fn pop(&self) -> Option<Envelope> {
        self.items.pop()
    }

    /// Rejects all further pushes.
    pub(crate) fn close(&self) {
        *self.closed.write().unwrap_or_else(PoisonError::into_inner) = true;
    }

    pub(crate) fn is_closed(&self) -> bool {
        *self.closed.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::root::envelope::ControlMessage;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_closed_queue_hands_item_back() {
        let queue = InboundQueue::new();
        assert!(queue.push(Envelope::Control(ControlMessage::SetIdle)).is_ok());
        queue.close();
        assert!(queue.is_closed());
        let rejected = queue.push(Envelope::Control(ControlMessage::SetRunning));
        assert!(matches!(rejected, Err(Envelope::Control(ControlMessage::SetRunning))));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_per_producer_order_kept() {
        let queue = Arc::new(InboundQueue::new());
        let handles: Vec<_> = (0..4u64)
            .map(|producer| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for n in 0..100u64 {
                        let token = producer * 1000 + n;
                        assert!(queue.push(Envelope::Control(ControlMessage::AttachDelegate(token))).is_ok());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut last = [None::<u64>; 4];
        let mut count = 0;
        while let Some(Envelope::Control(ControlMessage::AttachDelegate(token))) = queue.pop() {
            let producer = (token / 1000) as usize;
            if let Some(previous) = last[producer] {
                assert!(token > previous);
            }
            last[producer] = Some(token);
            count += 1;
        }
        assert_eq!(count, 400);
    }
}
