//! Bounded lock-free queues carrying control messages between the host and
//! engine threads.

use std::mem;
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("queue is full")]
    Full,
    #[error("queue is empty")]
    Empty,
}

/// A bounded multi-producer multi-consumer queue shared by cloning.
///
/// Pushing never blocks; a full queue rejects the message with
/// [`QueueError::Full`].
pub struct MessageQueue<T> {
    queue: Arc<ArrayQueue<T>>,
}

impl<T> Clone for MessageQueue<T> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
        }
    }
}

impl<T> std::fmt::Debug for MessageQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageQueue")
            .field("len", &self.queue.len())
            .field("capacity", &self.queue.capacity())
            .finish()
    }
}

impl<T> MessageQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Arc::new(ArrayQueue::new(capacity.max(1))),
        }
    }

    /// Sizes the queue so that its slots occupy at most `bytes` bytes.
    pub fn with_byte_capacity(bytes: usize) -> Self {
        let slot = mem::size_of::<T>().max(1);
        Self::new(bytes / slot)
    }

    pub fn try_push(&self, value: T) -> Result<(), QueueError> {
        self.queue.push(value).map_err(|_| QueueError::Full)
    }

    pub fn try_pop(&self) -> Result<T, QueueError> {
        self.queue.pop().ok_or(QueueError::Empty)
    }

    /// Pops every queued message, handing each to `f`. Returns the number drained.
    pub fn drain_with<F>(&self, mut f: F) -> usize
    where
        F: FnMut(T),
    {
        let mut drained = 0;
        while let Some(value) = self.queue.pop() {
            f(value);
            drained += 1;
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }
}
