use std::collections::VecDeque;
use std::sync::Mutex;

/// Bounded FIFO queue feeding a protocol handler. Producers are device
/// callbacks, the consumer is the dispatcher thread; when the bound is hit
/// the newest entry is refused rather than evicting older ones.
pub(crate) struct InputQueue<T> {
    inner: Mutex<VecDeque<T>>,
    limit: usize,
}

impl<T> InputQueue<T> {
    pub fn new(limit: usize) -> InputQueue<T> {
        InputQueue {
            inner: Mutex::new(VecDeque::new()),
            limit,
        }
    }

    /// Appends `item` at the tail. Returns `false` if the queue is full, in
    /// which case the item is dropped.
    pub fn push(&self, item: T) -> bool {
        let mut queue = self.inner.lock().unwrap();
        if queue.len() >= self.limit {
            return false;
        }
        queue.push_back(item);
        true
    }

    pub fn pop(&self) -> Option<T> {
        self.inner.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let queue = InputQueue::new(8);
        assert!(queue.push(1));
        assert!(queue.push(2));
        assert!(queue.push(3));
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(3));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn full_queue_refuses_newest() {
        let queue = InputQueue::new(2);
        assert!(queue.push("a"));
        assert!(queue.push("b"));
        assert!(!queue.push("c"));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop(), Some("a"));
        assert!(queue.push("c"));
        assert_eq!(queue.pop(), Some("b"));
        assert_eq!(queue.pop(), Some("c"));
    }
}
