//! Bounded single-consumer queue decoupling producers from the network
//! writer task. Pushes never block; a full queue rejects the element and the
//! caller decides whether that is a drop or an error.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use tokio::sync::Notify;

#[derive(Debug)]
struct Inner<T> {
    queue: VecDeque<T>,
    closed: bool,
}

#[derive(Debug)]
pub struct WriteQueue<T> {
    inner: Mutex<Inner<T>>,
    notify: Notify,
    capacity: usize,
}

impl<T> WriteQueue<T> {
    pub fn new(capacity: usize) -> Arc<Self> {
        assert!(capacity > 0);
        Arc::new(Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
        })
    }

    /// Returns false when the queue is full or closed; the element is not
    /// enqueued in either case.
    pub fn push(&self, item: T) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed || inner.queue.len() >= self.capacity {
            return false;
        }
        inner.queue.push_back(item);
        drop(inner);
        self.notify.notify_one();
        true
    }

    /// Waits for the next element. After `close` the remaining elements
    /// drain in order, then every pull returns `None`.
    pub async fn pull(&self) -> Option<T> {
        loop {
            {
                let mut inner = self.inner.lock().unwrap();
                if let Some(item) = inner.queue.pop_front() {
                    return Some(item);
                }
                if inner.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Idempotent; wakes a parked consumer.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return;
        }
        inner.closed = true;
        drop(inner);
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn push_full_returns_false() {
        let queue = WriteQueue::new(2);
        assert!(queue.push(1));
        assert!(queue.push(2));
        assert!(!queue.push(3));
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn pull_in_push_order() {
        let queue = WriteQueue::new(8);
        queue.push(1);
        queue.push(2);
        queue.push(3);
        assert_eq!(queue.pull().await, Some(1));
        assert_eq!(queue.pull().await, Some(2));
        assert_eq!(queue.pull().await, Some(3));
    }

    #[tokio::test]
    async fn close_wakes_parked_consumer() {
        let queue = WriteQueue::<u32>::new(4);
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pull().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();
        let pulled = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer should wake on close")
            .unwrap();
        assert_eq!(pulled, None);
    }

    #[tokio::test]
    async fn close_drains_pending_elements_first() {
        let queue = WriteQueue::new(4);
        queue.push(1);
        queue.push(2);
        queue.close();
        assert!(!queue.push(3), "push after close is rejected");
        assert_eq!(queue.pull().await, Some(1));
        assert_eq!(queue.pull().await, Some(2));
        assert_eq!(queue.pull().await, None);
        assert_eq!(queue.pull().await, None);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let queue = WriteQueue::<u32>::new(1);
        queue.close();
        queue.close();
        assert!(queue.is_closed());
    }

    #[tokio::test]
    async fn consumer_sees_elements_pushed_while_parked() {
        let queue = WriteQueue::new(4);
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pull().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(queue.push(42));
        let pulled = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pulled, Some(42));
    }
}
