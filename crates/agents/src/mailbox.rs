//! Bounded agent inbox.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use alpha_core::config::BackpressurePolicy;
use alpha_core::{Error, Result};
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::message::AgentMessage;

/// What happened to a sent message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// Queued after evicting the oldest pending message.
    DroppedOldest,
}

/// FIFO inbox with a fixed capacity.
///
/// When full, `Block` makes the sender wait for space and `DropOldest`
/// evicts the oldest pending message.
#[derive(Debug)]
pub struct Mailbox {
    queue: Mutex<VecDeque<AgentMessage>>,
    capacity: usize,
    policy: BackpressurePolicy,
    closed: AtomicBool,
    dropped: AtomicU64,
    readable: Notify,
    writable: Notify,
}

impl Mailbox {
    pub fn new(capacity: usize, policy: BackpressurePolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            policy,
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            readable: Notify::new(),
            writable: Notify::new(),
        }
    }

    pub async fn send(&self, message: AgentMessage) -> Result<Delivery> {
        let mut message = Some(message);
        loop {
            {
                let mut queue = self.queue.lock();
                if self.is_closed() {
                    return Err(Error::agent("mailbox closed"));
                }
                if queue.len() < self.capacity {
                    queue.extend(message.take());
                    drop(queue);
                    self.readable.notify_one();
                    return Ok(Delivery::Queued);
                }
                if self.policy == BackpressurePolicy::DropOldest {
                    queue.pop_front();
                    queue.extend(message.take());
                    drop(queue);
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    self.readable.notify_one();
                    return Ok(Delivery::DroppedOldest);
                }
            }
            self.writable.notified().await;
        }
    }

    /// Next message; `None` once the mailbox is closed and empty.
    pub async fn recv(&self) -> Option<AgentMessage> {
        loop {
            {
                let mut queue = self.queue.lock();
                if let Some(message) = queue.pop_front() {
                    drop(queue);
                    self.writable.notify_one();
                    return Some(message);
                }
                if self.is_closed() {
                    return None;
                }
            }
            self.readable.notified().await;
        }
    }

    /// Pop the next message without waiting.
    pub fn try_recv(&self) -> Option<AgentMessage> {
        let message = self.queue.lock().pop_front()?;
        self.writable.notify_one();
        Some(message)
    }

    /// `recv` with a deadline; `None` on timeout as well.
    pub async fn recv_timeout(&self, timeout: Duration) -> Option<AgentMessage> {
        tokio::time::timeout(timeout, self.recv()).await.ok().flatten()
    }

    /// Discard everything pending. Returns the number discarded.
    pub fn drain(&self) -> usize {
        let drained = {
            let mut queue = self.queue.lock();
            let n = queue.len();
            queue.clear();
            n
        };
        self.writable.notify_one();
        drained
    }

    /// Refuse further sends and wake any waiters.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.readable.notify_waiters();
        self.readable.notify_one();
        self.writable.notify_waiters();
        self.writable.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Messages evicted by `DropOldest`.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
