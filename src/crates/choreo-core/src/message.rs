//! Runtime messages and per-role FIFO buffers
//!
//! A [`Message`] is one in-flight labeled payload between two roles. Ids and
//! timestamps are monotonic `u64`s assigned by the sending simulator, which
//! keeps runs deterministic and traces comparable.
//!
//! A [`MessageBuffer`] is the receiving side's mailbox: one FIFO queue per
//! sender. Two actions share a channel iff their `(from, to)` pairs coincide,
//! and within one channel reception order equals delivery order.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::cfg::{Label, RoleName};

/// A channel identity: the ordered pair of sender and receiver
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Channel {
    /// Sending role
    pub from: RoleName,
    /// Receiving role
    pub to: RoleName,
}

impl Channel {
    /// Construct a channel identity
    pub fn new(from: impl Into<RoleName>, to: impl Into<RoleName>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

/// One in-flight message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique id, monotonic per sending simulator
    pub id: u64,
    /// Sending role
    pub from: RoleName,
    /// Receiving role
    pub to: RoleName,
    /// Message label
    pub label: Label,
    /// Optional payload type tag
    pub payload_type: Option<String>,
    /// Logical send timestamp, monotonic per sending simulator
    pub timestamp: u64,
}

/// Per-sender FIFO queues for one receiving role
///
/// The buffer enforces an optional per-queue capacity; a delivery that would
/// exceed it is rejected without mutating the queue.
///
/// # Examples
///
/// ```rust
/// use choreo_core::message::{Message, MessageBuffer};
///
/// let mut buffer = MessageBuffer::new(0); // unbounded
/// buffer.enqueue(Message {
///     id: 0,
///     from: "A".to_string(),
///     to: "B".to_string(),
///     label: "Hello".to_string(),
///     payload_type: None,
///     timestamp: 0,
/// }).unwrap();
///
/// assert_eq!(buffer.head("A").unwrap().label, "Hello");
/// let popped = buffer.dequeue_head("A").unwrap();
/// assert_eq!(popped.id, 0);
/// assert!(buffer.is_empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBuffer {
    queues: BTreeMap<RoleName, VecDeque<Message>>,
    capacity: usize,
}

impl MessageBuffer {
    /// Create a buffer; `capacity` 0 means unbounded queues
    pub fn new(capacity: usize) -> Self {
        Self {
            queues: BTreeMap::new(),
            capacity,
        }
    }

    /// Configured per-queue capacity (0 = unbounded)
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a message to its sender's queue
    ///
    /// Returns the queue length after the append, or `Err(())` when the
    /// queue is at capacity; callers translate that into their own
    /// `buffer-overflow` error. The buffer is untouched on failure.
    pub fn enqueue(&mut self, message: Message) -> Result<usize, ()> {
        let queue = self.queues.entry(message.from.clone()).or_default();
        if self.capacity > 0 && queue.len() >= self.capacity {
            return Err(());
        }
        queue.push_back(message);
        Ok(queue.len())
    }

    /// The message at the head of `sender`'s queue, if any
    pub fn head(&self, sender: &str) -> Option<&Message> {
        self.queues.get(sender).and_then(|q| q.front())
    }

    /// Pop the head of `sender`'s queue
    pub fn dequeue_head(&mut self, sender: &str) -> Option<Message> {
        self.queues.get_mut(sender).and_then(|q| q.pop_front())
    }

    /// Position of the first message from `sender` carrying `label`
    pub fn position_of(&self, sender: &str, label: &str) -> Option<usize> {
        self.queues
            .get(sender)
            .and_then(|q| q.iter().position(|m| m.label == label))
    }

    /// Remove the first message from `sender` carrying `label`
    ///
    /// Used by the relaxed (non-FIFO-verified) reception mode; the caller
    /// checks head status separately when FIFO verification is on.
    pub fn dequeue_label(&mut self, sender: &str, label: &str) -> Option<Message> {
        let queue = self.queues.get_mut(sender)?;
        let pos = queue.iter().position(|m| m.label == label)?;
        queue.remove(pos)
    }

    /// Messages waiting from `sender`
    pub fn queue_len(&self, sender: &str) -> usize {
        self.queues.get(sender).map(VecDeque::len).unwrap_or(0)
    }

    /// Total messages waiting across all senders
    pub fn total_len(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    /// Whether all queues are empty
    pub fn is_empty(&self) -> bool {
        self.queues.values().all(VecDeque::is_empty)
    }

    /// Senders with at least one waiting message, in sorted order
    pub fn senders(&self) -> Vec<&RoleName> {
        self.queues
            .iter()
            .filter(|(_, q)| !q.is_empty())
            .map(|(s, _)| s)
            .collect()
    }

    /// Drop all queued messages
    pub fn clear(&mut self) {
        self.queues.clear();
    }
}
