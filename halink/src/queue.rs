//! FIFO message queue used four times per link.
//!
//! A message is owned by exactly one queue at a time and moves between
//! them by value.

use std::collections::VecDeque;
use std::fmt;

use crate::config::QueueConfig;
use crate::error::{LinkError, LinkResult};
use crate::message::Message;
use crate::types::Tag;

/// Role of a queue inside a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    /// Received, not yet consumed by the application.
    Inbound,
    /// Sent by the application, not yet transmitted.
    Outbound,
    /// Transmitted and acknowledged.
    Delivered,
    /// Transmission failed, or drained at shutdown.
    NotDelivered,
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueueKind::Inbound => "inbound",
            QueueKind::Outbound => "outbound",
            QueueKind::Delivered => "delivered",
            QueueKind::NotDelivered => "not-delivered",
        };
        f.write_str(name)
    }
}

/// FIFO of messages with an optional capacity.
#[derive(Debug)]
pub struct MessageQueue {
    kind: QueueKind,
    items: VecDeque<Message>,
    capacity: Option<usize>,
}

impl MessageQueue {
    /// Create an empty queue.
    pub fn new(kind: QueueKind, config: QueueConfig) -> Self {
        Self {
            kind,
            items: VecDeque::new(),
            capacity: config.capacity,
        }
    }

    /// Unbounded queue.
    pub fn unbounded(kind: QueueKind) -> Self {
        Self::new(kind, QueueConfig::unbounded())
    }

    /// Role of this queue.
    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    /// Append at the tail. Refused when the queue is at capacity.
    pub fn enqueue(&mut self, msg: Message) -> LinkResult<()> {
        if let Some(capacity) = self.capacity
            && self.items.len() >= capacity
        {
            return Err(LinkError::QueueFull {
                queue: self.kind,
                capacity,
            });
        }
        self.items.push_back(msg);
        Ok(())
    }

    /// Pop the head.
    pub fn dequeue(&mut self) -> Option<Message> {
        self.items.pop_front()
    }

    /// Look at the head without removing it.
    pub fn peek(&self) -> Option<&Message> {
        self.items.front()
    }

    /// Find a queued message by tag.
    pub fn find(&self, tag: Tag) -> Option<&Message> {
        self.items.iter().find(|m| m.tag == tag)
    }

    /// Whether a message with `tag` is queued.
    pub fn contains(&self, tag: Tag) -> bool {
        self.find(tag).is_some()
    }

    /// Take every queued message, head first.
    pub fn drain(&mut self) -> impl Iterator<Item = Message> + '_ {
        self.items.drain(..)
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether another message would be refused.
    pub fn is_full(&self) -> bool {
        self.capacity.is_some_and(|c| self.items.len() >= c)
    }
}
