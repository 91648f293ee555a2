//! # Deferred Queue
//!
//! FIFO of records that were not sent when they arrived. Bounded when a
//! capacity is configured: pushing onto a full queue evicts the oldest item.
//! Only the monitor drains it, one item per tick.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::codec::Record;

/// Why a record ended up in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "score")]
pub enum DeferReason {
    /// Quality score at the time of the send.
    LowQuality(u8),
    /// The retry budget ran out.
    SendFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingItem {
    pub record: Record,
    pub enqueued_at: DateTime<Utc>,
    pub reason: DeferReason,
}

impl PendingItem {
    pub fn new(record: Record, reason: DeferReason) -> Self {
        PendingItem {
            record,
            enqueued_at: Utc::now(),
            reason,
        }
    }
}

#[derive(Debug, Default)]
pub struct DeferredQueue {
    items: VecDeque<PendingItem>,
    capacity: Option<usize>,
    dropped: u64,
}

impl DeferredQueue {
    /// `None` capacity is unbounded.
    pub fn new(capacity: Option<usize>) -> Self {
        DeferredQueue {
            items: VecDeque::new(),
            capacity: capacity.filter(|c| *c > 0),
            dropped: 0,
        }
    }

    /// Append to the back. Returns the evicted item if the queue was full.
    pub fn push(&mut self, item: PendingItem) -> Option<PendingItem> {
        let evicted = match self.capacity {
            Some(cap) if self.items.len() >= cap => self.items.pop_front(),
            _ => None,
        };
        if evicted.is_some() {
            self.dropped += 1;
            warn!(
                capacity = self.capacity.unwrap_or(0),
                dropped = self.dropped,
                "deferred queue full, evicted oldest"
            );
        }
        self.items.push_back(item);
        evicted
    }

    /// Put an item back at the head, where it came from.
    ///
    /// On a full queue the newest item is evicted instead.
    pub fn push_front(&mut self, item: PendingItem) -> Option<PendingItem> {
        let evicted = match self.capacity {
            Some(cap) if self.items.len() >= cap => self.items.pop_back(),
            _ => None,
        };
        if evicted.is_some() {
            self.dropped += 1;
            warn!(dropped = self.dropped, "deferred queue full, evicted newest");
        }
        self.items.push_front(item);
        evicted
    }

    pub fn pop_front(&mut self) -> Option<PendingItem> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Items evicted because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Remove everything, oldest first.
    pub fn drain(&mut self) -> Vec<PendingItem> {
        self.items.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(n: i64) -> PendingItem {
        let mut record = Record::new();
        record.insert("n".into(), json!(n));
        PendingItem::new(record, DeferReason::LowQuality(20))
    }

    fn n(item: &PendingItem) -> i64 {
        item.record["n"].as_i64().unwrap()
    }

    #[test]
    fn fifo_order() {
        let mut q = DeferredQueue::new(None);
        for i in 0..3 {
            q.push(item(i));
        }
        assert_eq!(q.len(), 3);
        assert_eq!(n(&q.pop_front().unwrap()), 0);
        assert_eq!(n(&q.pop_front().unwrap()), 1);
    }

    #[test]
    fn full_queue_drops_oldest() {
        let mut q = DeferredQueue::new(Some(2));
        q.push(item(0));
        q.push(item(1));
        let evicted = q.push(item(2)).unwrap();
        assert_eq!(n(&evicted), 0);
        assert_eq!(q.dropped(), 1);
        let left: Vec<i64> = q.drain().iter().map(n).collect();
        assert_eq!(left, vec![1, 2]);
        assert!(q.is_empty());
    }

    #[test]
    fn push_front_restores_head() {
        let mut q = DeferredQueue::new(Some(3));
        q.push(item(1));
        q.push(item(2));
        let head = q.pop_front().unwrap();
        q.push_front(head);
        assert_eq!(n(&q.pop_front().unwrap()), 1);
    }

    #[test]
    fn zero_capacity_means_unbounded() {
        let mut q = DeferredQueue::new(Some(0));
        for i in 0..1000 {
            assert!(q.push(item(i)).is_none());
        }
        assert_eq!(q.capacity(), None);
    }

    #[test]
    fn pending_item_serializes_reason() {
        let json = serde_json::to_value(item(7)).unwrap();
        assert_eq!(json["reason"]["kind"], "low_quality");
        assert_eq!(json["reason"]["score"], 20);
        let back: PendingItem = serde_json::from_value(json).unwrap();
        assert_eq!(n(&back), 7);
    }
}
