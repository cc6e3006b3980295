use super::bucket::Bucket;
use crate::stats::StatsRegistry;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

/// Bounded-memory FIFO of buckets waiting to be transmitted.
///
/// The byte budget covers the queued buckets plus whatever the connection
/// still has in flight; when it is exceeded, the **oldest** buckets are
/// evicted first. Newest data wins for tailing use cases.
#[derive(Debug)]
pub struct BucketQueue {
    buckets: VecDeque<Bucket>,
    bytes: u64,
    max_memory: u64,
    stats: Arc<StatsRegistry>,
}

impl BucketQueue {
    pub fn new(max_memory: u64, stats: Arc<StatsRegistry>) -> Self {
        Self {
            buckets: VecDeque::new(),
            bytes: 0,
            max_memory,
            stats,
        }
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Append a freshly cut bucket, then enforce the memory budget.
    pub fn enqueue(&mut self, bucket: Bucket) {
        self.bytes += bucket.len() as u64;
        self.buckets.push_back(bucket);
        self.evict_overflow();
    }

    /// Put a bucket back at the front so it is retried before newer data.
    pub fn requeue_front(&mut self, bucket: Bucket) {
        self.bytes += bucket.len() as u64;
        self.buckets.push_front(bucket);
        self.evict_overflow();
    }

    pub fn dequeue_front(&mut self) -> Option<Bucket> {
        let bucket = self.buckets.pop_front()?;
        self.bytes -= bucket.len() as u64;
        self.sync_gauges();
        Some(bucket)
    }

    /// Drop oldest buckets until queued bytes plus the in-flight remainder fit
    /// under the budget again. Returns the number of bytes dropped.
    pub fn evict_overflow(&mut self) -> u64 {
        let in_flight = self.stats.in_flight_bytes();
        let mut dropped = 0u64;
        while self.bytes + in_flight > self.max_memory {
            let Some(bucket) = self.buckets.pop_front() else {
                break;
            };
            self.bytes -= bucket.len() as u64;
            dropped += bucket.len() as u64;
            debug!(
                seq = bucket.seq(),
                bytes = bucket.len(),
                "memory budget exceeded, evicting oldest bucket"
            );
        }
        if dropped > 0 {
            self.stats.add_data_discarded(dropped);
        }
        self.sync_gauges();
        dropped
    }

    fn sync_gauges(&self) {
        self.stats.set_queued(self.buckets.len() as u64, self.bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn bucket(seq: u64, data: &str) -> Bucket {
        Bucket::new(Bytes::copy_from_slice(data.as_bytes()), false, seq)
    }

    fn queue(max_memory: u64) -> (BucketQueue, Arc<StatsRegistry>) {
        let stats = Arc::new(StatsRegistry::new());
        (BucketQueue::new(max_memory, stats.clone()), stats)
    }

    #[test]
    fn test_fifo_order() {
        let (mut q, _) = queue(1024);
        q.enqueue(bucket(0, "first\n"));
        q.enqueue(bucket(1, "second\n"));

        assert_eq!(q.dequeue_front().unwrap().seq(), 0);
        assert_eq!(q.dequeue_front().unwrap().seq(), 1);
        assert!(q.dequeue_front().is_none());
    }

    #[test]
    fn test_requeue_front_preserves_head_of_line() {
        let (mut q, _) = queue(1024);
        q.enqueue(bucket(0, "a\n"));
        q.enqueue(bucket(1, "b\n"));

        let head = q.dequeue_front().unwrap();
        q.requeue_front(head.remainder(0));

        assert_eq!(q.dequeue_front().unwrap().seq(), 0);
        assert_eq!(q.dequeue_front().unwrap().seq(), 1);
    }

    #[test]
    fn test_eviction_drops_oldest_and_counts_bytes() {
        let (mut q, stats) = queue(10);
        q.enqueue(bucket(0, "aaaaa")); // 5 bytes
        q.enqueue(bucket(1, "bbbbb")); // 5 bytes, still within budget
        assert_eq!(q.len(), 2);
        assert_eq!(stats.snapshot().data_discarded, 0);

        q.enqueue(bucket(2, "ccccc")); // pushes total to 15, evicts seq 0
        assert_eq!(q.len(), 2);
        assert_eq!(q.bytes(), 10);
        assert_eq!(stats.snapshot().data_discarded, 5);
        assert_eq!(q.dequeue_front().unwrap().seq(), 1);
    }

    #[test]
    fn test_eviction_accounts_for_in_flight_bytes() {
        let (mut q, stats) = queue(10);
        stats.set_in_flight_bytes(8);

        q.enqueue(bucket(0, "aaaa")); // 4 queued + 8 in flight > 10
        assert!(q.is_empty());
        assert_eq!(stats.snapshot().data_discarded, 4);
    }

    #[test]
    fn test_gauges_follow_queue_state() {
        let (mut q, stats) = queue(1024);
        q.enqueue(bucket(0, "abcd"));
        assert_eq!(stats.snapshot().queued_buckets, 1);
        assert_eq!(stats.snapshot().queued_bytes, 4);

        q.dequeue_front();
        assert_eq!(stats.snapshot().queued_buckets, 0);
        assert_eq!(stats.snapshot().queued_bytes, 0);
    }
}
