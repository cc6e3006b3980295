// Lock-free pipeline statistics using atomic operations.
//
// Every stage of the pipeline records its own counters here; the registry is
// shared behind an `Arc` and snapshots can be taken at any time without
// pausing the pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters and occupancy gauges for the whole forwarding pipeline.
///
/// Counters are monotonically non-decreasing; the `*_len`/`*_bytes` gauges
/// reflect current occupancy and move in both directions.
#[derive(Debug, Default)]
pub struct StatsRegistry {
    read_bytes: AtomicU64,
    written_bytes: AtomicU64,
    data_discarded: AtomicU64,
    read_errors: AtomicU64,
    write_errors: AtomicU64,
    output_connections: AtomicU64,
    buckets_created: AtomicU64,
    server_rejects: AtomicU64,
    retries_without_transfer: AtomicU64,
    buffer_len: AtomicU64,
    queued_bytes: AtomicU64,
    queued_buckets: AtomicU64,
    in_flight_bytes: AtomicU64,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_read_bytes(&self, n: u64) {
        self.read_bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_written_bytes(&self, n: u64) {
        self.written_bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_data_discarded(&self, n: u64) {
        self.data_discarded.fetch_add(n, Ordering::Relaxed);
    }

    pub fn incr_read_errors(&self) {
        self.read_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_write_errors(&self) {
        self.write_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_output_connections(&self) {
        self.output_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_buckets_created(&self) {
        self.buckets_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_server_rejects(&self) {
        self.server_rejects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_retries_without_transfer(&self, n: u64) {
        self.retries_without_transfer.store(n, Ordering::Relaxed);
    }

    pub fn set_buffer_len(&self, n: u64) {
        self.buffer_len.store(n, Ordering::Relaxed);
    }

    pub fn set_queued(&self, buckets: u64, bytes: u64) {
        self.queued_buckets.store(buckets, Ordering::Relaxed);
        self.queued_bytes.store(bytes, Ordering::Relaxed);
    }

    pub fn set_in_flight_bytes(&self, n: u64) {
        self.in_flight_bytes.store(n, Ordering::Relaxed);
    }

    pub fn in_flight_bytes(&self) -> u64 {
        self.in_flight_bytes.load(Ordering::Relaxed)
    }

    /// Bytes currently held anywhere in the pipeline: the raw accumulation
    /// buffer, the pending bucket queue and the partially sent frame.
    pub fn total_buffered(&self) -> u64 {
        self.buffer_len.load(Ordering::Relaxed)
            + self.queued_bytes.load(Ordering::Relaxed)
            + self.in_flight_bytes.load(Ordering::Relaxed)
    }

    /// Get a snapshot of current statistics (lock-free, side-effect free).
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            read_bytes: self.read_bytes.load(Ordering::Relaxed),
            written_bytes: self.written_bytes.load(Ordering::Relaxed),
            data_discarded: self.data_discarded.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            output_connections: self.output_connections.load(Ordering::Relaxed),
            buckets_created: self.buckets_created.load(Ordering::Relaxed),
            server_rejects: self.server_rejects.load(Ordering::Relaxed),
            retries_without_transfer: self.retries_without_transfer.load(Ordering::Relaxed),
            buffer_len: self.buffer_len.load(Ordering::Relaxed),
            queued_bytes: self.queued_bytes.load(Ordering::Relaxed),
            queued_buckets: self.queued_buckets.load(Ordering::Relaxed),
            in_flight_bytes: self.in_flight_bytes.load(Ordering::Relaxed),
        }
    }
}

/// Immutable snapshot of pipeline statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub read_bytes: u64,
    pub written_bytes: u64,
    pub data_discarded: u64,
    pub read_errors: u64,
    pub write_errors: u64,
    pub output_connections: u64,
    pub buckets_created: u64,
    pub server_rejects: u64,
    pub retries_without_transfer: u64,
    pub buffer_len: u64,
    pub queued_bytes: u64,
    pub queued_buckets: u64,
    pub in_flight_bytes: u64,
}

impl StatsSnapshot {
    /// Bytes currently held anywhere in the pipeline.
    pub fn total_buffered(&self) -> u64 {
        self.buffer_len + self.queued_bytes + self.in_flight_bytes
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "read {}B written {}B discarded {}B | buffer {}B queue {} bucket(s) ({}B) in-flight {}B | \
             buckets {} connections {} rejects {} | read errors {} write errors {} stalled polls {}",
            self.read_bytes,
            self.written_bytes,
            self.data_discarded,
            self.buffer_len,
            self.queued_buckets,
            self.queued_bytes,
            self.in_flight_bytes,
            self.buckets_created,
            self.output_connections,
            self.server_rejects,
            self.read_errors,
            self.write_errors,
            self.retries_without_transfer,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_basic_counters() {
        let stats = StatsRegistry::new();

        stats.add_read_bytes(1024);
        stats.add_read_bytes(2048);
        stats.incr_buckets_created();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.read_bytes, 3072);
        assert_eq!(snapshot.buckets_created, 1);
        assert_eq!(snapshot.written_bytes, 0);
    }

    #[test]
    fn test_total_buffered_tracks_gauges() {
        let stats = StatsRegistry::new();

        stats.set_buffer_len(100);
        stats.set_queued(2, 300);
        stats.set_in_flight_bytes(50);
        assert_eq!(stats.total_buffered(), 450);

        stats.set_in_flight_bytes(0);
        assert_eq!(stats.total_buffered(), 400);
        assert_eq!(stats.snapshot().total_buffered(), 400);
    }

    #[test]
    fn test_concurrent_access() {
        let stats = Arc::new(StatsRegistry::new());
        let mut handles = vec![];

        for _ in 0..8 {
            let stats = Arc::clone(&stats);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    stats.add_read_bytes(1);
                    stats.incr_output_connections();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.read_bytes, 8000);
        assert_eq!(snapshot.output_connections, 8000);
    }

    #[test]
    fn test_snapshot_json_round_trip() {
        let stats = StatsRegistry::new();
        stats.add_read_bytes(42);
        stats.set_queued(3, 900);

        let json = serde_json::to_string(&stats.snapshot()).unwrap();
        let parsed: StatsSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, stats.snapshot());
        assert_eq!(parsed.read_bytes, 42);
        assert_eq!(parsed.queued_buckets, 3);
    }

    #[test]
    fn test_display_is_single_line() {
        let stats = StatsRegistry::new();
        stats.add_read_bytes(10);
        let line = stats.snapshot().to_string();
        assert!(line.contains("read 10B"));
        assert!(!line.contains('\n'));
    }
}
