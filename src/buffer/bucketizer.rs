use super::bucket::Bucket;
use super::queue::BucketQueue;
use super::raw::RawBuffer;
use crate::stats::StatsRegistry;
use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::trace;

#[derive(Error, Debug)]
pub enum BufferError {
    #[error("gzip compression failed: {0}")]
    Compression(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct BucketizerConfig {
    /// Nominal bucket size (pre-compression).
    pub write_size: usize,
    /// Disable line-boundary-aware cutting.
    pub binary: bool,
    /// Gzip level, `None` disables compression.
    pub compression: Option<u32>,
    /// Age after which a partial buffer is cut anyway.
    pub buffer_lifetime: Duration,
}

/// Owns the raw accumulation buffer and decides where bucket boundaries fall.
///
/// Text mode cuts at the rightmost newline so every bucket (except a forced
/// final one) ends on a line boundary. The alternative of cutting at the first
/// newline past `write_size` would bound bucket sizes more tightly but produce
/// many more buckets; this implementation deliberately favors fewer, fuller
/// buckets.
#[derive(Debug)]
pub struct Bucketizer {
    raw: RawBuffer,
    write_size: usize,
    binary: bool,
    compression: Option<Compression>,
    buffer_lifetime: Duration,
    next_seq: u64,
    stats: Arc<StatsRegistry>,
}

impl Bucketizer {
    pub fn new(config: BucketizerConfig, stats: Arc<StatsRegistry>) -> Self {
        Self {
            raw: RawBuffer::new(),
            write_size: config.write_size,
            binary: config.binary,
            compression: config.compression.map(Compression::new),
            buffer_lifetime: config.buffer_lifetime,
            next_seq: 0,
            stats,
        }
    }

    pub fn append(&mut self, chunk: &[u8]) {
        self.raw.append(chunk);
        self.stats.set_buffer_len(self.raw.len() as u64);
    }

    pub fn buffered_len(&self) -> usize {
        self.raw.len()
    }

    /// Cut as many buckets as the thresholds allow and enqueue them.
    ///
    /// Returns the number of buckets created. With `force` the whole buffer is
    /// drained regardless of `write_size`; staleness of the buffer also forces
    /// a cut.
    pub fn cut(&mut self, force: bool, queue: &mut BucketQueue) -> Result<usize, BufferError> {
        let force = force || self.raw.is_stale(self.buffer_lifetime);
        let mut created = 0usize;

        loop {
            let len = self.raw.len();
            if !((force && len > 0) || len >= self.write_size) {
                break;
            }

            let size = if self.binary {
                if force { len } else { self.write_size.min(len) }
            } else {
                match self.raw.rightmost_newline() {
                    Some(pos) => pos + 1,
                    // An unterminated line: cut it whole rather than waiting
                    // for a newline that may never arrive. Only reachable once
                    // the buffer has outgrown write_size or under force.
                    None => len,
                }
            };
            if size == 0 {
                // Backpressure: nothing cuttable this pass.
                break;
            }

            let slice = self.raw.split_to(size);
            let (payload, compressed) = match self.compression {
                Some(level) => (gzip(&slice, level)?, true),
                None => (slice, false),
            };

            let bucket = Bucket::new(payload, compressed, self.next_seq);
            trace!(
                seq = self.next_seq,
                raw_bytes = size,
                bucket_bytes = bucket.len(),
                compressed,
                "bucket cut"
            );
            self.next_seq += 1;
            created += 1;
            self.stats.incr_buckets_created();
            queue.enqueue(bucket);
        }

        self.stats.set_buffer_len(self.raw.len() as u64);
        Ok(created)
    }

    #[cfg(test)]
    pub fn backdate_buffer(&mut self, by: Duration) {
        self.raw.backdate_last_append(by);
    }
}

fn gzip(data: &[u8], level: Compression) -> Result<Bytes, BufferError> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2 + 32), level);
    encoder.write_all(data)?;
    Ok(Bytes::from(encoder.finish()?))
}
