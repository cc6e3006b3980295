use super::config::{Config, ConfigError, Destination};
use crate::buffer::{Bucketizer, BucketizerConfig, BucketQueue};
use crate::input::{InputReader, ReadOutcome};
use crate::sender::{
    ConnectionStateMachine, ConnectionStateMachineConfig, StepOutcome, TransportFramer,
};
use crate::stats::StatsRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tracing::{trace, warn};

/// Progress report for one input poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadProgress {
    /// Bytes were read (and buffered or discarded).
    Data(usize),
    /// No input available right now.
    Idle,
    /// The source is exhausted.
    Eof,
}

/// Result of draining the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Queue empty, nothing in flight.
    Drained,
    /// The zero-progress budget ran out with data still pending.
    GaveUp,
    /// No collector is configured; buckets remain queued.
    NoTransport,
}

/// The assembled pipeline: reader, bucketizer, queue and connection, driven
/// cooperatively by an external loop calling `poll_read` / `poll_write`.
pub struct Forwarder {
    reader: InputReader,
    bucketizer: Bucketizer,
    queue: BucketQueue,
    connection: Option<ConnectionStateMachine>,
    stats: Arc<StatsRegistry>,
    max_memory: u64,
    flush_idle_budget: u32,
}

impl Forwarder {
    pub fn new(
        config: &Config,
        source: Box<dyn AsyncRead + Send + Unpin>,
    ) -> Result<Self, ConfigError> {
        let stats = Arc::new(StatsRegistry::new());

        let reader = InputReader::new(source, config.read_size as usize);
        let bucketizer = Bucketizer::new(
            BucketizerConfig {
                write_size: config.write_size as usize,
                binary: config.binary,
                compression: config.compression.then_some(config.compression_level),
                buffer_lifetime: config.buffer_lifetime,
            },
            stats.clone(),
        );
        let queue = BucketQueue::new(config.max_memory, stats.clone());

        let connection = match config.destination()? {
            Destination::None => None,
            Destination::Raw { addr } => Some(ConnectionStateMachine::new(
                ConnectionStateMachineConfig {
                    addr,
                    framer: TransportFramer::Raw,
                    throttle_time: config.throttle_time,
                    max_retry_without_transfer: config.max_retry_without_transfer,
                    retry_on_reject: config.retry_on_reject,
                },
                stats.clone(),
            )),
            Destination::Http { addr, host, uri } => Some(ConnectionStateMachine::new(
                ConnectionStateMachineConfig {
                    addr,
                    framer: TransportFramer::Http { host, uri },
                    throttle_time: config.throttle_time,
                    max_retry_without_transfer: config.max_retry_without_transfer,
                    retry_on_reject: config.retry_on_reject,
                },
                stats.clone(),
            )),
        };

        // Budget for flush(): generous enough to ride out one throttle window
        // at the ~1ms pace flush polls at.
        let throttle_ms = config.throttle_time.as_millis() as u32;
        let flush_idle_budget = 1000u32
            .max(config.max_retry_without_transfer.saturating_mul(4))
            .max(throttle_ms.saturating_mul(2));

        Ok(Self {
            reader,
            bucketizer,
            queue,
            connection,
            stats,
            max_memory: config.max_memory,
            flush_idle_budget,
        })
    }

    pub fn stats(&self) -> Arc<StatsRegistry> {
        self.stats.clone()
    }

    /// Poll the input once. Read bytes are counted, then either buffered (and
    /// possibly cut into buckets) or discarded when the memory ceiling is
    /// already exceeded.
    pub async fn poll_read(&mut self) -> ReadProgress {
        match self.reader.read().await {
            Ok(ReadOutcome::Data(chunk)) => {
                let n = chunk.len();
                self.stats.add_read_bytes(n as u64);
                if self.stats.total_buffered() > self.max_memory {
                    self.stats.add_data_discarded(n as u64);
                    trace!(bytes = n, "memory ceiling reached, discarding input");
                } else {
                    self.bucketizer.append(&chunk);
                    if let Err(e) = self.bucketizer.cut(false, &mut self.queue) {
                        warn!(error = %e, "bucket cut failed");
                    }
                }
                ReadProgress::Data(n)
            }
            Ok(ReadOutcome::Pending) => ReadProgress::Idle,
            Ok(ReadOutcome::Eof) => ReadProgress::Eof,
            Err(e) => {
                self.stats.incr_read_errors();
                warn!(error = %e, "input read error");
                ReadProgress::Idle
            }
        }
    }

    /// Advance the output side by one step: pick up stale buffers, then step
    /// the connection state machine.
    pub async fn poll_write(&mut self) -> StepOutcome {
        if let Err(e) = self.bucketizer.cut(false, &mut self.queue) {
            warn!(error = %e, "bucket cut failed");
        }
        match self.connection.as_mut() {
            Some(connection) => connection.poll(&mut self.queue).await,
            None => StepOutcome::Idle,
        }
    }

    /// Synchronously drain the pipeline: force-cut whatever is buffered, then
    /// step the connection until everything has left the process or the
    /// zero-progress budget runs out.
    ///
    /// "Drained" means local buffers are empty; it is not a remote
    /// persistence guarantee.
    pub async fn flush(&mut self) -> FlushOutcome {
        if let Err(e) = self.bucketizer.cut(true, &mut self.queue) {
            warn!(error = %e, "final bucket cut failed");
        }

        let Some(connection) = self.connection.as_mut() else {
            return if self.queue.is_empty() {
                FlushOutcome::Drained
            } else {
                FlushOutcome::NoTransport
            };
        };

        let mut idle_iterations = 0u32;
        while !(self.queue.is_empty() && connection.is_idle()) {
            match connection.poll(&mut self.queue).await {
                StepOutcome::Progress => idle_iterations = 0,
                StepOutcome::Pending | StepOutcome::Idle => {
                    idle_iterations += 1;
                    if idle_iterations >= self.flush_idle_budget {
                        warn!(
                            queued_buckets = self.queue.len(),
                            queued_bytes = self.queue.bytes(),
                            "flush gave up with data still pending"
                        );
                        return FlushOutcome::GaveUp;
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        FlushOutcome::Drained
    }
}
