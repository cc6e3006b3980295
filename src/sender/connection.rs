use super::framer::{TransportFramer, WireFrame};
use crate::buffer::{Bucket, BucketQueue};
use crate::stats::StatsRegistry;
use bytes::BytesMut;
use std::future::{Future, poll_fn};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Poll;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::{debug, trace, warn};

/// Upper bound on bytes pushed per write iteration.
pub const WRITE_CHUNK_SIZE: usize = 8192;

/// Response headers larger than this are treated as a stalled peer.
const MAX_RESPONSE_HEADER: usize = 16 * 1024;

type ConnectFuture = Pin<Box<dyn Future<Output = io::Result<TcpStream>> + Send>>;

#[derive(Error, Debug)]
enum TransportFailure {
    #[error("connect failed: {0}")]
    Connect(io::Error),
    #[error("peer closed the connection before the exchange completed")]
    PeerClosed,
    #[error("zero-length write on a writable connection")]
    ZeroWrite,
    #[error("write failed: {0}")]
    Write(io::Error),
    #[error("response read failed: {0}")]
    Read(io::Error),
    #[error("no transfer progress after {0} polls")]
    RetryBudgetExhausted(u32),
    #[error("response headers never terminated")]
    OversizedResponse,
}

/// Outcome of a single state-machine step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Bytes moved or the queue advanced.
    Progress,
    /// Waiting on the peer (or throttled); call again later.
    Pending,
    /// Nothing to send.
    Idle,
}

struct InFlight {
    bucket: Bucket,
    frame: WireFrame,
    pos: usize,
}

enum ConnState {
    Idle,
    Throttled { until: Instant },
    Connecting { connect: ConnectFuture, inflight: InFlight },
    Writing { stream: TcpStream, inflight: InFlight },
    AwaitingAck { stream: TcpStream, inflight: InFlight, response: BytesMut },
}

#[derive(Debug, Clone)]
pub struct ConnectionStateMachineConfig {
    /// Collector address as `host:port`.
    pub addr: String,
    pub framer: TransportFramer,
    /// Cooldown after a transport failure during which no connection attempt
    /// is made.
    pub throttle_time: Duration,
    /// Consecutive zero-progress polls tolerated before the in-flight send is
    /// abandoned.
    pub max_retry_without_transfer: u32,
    /// Requeue buckets rejected with a non-200 status instead of counting and
    /// moving on.
    pub retry_on_reject: bool,
}

/// Drives the single outbound connection through connect, partial writes,
/// acknowledgement and retry/throttle bookkeeping. All socket operations are
/// non-blocking; every `poll` call returns promptly.
pub struct ConnectionStateMachine {
    addr: String,
    framer: TransportFramer,
    throttle_time: Duration,
    max_retry_without_transfer: u32,
    retry_on_reject: bool,
    state: ConnState,
    // Raw mode keeps the connection across buckets; HTTP sends
    // `Connection: Close` and never reuses one.
    idle_stream: Option<TcpStream>,
    zero_progress: u32,
    stats: Arc<StatsRegistry>,
}

impl ConnectionStateMachine {
    pub fn new(config: ConnectionStateMachineConfig, stats: Arc<StatsRegistry>) -> Self {
        Self {
            addr: config.addr,
            framer: config.framer,
            throttle_time: config.throttle_time,
            max_retry_without_transfer: config.max_retry_without_transfer.max(1),
            retry_on_reject: config.retry_on_reject,
            state: ConnState::Idle,
            idle_stream: None,
            zero_progress: 0,
            stats,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, ConnState::Idle)
    }

    /// Advance the connection by one step. At most one write and one read
    /// syscall are attempted per call.
    pub async fn poll(&mut self, queue: &mut BucketQueue) -> StepOutcome {
        loop {
            match std::mem::replace(&mut self.state, ConnState::Idle) {
                ConnState::Idle => {
                    let Some(bucket) = queue.dequeue_front() else {
                        return StepOutcome::Idle;
                    };
                    let frame = self.framer.frame(&bucket);
                    self.stats.set_in_flight_bytes(frame.len() as u64);
                    self.reset_progress();
                    let inflight = InFlight {
                        bucket,
                        frame,
                        pos: 0,
                    };
                    if let Some(stream) = self.idle_stream.take() {
                        self.state = ConnState::Writing { stream, inflight };
                    } else {
                        self.stats.incr_output_connections();
                        debug!(addr = %self.addr, seq = inflight.bucket.seq(), "connecting to collector");
                        let connect: ConnectFuture = Box::pin(TcpStream::connect(self.addr.clone()));
                        self.state = ConnState::Connecting { connect, inflight };
                    }
                }
                ConnState::Throttled { until } => {
                    if Instant::now() < until {
                        self.state = ConnState::Throttled { until };
                        return StepOutcome::Pending;
                    }
                    debug!("throttle expired, resuming");
                }
                ConnState::Connecting {
                    mut connect,
                    inflight,
                } => {
                    // A single poll of the stored connect future; handshake
                    // completion is observed on a later call if still pending.
                    let polled = poll_fn(|cx| Poll::Ready(connect.as_mut().poll(cx))).await;
                    match polled {
                        Poll::Ready(Ok(stream)) => {
                            trace!(addr = %self.addr, "connection established");
                            self.reset_progress();
                            self.state = ConnState::Writing { stream, inflight };
                        }
                        Poll::Ready(Err(e)) => {
                            self.fail(queue, inflight, &TransportFailure::Connect(e));
                            return StepOutcome::Pending;
                        }
                        Poll::Pending => {
                            if self.stall() {
                                let failure = TransportFailure::RetryBudgetExhausted(
                                    self.max_retry_without_transfer,
                                );
                                self.fail(queue, inflight, &failure);
                            } else {
                                self.state = ConnState::Connecting { connect, inflight };
                            }
                            return StepOutcome::Pending;
                        }
                    }
                }
                ConnState::Writing {
                    stream,
                    mut inflight,
                } => {
                    if inflight.pos < inflight.frame.len() {
                        let end = (inflight.pos + WRITE_CHUNK_SIZE).min(inflight.frame.len());
                        match stream.try_write(&inflight.frame.bytes[inflight.pos..end]) {
                            Ok(0) => {
                                drop(stream);
                                self.fail(queue, inflight, &TransportFailure::ZeroWrite);
                                return StepOutcome::Pending;
                            }
                            Ok(n) => {
                                trace!(bytes = n, seq = inflight.bucket.seq(), "partial write");
                                inflight.pos += n;
                                self.stats.add_written_bytes(n as u64);
                                self.stats
                                    .set_in_flight_bytes((inflight.frame.len() - inflight.pos) as u64);
                                self.reset_progress();
                                if inflight.pos < inflight.frame.len() {
                                    self.state = ConnState::Writing { stream, inflight };
                                    return StepOutcome::Progress;
                                }
                            }
                            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                                if self.stall() {
                                    drop(stream);
                                    let failure = TransportFailure::RetryBudgetExhausted(
                                        self.max_retry_without_transfer,
                                    );
                                    self.fail(queue, inflight, &failure);
                                } else {
                                    self.state = ConnState::Writing { stream, inflight };
                                }
                                return StepOutcome::Pending;
                            }
                            Err(e) => {
                                drop(stream);
                                self.fail(queue, inflight, &TransportFailure::Write(e));
                                return StepOutcome::Pending;
                            }
                        }
                    }

                    // Frame fully written.
                    if !self.framer.expects_ack() {
                        debug!(seq = inflight.bucket.seq(), "bucket transmitted");
                        self.stats.set_in_flight_bytes(0);
                        self.idle_stream = Some(stream);
                        self.state = ConnState::Idle;
                        return StepOutcome::Progress;
                    }
                    self.state = ConnState::AwaitingAck {
                        stream,
                        inflight,
                        response: BytesMut::with_capacity(1024),
                    };
                }
                ConnState::AwaitingAck {
                    stream,
                    inflight,
                    mut response,
                } => {
                    let mut chunk = [0u8; 8192];
                    match stream.try_read(&mut chunk) {
                        Ok(0) => {
                            drop(stream);
                            self.fail(queue, inflight, &TransportFailure::PeerClosed);
                            return StepOutcome::Pending;
                        }
                        Ok(n) => {
                            response.extend_from_slice(&chunk[..n]);
                            self.reset_progress();
                            if let Some(end) = find_header_end(&response) {
                                drop(stream);
                                return self.on_response(queue, inflight, &response[..end]);
                            }
                            if response.len() > MAX_RESPONSE_HEADER {
                                drop(stream);
                                self.fail(queue, inflight, &TransportFailure::OversizedResponse);
                                return StepOutcome::Pending;
                            }
                            self.state = ConnState::AwaitingAck {
                                stream,
                                inflight,
                                response,
                            };
                            return StepOutcome::Progress;
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            if self.stall() {
                                drop(stream);
                                let failure = TransportFailure::RetryBudgetExhausted(
                                    self.max_retry_without_transfer,
                                );
                                self.fail(queue, inflight, &failure);
                            } else {
                                self.state = ConnState::AwaitingAck {
                                    stream,
                                    inflight,
                                    response,
                                };
                            }
                            return StepOutcome::Pending;
                        }
                        Err(e) => {
                            drop(stream);
                            self.fail(queue, inflight, &TransportFailure::Read(e));
                            return StepOutcome::Pending;
                        }
                    }
                }
            }
        }
    }

    /// Full header block received; the status line decides the bucket's fate.
    /// The connection is already closed (`Connection: Close`).
    fn on_response(
        &mut self,
        queue: &mut BucketQueue,
        inflight: InFlight,
        head: &[u8],
    ) -> StepOutcome {
        if status_is_200(head) {
            debug!(seq = inflight.bucket.seq(), "bucket delivered and acknowledged");
            self.stats.set_in_flight_bytes(0);
            self.state = ConnState::Idle;
            return StepOutcome::Progress;
        }

        let status_line = String::from_utf8_lossy(first_line(head)).into_owned();
        warn!(seq = inflight.bucket.seq(), %status_line, "collector rejected bucket");
        self.stats.incr_server_rejects();
        self.stats.set_in_flight_bytes(0);
        if self.retry_on_reject {
            queue.requeue_front(inflight.bucket);
            self.state = self.throttled_state();
        } else {
            // Application-level rejection still advances the queue; only
            // transport failures trigger a retry.
            self.state = ConnState::Idle;
        }
        StepOutcome::Progress
    }

    fn fail(&mut self, queue: &mut BucketQueue, inflight: InFlight, failure: &TransportFailure) {
        warn!(seq = inflight.bucket.seq(), error = %failure, "transport failure");
        self.stats.incr_write_errors();
        self.stats.set_in_flight_bytes(0);

        let sent_payload = inflight.pos.saturating_sub(inflight.frame.header_len);
        let remainder = inflight.bucket.remainder(sent_payload);
        if !remainder.is_empty() {
            if sent_payload > 0 {
                // The unsent suffix goes back as a new, smaller bucket.
                self.stats.incr_buckets_created();
            }
            queue.requeue_front(remainder);
        }

        self.reset_progress();
        self.state = self.throttled_state();
    }

    fn throttled_state(&self) -> ConnState {
        if self.throttle_time.is_zero() {
            ConnState::Idle
        } else {
            ConnState::Throttled {
                until: Instant::now() + self.throttle_time,
            }
        }
    }

    fn reset_progress(&mut self) {
        self.zero_progress = 0;
        self.stats.set_retries_without_transfer(0);
    }

    /// Record one zero-progress poll; true when the retry budget is spent.
    fn stall(&mut self) -> bool {
        self.zero_progress += 1;
        self.stats.set_retries_without_transfer(self.zero_progress as u64);
        self.zero_progress >= self.max_retry_without_transfer
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn first_line(head: &[u8]) -> &[u8] {
    let end = head
        .windows(2)
        .position(|w| w == b"\r\n")
        .unwrap_or(head.len());
    &head[..end]
}

fn status_is_200(head: &[u8]) -> bool {
    let mut parts = first_line(head).split(|&b| b == b' ').filter(|p| !p.is_empty());
    match (parts.next(), parts.next()) {
        (Some(proto), Some(code)) => proto.starts_with(b"HTTP/") && code == b"200",
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_header_end() {
        assert_eq!(find_header_end(b"HTTP/1.1 200 OK\r\n\r\nbody"), Some(15));
        assert_eq!(find_header_end(b"HTTP/1.1 200 OK\r\n"), None);
        assert_eq!(find_header_end(b""), None);
    }

    #[test]
    fn test_status_line_parsing() {
        assert!(status_is_200(b"HTTP/1.1 200 OK\r\nServer: x\r\n"));
        assert!(status_is_200(b"HTTP/1.0 200\r\n"));
        assert!(!status_is_200(b"HTTP/1.1 503 Service Unavailable\r\n"));
        assert!(!status_is_200(b"HTTP/1.1\r\n"));
        assert!(!status_is_200(b"SMTP 200 nope\r\n"));
        assert!(!status_is_200(b""));
    }

    #[test]
    fn test_first_line() {
        assert_eq!(first_line(b"HTTP/1.1 200 OK\r\nRest"), b"HTTP/1.1 200 OK");
        assert_eq!(first_line(b"no terminator"), b"no terminator");
    }
}
