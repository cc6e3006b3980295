use bytes::Bytes;

/// One discrete, independently transmissible unit of log data.
///
/// The payload is immutable and already compressed when compression is
/// enabled; protocol framing is applied later, at send time.
#[derive(Debug, Clone)]
pub struct Bucket {
    payload: Bytes,
    compressed: bool,
    seq: u64,
}

impl Bucket {
    pub fn new(payload: Bytes, compressed: bool, seq: u64) -> Self {
        Self {
            payload,
            compressed,
            seq,
        }
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn compressed(&self) -> bool {
        self.compressed
    }

    /// FIFO creation order. A requeued remainder keeps the sequence number of
    /// the bucket it was split from.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Remaining payload after `sent` bytes have been delivered, as a fresh
    /// bucket sharing the underlying allocation.
    pub fn remainder(&self, sent: usize) -> Self {
        let at = sent.min(self.payload.len());
        Self {
            payload: self.payload.slice(at..),
            compressed: self.compressed,
            seq: self.seq,
        }
    }
}
