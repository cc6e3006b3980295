use bytes::{Bytes, BytesMut};
use std::time::{Duration, Instant};

/// Append-only accumulation buffer for input that has not been cut into a
/// bucket yet.
///
/// Prefix removal goes through `BytesMut::split_to`, so cutting a bucket never
/// copies the remaining bytes.
#[derive(Debug)]
pub struct RawBuffer {
    buf: BytesMut,
    last_append: Instant,
}

impl Default for RawBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl RawBuffer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
            last_append: Instant::now(),
        }
    }

    pub fn append(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
        self.last_append = Instant::now();
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// True when data has been sitting here longer than `lifetime` without a
    /// cut. Used for the "flush after N seconds even if not full" rule.
    pub fn is_stale(&self, lifetime: Duration) -> bool {
        !self.buf.is_empty() && self.last_append.elapsed() >= lifetime
    }

    /// Offset of the rightmost newline, scanned from the end.
    pub fn rightmost_newline(&self) -> Option<usize> {
        self.buf.iter().rposition(|&b| b == b'\n')
    }

    /// Remove and return the first `n` bytes.
    pub fn split_to(&mut self, n: usize) -> Bytes {
        self.buf.split_to(n).freeze()
    }

    #[cfg(test)]
    pub fn backdate_last_append(&mut self, by: Duration) {
        self.last_append -= by;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_split() {
        let mut raw = RawBuffer::new();
        raw.append(b"hello ");
        raw.append(b"world");
        assert_eq!(raw.len(), 11);

        let head = raw.split_to(6);
        assert_eq!(&head[..], b"hello ");
        assert_eq!(raw.len(), 5);
    }

    #[test]
    fn test_rightmost_newline() {
        let mut raw = RawBuffer::new();
        raw.append(b"one\ntwo\npartial");
        assert_eq!(raw.rightmost_newline(), Some(7));

        let mut no_newline = RawBuffer::new();
        no_newline.append(b"partial");
        assert_eq!(no_newline.rightmost_newline(), None);
    }

    #[test]
    fn test_staleness() {
        let mut raw = RawBuffer::new();
        assert!(!raw.is_stale(Duration::ZERO));

        raw.append(b"x");
        assert!(raw.is_stale(Duration::ZERO));
        assert!(!raw.is_stale(Duration::from_secs(60)));

        raw.backdate_last_append(Duration::from_secs(120));
        assert!(raw.is_stale(Duration::from_secs(60)));
    }
}
