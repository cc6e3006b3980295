use crate::buffer::Bucket;
use bytes::{Bytes, BytesMut};
use std::fmt::Write;

/// Wraps a bucket payload into its wire representation.
///
/// Framing happens at send time in both modes, so the queue always holds bare
/// payloads and a failed send can requeue exactly the unsent payload suffix.
#[derive(Debug, Clone)]
pub enum TransportFramer {
    /// Plain TCP: the wire payload is the bucket bytes, unmodified.
    Raw,
    /// One HTTP/1.1 POST per bucket, `Connection: Close`, no reuse.
    Http { host: String, uri: String },
}

/// A framed bucket ready for transmission. `header_len` is zero in raw mode.
#[derive(Debug, Clone)]
pub struct WireFrame {
    pub bytes: Bytes,
    pub header_len: usize,
}

impl WireFrame {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl TransportFramer {
    pub fn frame(&self, bucket: &Bucket) -> WireFrame {
        match self {
            Self::Raw => WireFrame {
                bytes: bucket.payload().clone(),
                header_len: 0,
            },
            Self::Http { host, uri } => {
                // The checksum covers the payload exactly as transmitted,
                // i.e. post-compression when compression is enabled.
                let checksum = md5::compute(bucket.payload());
                let mut head = String::with_capacity(256);
                let _ = write!(head, "POST {uri} HTTP/1.1\r\n");
                let _ = write!(head, "Host: {host}\r\n");
                let _ = write!(head, "User-Agent: logship/{}\r\n", crate::VERSION);
                let _ = write!(head, "X-Checksum: md5,{checksum:x}\r\n");
                let _ = write!(head, "Content-Type: text/x-log\r\n");
                if bucket.compressed() {
                    let _ = write!(head, "Content-Encoding: gzip\r\n");
                }
                let _ = write!(head, "Content-Length: {}\r\n", bucket.len());
                let _ = write!(head, "Connection: Close\r\n\r\n");

                let mut bytes = BytesMut::with_capacity(head.len() + bucket.len());
                bytes.extend_from_slice(head.as_bytes());
                bytes.extend_from_slice(bucket.payload());
                WireFrame {
                    bytes: bytes.freeze(),
                    header_len: head.len(),
                }
            }
        }
    }

    /// Whether a response must be awaited after the frame is fully written.
    pub fn expects_ack(&self) -> bool {
        matches!(self, Self::Http { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(data: &[u8], compressed: bool) -> Bucket {
        Bucket::new(Bytes::copy_from_slice(data), compressed, 0)
    }

    fn http_framer() -> TransportFramer {
        TransportFramer::Http {
            host: "collector.example".to_string(),
            uri: "/ingest?src=edge".to_string(),
        }
    }

    #[test]
    fn test_raw_mode_passes_payload_through() {
        let frame = TransportFramer::Raw.frame(&bucket(b"raw bytes", false));
        assert_eq!(&frame.bytes[..], b"raw bytes");
        assert_eq!(frame.header_len, 0);
        assert!(!TransportFramer::Raw.expects_ack());
    }

    #[test]
    fn test_http_request_shape() {
        let frame = http_framer().frame(&bucket(b"line one\n", false));
        let text = std::str::from_utf8(&frame.bytes).unwrap();

        assert!(text.starts_with("POST /ingest?src=edge HTTP/1.1\r\n"));
        assert!(text.contains("Host: collector.example\r\n"));
        assert!(text.contains("Content-Type: text/x-log\r\n"));
        assert!(text.contains("Content-Length: 9\r\n"));
        assert!(text.contains("Connection: Close\r\n"));
        assert!(!text.contains("Content-Encoding"));
        assert!(text.ends_with("\r\n\r\nline one\n"));
    }

    #[test]
    fn test_http_header_len_splits_headers_from_payload() {
        let frame = http_framer().frame(&bucket(b"payload", false));
        assert_eq!(&frame.bytes[frame.header_len..], b"payload");
        assert!(frame.bytes[..frame.header_len].ends_with(b"\r\n\r\n"));
    }

    #[test]
    fn test_http_gzip_header_and_checksum() {
        let payload = b"\x1f\x8b pretend-compressed";
        let frame = http_framer().frame(&bucket(payload, true));
        let head = std::str::from_utf8(&frame.bytes[..frame.header_len]).unwrap();

        assert!(head.contains("Content-Encoding: gzip\r\n"));
        let expected = format!("X-Checksum: md5,{:x}\r\n", md5::compute(payload));
        assert!(head.contains(&expected));
    }
}
