pub mod bucket;
pub mod bucketizer;
pub mod queue;
pub mod raw;

pub use bucket::Bucket;
pub use bucketizer::{Bucketizer, BucketizerConfig, BufferError};
pub use queue::BucketQueue;
pub use raw::RawBuffer;
