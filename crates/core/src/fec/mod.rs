//! Splitting messages into datagram-sized shards with erasure coding, and
//! putting them back together on the receiving side.

mod accumulator;
mod codec;
mod shard;

pub use accumulator::{CompletedFrame, ShardAccumulator, ShardStats};
pub use codec::{CodecKind, ErasureCodec, PassthroughCodec, ReedSolomonCodec, XorParityCodec};
pub use shard::{EncodedFrame, SHARD_HEADER_SIZE, ShardEncoder, ShardHeader};

use crate::net::CursorError;

#[derive(Debug, thiserror::Error)]
pub enum FecError {
    #[error("reconstruction failed: {present} shards present, {required} required")]
    ReconstructionFailed { present: usize, required: usize },
    #[error("truncated shard: {0}")]
    Truncated(#[from] CursorError),
    #[error("invalid shard header: {0}")]
    InvalidHeader(&'static str),
    #[error("shard size mismatch: expected {expected} bytes, got {actual}")]
    ShardSizeMismatch { expected: usize, actual: usize },
    #[error("erasure codec: {0}")]
    Codec(#[from] reed_solomon_erasure::Error),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("message too large: {len} bytes")]
    MessageTooLarge { len: usize },
}
