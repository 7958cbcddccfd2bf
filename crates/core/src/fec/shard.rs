use log::trace;

use super::FecError;
use super::codec::ErasureCodec;
use crate::net::{MAX_DATAGRAM_SIZE, PayloadCursor};

pub const SHARD_HEADER_SIZE: usize = 18;

/// Header prefixed to every shard datagram.
///
/// Layout, little-endian: `frame_index u64 | shard_index u16 |
/// data_shard_count u16 | parity_shard_count u16 | message_len u32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardHeader {
    pub frame_index: u64,
    pub shard_index: u16,
    pub data_shard_count: u16,
    pub parity_shard_count: u16,
    pub message_len: u32,
}

impl ShardHeader {
    pub fn total_shards(&self) -> usize {
        usize::from(self.data_shard_count) + usize::from(self.parity_shard_count)
    }

    pub fn is_parity(&self) -> bool {
        self.shard_index >= self.data_shard_count
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.frame_index.to_le_bytes());
        out.extend_from_slice(&self.shard_index.to_le_bytes());
        out.extend_from_slice(&self.data_shard_count.to_le_bytes());
        out.extend_from_slice(&self.parity_shard_count.to_le_bytes());
        out.extend_from_slice(&self.message_len.to_le_bytes());
    }

    pub fn decode(cursor: &mut PayloadCursor) -> Result<Self, FecError> {
        let header = Self {
            frame_index: cursor.read_u64()?,
            shard_index: cursor.read_u16()?,
            data_shard_count: cursor.read_u16()?,
            parity_shard_count: cursor.read_u16()?,
            message_len: cursor.read_u32()?,
        };

        if header.data_shard_count == 0 {
            return Err(FecError::InvalidHeader("no data shards"));
        }
        if usize::from(header.shard_index) >= header.total_shards() {
            return Err(FecError::InvalidHeader("shard index out of range"));
        }
        Ok(header)
    }
}

/// Datagrams for one encoded message.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub frame_index: u64,
    pub data_shards: usize,
    pub parity_shards: usize,
    pub datagrams: Vec<Vec<u8>>,
}

pub struct ShardEncoder {
    codec: Box<dyn ErasureCodec>,
    parity_shards: usize,
    max_shard_payload: usize,
    next_frame: u64,
}

impl ShardEncoder {
    pub fn new(codec: Box<dyn ErasureCodec>, parity_shards: usize) -> Self {
        Self {
            codec,
            parity_shards,
            max_shard_payload: MAX_DATAGRAM_SIZE - SHARD_HEADER_SIZE,
            next_frame: 0,
        }
    }

    /// Caps shard payloads below the datagram limit.
    pub fn with_max_shard_payload(mut self, size: usize) -> Self {
        self.max_shard_payload = size.clamp(1, MAX_DATAGRAM_SIZE - SHARD_HEADER_SIZE);
        self
    }

    pub fn next_frame_index(&self) -> u64 {
        self.next_frame
    }

    /// Splits `message` into equal-size data shards, padding the last one,
    /// and appends parity shards. Every datagram fits [`MAX_DATAGRAM_SIZE`].
    pub fn encode(&mut self, message: &[u8]) -> Result<EncodedFrame, FecError> {
        let len = message.len();
        let message_len = u32::try_from(len).map_err(|_| FecError::MessageTooLarge { len })?;

        let data_count = len.div_ceil(self.max_shard_payload).max(1);
        let total = data_count + self.parity_shards;
        if total > usize::from(u16::MAX) {
            return Err(FecError::MessageTooLarge { len });
        }
        let shard_size = len.div_ceil(data_count);

        let data: Vec<Vec<u8>> = (0..data_count)
            .map(|i| {
                let start = (i * shard_size).min(len);
                let end = (start + shard_size).min(len);
                let mut shard = message[start..end].to_vec();
                shard.resize(shard_size, 0);
                shard
            })
            .collect();
        let parity = self.codec.encode(&data, self.parity_shards)?;

        let frame_index = self.next_frame;
        self.next_frame += 1;

        let datagrams = data
            .iter()
            .chain(&parity)
            .enumerate()
            .map(|(i, shard)| {
                let header = ShardHeader {
                    frame_index,
                    shard_index: i as u16,
                    data_shard_count: data_count as u16,
                    parity_shard_count: self.parity_shards as u16,
                    message_len,
                };
                let mut datagram = Vec::with_capacity(SHARD_HEADER_SIZE + shard.len());
                header.encode(&mut datagram);
                datagram.extend_from_slice(shard);
                datagram
            })
            .collect();

        trace!(
            "frame {frame_index}: {len} bytes in {data_count}+{} shards of {shard_size} bytes",
            self.parity_shards
        );

        Ok(EncodedFrame {
            frame_index,
            data_shards: data_count,
            parity_shards: self.parity_shards,
            datagrams,
        })
    }
}
