use log::{debug, trace};

use super::FecError;
use super::codec::ErasureCodec;
use super::shard::ShardHeader;
use crate::net::PayloadCursor;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShardStats {
    pub shards_received: u64,
    pub shards_discarded: u64,
    pub frames_completed: u64,
    pub frames_reconstructed: u64,
    pub frames_lost: u64,
}

/// A message put back together from its shards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedFrame {
    pub frame_index: u64,
    pub payload: Vec<u8>,
    pub shards_received: u32,
    pub reconstructed: bool,
}

struct ShardSet {
    frame_index: u64,
    data_count: usize,
    parity_count: usize,
    message_len: usize,
    shard_size: Option<usize>,
    shards: Vec<Option<Vec<u8>>>,
    received: usize,
    done: bool,
}

impl ShardSet {
    fn new(header: &ShardHeader) -> Self {
        Self {
            frame_index: header.frame_index,
            data_count: usize::from(header.data_shard_count),
            parity_count: usize::from(header.parity_shard_count),
            message_len: header.message_len as usize,
            shard_size: None,
            shards: vec![None; header.total_shards()],
            received: 0,
            done: false,
        }
    }

    fn matches(&self, header: &ShardHeader) -> bool {
        self.data_count == usize::from(header.data_shard_count)
            && self.parity_count == usize::from(header.parity_shard_count)
            && self.message_len == header.message_len as usize
    }

    /// Returns false for a duplicate shard.
    fn insert(&mut self, index: usize, payload: Vec<u8>) -> Result<bool, FecError> {
        let expected = *self.shard_size.get_or_insert(payload.len());
        if payload.len() != expected {
            return Err(FecError::ShardSizeMismatch {
                expected,
                actual: payload.len(),
            });
        }
        if self.shards[index].is_some() {
            return Ok(false);
        }
        self.shards[index] = Some(payload);
        self.received += 1;
        Ok(true)
    }

    fn try_complete(&mut self, codec: &dyn ErasureCodec) -> Result<Option<CompletedFrame>, FecError> {
        if self.done || self.received < self.data_count {
            return Ok(None);
        }

        let data_present = self.shards[..self.data_count].iter().all(Option::is_some);
        if !data_present {
            codec.reconstruct(&mut self.shards, self.data_count)?;
        }

        let mut payload = Vec::with_capacity(self.data_count * self.shard_size.unwrap_or(0));
        for shard in self.shards[..self.data_count].iter_mut() {
            let Some(shard) = shard.take() else {
                return Err(FecError::ReconstructionFailed {
                    present: self.received,
                    required: self.data_count,
                });
            };
            payload.extend_from_slice(&shard);
        }
        if payload.len() < self.message_len {
            return Err(FecError::InvalidHeader("message length exceeds shard data"));
        }
        payload.truncate(self.message_len);
        self.done = true;

        Ok(Some(CompletedFrame {
            frame_index: self.frame_index,
            payload,
            shards_received: self.received as u32,
            reconstructed: !data_present,
        }))
    }
}

/// Reassembles shard datagrams into messages.
///
/// Two frames are in flight at a time: the oldest unresolved frame and the
/// one after it. A shard for any later frame gives up on everything before
/// its predecessor, and those frames count as lost. Shards for resolved
/// frames are discarded.
pub struct ShardAccumulator {
    codec: Box<dyn ErasureCodec>,
    floor: Option<u64>,
    current: Option<ShardSet>,
    next: Option<ShardSet>,
    stats: ShardStats,
}

impl ShardAccumulator {
    pub fn new(codec: Box<dyn ErasureCodec>) -> Self {
        Self {
            codec,
            floor: None,
            current: None,
            next: None,
            stats: ShardStats::default(),
        }
    }

    pub fn stats(&self) -> ShardStats {
        self.stats
    }

    /// Oldest frame index still accepted.
    pub fn floor(&self) -> Option<u64> {
        self.floor
    }

    pub fn reset(&mut self) {
        self.floor = None;
        self.current = None;
        self.next = None;
    }

    /// Feeds one datagram. Returns the message once its frame is complete.
    pub fn push(&mut self, datagram: Vec<u8>) -> Result<Option<CompletedFrame>, FecError> {
        let mut cursor = PayloadCursor::new(datagram);
        let header = ShardHeader::decode(&mut cursor)?;
        let payload = cursor.into_remaining();
        self.stats.shards_received += 1;

        let floor = *self.floor.get_or_insert(header.frame_index);
        let frame = header.frame_index;
        if frame < floor {
            trace!("discarding shard {} of resolved frame {frame}", header.shard_index);
            self.stats.shards_discarded += 1;
            return Ok(None);
        }
        if frame > floor.saturating_add(1) {
            self.skip_to(frame - 1);
        }

        let set = if Some(frame) == self.floor {
            self.current.get_or_insert_with(|| ShardSet::new(&header))
        } else {
            self.next.get_or_insert_with(|| ShardSet::new(&header))
        };

        if !set.matches(&header) {
            self.stats.shards_discarded += 1;
            return Err(FecError::InvalidHeader("shard disagrees with its frame"));
        }
        if set.done || !set.insert(usize::from(header.shard_index), payload)? {
            self.stats.shards_discarded += 1;
            return Ok(None);
        }

        let completed = set.try_complete(self.codec.as_ref())?;
        if let Some(frame) = &completed {
            self.stats.frames_completed += 1;
            if frame.reconstructed {
                self.stats.frames_reconstructed += 1;
            }
            trace!(
                "frame {} complete: {} bytes from {} shards",
                frame.frame_index,
                frame.payload.len(),
                frame.shards_received
            );
        }

        self.advance_past_done();
        Ok(completed)
    }

    /// Gives up on every frame below `target`.
    pub fn skip_to(&mut self, target: u64) {
        let Some(floor) = self.floor else {
            self.floor = Some(target);
            return;
        };
        if target <= floor {
            return;
        }

        let resolved_before_target = [&self.current, &self.next]
            .into_iter()
            .flatten()
            .filter(|set| set.frame_index < target && set.done)
            .count() as u64;
        let lost = (target - floor).saturating_sub(resolved_before_target);
        if lost > 0 {
            debug!("lost {lost} frame(s) before frame {target}");
        }
        self.stats.frames_lost += lost;

        self.current = self.next.take().filter(|set| set.frame_index == target);
        self.floor = Some(target);
        self.advance_past_done();
    }

    fn advance_past_done(&mut self) {
        while self.current.as_ref().is_some_and(|set| set.done) {
            // The last representable frame stays resolved in place.
            let Some(next_floor) = self.floor.and_then(|f| f.checked_add(1)) else {
                break;
            };
            self.current = self.next.take();
            self.floor = Some(next_floor);
        }
    }
}
