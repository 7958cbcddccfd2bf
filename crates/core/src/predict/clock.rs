use std::sync::OnceLock;
use std::time::Instant;

use super::sample::Timestamp;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Monotonic nanoseconds since the first call in this process.
pub fn monotonic_now() -> Timestamp {
    let epoch = EPOCH.get_or_init(Instant::now);
    i64::try_from(epoch.elapsed().as_nanos()).unwrap_or(Timestamp::MAX)
}

/// Maps remote timestamps onto the local clock.
///
/// Tracks the smallest observed `local_received - remote_produced`, which is
/// the clock offset plus the minimum one-way delay. The estimate creeps up
/// slowly when every recent observation sits above it, to follow drift.
#[derive(Debug, Clone, Default)]
pub struct ClockOffset {
    offset: Option<i64>,
    observations: u64,
}

const DRIFT_SHIFT: u32 = 10;
const STABLE_OBSERVATIONS: u64 = 10;

impl ClockOffset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, remote_produced: Timestamp, local_received: Timestamp) {
        let candidate = local_received.saturating_sub(remote_produced);
        self.offset = Some(match self.offset {
            None => candidate,
            Some(current) if candidate < current => candidate,
            Some(current) => current + (candidate.abs_diff(current) >> DRIFT_SHIFT) as i64,
        });
        self.observations += 1;
    }

    pub fn is_stable(&self) -> bool {
        self.observations >= STABLE_OBSERVATIONS
    }

    pub fn offset(&self) -> Option<i64> {
        self.offset
    }

    pub fn to_local(&self, remote: Timestamp) -> Timestamp {
        remote.saturating_add(self.offset.unwrap_or(0))
    }
}
