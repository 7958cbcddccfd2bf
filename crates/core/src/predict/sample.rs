/// Nanoseconds on a monotonic clock.
pub type Timestamp = i64;

/// One timestamped observation of an `N`-component signal.
///
/// `sample_timestamp` is the instant the value is valid for, as stamped by
/// the producer. `production_timestamp` only orders samples by recency and
/// judges staleness; it never enters the extrapolation math.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample<const N: usize> {
    pub production_timestamp: Timestamp,
    pub sample_timestamp: Timestamp,
    pub value: Option<[f32; N]>,
    pub derivative: Option<[f32; N]>,
}

impl<const N: usize> Default for Sample<N> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<const N: usize> Sample<N> {
    pub fn new(production_timestamp: Timestamp, sample_timestamp: Timestamp, value: [f32; N]) -> Self {
        Self {
            production_timestamp,
            sample_timestamp,
            value: Some(value),
            derivative: None,
        }
    }

    /// The "no data" result.
    pub fn empty() -> Self {
        Self {
            production_timestamp: Timestamp::MIN,
            sample_timestamp: 0,
            value: None,
            derivative: None,
        }
    }

    pub fn with_derivative(mut self, derivative: [f32; N]) -> Self {
        self.derivative = Some(derivative);
        self
    }

    pub fn is_valid(&self) -> bool {
        self.value.is_some()
    }
}
