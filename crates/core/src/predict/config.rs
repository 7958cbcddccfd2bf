use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_WINDOW: Duration = Duration::from_millis(30);
pub const DEFAULT_TIME_CONSTANT: f32 = 0.001;
pub const DEFAULT_POLYNOMIAL_ORDER: usize = 2;
pub const DEFAULT_STORED_SAMPLES: usize = 30;
pub const DEFAULT_MAX_EXTRAPOLATION: Duration = Duration::from_millis(70);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpolatorConfig {
    /// Time span over which samples keep most of their weight.
    #[serde(with = "duration_ms")]
    pub window: Duration,
    /// Seconds per derivative unit, so derivative rows are commensurate with
    /// value rows in a single solve.
    pub time_constant: f32,
    pub polynomial_order: usize,
    pub stored_samples: usize,
    #[serde(with = "duration_ms")]
    pub max_extrapolation: Duration,
    /// Enables hemisphere correction for unit quaternion signals.
    pub quaternion: bool,
}

impl Default for InterpolatorConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            time_constant: DEFAULT_TIME_CONSTANT,
            polynomial_order: DEFAULT_POLYNOMIAL_ORDER,
            stored_samples: DEFAULT_STORED_SAMPLES,
            max_extrapolation: DEFAULT_MAX_EXTRAPOLATION,
            quaternion: false,
        }
    }
}

impl InterpolatorConfig {
    pub fn for_quaternion(mut self) -> Self {
        self.quaternion = true;
        self
    }

    pub fn window_ns(&self) -> i64 {
        duration_ns(self.window)
    }

    /// Furthest a query may reach past the newest sample: 1.1 × the maximum
    /// extrapolation, leaving headroom to bridge short network stalls.
    pub fn extrapolation_ceiling_ns(&self) -> i64 {
        duration_ns(self.max_extrapolation).saturating_mul(11) / 10
    }
}

fn duration_ns(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX)
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64() * 1000.0)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = f64::deserialize(deserializer)?;
        if !ms.is_finite() || ms < 0.0 {
            return Err(serde::de::Error::custom("duration must be a non-negative number of milliseconds"));
        }
        Ok(Duration::from_secs_f64(ms / 1000.0))
    }
}
