mod clock;
mod config;
mod interpolator;
mod pose;
mod sample;
mod shared;
mod solve;

pub use clock::{ClockOffset, monotonic_now};
pub use config::{
    DEFAULT_MAX_EXTRAPOLATION, DEFAULT_POLYNOMIAL_ORDER, DEFAULT_STORED_SAMPLES,
    DEFAULT_TIME_CONSTANT, DEFAULT_WINDOW, InterpolatorConfig,
};
pub use interpolator::{MERGE_WINDOW_NS, PolynomialInterpolator, STARVATION_LIMIT_NS};
pub use pose::{PosePredictor, PredictedPose, TrackedPose};
pub use sample::{Sample, Timestamp};
pub use shared::SharedPredictor;
