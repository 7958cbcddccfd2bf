use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use super::interpolator::PolynomialInterpolator;
use super::pose::{PosePredictor, PredictedPose, TrackedPose};
use super::sample::{Sample, Timestamp};

/// A predictor shared between the thread ingesting samples and the thread
/// querying predictions.
#[derive(Debug, Default)]
pub struct SharedPredictor<T> {
    inner: Arc<Mutex<T>>,
}

impl<T> Clone for SharedPredictor<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> SharedPredictor<T> {
    pub fn new(predictor: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(predictor)),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock()
    }
}

impl<const N: usize> SharedPredictor<PolynomialInterpolator<N>> {
    pub fn add_sample(&self, sample: Sample<N>) {
        self.lock().add_sample(sample);
    }

    pub fn get_at(&self, timestamp: Timestamp) -> Sample<N> {
        self.lock().get_at(timestamp)
    }
}

impl SharedPredictor<PosePredictor> {
    pub fn add_pose(&self, production_timestamp: Timestamp, timestamp: Timestamp, pose: &TrackedPose) {
        self.lock().add_pose(production_timestamp, timestamp, pose);
    }

    pub fn get_at(&self, timestamp: Timestamp) -> PredictedPose {
        self.lock().get_at(timestamp)
    }

    pub fn reset(&self) {
        self.lock().reset();
    }
}
