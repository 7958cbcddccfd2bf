use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use super::config::InterpolatorConfig;
use super::interpolator::PolynomialInterpolator;
use super::sample::{Sample, Timestamp};

/// A tracked device pose as reported by the headset. Any part may be missing.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TrackedPose {
    pub position: Option<Vec3>,
    pub orientation: Option<Quat>,
    pub linear_velocity: Option<Vec3>,
    pub angular_velocity: Option<Vec3>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictedPose {
    pub production_timestamp: Timestamp,
    pub timestamp: Timestamp,
    pub pose: TrackedPose,
}

impl PredictedPose {
    pub fn is_empty(&self) -> bool {
        self.pose.position.is_none() && self.pose.orientation.is_none()
    }
}

/// Position and orientation predictors for one tracked device.
#[derive(Debug, Clone)]
pub struct PosePredictor {
    position: PolynomialInterpolator<3>,
    orientation: PolynomialInterpolator<4>,
}

impl Default for PosePredictor {
    fn default() -> Self {
        Self::new(InterpolatorConfig::default())
    }
}

impl PosePredictor {
    pub fn new(config: InterpolatorConfig) -> Self {
        let position = InterpolatorConfig {
            quaternion: false,
            ..config.clone()
        };
        Self {
            position: PolynomialInterpolator::new(position),
            orientation: PolynomialInterpolator::new(config.for_quaternion()),
        }
    }

    pub fn reset(&mut self) {
        self.position.reset();
        self.orientation.reset();
    }

    pub fn add_pose(&mut self, production_timestamp: Timestamp, timestamp: Timestamp, pose: &TrackedPose) {
        if pose.position.is_some() || pose.linear_velocity.is_some() {
            self.position.add_sample(Sample {
                production_timestamp,
                sample_timestamp: timestamp,
                value: pose.position.map(|p| p.to_array()),
                derivative: pose.linear_velocity.map(|v| v.to_array()),
            });
        }

        if let Some(orientation) = pose.orientation {
            let rate = pose.angular_velocity.map(|omega| quat_rate(orientation, omega).to_array());
            self.orientation.add_sample(Sample {
                production_timestamp,
                sample_timestamp: timestamp,
                value: Some(orientation.to_array()),
                derivative: rate,
            });
        }
    }

    pub fn get_at(&self, timestamp: Timestamp) -> PredictedPose {
        let position = self.position.get_at(timestamp);
        let orientation = self.orientation.get_at(timestamp);

        let mut pose = TrackedPose::default();
        if let Some(value) = position.value {
            pose.position = Some(Vec3::from_array(value));
            pose.linear_velocity = position.derivative.map(Vec3::from_array);
        }

        if let Some(value) = orientation.value {
            let q = Quat::from_array(value);
            if q.length_squared() > f32::EPSILON {
                pose.orientation = Some(q.normalize());
                pose.angular_velocity = orientation
                    .derivative
                    .map(|rate| angular_velocity(q, Quat::from_array(rate)));
            }
        }

        PredictedPose {
            production_timestamp: position.production_timestamp.max(orientation.production_timestamp),
            timestamp: if position.is_valid() {
                position.sample_timestamp
            } else {
                orientation.sample_timestamp
            },
            pose,
        }
    }
}

/// q̇ = ½ (0, ω) ⊗ q
fn quat_rate(q: Quat, omega: Vec3) -> Quat {
    Quat::from_xyzw(omega.x, omega.y, omega.z, 0.0) * q * 0.5
}

/// ω = vec(2 q̇ ⊗ q*) / |q|², valid for non-normalized q.
fn angular_velocity(q: Quat, rate: Quat) -> Vec3 {
    let product = rate * q.conjugate() * 2.0;
    product.xyz() / q.length_squared()
}
