use glam::{Quat, Vec3};
use vrsync::net::Device;
use vrsync::predict::TrackedPose;

const STANDING_HEIGHT: f32 = 1.6;
const HAND_HEIGHT: f32 = 1.2;

/// Smooth synthetic motion for a device, `t` seconds into the session.
pub fn simulated_pose(device: Device, t: f32) -> TrackedPose {
    match device {
        Device::Head => {
            let yaw_rate = 0.6 * t.cos();
            TrackedPose {
                position: Some(Vec3::new(0.1 * (2.0 * t).sin(), STANDING_HEIGHT, 0.0)),
                orientation: Some(Quat::from_rotation_y(0.6 * t.sin())),
                linear_velocity: Some(Vec3::new(0.2 * (2.0 * t).cos(), 0.0, 0.0)),
                angular_velocity: Some(Vec3::new(0.0, yaw_rate, 0.0)),
            }
        }
        Device::LeftController | Device::RightController => {
            let side = if device == Device::LeftController { -1.0 } else { 1.0 };
            let phase = if device == Device::LeftController { 0.0 } else { 1.3 };
            let s = 3.0 * t + phase;
            TrackedPose {
                position: Some(Vec3::new(0.25 * side, HAND_HEIGHT + 0.05 * s.sin(), -0.3)),
                orientation: Some(Quat::from_rotation_x(0.3 * (t + phase).sin())),
                linear_velocity: Some(Vec3::new(0.0, 0.15 * s.cos(), 0.0)),
                // Controllers report no angular velocity, as some runtimes do.
                angular_velocity: None,
            }
        }
    }
}
