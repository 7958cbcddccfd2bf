use bitflags::bitflags;
use glam::{Quat, Vec3};
use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize, rancor};

use super::cursor::{CursorError, PayloadCursor};
use crate::predict::{Timestamp, TrackedPose};

pub const PROTOCOL_VERSION: u32 = 1;
pub const DEFAULT_PORT: u16 = 9757;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PoseFlags: u8 {
        const POSITION_VALID = 1 << 0;
        const ORIENTATION_VALID = 1 << 1;
        const LINEAR_VELOCITY_VALID = 1 << 2;
        const ANGULAR_VELOCITY_VALID = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, Serialize, Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub enum Device {
    Head,
    LeftController,
    RightController,
}

impl Device {
    pub const ALL: [Device; 3] = [Device::Head, Device::LeftController, Device::RightController];

    pub fn index(self) -> usize {
        match self {
            Device::Head => 0,
            Device::LeftController => 1,
            Device::RightController => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Head => "head",
            Device::LeftController => "left",
            Device::RightController => "right",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct DevicePose {
    pub device: Device,
    pub position: [f32; 3],
    pub orientation: [f32; 4],
    pub linear_velocity: [f32; 3],
    pub angular_velocity: [f32; 3],
    pub flags: u8,
}

impl DevicePose {
    pub fn from_tracked(device: Device, pose: &TrackedPose) -> Self {
        let mut flags = PoseFlags::empty();
        flags.set(PoseFlags::POSITION_VALID, pose.position.is_some());
        flags.set(PoseFlags::ORIENTATION_VALID, pose.orientation.is_some());
        flags.set(PoseFlags::LINEAR_VELOCITY_VALID, pose.linear_velocity.is_some());
        flags.set(PoseFlags::ANGULAR_VELOCITY_VALID, pose.angular_velocity.is_some());

        Self {
            device,
            position: pose.position.unwrap_or(Vec3::ZERO).to_array(),
            orientation: pose.orientation.unwrap_or(Quat::IDENTITY).to_array(),
            linear_velocity: pose.linear_velocity.unwrap_or(Vec3::ZERO).to_array(),
            angular_velocity: pose.angular_velocity.unwrap_or(Vec3::ZERO).to_array(),
            flags: flags.bits(),
        }
    }

    pub fn flags(&self) -> PoseFlags {
        PoseFlags::from_bits_truncate(self.flags)
    }

    pub fn to_tracked(&self) -> TrackedPose {
        let flags = self.flags();
        TrackedPose {
            position: flags
                .contains(PoseFlags::POSITION_VALID)
                .then(|| Vec3::from_array(self.position)),
            orientation: flags
                .contains(PoseFlags::ORIENTATION_VALID)
                .then(|| Quat::from_array(self.orientation)),
            linear_velocity: flags
                .contains(PoseFlags::LINEAR_VELOCITY_VALID)
                .then(|| Vec3::from_array(self.linear_velocity)),
            angular_velocity: flags
                .contains(PoseFlags::ANGULAR_VELOCITY_VALID)
                .then(|| Vec3::from_array(self.angular_velocity)),
        }
    }
}

/// One batch of device poses sampled by the headset.
///
/// `production_timestamp` is when the headset produced the packet and
/// `timestamp` the instant the poses are valid for, both on the headset clock.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct TrackingPacket {
    pub production_timestamp: Timestamp,
    pub timestamp: Timestamp,
    pub poses: Vec<DevicePose>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct Feedback {
    pub frame_index: u64,
    pub received_at: Timestamp,
    pub shards_received: u32,
    pub reconstructed: bool,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum Message {
    Hello { version: u32, udp_port: u16 },
    Tracking(TrackingPacket),
    Feedback(Feedback),
    Heartbeat { timestamp: Timestamp },
    Disconnect,
}

pub const FRAME_PREAMBLE_SIZE: usize = 44;

/// Leading bytes of a streamed video frame: when it was rendered, the display
/// time it was rendered for and the predicted head pose it used.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FramePreamble {
    pub rendered_at: Timestamp,
    pub display_timestamp: Timestamp,
    pub head_position: Vec3,
    pub head_orientation: Quat,
}

impl FramePreamble {
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.rendered_at.to_le_bytes());
        out.extend_from_slice(&self.display_timestamp.to_le_bytes());
        for v in self.head_position.to_array() {
            out.extend_from_slice(&v.to_le_bytes());
        }
        for v in self.head_orientation.to_array() {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }

    pub fn decode(cursor: &mut PayloadCursor) -> Result<Self, CursorError> {
        let rendered_at = cursor.read_i64()?;
        let display_timestamp = cursor.read_i64()?;
        let mut position = [0.0; 3];
        for v in &mut position {
            *v = cursor.read_f32()?;
        }
        let mut orientation = [0.0; 4];
        for v in &mut orientation {
            *v = cursor.read_f32()?;
        }
        Ok(Self {
            rendered_at,
            display_timestamp,
            head_position: Vec3::from_array(position),
            head_orientation: Quat::from_array(orientation),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("serialization failed: {0}")]
    Serialize(rancor::Error),
    #[error("deserialization failed: {0}")]
    Deserialize(rancor::Error),
}

impl Message {
    pub fn hello(udp_port: u16) -> Self {
        Message::Hello {
            version: PROTOCOL_VERSION,
            udp_port,
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, ProtocolError> {
        rkyv::to_bytes::<rancor::Error>(self)
            .map(|aligned| aligned.into_vec())
            .map_err(ProtocolError::Serialize)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, ProtocolError> {
        // Frames land at arbitrary offsets; archived data wants alignment.
        let mut aligned = AlignedVec::<16>::with_capacity(data.len());
        aligned.extend_from_slice(data);
        rkyv::from_bytes::<Self, rancor::Error>(&aligned).map_err(ProtocolError::Deserialize)
    }
}
