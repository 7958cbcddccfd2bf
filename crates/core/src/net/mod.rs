mod cursor;
mod endpoint;
mod error;
mod frame;
mod protocol;
mod reliable;
mod stats;

pub use cursor::{CursorError, PayloadCursor};
pub use endpoint::{DatagramEndpoint, MAX_DATAGRAM_SIZE};
pub use error::TransportError;
pub use frame::{
    DEFAULT_MAX_FRAME_SIZE, DecodeState, FrameDecoder, HEADER_SIZE, decode_length, encode_frame,
    encode_length, write_frames,
};
pub use protocol::{
    DEFAULT_PORT, Device, DevicePose, FRAME_PREAMBLE_SIZE, Feedback, FramePreamble, Message,
    PROTOCOL_VERSION, PoseFlags, ProtocolError, TrackingPacket,
};
pub use reliable::{FrameReceiver, FrameSender, ReliableChannel, ReliableListener};
pub use stats::{LossSimulation, NetworkStats, rand_percent, rand_u64};
