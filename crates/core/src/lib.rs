pub mod fec;
pub mod net;
pub mod predict;

pub use fec::{
    CodecKind, ErasureCodec, FecError, ReedSolomonCodec, SHARD_HEADER_SIZE, ShardAccumulator,
    ShardEncoder, ShardHeader, ShardStats, XorParityCodec,
};
pub use net::{
    DatagramEndpoint, Device, DevicePose, Feedback, FrameReceiver, FrameSender, LossSimulation,
    MAX_DATAGRAM_SIZE, Message, NetworkStats, PayloadCursor, ReliableChannel, ReliableListener,
    TrackingPacket, TransportError,
};
pub use predict::{
    ClockOffset, InterpolatorConfig, PolynomialInterpolator, PosePredictor, PredictedPose, Sample,
    SharedPredictor, Timestamp, TrackedPose, monotonic_now,
};
