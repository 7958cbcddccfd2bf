use std::io;
use std::net::IpAddr;

/// Failures surfaced by the reliable and datagram channels.
///
/// Nothing here is retried by the transport: every variant is fatal to the
/// connection it was raised on and the session layer decides what to do next.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The peer shut the connection down (zero-length read or write).
    #[error("peer closed the connection")]
    PeerClosed,
    #[error("connection error: {0}")]
    Connection(#[from] io::Error),
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },
    #[error("datagram of {len} bytes exceeds the {max} byte limit")]
    DatagramTooLarge { len: usize, max: usize },
    #[error("{0} is not a multicast address")]
    NotMulticast(IpAddr),
}

impl TransportError {
    pub fn is_peer_closed(&self) -> bool {
        matches!(self, TransportError::PeerClosed)
    }
}
