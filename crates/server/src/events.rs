use std::net::SocketAddr;

use vrsync::net::Feedback;

#[derive(Debug, Clone)]
pub enum ServerEvent {
    HeadsetConnected {
        addr: SocketAddr,
    },
    StreamStarted {
        udp_addr: SocketAddr,
    },
    FrameFeedback(Feedback),
    HeadsetDisconnected {
        addr: SocketAddr,
        reason: DisconnectReason,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Graceful,
    Timeout,
    ConnectionLost,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Graceful => "disconnected",
            DisconnectReason::Timeout => "timed out",
            DisconnectReason::ConnectionLost => "lost connection",
        }
    }
}
