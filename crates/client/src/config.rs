use std::net::SocketAddr;
use std::time::Duration;

use vrsync::fec::CodecKind;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_addr: SocketAddr,
    pub udp_port: u16,
    /// Tracking packets sent per second.
    pub tracking_rate: u32,
    /// Extra random delay added before each tracking packet.
    pub max_jitter_ms: u64,
    pub session_secs: u64,
    pub codec: CodecKind,
    pub connection_timeout_secs: u64,
    pub receive_buffer_size: Option<usize>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], vrsync::net::DEFAULT_PORT)),
            udp_port: 0,
            tracking_rate: 250,
            max_jitter_ms: 4,
            session_secs: 10,
            codec: CodecKind::XorParity,
            connection_timeout_secs: 5,
            receive_buffer_size: Some(1 << 20),
        }
    }
}

impl ClientConfig {
    pub fn tracking_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tracking_rate.max(1) as f64)
    }

    pub fn session_length(&self) -> Duration {
        Duration::from_secs(self.session_secs)
    }
}
