use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vrsync::fec::CodecKind;
use vrsync::net::{DEFAULT_PORT, LossSimulation};
use vrsync::predict::InterpolatorConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Frames rendered and streamed per second.
    pub render_rate: u32,
    /// Size of each synthetic video frame in bytes.
    pub frame_size: usize,
    pub codec: CodecKind,
    pub parity_shards: usize,
    /// How far ahead of now each frame is predicted for.
    pub prediction_offset_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub send_buffer_size: Option<usize>,
    pub packet_loss: LossSimulation,
    pub interpolator: InterpolatorConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            render_rate: 90,
            frame_size: 24_000,
            codec: CodecKind::XorParity,
            parity_shards: 1,
            prediction_offset_ms: 40,
            heartbeat_interval_ms: 500,
            heartbeat_timeout_ms: 3_000,
            send_buffer_size: None,
            packet_loss: LossSimulation::default(),
            interpolator: InterpolatorConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Reads a TOML file, falling back to defaults when it cannot be used.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    log::warn!("Failed to parse config {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                log::warn!("Failed to read config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.render_rate.max(1) as f64)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }
}
