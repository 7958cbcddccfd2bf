use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use vrsync::fec::{ShardAccumulator, ShardStats};
use vrsync::net::{
    DatagramEndpoint, Device, DevicePose, Feedback, FramePreamble, FrameReceiver, FrameSender,
    Message, NetworkStats, PayloadCursor, ReliableChannel, TrackingPacket, TransportError,
    rand_u64,
};
use vrsync::predict::monotonic_now;

use crate::config::ClientConfig;
use crate::motion::simulated_pose;

const CONTROL_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy)]
pub struct SessionSummary {
    pub tracking_packets: u64,
    pub video: ShardStats,
    pub datagrams: NetworkStats,
}

/// Simulated headset: streams tracking, receives video shards and answers
/// with per-frame feedback.
pub struct HeadsetClient {
    config: ClientConfig,
    sender: FrameSender,
    datagram: Arc<DatagramEndpoint>,
    running: Arc<AtomicBool>,
    video_thread: JoinHandle<ShardStats>,
    control_thread: JoinHandle<()>,
}

impl HeadsetClient {
    pub fn connect(config: ClientConfig) -> Result<Self> {
        log::info!("Connecting to {}", config.server_addr);
        let timeout = Duration::from_secs(config.connection_timeout_secs);
        let channel = ReliableChannel::connect_timeout(&config.server_addr, timeout)
            .with_context(|| format!("failed to connect to {}", config.server_addr))?;
        let (sender, receiver) = channel.split();

        let datagram = DatagramEndpoint::bind(("0.0.0.0", config.udp_port))?;
        if let Some(size) = config.receive_buffer_size {
            datagram.set_receive_buffer_size(size)?;
        }
        let datagram = Arc::new(datagram);
        let running = Arc::new(AtomicBool::new(true));

        let video_thread = {
            let datagram = Arc::clone(&datagram);
            let sender = sender.clone();
            let accumulator = ShardAccumulator::new(config.codec.build());
            thread::Builder::new()
                .name("video-rx".to_string())
                .spawn(move || video_loop(&datagram, &sender, accumulator))?
        };

        let control_thread = {
            let sender = sender.clone();
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name("control-rx".to_string())
                .spawn(move || control_loop(receiver, &sender, &running))?
        };

        let udp_port = datagram.local_addr().port();
        sender.send(&Message::hello(udp_port).serialize()?)?;
        log::info!("Connected, receiving video on port {}", udp_port);

        Ok(Self {
            config,
            sender,
            datagram,
            running,
            video_thread,
            control_thread,
        })
    }

    /// Streams tracking until the session length elapses or the server
    /// ends the session, then tears everything down.
    pub fn run(self) -> Result<SessionSummary> {
        let start = Instant::now();
        let interval = self.config.tracking_interval();
        let mut tracking_packets = 0;

        while self.running.load(Ordering::SeqCst) && start.elapsed() < self.config.session_length() {
            let timestamp = monotonic_now();
            let t = start.elapsed().as_secs_f32();
            let poses: Vec<DevicePose> = Device::ALL
                .iter()
                .map(|&device| DevicePose::from_tracked(device, &simulated_pose(device, t)))
                .collect();

            let jitter = self.jitter();
            if !jitter.is_zero() {
                thread::sleep(jitter);
            }

            let packet = Message::Tracking(TrackingPacket {
                production_timestamp: monotonic_now(),
                timestamp,
                poses,
            });
            match self.sender.send(&packet.serialize()?) {
                Ok(_) => tracking_packets += 1,
                Err(e) => {
                    log::warn!("Tracking stream stopped: {}", e);
                    break;
                }
            }

            thread::sleep(interval.saturating_sub(jitter));
        }

        if self.running.load(Ordering::SeqCst) {
            let _ = self.sender.send(&Message::Disconnect.serialize()?);
        }
        self.running.store(false, Ordering::SeqCst);
        self.sender.shutdown();
        self.datagram.shutdown();

        let video = self
            .video_thread
            .join()
            .map_err(|_| anyhow::anyhow!("video thread panicked"))?;
        let _ = self.control_thread.join();

        Ok(SessionSummary {
            tracking_packets,
            video,
            datagrams: self.datagram.stats(),
        })
    }

    fn jitter(&self) -> Duration {
        if self.config.max_jitter_ms == 0 {
            return Duration::ZERO;
        }
        let max_us = self.config.max_jitter_ms * 1000;
        Duration::from_micros(rand_u64() % max_us)
    }
}

fn video_loop(datagram: &DatagramEndpoint, sender: &FrameSender, mut accumulator: ShardAccumulator) -> ShardStats {
    let mut last_display: Option<i64> = None;

    loop {
        let shard = match datagram.receive() {
            Ok(shard) => shard,
            Err(TransportError::PeerClosed) => break,
            Err(e) => {
                log::warn!("Video receive failed: {}", e);
                break;
            }
        };

        let frame = match accumulator.push(shard) {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(e) => {
                log::debug!("Dropping shard: {}", e);
                continue;
            }
        };

        let mut cursor = PayloadCursor::new(frame.payload);
        match FramePreamble::decode(&mut cursor) {
            Ok(preamble) => {
                if let Some(previous) = last_display {
                    log::trace!(
                        "Frame {} for display +{}us, head at {:?}",
                        frame.frame_index,
                        (preamble.display_timestamp - previous) / 1000,
                        preamble.head_position
                    );
                }
                last_display = Some(preamble.display_timestamp);
            }
            Err(e) => log::warn!("Frame {} has no preamble: {}", frame.frame_index, e),
        }

        let feedback = Message::Feedback(Feedback {
            frame_index: frame.frame_index,
            received_at: monotonic_now(),
            shards_received: frame.shards_received,
            reconstructed: frame.reconstructed,
        });
        let sent = feedback
            .serialize()
            .map_err(anyhow::Error::from)
            .and_then(|bytes| Ok(sender.send(&bytes)?));
        if let Err(e) = sent {
            log::debug!("Feedback not sent: {}", e);
        }
    }

    accumulator.stats()
}

fn control_loop(mut receiver: FrameReceiver, sender: &FrameSender, running: &AtomicBool) {
    while running.load(Ordering::SeqCst) {
        let frame = match receiver.receive_timeout(CONTROL_POLL) {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(e) => {
                if !e.is_peer_closed() {
                    log::warn!("Control channel failed: {}", e);
                }
                break;
            }
        };

        match Message::deserialize(&frame) {
            Ok(Message::Heartbeat { timestamp }) => {
                log::trace!("Heartbeat {}", timestamp);
                let reply = Message::Heartbeat {
                    timestamp: monotonic_now(),
                };
                if let Ok(bytes) = reply.serialize() {
                    let _ = sender.send(&bytes);
                }
            }
            Ok(Message::Disconnect) => {
                log::info!("Server ended the session");
                break;
            }
            Ok(other) => log::debug!("Ignoring {:?}", other),
            Err(e) => log::warn!("Malformed control message: {}", e),
        }
    }
    running.store(false, Ordering::SeqCst);
}
