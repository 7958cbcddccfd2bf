use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, mpsc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use glam::{Quat, Vec3};
use vrsync::fec::ShardEncoder;
use vrsync::net::{
    DatagramEndpoint, Device, Feedback, FramePreamble, FrameReceiver, FrameSender, Message,
    PROTOCOL_VERSION, ReliableChannel, ReliableListener, TransportError,
};
use vrsync::predict::{ClockOffset, PosePredictor, SharedPredictor, Timestamp, monotonic_now};

use crate::config::ServerConfig;
use crate::events::{DisconnectReason, ServerEvent};

const RECEIVE_POLL: Duration = Duration::from_millis(50);

pub struct StreamServer {
    listener: ReliableListener,
    config: ServerConfig,
    running: Arc<AtomicBool>,
}

impl StreamServer {
    pub fn new(config: ServerConfig) -> Result<Self> {
        let bind_addr = config.bind_addr();
        let listener = ReliableListener::bind(&bind_addr)
            .with_context(|| format!("failed to listen on {bind_addr}"))?;

        Ok(Self {
            listener,
            config,
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Blocks until a headset connects, then streams to it until the session
    /// ends. Session events are handed to `on_event` as they happen.
    pub fn serve_one(&mut self, mut on_event: impl FnMut(ServerEvent)) -> Result<DisconnectReason> {
        let (channel, addr) = self.listener.accept()?;
        on_event(ServerEvent::HeadsetConnected { addr });

        let session = Session::start(channel, &self.config)?;
        let reason = session.run(&self.config, &self.running, &mut on_event);
        on_event(ServerEvent::HeadsetDisconnected { addr, reason });
        Ok(reason)
    }
}

enum Inbound {
    Hello { udp_port: u16 },
    Feedback(Feedback),
    Disconnect,
    Closed(TransportError),
}

struct Session {
    addr: SocketAddr,
    sender: FrameSender,
    datagram: DatagramEndpoint,
    predictors: Vec<SharedPredictor<PosePredictor>>,
    encoder: ShardEncoder,
    inbox: mpsc::Receiver<Inbound>,
    last_heard: Arc<AtomicI64>,
    session_running: Arc<AtomicBool>,
    receive_thread: Option<JoinHandle<()>>,
    streaming: bool,
}

impl Session {
    fn start(channel: ReliableChannel, config: &ServerConfig) -> Result<Self> {
        let addr = channel.peer_addr();
        let (sender, receiver) = channel.split();

        let datagram = DatagramEndpoint::bind((config.bind.as_str(), 0))?;
        datagram.set_loss_simulation(config.packet_loss.clone());
        if let Some(size) = config.send_buffer_size {
            datagram.set_send_buffer_size(size)?;
        }

        let codec = config.codec.build_for(config.parity_shards)?;
        let encoder = ShardEncoder::new(codec, config.parity_shards);

        let predictors: Vec<_> = Device::ALL
            .iter()
            .map(|_| SharedPredictor::new(PosePredictor::new(config.interpolator.clone())))
            .collect();

        let (inbox_tx, inbox) = mpsc::channel();
        let last_heard = Arc::new(AtomicI64::new(monotonic_now()));
        let session_running = Arc::new(AtomicBool::new(true));

        let receive_thread = {
            let predictors = predictors.clone();
            let last_heard = Arc::clone(&last_heard);
            let running = Arc::clone(&session_running);
            thread::Builder::new()
                .name("reliable-rx".to_string())
                .spawn(move || receive_loop(receiver, predictors, last_heard, inbox_tx, running))?
        };

        Ok(Self {
            addr,
            sender,
            datagram,
            predictors,
            encoder,
            inbox,
            last_heard,
            session_running,
            receive_thread: Some(receive_thread),
            streaming: false,
        })
    }

    fn run(
        mut self,
        config: &ServerConfig,
        server_running: &AtomicBool,
        on_event: &mut dyn FnMut(ServerEvent),
    ) -> DisconnectReason {
        let frame_interval = config.frame_interval();
        let timeout_ns = config.heartbeat_timeout().as_nanos() as i64;
        let mut next_frame = Instant::now();
        let mut last_heartbeat = Instant::now();

        let reason = loop {
            if !server_running.load(Ordering::SeqCst) {
                break DisconnectReason::Graceful;
            }
            if let Some(reason) = self.process_inbox(on_event) {
                break reason;
            }

            let silent_for = monotonic_now() - self.last_heard.load(Ordering::Relaxed);
            if silent_for > timeout_ns {
                break DisconnectReason::Timeout;
            }

            if last_heartbeat.elapsed() >= config.heartbeat_interval() {
                last_heartbeat = Instant::now();
                let heartbeat = Message::Heartbeat {
                    timestamp: monotonic_now(),
                };
                if let Err(e) = self.send_message(&heartbeat) {
                    on_event(ServerEvent::Error {
                        message: format!("Failed to send heartbeat to {}: {}", self.addr, e),
                    });
                    break DisconnectReason::ConnectionLost;
                }
            }

            if self.streaming {
                if let Err(e) = self.stream_frame(config) {
                    on_event(ServerEvent::Error {
                        message: format!("Failed to stream frame: {e}"),
                    });
                }
            }

            next_frame += frame_interval;
            let now = Instant::now();
            if next_frame > now {
                thread::sleep(next_frame - now);
            } else {
                next_frame = now;
            }
        };

        if reason != DisconnectReason::ConnectionLost {
            let _ = self.send_message(&Message::Disconnect);
        }
        self.close();
        reason
    }

    fn process_inbox(&mut self, on_event: &mut dyn FnMut(ServerEvent)) -> Option<DisconnectReason> {
        while let Ok(inbound) = self.inbox.try_recv() {
            match inbound {
                Inbound::Hello { udp_port } => {
                    let udp_addr = SocketAddr::new(self.addr.ip(), udp_port);
                    match self.datagram.connect(udp_addr) {
                        Ok(()) => {
                            self.streaming = true;
                            on_event(ServerEvent::StreamStarted { udp_addr });
                        }
                        Err(e) => on_event(ServerEvent::Error {
                            message: format!("Failed to reach {udp_addr}: {e}"),
                        }),
                    }
                }
                Inbound::Feedback(feedback) => {
                    on_event(ServerEvent::FrameFeedback(feedback));
                }
                Inbound::Disconnect => return Some(DisconnectReason::Graceful),
                Inbound::Closed(e) => {
                    if !e.is_peer_closed() {
                        on_event(ServerEvent::Error {
                            message: format!("Connection to {} failed: {}", self.addr, e),
                        });
                    }
                    return Some(DisconnectReason::ConnectionLost);
                }
            }
        }
        None
    }

    fn stream_frame(&mut self, config: &ServerConfig) -> Result<()> {
        let now = monotonic_now();
        let display_timestamp = now + (config.prediction_offset_ms as Timestamp) * 1_000_000;

        for device in Device::ALL {
            let predicted = self.predictors[device.index()].get_at(display_timestamp);
            if !predicted.is_empty() {
                log::trace!(
                    "{} at +{}ms: position {:?} orientation {:?}",
                    device.as_str(),
                    (predicted.timestamp - now) / 1_000_000,
                    predicted.pose.position,
                    predicted.pose.orientation
                );
            }
        }

        let head = self.predictors[Device::Head.index()].get_at(display_timestamp).pose;
        let preamble = FramePreamble {
            rendered_at: now,
            display_timestamp,
            head_position: head.position.unwrap_or(Vec3::ZERO),
            head_orientation: head.orientation.unwrap_or(Quat::IDENTITY),
        };

        let mut frame = Vec::with_capacity(config.frame_size);
        preamble.encode(&mut frame);
        let filler = config.frame_size.saturating_sub(frame.len());
        frame.extend((0..filler).map(|i| (i % 251) as u8));

        let encoded = self.encoder.encode(&frame)?;
        for datagram in &encoded.datagrams {
            self.datagram.send(datagram)?;
        }
        Ok(())
    }

    fn send_message(&self, message: &Message) -> Result<()> {
        self.sender.send(&message.serialize()?)?;
        Ok(())
    }

    fn close(&mut self) {
        self.session_running.store(false, Ordering::SeqCst);
        self.sender.shutdown();
        self.datagram.shutdown();
        if let Some(handle) = self.receive_thread.take() {
            let _ = handle.join();
        }

        let stats = self.datagram.stats();
        log::info!(
            "Session with {} closed: {} datagrams sent, {} dropped by loss simulation, {} frames sent",
            self.addr,
            stats.packets_sent,
            stats.packets_dropped,
            self.encoder.next_frame_index()
        );
    }
}

fn receive_loop(
    mut receiver: FrameReceiver,
    predictors: Vec<SharedPredictor<PosePredictor>>,
    last_heard: Arc<AtomicI64>,
    inbox: mpsc::Sender<Inbound>,
    running: Arc<AtomicBool>,
) {
    let mut clock = ClockOffset::new();

    while running.load(Ordering::SeqCst) {
        let frame = match receiver.receive_timeout(RECEIVE_POLL) {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(e) => {
                let _ = inbox.send(Inbound::Closed(e));
                return;
            }
        };

        let now = monotonic_now();
        last_heard.store(now, Ordering::Relaxed);

        let message = match Message::deserialize(&frame) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("Dropping malformed message from {}: {}", receiver.peer_addr(), e);
                continue;
            }
        };

        match message {
            Message::Tracking(packet) => {
                let settling = !clock.is_stable();
                clock.observe(packet.production_timestamp, now);
                if settling && clock.is_stable() {
                    log::debug!("Headset clock offset settled at {:?}ns", clock.offset());
                }
                let production = clock.to_local(packet.production_timestamp);
                let timestamp = clock.to_local(packet.timestamp);
                for pose in &packet.poses {
                    predictors[pose.device.index()].add_pose(production, timestamp, &pose.to_tracked());
                }
            }
            Message::Hello { version, udp_port } => {
                if version != PROTOCOL_VERSION {
                    log::warn!("Headset speaks protocol {version}, expected {PROTOCOL_VERSION}");
                }
                let _ = inbox.send(Inbound::Hello { udp_port });
            }
            Message::Feedback(feedback) => {
                let _ = inbox.send(Inbound::Feedback(feedback));
            }
            Message::Heartbeat { .. } => {}
            Message::Disconnect => {
                let _ = inbox.send(Inbound::Disconnect);
                return;
            }
        }
    }
}
