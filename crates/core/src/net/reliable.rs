//! Reliable, ordered channel carrying length-prefixed frames over TCP.
//!
//! A connected [`ReliableChannel`] splits into a cloneable [`FrameSender`] and
//! a single-owner [`FrameReceiver`]. Both halves share one socket through an
//! `Arc`; the socket is closed once, when the last half is dropped.
//!
//! Sending holds a per-connection lock for the whole frame, so frames from
//! concurrent senders never interleave on the wire. Receiving is non-blocking
//! and needs no lock: the accumulation buffer belongs to the receiver alone.

use std::io;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::error::TransportError;
use super::frame::{DEFAULT_MAX_FRAME_SIZE, FrameDecoder, write_frames};
use super::stats::{NetworkStats, StatsCounters};

const POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug)]
struct Connection {
    stream: TcpStream,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    max_frame_size: usize,
    send_lock: Mutex<()>,
    stats: StatsCounters,
}

pub struct ReliableListener {
    listener: TcpListener,
    max_frame_size: usize,
}

impl ReliableListener {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        Ok(Self {
            listener,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        })
    }

    pub fn set_max_frame_size(&mut self, max_frame_size: usize) {
        self.max_frame_size = max_frame_size;
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Blocks until a peer connects.
    pub fn accept(&self) -> Result<(ReliableChannel, SocketAddr), TransportError> {
        let (stream, addr) = self.listener.accept()?;
        let channel = ReliableChannel::from_stream(stream, self.max_frame_size)?;
        log::debug!("Accepted reliable connection from {}", addr);
        Ok((channel, addr))
    }
}

pub struct ReliableChannel {
    sender: FrameSender,
    receiver: FrameReceiver,
}

impl ReliableChannel {
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)?;
        Self::from_stream(stream, DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn connect_timeout(addr: &SocketAddr, timeout: Duration) -> Result<Self, TransportError> {
        let stream = TcpStream::connect_timeout(addr, timeout)?;
        Self::from_stream(stream, DEFAULT_MAX_FRAME_SIZE)
    }

    /// Takes ownership of a connected stream: disables send coalescing and
    /// switches the socket to non-blocking mode for polled receives.
    pub fn from_stream(stream: TcpStream, max_frame_size: usize) -> Result<Self, TransportError> {
        stream.set_nodelay(true)?;
        stream.set_nonblocking(true)?;
        let peer_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;

        let connection = Arc::new(Connection {
            stream,
            peer_addr,
            local_addr,
            max_frame_size,
            send_lock: Mutex::new(()),
            stats: StatsCounters::default(),
        });

        Ok(Self {
            sender: FrameSender {
                connection: Arc::clone(&connection),
            },
            receiver: FrameReceiver {
                decoder: FrameDecoder::new(max_frame_size),
                connection,
            },
        })
    }

    pub fn split(self) -> (FrameSender, FrameReceiver) {
        (self.sender, self.receiver)
    }

    pub fn sender(&self) -> &FrameSender {
        &self.sender
    }

    pub fn send(&self, payload: &[u8]) -> Result<usize, TransportError> {
        self.sender.send(payload)
    }

    pub fn receive(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        self.receiver.receive()
    }

    pub fn receive_timeout(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        self.receiver.receive_timeout(timeout)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.sender.peer_addr()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.sender.local_addr()
    }

    pub fn stats(&self) -> NetworkStats {
        self.sender.stats()
    }

    pub fn shutdown(&self) {
        self.sender.shutdown();
    }
}

/// Thread-safe sending half. Clones share the same connection and lock.
#[derive(Clone)]
pub struct FrameSender {
    connection: Arc<Connection>,
}

impl FrameSender {
    /// Sends one frame, blocking until the OS has accepted every byte.
    pub fn send(&self, payload: &[u8]) -> Result<usize, TransportError> {
        self.send_many(&[payload])
    }

    /// Sends several frames back to back under a single lock acquisition.
    pub fn send_many<P: AsRef<[u8]>>(&self, payloads: &[P]) -> Result<usize, TransportError> {
        let conn = &*self.connection;
        let written = {
            let _guard = conn.send_lock.lock();
            let mut stream = &conn.stream;
            write_frames(&mut stream, payloads, conn.max_frame_size)?
        };
        conn.stats.record_sent(payloads.len(), written);
        log::trace!("Sent {} frame(s), {} bytes to {}", payloads.len(), written, conn.peer_addr);
        Ok(written)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.connection.peer_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.connection.local_addr
    }

    pub fn stats(&self) -> NetworkStats {
        self.connection.stats.snapshot()
    }

    /// Shuts both directions down. A receiver polling this connection then
    /// observes [`TransportError::PeerClosed`] instead of waiting forever.
    pub fn shutdown(&self) {
        if let Err(e) = self.connection.stream.shutdown(Shutdown::Both) {
            if e.kind() != io::ErrorKind::NotConnected {
                log::debug!("Shutdown of {} failed: {}", self.connection.peer_addr, e);
            }
        }
    }
}

/// Receiving half. Owns the accumulation buffer.
pub struct FrameReceiver {
    decoder: FrameDecoder,
    connection: Arc<Connection>,
}

impl FrameReceiver {
    /// Non-blocking: returns `Ok(None)` until a whole frame has arrived.
    pub fn receive(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut stream = &self.connection.stream;
        let frame = self.decoder.poll(&mut stream)?;
        if let Some(payload) = &frame {
            self.connection.stats.record_received(payload.len());
        }
        Ok(frame)
    }

    /// Polls until a frame arrives or `timeout` elapses.
    pub fn receive_timeout(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        let start = Instant::now();
        loop {
            if let Some(frame) = self.receive()? {
                return Ok(Some(frame));
            }
            if start.elapsed() >= timeout {
                return Ok(None);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.connection.peer_addr
    }

    pub fn stats(&self) -> NetworkStats {
        self.connection.stats.snapshot()
    }
}
