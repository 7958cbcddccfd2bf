use std::io;
use std::net::{IpAddr, Ipv4Addr, Shutdown, SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use socket2::SockRef;

use super::error::TransportError;
use super::stats::{LossSimulation, NetworkStats, StatsCounters};

pub const MAX_DATAGRAM_SIZE: usize = 2000;

/// Best-effort datagram channel.
///
/// Sends are one-shot and unframed; ordering and loss recovery belong to the
/// shard layer and to sample timestamps. `receive` blocks, so the endpoint is
/// usually shared through an `Arc` with a dedicated receive thread.
pub struct DatagramEndpoint {
    socket: UdpSocket,
    local_addr: SocketAddr,
    closed: AtomicBool,
    loss_sim: Mutex<LossSimulation>,
    stats: StatsCounters,
}

impl DatagramEndpoint {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket,
            local_addr,
            closed: AtomicBool::new(false),
            loss_sim: Mutex::new(LossSimulation::default()),
            stats: StatsCounters::default(),
        })
    }

    /// Fixes the default destination for [`send`](Self::send) and filters
    /// incoming datagrams to that peer.
    pub fn connect<A: ToSocketAddrs>(&self, peer: A) -> io::Result<()> {
        self.socket.connect(peer)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.socket.peer_addr().ok()
    }

    pub fn join_multicast(&self, group: IpAddr) -> Result<(), TransportError> {
        match group {
            IpAddr::V4(v4) if v4.is_multicast() => {
                self.socket.join_multicast_v4(&v4, &Ipv4Addr::UNSPECIFIED)?
            }
            IpAddr::V6(v6) if v6.is_multicast() => self.socket.join_multicast_v6(&v6, 0)?,
            _ => return Err(TransportError::NotMulticast(group)),
        }
        Ok(())
    }

    pub fn leave_multicast(&self, group: IpAddr) -> Result<(), TransportError> {
        match group {
            IpAddr::V4(v4) if v4.is_multicast() => {
                self.socket.leave_multicast_v4(&v4, &Ipv4Addr::UNSPECIFIED)?
            }
            IpAddr::V6(v6) if v6.is_multicast() => self.socket.leave_multicast_v6(&v6, 0)?,
            _ => return Err(TransportError::NotMulticast(group)),
        }
        Ok(())
    }

    /// Larger kernel buffers absorb bursts of shards without drops.
    pub fn set_receive_buffer_size(&self, size: usize) -> io::Result<()> {
        SockRef::from(&self.socket).set_recv_buffer_size(size)
    }

    pub fn set_send_buffer_size(&self, size: usize) -> io::Result<()> {
        SockRef::from(&self.socket).set_send_buffer_size(size)
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.socket.set_read_timeout(timeout)
    }

    pub fn set_loss_simulation(&self, sim: LossSimulation) {
        *self.loss_sim.lock() = sim;
    }

    pub fn stats(&self) -> NetworkStats {
        self.stats.snapshot()
    }

    /// Sends to the connected peer.
    pub fn send(&self, payload: &[u8]) -> Result<usize, TransportError> {
        self.check_size(payload)?;
        if self.simulate_drop() {
            return Ok(payload.len());
        }
        let sent = self.socket.send(payload)?;
        self.stats.record_sent(1, sent);
        Ok(sent)
    }

    pub fn send_to(&self, payload: &[u8], addr: SocketAddr) -> Result<usize, TransportError> {
        self.check_size(payload)?;
        if self.simulate_drop() {
            return Ok(payload.len());
        }
        let sent = self.socket.send_to(payload, addr)?;
        self.stats.record_sent(1, sent);
        Ok(sent)
    }

    /// Blocks until one datagram arrives.
    pub fn receive(&self) -> Result<Vec<u8>, TransportError> {
        self.receive_from().map(|(data, _)| data)
    }

    pub fn receive_from(&self) -> Result<(Vec<u8>, SocketAddr), TransportError> {
        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];
        let result = self.socket.recv_from(&mut buffer);

        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::PeerClosed);
        }

        let (size, addr) = result?;
        buffer.truncate(size);
        self.stats.record_received(size);
        Ok((buffer, addr))
    }

    /// Marks the endpoint closed and wakes any thread blocked in `receive`,
    /// which then returns [`TransportError::PeerClosed`].
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        // Unconnected UDP sockets report ENOTCONN but still wake blocked readers.
        if let Err(e) = SockRef::from(&self.socket).shutdown(Shutdown::Both) {
            if e.kind() != io::ErrorKind::NotConnected {
                log::debug!("Datagram shutdown on {} failed: {}", self.local_addr, e);
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn check_size(&self, payload: &[u8]) -> Result<(), TransportError> {
        if payload.len() > MAX_DATAGRAM_SIZE {
            return Err(TransportError::DatagramTooLarge {
                len: payload.len(),
                max: MAX_DATAGRAM_SIZE,
            });
        }
        if self.is_closed() {
            return Err(TransportError::PeerClosed);
        }
        Ok(())
    }

    fn simulate_drop(&self) -> bool {
        if self.loss_sim.lock().should_drop() {
            self.stats.record_dropped();
            log::trace!("Simulated loss of outgoing datagram on {}", self.local_addr);
            return true;
        }
        false
    }
}
