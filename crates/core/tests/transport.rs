use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use vrsync::fec::{ShardAccumulator, ShardEncoder, XorParityCodec};
use vrsync::net::{DatagramEndpoint, LossSimulation, MAX_DATAGRAM_SIZE, Message, TrackingPacket};
use vrsync::{ReliableChannel, ReliableListener, TransportError};

const TIMEOUT: Duration = Duration::from_secs(5);

fn connected_pair() -> (ReliableChannel, ReliableChannel) {
    let listener = ReliableListener::bind("127.0.0.1:0").unwrap();
    pair_from(listener)
}

fn pair_from(listener: ReliableListener) -> (ReliableChannel, ReliableChannel) {
    let addr = listener.local_addr().unwrap();
    let accept = thread::spawn(move || listener.accept().unwrap().0);
    let client = ReliableChannel::connect(addr).unwrap();
    let server = accept.join().unwrap();
    (server, client)
}

fn wait_for_frame(channel: &mut ReliableChannel) -> Vec<u8> {
    channel
        .receive_timeout(TIMEOUT)
        .unwrap()
        .expect("No frame received")
}

fn wait_for_error(channel: &mut ReliableChannel) -> TransportError {
    let start = Instant::now();
    while start.elapsed() < TIMEOUT {
        match channel.receive() {
            Ok(_) => thread::sleep(Duration::from_millis(1)),
            Err(e) => return e,
        }
    }
    panic!("receiver never observed the closed connection");
}

#[test]
fn test_frames_arrive_in_order() {
    let (mut server, client) = connected_pair();

    client.send(b"first").unwrap();
    client.send(&[]).unwrap();
    client.sender().send_many(&[b"second".as_slice(), b"third".as_slice()]).unwrap();

    assert_eq!(wait_for_frame(&mut server), b"first");
    assert_eq!(wait_for_frame(&mut server), b"");
    assert_eq!(wait_for_frame(&mut server), b"second");
    assert_eq!(wait_for_frame(&mut server), b"third");

    let sent = client.stats();
    assert_eq!(sent.packets_sent, 4);
    assert_eq!(sent.bytes_sent, 4 * 4 + 5 + 6 + 5);
    assert_eq!(server.stats().packets_received, 4);
}

#[test]
fn test_concurrent_senders_do_not_interleave() {
    const SENDERS: u8 = 8;
    const FRAMES_PER_SENDER: u32 = 200;

    let (mut server, client) = connected_pair();
    let (sender, _receiver) = client.split();

    let handles: Vec<_> = (0..SENDERS)
        .map(|id| {
            let sender = sender.clone();
            thread::spawn(move || {
                for seq in 0..FRAMES_PER_SENDER {
                    let len = 1 + (seq as usize * 37 + id as usize * 101) % 6000;
                    let mut frame = Vec::with_capacity(5 + len);
                    frame.push(id);
                    frame.extend_from_slice(&seq.to_le_bytes());
                    frame.extend(std::iter::repeat_n(id, len));
                    sender.send(&frame).unwrap();
                }
            })
        })
        .collect();

    let mut next_seq = vec![0u32; SENDERS as usize];
    for _ in 0..SENDERS as u32 * FRAMES_PER_SENDER {
        let frame = wait_for_frame(&mut server);
        let id = frame[0];
        let seq = u32::from_le_bytes(frame[1..5].try_into().unwrap());
        assert!(frame[5..].iter().all(|&b| b == id), "frame from sender {id} was interleaved");
        assert_eq!(seq, next_seq[id as usize]);
        next_seq[id as usize] += 1;
    }

    for handle in handles {
        handle.join().unwrap();
    }
    assert!(next_seq.iter().all(|&n| n == FRAMES_PER_SENDER));
}

#[test]
fn test_receive_detects_peer_close() {
    let (mut server, client) = connected_pair();
    client.send(b"bye").unwrap();
    drop(client);

    assert_eq!(wait_for_frame(&mut server), b"bye");
    assert!(wait_for_error(&mut server).is_peer_closed());
}

#[test]
fn test_send_detects_peer_close() {
    let (server, client) = connected_pair();
    drop(server);

    let payload = vec![0u8; 64 * 1024];
    let start = Instant::now();
    let err = loop {
        assert!(start.elapsed() < TIMEOUT, "send never failed");
        if let Err(e) = client.send(&payload) {
            break e;
        }
        thread::sleep(Duration::from_millis(1));
    };
    assert!(matches!(err, TransportError::PeerClosed | TransportError::Connection(_)));
}

#[test]
fn test_shutdown_wakes_receiver_thread() {
    let (server, _client) = connected_pair();
    let (sender, mut receiver) = server.split();

    let handle = thread::spawn(move || {
        let start = Instant::now();
        while start.elapsed() < TIMEOUT {
            if let Err(e) = receiver.receive() {
                return Some(e);
            }
            thread::sleep(Duration::from_millis(1));
        }
        None
    });

    thread::sleep(Duration::from_millis(20));
    sender.shutdown();

    let err = handle.join().unwrap().expect("receiver kept waiting after shutdown");
    assert!(err.is_peer_closed());
}

#[test]
fn test_oversized_frame_rejected() {
    let mut listener = ReliableListener::bind("127.0.0.1:0").unwrap();
    listener.set_max_frame_size(1024);
    let (mut server, client) = pair_from(listener);

    client.send(&vec![1u8; 1024]).unwrap();
    client.send(&vec![2u8; 1025]).unwrap();

    assert_eq!(wait_for_frame(&mut server).len(), 1024);
    let err = wait_for_error(&mut server);
    assert!(matches!(err, TransportError::FrameTooLarge { len: 1025, max: 1024 }));
}

#[test]
fn test_messages_over_reliable_channel() {
    let (mut server, client) = connected_pair();

    let tracking = Message::Tracking(TrackingPacket {
        production_timestamp: 10,
        timestamp: 20,
        poses: Vec::new(),
    });
    client.send(&Message::hello(9000).serialize().unwrap()).unwrap();
    client.send(&tracking.serialize().unwrap()).unwrap();

    let hello = Message::deserialize(&wait_for_frame(&mut server)).unwrap();
    assert!(matches!(hello, Message::Hello { udp_port: 9000, .. }));
    assert_eq!(Message::deserialize(&wait_for_frame(&mut server)).unwrap(), tracking);
}

fn datagram_pair() -> (DatagramEndpoint, DatagramEndpoint) {
    let a = DatagramEndpoint::bind("127.0.0.1:0").unwrap();
    let b = DatagramEndpoint::bind("127.0.0.1:0").unwrap();
    a.connect(b.local_addr()).unwrap();
    b.connect(a.local_addr()).unwrap();
    b.set_read_timeout(Some(TIMEOUT)).unwrap();
    a.set_read_timeout(Some(TIMEOUT)).unwrap();
    (a, b)
}

#[test]
fn test_datagram_round_trip() {
    let (a, b) = datagram_pair();

    a.send(&[7u8; MAX_DATAGRAM_SIZE]).unwrap();
    let (data, from) = b.receive_from().unwrap();
    assert_eq!(data.len(), MAX_DATAGRAM_SIZE);
    assert_eq!(from, a.local_addr());
    assert_eq!(b.remote_addr(), Some(a.local_addr()));

    b.send(b"pong").unwrap();
    assert_eq!(a.receive().unwrap(), b"pong");
    assert_eq!(a.stats().packets_sent, 1);
    assert_eq!(a.stats().packets_received, 1);
}

#[test]
fn test_send_to_unconnected_endpoint() {
    let a = DatagramEndpoint::bind("127.0.0.1:0").unwrap();
    let b = DatagramEndpoint::bind("127.0.0.1:0").unwrap();
    b.set_read_timeout(Some(TIMEOUT)).unwrap();
    assert_eq!(a.remote_addr(), None);

    assert_eq!(a.send_to(b"hello", b.local_addr()).unwrap(), 5);
    let (data, from) = b.receive_from().unwrap();
    assert_eq!(data, b"hello");
    assert_eq!(from, a.local_addr());

    let err = a.send_to(&[0u8; MAX_DATAGRAM_SIZE + 1], b.local_addr()).unwrap_err();
    assert!(matches!(err, TransportError::DatagramTooLarge { .. }));
}

#[test]
fn test_datagram_oversize_rejected() {
    let (a, _b) = datagram_pair();
    let err = a.send(&[0u8; MAX_DATAGRAM_SIZE + 1]).unwrap_err();
    assert!(matches!(err, TransportError::DatagramTooLarge { len: 2001, max: 2000 }));
    assert_eq!(a.stats().packets_sent, 0);
}

#[test]
fn test_datagram_shutdown_wakes_receiver() {
    let endpoint = Arc::new(DatagramEndpoint::bind("127.0.0.1:0").unwrap());
    let receiver = Arc::clone(&endpoint);
    let handle = thread::spawn(move || receiver.receive());

    thread::sleep(Duration::from_millis(20));
    endpoint.shutdown();

    let result = handle.join().unwrap();
    assert!(matches!(result, Err(TransportError::PeerClosed)));
    assert!(endpoint.is_closed());
}

#[test]
fn test_full_loss_simulation_drops_everything() {
    let (a, b) = datagram_pair();
    a.set_loss_simulation(LossSimulation::new(100.0));

    for _ in 0..10 {
        a.send(b"lost").unwrap();
    }
    b.set_read_timeout(Some(Duration::from_millis(50))).unwrap();
    match b.receive() {
        Err(TransportError::Connection(e)) => assert!(matches!(
            e.kind(),
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
        )),
        other => panic!("expected a read timeout, got {:?}", other),
    }
    assert_eq!(a.stats().packets_dropped, 10);
    assert_eq!(a.stats().packets_sent, 0);
}

#[test]
fn test_multicast_requires_group_address() {
    let endpoint = DatagramEndpoint::bind("127.0.0.1:0").unwrap();
    let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
    assert!(matches!(
        endpoint.join_multicast(addr.ip()),
        Err(TransportError::NotMulticast(_))
    ));
}

#[test]
fn test_sharded_messages_survive_single_losses() {
    let (a, b) = datagram_pair();
    let mut encoder = ShardEncoder::new(Box::new(XorParityCodec), 1);
    let mut accumulator = ShardAccumulator::new(Box::new(XorParityCodec));

    let messages: Vec<Vec<u8>> = (0..5u8)
        .map(|i| (0..9000u32).map(|j| (j as u8).wrapping_add(i)).collect())
        .collect();

    for (i, message) in messages.iter().enumerate() {
        let frame = encoder.encode(message).unwrap();
        let skipped = i % frame.datagrams.len();
        for (index, datagram) in frame.datagrams.iter().enumerate() {
            if index != skipped {
                a.send(datagram).unwrap();
            }
        }
    }

    let mut received = Vec::new();
    while received.len() < messages.len() {
        let datagram = b.receive().unwrap();
        if let Some(frame) = accumulator.push(datagram).unwrap() {
            received.push(frame);
        }
    }

    for (frame, message) in received.iter().zip(&messages) {
        assert_eq!(&frame.payload, message);
    }
    assert_eq!(accumulator.stats().frames_lost, 0);
    assert!(accumulator.stats().frames_reconstructed >= 4);
}
