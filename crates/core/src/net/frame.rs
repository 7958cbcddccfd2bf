//! Length-prefixed framing for the reliable channel.
//!
//! ```text
//! ┌──────────────────┬──────────────────────────┐
//! │ Length (4 bytes) │ Payload (variable)       │
//! │ Little-endian u32│ opaque to the transport  │
//! └──────────────────┴──────────────────────────┘
//! ```
//!
//! The length counts the payload only. Zero-length payloads are valid frames.

use std::io::{self, IoSlice, Read, Write};
use std::thread;
use std::time::Duration;

use super::error::TransportError;

pub const HEADER_SIZE: usize = 4;
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Pause between attempts when a non-blocking socket refuses more bytes.
const WOULD_BLOCK_BACKOFF: Duration = Duration::from_micros(50);

pub fn encode_length(len: usize, max_frame_size: usize) -> Result<[u8; HEADER_SIZE], TransportError> {
    if len > max_frame_size {
        return Err(TransportError::FrameTooLarge {
            len,
            max: max_frame_size,
        });
    }
    let len = u32::try_from(len).map_err(|_| TransportError::FrameTooLarge {
        len,
        max: u32::MAX as usize,
    })?;
    Ok(len.to_le_bytes())
}

pub fn decode_length(header: [u8; HEADER_SIZE]) -> usize {
    u32::from_le_bytes(header) as usize
}

/// Encodes one complete frame into a fresh buffer.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, TransportError> {
    let header = encode_length(payload.len(), DEFAULT_MAX_FRAME_SIZE)?;
    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&header);
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Writes every payload as a frame, retrying partial writes until the OS has
/// accepted all bytes. Callers serialize access to `writer` so frames from
/// different threads never interleave.
pub fn write_frames<W, P>(
    writer: &mut W,
    payloads: &[P],
    max_frame_size: usize,
) -> Result<usize, TransportError>
where
    W: Write,
    P: AsRef<[u8]>,
{
    let headers = payloads
        .iter()
        .map(|p| encode_length(p.as_ref().len(), max_frame_size))
        .collect::<Result<Vec<_>, _>>()?;

    let mut slices = Vec::with_capacity(payloads.len() * 2);
    for (header, payload) in headers.iter().zip(payloads) {
        slices.push(IoSlice::new(header));
        slices.push(IoSlice::new(payload.as_ref()));
    }

    let total: usize = slices.iter().map(|s| s.len()).sum();
    let mut remaining = &mut slices[..];
    while !remaining.is_empty() {
        match writer.write_vectored(remaining) {
            Ok(0) => return Err(TransportError::PeerClosed),
            Ok(written) => IoSlice::advance_slices(&mut remaining, written),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(WOULD_BLOCK_BACKOFF);
            }
            Err(e) => return Err(TransportError::Connection(e)),
        }
    }

    Ok(total)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    AwaitingHeader,
    AwaitingPayload { len: usize },
    /// An oversized header was seen. The stream is out of sync from here on.
    Rejected { len: usize },
}

/// Per-connection accumulation buffer and the state machine that turns a byte
/// stream back into frames.
///
/// Reads never go past the end of the frame being assembled, so the buffer
/// holds at most one partial frame and is empty between frames.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    state: DecodeState,
    max_frame_size: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl FrameDecoder {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(HEADER_SIZE),
            state: DecodeState::AwaitingHeader,
            max_frame_size,
        }
    }

    pub fn state(&self) -> DecodeState {
        self.state
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Makes progress on the current frame with at most one read per state.
    ///
    /// Returns `Ok(None)` while the frame is still incomplete (including when
    /// the source would block) and `Ok(Some(payload))` once it is whole.
    pub fn poll<R: Read>(&mut self, source: &mut R) -> Result<Option<Vec<u8>>, TransportError> {
        if let DecodeState::Rejected { len } = self.state {
            return Err(TransportError::FrameTooLarge {
                len,
                max: self.max_frame_size,
            });
        }

        if let DecodeState::AwaitingHeader = self.state {
            assert!(self.buffer.len() < HEADER_SIZE, "header buffer overran");
            let wanted = HEADER_SIZE - self.buffer.len();
            self.read_some(source, wanted)?;
            if self.buffer.len() < HEADER_SIZE {
                return Ok(None);
            }

            let mut header = [0u8; HEADER_SIZE];
            header.copy_from_slice(&self.buffer[..HEADER_SIZE]);
            let len = decode_length(header);
            if len > self.max_frame_size {
                self.buffer.clear();
                self.state = DecodeState::Rejected { len };
                return Err(TransportError::FrameTooLarge {
                    len,
                    max: self.max_frame_size,
                });
            }
            self.buffer.reserve(len);
            self.state = DecodeState::AwaitingPayload { len };
        }

        let DecodeState::AwaitingPayload { len } = self.state else {
            unreachable!("decoder left the header state without a length");
        };

        let buffered_payload = self.buffer.len() - HEADER_SIZE;
        assert!(buffered_payload <= len, "payload buffer overran declared length");
        if buffered_payload < len {
            self.read_some(source, len - buffered_payload)?;
            if self.buffer.len() < HEADER_SIZE + len {
                return Ok(None);
            }
        }

        let payload = self.buffer.split_off(HEADER_SIZE);
        self.buffer.clear();
        self.state = DecodeState::AwaitingHeader;
        Ok(Some(payload))
    }

    fn read_some<R: Read>(&mut self, source: &mut R, wanted: usize) -> Result<(), TransportError> {
        let start = self.buffer.len();
        self.buffer.resize(start + wanted, 0);

        let result = loop {
            match source.read(&mut self.buffer[start..]) {
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => break other,
            }
        };

        match result {
            Ok(0) => {
                self.buffer.truncate(start);
                Err(TransportError::PeerClosed)
            }
            Ok(read) => {
                self.buffer.truncate(start + read);
                Ok(())
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.buffer.truncate(start);
                Ok(())
            }
            Err(e) => {
                self.buffer.truncate(start);
                Err(TransportError::Connection(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Hands out at most `chunk` bytes per read and reports `WouldBlock` when
    /// drained, like a non-blocking socket with a slow peer.
    struct TrickleReader {
        data: VecDeque<u8>,
        chunk: usize,
        closed: bool,
    }

    impl TrickleReader {
        fn new(data: Vec<u8>, chunk: usize) -> Self {
            Self {
                data: data.into(),
                chunk,
                closed: false,
            }
        }
    }

    impl Read for TrickleReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.data.is_empty() {
                if self.closed {
                    return Ok(0);
                }
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let n = buf.len().min(self.chunk).min(self.data.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.data.pop_front().unwrap();
            }
            Ok(n)
        }
    }

    /// Accepts at most `chunk` bytes per call.
    struct TrickleWriter {
        written: Vec<u8>,
        chunk: usize,
    }

    impl Write for TrickleWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(self.chunk);
            self.written.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn drain(decoder: &mut FrameDecoder, reader: &mut TrickleReader) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        for _ in 0..100_000 {
            match decoder.poll(reader).unwrap() {
                Some(frame) => frames.push(frame),
                None if reader.data.is_empty() => break,
                None => {}
            }
        }
        frames
    }

    #[test]
    fn test_header_is_little_endian() {
        let frame = encode_frame(&[0xAA; 258]).unwrap();
        assert_eq!(&frame[..4], &[0x02, 0x01, 0x00, 0x00]);
        assert_eq!(frame.len(), 4 + 258);
    }

    #[test]
    fn test_byte_at_a_time_delivery() {
        let mut stream = encode_frame(b"hello").unwrap();
        stream.extend(encode_frame(b"").unwrap());
        stream.extend(encode_frame(b"world!").unwrap());

        let mut decoder = FrameDecoder::default();
        let mut reader = TrickleReader::new(stream, 1);
        let frames = drain(&mut decoder, &mut reader);

        assert_eq!(frames, vec![b"hello".to_vec(), Vec::new(), b"world!".to_vec()]);
        assert_eq!(decoder.state(), DecodeState::AwaitingHeader);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_partial_header_waits() {
        let stream = encode_frame(b"abc").unwrap();
        let mut decoder = FrameDecoder::default();
        let mut reader = TrickleReader::new(stream[..2].to_vec(), 16);

        assert!(decoder.poll(&mut reader).unwrap().is_none());
        assert_eq!(decoder.state(), DecodeState::AwaitingHeader);
        assert_eq!(decoder.buffered(), 2);

        reader.data.extend(&stream[2..5]);
        assert!(decoder.poll(&mut reader).unwrap().is_none());
        assert_eq!(decoder.state(), DecodeState::AwaitingPayload { len: 3 });

        reader.data.extend(&stream[5..]);
        assert_eq!(decoder.poll(&mut reader).unwrap().unwrap(), b"abc");
    }

    #[test]
    fn test_zero_read_is_peer_closed() {
        let mut decoder = FrameDecoder::default();
        let mut reader = TrickleReader::new(vec![5, 0], 16);
        reader.closed = true;

        assert!(decoder.poll(&mut reader).unwrap().is_none());
        let err = decoder.poll(&mut reader).unwrap_err();
        assert!(err.is_peer_closed());
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut decoder = FrameDecoder::new(1024);
        let mut reader = TrickleReader::new(2048u32.to_le_bytes().to_vec(), 16);

        match decoder.poll(&mut reader) {
            Err(TransportError::FrameTooLarge { len, max }) => {
                assert_eq!(len, 2048);
                assert_eq!(max, 1024);
            }
            other => panic!("expected FrameTooLarge, got {:?}", other),
        }
    }

    #[test]
    fn test_oversized_length_stays_rejected() {
        let mut decoder = FrameDecoder::new(16);
        let mut reader = TrickleReader::new(vec![100, 0, 0, 0, 1, 2, 3], 16);

        for _ in 0..3 {
            match decoder.poll(&mut reader) {
                Err(TransportError::FrameTooLarge { len, max }) => {
                    assert_eq!(len, 100);
                    assert_eq!(max, 16);
                }
                other => panic!("expected FrameTooLarge, got {:?}", other),
            }
        }
        assert_eq!(decoder.state(), DecodeState::Rejected { len: 100 });
        assert_eq!(decoder.buffered(), 0);
        // Nothing past the bad header is consumed.
        assert_eq!(reader.data.len(), 3);
    }

    #[test]
    fn test_write_frames_survives_short_writes() {
        let mut writer = TrickleWriter {
            written: Vec::new(),
            chunk: 3,
        };
        let payloads: [&[u8]; 3] = [b"first", b"", b"third frame"];
        let total = write_frames(&mut writer, &payloads, DEFAULT_MAX_FRAME_SIZE).unwrap();
        assert_eq!(total, 12 + 5 + 11);

        let mut decoder = FrameDecoder::default();
        let mut reader = TrickleReader::new(writer.written, 7);
        let frames = drain(&mut decoder, &mut reader);
        assert_eq!(frames, vec![b"first".to_vec(), Vec::new(), b"third frame".to_vec()]);
    }

    #[test]
    fn test_write_zero_is_peer_closed() {
        struct Closed;
        impl Write for Closed {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Ok(0)
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let err = write_frames(&mut Closed, &[b"payload"], DEFAULT_MAX_FRAME_SIZE).unwrap_err();
        assert!(err.is_peer_closed());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            #[test]
            fn prop_frame_round_trip(
                payload in prop::collection::vec(any::<u8>(), 0..=65535),
                chunk in 1usize..64,
            ) {
                let stream = encode_frame(&payload).unwrap();
                prop_assert_eq!(stream.len(), HEADER_SIZE + payload.len());

                let mut decoder = FrameDecoder::default();
                let mut reader = TrickleReader::new(stream, chunk);
                let frames = drain(&mut decoder, &mut reader);

                prop_assert_eq!(frames.len(), 1);
                prop_assert_eq!(&frames[0], &payload);
            }

            #[test]
            fn prop_single_byte_delivery(payload in prop::collection::vec(any::<u8>(), 0..2048)) {
                let stream = encode_frame(&payload).unwrap();
                let mut decoder = FrameDecoder::default();
                let mut reader = TrickleReader::new(stream, 1);
                let frames = drain(&mut decoder, &mut reader);

                prop_assert_eq!(frames, vec![payload]);
            }
        }
    }
}
