//! Meshtastic serial stream framing
//!
//! Each protobuf is sent as `0x94 0xC3 <len_hi> <len_lo> <payload>`. Anything
//! outside a frame is the node's debug console output.

use thiserror::Error;

pub const START1: u8 = 0x94;
pub const START2: u8 = 0xC3;
pub const HEADER_LEN: usize = 4;
/// Largest payload the firmware accepts in one frame
pub const MAX_PAYLOAD_LEN: usize = 512;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("payload of {len} bytes exceeds the {max} byte frame limit")]
    TooLarge { len: usize, max: usize },
}

/// Output of the decoder, in stream order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    /// Payload of one complete frame
    Frame(Vec<u8>),
    /// Bytes that were not part of any frame
    Console(Vec<u8>),
}

/// Wrap a payload in a frame header
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(FrameError::TooLarge {
            len: payload.len(),
            max: MAX_PAYLOAD_LEN,
        });
    }

    let len = payload.len() as u16;
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&[START1, START2]);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Incremental decoder; feed it whatever the port returned
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes held back waiting for the rest of a frame
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn push(&mut self, data: &[u8]) -> Vec<Chunk> {
        self.buf.extend_from_slice(data);

        let mut out = Vec::new();
        let mut console = Vec::new();

        loop {
            match self.buf.iter().position(|&b| b == START1) {
                None => {
                    console.append(&mut self.buf);
                    break;
                }
                Some(pos) if pos > 0 => {
                    console.extend(self.buf.drain(..pos));
                }
                Some(_) => {}
            }

            if self.buf.len() < 2 {
                break;
            }
            if self.buf[1] != START2 {
                console.push(self.buf.remove(0));
                continue;
            }
            if self.buf.len() < HEADER_LEN {
                break;
            }

            let declared = u16::from_be_bytes([self.buf[2], self.buf[3]]) as usize;
            if declared == 0 || declared > MAX_PAYLOAD_LEN {
                // Not a real header; resync from the next byte
                self.buf.remove(0);
                continue;
            }
            if self.buf.len() < HEADER_LEN + declared {
                break;
            }

            if !console.is_empty() {
                out.push(Chunk::Console(std::mem::take(&mut console)));
            }
            let frame = self.buf[HEADER_LEN..HEADER_LEN + declared].to_vec();
            self.buf.drain(..HEADER_LEN + declared);
            out.push(Chunk::Frame(frame));
        }

        if !console.is_empty() {
            out.push(Chunk::Console(console));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn frames(chunks: &[Chunk]) -> Vec<Vec<u8>> {
        chunks
            .iter()
            .filter_map(|c| match c {
                Chunk::Frame(f) => Some(f.clone()),
                Chunk::Console(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_encode_frame_header() {
        let frame = encode_frame(&[0xaa; 300]).unwrap();
        assert_eq!(&frame[..4], &[0x94, 0xc3, 0x01, 0x2c]);
        assert_eq!(frame.len(), 304);
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        assert_eq!(
            encode_frame(&[0u8; 513]),
            Err(FrameError::TooLarge { len: 513, max: 512 })
        );
        assert!(encode_frame(&[0u8; 512]).is_ok());
    }

    #[test]
    fn test_decode_split_delivery() {
        let frame = encode_frame(b"hello").unwrap();
        let mut decoder = FrameDecoder::new();

        assert!(decoder.push(&frame[..3]).is_empty());
        assert_eq!(decoder.pending(), 3);
        assert_eq!(
            decoder.push(&frame[3..]),
            vec![Chunk::Frame(b"hello".to_vec())]
        );
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_console_text_before_frame() {
        let mut stream = b"INFO | booting\r\n".to_vec();
        stream.extend(encode_frame(&[1, 2, 3]).unwrap());

        let chunks = FrameDecoder::new().push(&stream);
        assert_eq!(
            chunks,
            vec![
                Chunk::Console(b"INFO | booting\r\n".to_vec()),
                Chunk::Frame(vec![1, 2, 3]),
            ]
        );
    }

    #[test]
    fn test_start_byte_without_second_byte_is_console() {
        let mut stream = vec![0x94, b'x'];
        stream.extend(encode_frame(&[7]).unwrap());

        let chunks = FrameDecoder::new().push(&stream);
        assert_eq!(
            chunks,
            vec![Chunk::Console(vec![0x94, b'x']), Chunk::Frame(vec![7])]
        );
    }

    #[test]
    fn test_oversized_length_resyncs() {
        // Header claiming 0xffff bytes, then a real frame
        let mut stream = vec![0x94, 0xc3, 0xff, 0xff];
        stream.extend(encode_frame(&[9, 9]).unwrap());

        let chunks = FrameDecoder::new().push(&stream);
        assert_eq!(frames(&chunks), vec![vec![9, 9]]);
    }

    #[test]
    fn test_zero_length_resyncs() {
        let mut stream = vec![0x94, 0xc3, 0x00, 0x00];
        stream.extend(encode_frame(&[5]).unwrap());

        let chunks = FrameDecoder::new().push(&stream);
        assert_eq!(frames(&chunks), vec![vec![5]]);
    }

    proptest! {
        #[test]
        fn frames_survive_garbage_and_chunking(
            garbage in proptest::collection::vec(0u8..0x90, 0..64),
            payloads in proptest::collection::vec(
                proptest::collection::vec(any::<u8>(), 1..64), 1..5),
            split in 1usize..16,
        ) {
            let mut stream = garbage.clone();
            for payload in &payloads {
                stream.extend(encode_frame(payload).unwrap());
            }

            let mut decoder = FrameDecoder::new();
            let mut chunks = Vec::new();
            for piece in stream.chunks(split) {
                chunks.extend(decoder.push(piece));
            }

            prop_assert_eq!(frames(&chunks), payloads);
            prop_assert_eq!(decoder.pending(), 0);
        }
    }
}
