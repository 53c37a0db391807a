//! Stream framer for the Meshtastic client API.
//!
//! Over both TCP (port 4403) and serial, ToRadio/FromRadio messages travel as:
//!
//!   `0x94 0xC3 <len_hi> <len_lo> <protobuf bytes>`
//!
//! Serial links interleave the protobuf stream with plain-text debug console output,
//! so the decoder skips bytes until it sees the two start markers and drops headers
//! whose declared length cannot be a real frame.
use bytes::{Buf, Bytes, BytesMut};

pub const START1: u8 = 0x94;
pub const START2: u8 = 0xC3;
const HEADER_LEN: usize = 4;

/// Largest protobuf payload the firmware emits (`MAX_TO_FROM_RADIO_SIZE`).
pub const MAX_FRAME_SIZE: usize = 512;

/// Incremental decoder; feed arbitrary chunks with [`push`](Self::push) and pull whole
/// frames with [`next_frame`](Self::next_frame).
#[derive(Debug, Default)]
pub struct StreamFramer {
    buf: BytesMut,
    skipped: usize,
}

impl StreamFramer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(2048),
            skipped: 0,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Number of non-frame bytes discarded so far (console noise, resync).
    pub fn skipped_bytes(&self) -> usize {
        self.skipped
    }

    pub fn next_frame(&mut self) -> Option<Bytes> {
        loop {
            // Realign to header if needed
            match self.buf.iter().position(|&b| b == START1) {
                Some(0) => {}
                Some(pos) => {
                    self.skipped += pos;
                    self.buf.advance(pos);
                }
                None => {
                    self.skipped += self.buf.len();
                    self.buf.clear();
                    return None;
                }
            }
            if self.buf.len() < 2 {
                return None;
            }
            if self.buf[1] != START2 {
                self.skipped += 1;
                self.buf.advance(1);
                continue;
            }
            if self.buf.len() < HEADER_LEN {
                return None;
            }
            let declared = ((self.buf[2] as usize) << 8) | (self.buf[3] as usize);
            if declared == 0 || declared > MAX_FRAME_SIZE {
                self.skipped += 1;
                self.buf.advance(1);
                continue;
            }
            if self.buf.len() < HEADER_LEN + declared {
                return None;
            }
            self.buf.advance(HEADER_LEN);
            return Some(self.buf.split_to(declared).freeze());
        }
    }
}

/// Prefix a protobuf payload with the stream header.
pub fn encode_frame(payload: &[u8]) -> Option<Vec<u8>> {
    if payload.len() > MAX_FRAME_SIZE {
        return None;
    }
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.push(START1);
    out.push(START2);
    out.push(((payload.len() >> 8) & 0xFF) as u8);
    out.push((payload.len() & 0xFF) as u8);
    out.extend_from_slice(payload);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yields_frame_split_across_chunks() {
        let frame = encode_frame(b"abc").unwrap();
        let mut f = StreamFramer::new();
        f.push(&frame[..2]);
        assert!(f.next_frame().is_none());
        f.push(&frame[2..5]);
        assert!(f.next_frame().is_none());
        f.push(&frame[5..]);
        assert_eq!(f.next_frame().unwrap().as_ref(), b"abc");
        assert!(f.next_frame().is_none());
    }

    #[test]
    fn skips_console_text_between_frames() {
        let mut stream = b"INFO | boot ok\r\n".to_vec();
        stream.extend(encode_frame(b"one").unwrap());
        stream.extend_from_slice(b"\x94garbage");
        stream.extend(encode_frame(b"two").unwrap());
        let mut f = StreamFramer::new();
        f.push(&stream);
        assert_eq!(f.next_frame().unwrap().as_ref(), b"one");
        assert_eq!(f.next_frame().unwrap().as_ref(), b"two");
        assert!(f.skipped_bytes() >= 16);
    }

    #[test]
    fn oversize_header_is_discarded() {
        let mut stream = vec![START1, START2, 0x7f, 0xff];
        stream.extend(encode_frame(b"ok").unwrap());
        let mut f = StreamFramer::new();
        f.push(&stream);
        assert_eq!(f.next_frame().unwrap().as_ref(), b"ok");
    }

    #[test]
    fn refuses_to_encode_oversize_payload() {
        assert!(encode_frame(&vec![0u8; MAX_FRAME_SIZE + 1]).is_none());
    }
}
