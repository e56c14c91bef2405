//! Byte-level incremental parser/serializer for the GDB Remote Serial
//! Protocol's `$payload#cksum` frames.

use bytes::{Buf, BytesMut};

/// Out-of-band interrupt byte requesting immediate halt.
const INTERRUPT_BYTE: u8 = 0x03;

/// Result of one `try_parse` call against the accumulated receive buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseEvent {
    /// Not enough bytes yet for a full token; call `feed` again before retrying.
    Incomplete,
    /// A bare `0x03` byte was consumed.
    Interrupt,
    /// A complete, checksum-valid frame was extracted.
    Frame(Vec<u8>),
    /// A complete frame was extracted but its checksum did not match.
    BadChecksum,
}

/// Incremental RSP frame parser. Owns the append-only receive buffer for one
/// connection; `+`/`-` bytes between frames are discarded silently.
#[derive(Default)]
pub struct PacketFramer {
    buf: BytesMut,
}

impl PacketFramer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    /// Append newly received bytes to the parse buffer.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// True if the buffer has no bytes left to parse.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Attempt to extract one token (interrupt byte or frame) from the
    /// buffer. Call repeatedly (it consumes at most one token per call)
    /// until it returns `Incomplete`.
    pub fn try_parse(&mut self) -> ParseEvent {
        if self.buf.is_empty() {
            return ParseEvent::Incomplete;
        }

        if self.buf[0] == INTERRUPT_BYTE {
            self.buf.advance(1);
            return ParseEvent::Interrupt;
        }

        // Step 2: discard bytes up to (not including) the first '$'. This
        // silently swallows stray ACK/NAK bytes the client may have sent
        // between frames.
        match self.buf.iter().position(|&b| b == b'$') {
            Some(idx) => {
                if idx > 0 {
                    self.buf.advance(idx);
                }
            }
            None => {
                self.buf.clear();
                return ParseEvent::Incomplete;
            }
        }

        // Step 3: need a '#' after '$'.
        let hash_pos = match self.buf.iter().skip(1).position(|&b| b == b'#') {
            Some(p) => p + 1,
            None => return ParseEvent::Incomplete,
        };

        // Step 4: need two checksum digits after '#'.
        if self.buf.len() < hash_pos + 3 {
            return ParseEvent::Incomplete;
        }

        // Step 5: extract payload and checksum, then remove the frame.
        let payload = self.buf[1..hash_pos].to_vec();
        let checksum_digits = &self.buf[hash_pos + 1..hash_pos + 3];
        let expected = std::str::from_utf8(checksum_digits)
            .ok()
            .and_then(|s| u8::from_str_radix(s, 16).ok());
        self.buf.advance(hash_pos + 3);

        // Step 6: verify checksum.
        let actual = checksum_of(&payload);
        match expected {
            Some(e) if e == actual => ParseEvent::Frame(payload),
            _ => ParseEvent::BadChecksum,
        }
    }
}

/// 8-bit sum of `payload` modulo 256.
pub fn checksum_of(payload: &[u8]) -> u8 {
    payload.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Serialize `payload` into a complete `$payload#cksum` wire frame.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let checksum = checksum_of(payload);
    let mut out = Vec::with_capacity(payload.len() + 4);
    out.push(b'$');
    out.extend_from_slice(payload);
    out.push(b'#');
    out.extend_from_slice(format!("{checksum:02x}").as_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_frame() {
        let mut framer = PacketFramer::new();
        framer.feed(encode_frame(b"qSupported").as_slice());
        assert_eq!(
            framer.try_parse(),
            ParseEvent::Frame(b"qSupported".to_vec())
        );
        assert!(framer.is_empty());
    }

    #[test]
    fn detects_checksum_mismatch() {
        let mut framer = PacketFramer::new();
        framer.feed(b"$g#00");
        assert_eq!(framer.try_parse(), ParseEvent::BadChecksum);
    }

    #[test]
    fn incomplete_frame_waits_for_more_bytes() {
        let mut framer = PacketFramer::new();
        framer.feed(b"$g#6");
        assert_eq!(framer.try_parse(), ParseEvent::Incomplete);
        framer.feed(b"7");
        assert_eq!(framer.try_parse(), ParseEvent::Frame(b"g".to_vec()));
    }

    #[test]
    fn interrupt_byte_is_consumed_first() {
        let mut framer = PacketFramer::new();
        framer.feed(&[0x03]);
        assert_eq!(framer.try_parse(), ParseEvent::Interrupt);
    }

    #[test]
    fn stray_ack_bytes_between_frames_are_discarded() {
        let mut framer = PacketFramer::new();
        let mut bytes = vec![b'+'];
        bytes.extend_from_slice(&encode_frame(b"c"));
        framer.feed(&bytes);
        assert_eq!(framer.try_parse(), ParseEvent::Frame(b"c".to_vec()));
    }

    #[test]
    fn resyncs_past_garbage_before_dollar() {
        let mut framer = PacketFramer::new();
        let mut bytes = b"garbage-before-frame".to_vec();
        bytes.extend_from_slice(&encode_frame(b"?"));
        framer.feed(&bytes);
        assert_eq!(framer.try_parse(), ParseEvent::Frame(b"?".to_vec()));
    }

    #[test]
    fn send_packet_bytes_match_checksum_formula() {
        let payload = b"S05";
        let encoded = encode_frame(payload);
        let expected_checksum = checksum_of(payload);
        assert_eq!(encoded, format!("$S05#{expected_checksum:02x}").into_bytes());
    }
}
