//! Byte level framing for HL7's Minimal Lower Layer Protocol.
//!
//! A message on the wire is `0x0B` + HL7 text + `0x1C` + `0x0D`. The framer here is
//! a per-byte state machine, so it produces exactly the same messages whether the
//! transport hands it one byte at a time or the whole stream at once.

use bytes::buf::BufMut;
use bytes::BytesMut;
use log::{debug, trace, warn};

pub const BLOCK_HEADER: u8 = 0x0B; //Vertical-Tab char, the marker for the start of a message
pub const BLOCK_FOOTER: [u8; 2] = [END_BLOCK, CARRIAGE_RETURN]; //File-Separator char + CR, the marker for the end of a message

const END_BLOCK: u8 = 0x1C;
const CARRIAGE_RETURN: u8 = 0x0D;
const LINE_FEED: u8 = 0x0A;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    InMessage,
}

/// Reassembles MLLP wrapped messages from a byte stream.
///
/// The end block byte alone completes a message. The CR that should follow it
/// arrives while the framer is idle and is dropped with any other inter-message
/// noise.
#[derive(Debug)]
pub struct MllpFramer {
    state: State,
    buffer: BytesMut,
    max_len: usize,
}

impl Default for MllpFramer {
    fn default() -> Self {
        MllpFramer::new()
    }
}

impl MllpFramer {
    /// Largest message accepted before the partial message is thrown away.
    pub const DEFAULT_MAX_LEN: usize = 1024 * 1024;

    /// Creates a framer with the default message size limit.
    /// ```
    /// use lab_gateway::mllp::MllpFramer;
    /// let framer = MllpFramer::new();
    /// assert!(!framer.in_message());
    /// ```
    pub fn new() -> Self {
        MllpFramer::with_max_len(MllpFramer::DEFAULT_MAX_LEN)
    }

    pub fn with_max_len(max_len: usize) -> Self {
        MllpFramer {
            state: State::Idle,
            buffer: BytesMut::new(),
            max_len,
        }
    }

    /// True between a start block and the matching end block.
    pub fn in_message(&self) -> bool {
        self.state == State::InMessage
    }

    /// Advances the state machine by one byte, returning the message body when
    /// this byte completed one.
    pub fn feed(&mut self, byte: u8) -> Option<BytesMut> {
        match (self.state, byte) {
            (_, BLOCK_HEADER) => {
                if self.state == State::InMessage {
                    debug!(
                        "MLLP: start block inside a message, discarding {} buffered bytes",
                        self.buffer.len()
                    );
                }
                self.buffer.clear();
                self.state = State::InMessage;
                None
            }
            (State::InMessage, END_BLOCK) => {
                self.state = State::Idle;
                trace!("MLLP: end block after {} bytes", self.buffer.len());
                Some(self.buffer.split())
            }
            (State::Idle, END_BLOCK) => {
                debug!("MLLP: end block with no open message, ignoring");
                None
            }
            (State::InMessage, LINE_FEED) => None, // CRLF senders, segments are CR terminated
            (State::InMessage, b) => {
                if self.buffer.len() >= self.max_len {
                    warn!(
                        "MLLP: message exceeds {} bytes, discarding it",
                        self.max_len
                    );
                    self.buffer.clear();
                    self.state = State::Idle;
                    return None;
                }
                self.buffer.put_u8(b);
                None
            }
            (State::Idle, _) => None,
        }
    }

    /// Feeds a whole chunk, collecting every message it completes.
    pub fn feed_slice(&mut self, bytes: &[u8]) -> Vec<BytesMut> {
        bytes.iter().filter_map(|b| self.feed(*b)).collect()
    }
}

/// Wraps `payload` in the MLLP header and footer.
/// This is used for the ACK messages sent back to an instrument.
pub fn wrap(payload: &[u8], dst: &mut BytesMut) {
    dst.reserve(payload.len() + 3); //we need an extra 3 bytes of space on top of the message proper
    dst.put_u8(BLOCK_HEADER); //header

    dst.put_slice(payload); //data

    dst.put_slice(&BLOCK_FOOTER); //footer

    debug!("MLLP: Encoded value for send: '{:?}'", dst);
}

//////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn wrap_for_mllp(s: &str) -> Bytes {
        Bytes::from(format!("\x0B{}\x1C\x0D", s))
    }

    fn wrap_for_mllp_vec(s: &str) -> Vec<u8> {
        format!("\x0B{}\x1C\x0D", s).into_bytes()
    }

    #[test]
    fn implements_default() {
        let m = MllpFramer::default();
        assert!(!m.in_message());
    }

    #[test]
    fn wraps_simple_data() {
        let mut output_buf = BytesMut::with_capacity(64);
        wrap(b"abcd", &mut output_buf);

        let encoded_msg = output_buf.freeze();
        assert_eq!(encoded_msg, wrap_for_mllp("abcd"));
    }

    #[test]
    fn ensure_framer_finds_simple_message() {
        let mut m = MllpFramer::new();
        let messages = m.feed_slice(&wrap_for_mllp_vec("abcd"));

        assert_eq!(messages.len(), 1);
        assert_eq!(&messages[0][..], b"abcd");
        assert!(!m.in_message());
    }

    #[test]
    fn ensure_data_after_end_is_ignored() {
        let mut m = MllpFramer::new();
        let messages = m.feed_slice(b"\x0BTest Data\x1C\x0DMore Data");

        assert_eq!(messages.len(), 1);
        assert_eq!(&messages[0][..], b"Test Data");
    }

    #[test]
    fn ensure_data_before_start_is_ignored() {
        let mut m = MllpFramer::new();
        let messages = m.feed_slice(b"noise\r\n\x0BTest Data\x1C\x0D");

        assert_eq!(messages.len(), 1);
        assert_eq!(&messages[0][..], b"Test Data");
    }

    #[test]
    fn ensure_buffer_is_reset_per_message() {
        let mut mllp = MllpFramer::new();

        let first = mllp.feed_slice(&wrap_for_mllp_vec("Test Data"));
        let second = mllp.feed_slice(&wrap_for_mllp_vec("This is different"));

        assert_eq!(&first[0][..], b"Test Data");
        assert_eq!(&second[0][..], b"This is different");
    }

    #[test]
    fn multiple_messages_in_one_chunk() {
        let mut stream = wrap_for_mllp_vec("one");
        stream.extend(wrap_for_mllp_vec("two"));

        let messages = MllpFramer::new().feed_slice(&stream);
        assert_eq!(messages.len(), 2);
        assert_eq!(&messages[1][..], b"two");
    }

    #[test]
    fn test_real_message() {
        let mut mllp = MllpFramer::new();
        let data = wrap_for_mllp_vec("MSH|^~\\&|ZIS|1^AHospital|||200405141144||¶ADT^A01|20041104082400|P|2.3|||AL|NE|||8859/15|¶EVN|A01|20041104082400.0000+0100|20041104082400¶PID||\"\"|10||Vries^Danny^D.^^de||19951202|M|||Rembrandlaan^7^Leiden^^7301TH^\"\"^^P||\"\"|\"\"||\"\"|||||||\"\"|\"\"¶PV1||I|3w^301^\"\"^01|S|||100^van den Berg^^A.S.^^\"\"^dr|\"\"||9||||H||||20041104082400.0000+0100");

        let messages = mllp.feed_slice(&data);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].len(), 338);
    }

    #[test]
    fn test_message_split_over_multiple_calls() {
        let mut mllp = MllpFramer::new();

        assert!(mllp.feed_slice(b"\x0BTest").is_empty());
        assert!(mllp.in_message());
        assert!(mllp.feed_slice(b" Data").is_empty());

        let messages = mllp.feed_slice(b" Here\x1C\x0D");
        assert_eq!(&messages[0][..], b"Test Data Here");
    }

    #[test]
    fn segment_crs_are_kept_and_line_feeds_dropped() {
        let messages = MllpFramer::new().feed_slice(b"\x0BMSH|a\r\nPID|b\r\x1C\x0D");
        assert_eq!(&messages[0][..], b"MSH|a\rPID|b\r");
    }

    #[test]
    fn trailing_cr_is_not_part_of_next_message() {
        let mut mllp = MllpFramer::new();
        mllp.feed_slice(&wrap_for_mllp_vec("first"));

        let messages = mllp.feed_slice(&wrap_for_mllp_vec("second"));
        assert_eq!(&messages[0][..], b"second");
    }

    #[test]
    fn restart_discards_partial_message() {
        let messages = MllpFramer::new().feed_slice(b"\x0Bpartial\x0Bwhole\x1C\x0D");

        assert_eq!(messages.len(), 1);
        assert_eq!(&messages[0][..], b"whole");
    }

    #[test]
    fn stray_end_block_is_ignored() {
        let mut mllp = MllpFramer::new();
        assert!(mllp.feed(0x1C).is_none());
        assert!(!mllp.in_message());

        let messages = mllp.feed_slice(&wrap_for_mllp_vec("after"));
        assert_eq!(&messages[0][..], b"after");
    }

    #[test]
    fn empty_message_is_emitted() {
        let messages = MllpFramer::new().feed_slice(b"\x0B\x1C\x0D");
        assert_eq!(messages.len(), 1);
        assert!(messages[0].is_empty());
    }

    #[test]
    fn oversized_message_is_dropped() {
        let mut mllp = MllpFramer::with_max_len(4);

        assert!(mllp.feed_slice(b"\x0Btoo long\x1C\x0D").is_empty());
        assert!(!mllp.in_message());

        let messages = mllp.feed_slice(b"\x0Bfits\x1C\x0D");
        assert_eq!(&messages[0][..], b"fits");
    }

    #[test]
    fn output_is_independent_of_chunk_size() {
        let mut stream = b"junk".to_vec();
        stream.extend(wrap_for_mllp_vec("MSH|^~\\&|A|B|C|D\r\nPID|1||12345\r"));
        stream.extend(b"\x0Bdropped");
        stream.extend(wrap_for_mllp_vec("OBX|1|NM|GLU^Glucose||5.6\r"));
        stream.push(0x1C);

        let expected = MllpFramer::new().feed_slice(&stream);
        assert_eq!(expected.len(), 2);

        for chunk_size in 1..=stream.len() {
            let mut mllp = MllpFramer::new();
            let got: Vec<BytesMut> = stream
                .chunks(chunk_size)
                .flat_map(|chunk| mllp.feed_slice(chunk))
                .collect();
            assert_eq!(got, expected, "chunk size {}", chunk_size);
        }
    }
}
