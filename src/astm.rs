//! ASTM E1381 low level framing and E1394 record parsing.
//!
//! The instrument opens a transmission with `ENQ`, sends each frame as
//! `STX` + text + `ETX`|`ETB` (followed by a checksum and CR LF) and closes with
//! `EOT`. Every `ENQ` and every frame end is answered with `ACK`.

use bytes::buf::BufMut;
use bytes::BytesMut;
use chrono::{DateTime, SubsecRound, Utc};
use log::{debug, trace, warn};

use crate::record::{field, field_or_next, AstmResult, Protocol};

pub const ENQ: u8 = 0x05;
pub const ACK: u8 = 0x06;
pub const NAK: u8 = 0x15;
pub const STX: u8 = 0x02;
pub const ETX: u8 = 0x03;
pub const ETB: u8 = 0x17;
pub const EOT: u8 = 0x04;

/// A control byte the framer wants written back to the instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    Ack,
    Nak,
}

impl Handshake {
    pub fn byte(self) -> u8 {
        match self {
            Handshake::Ack => ACK,
            Handshake::Nak => NAK,
        }
    }
}

/// What a single byte produced. The handshake reply, if any, must be sent
/// before the frame is processed.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct AstmOutput {
    pub handshake: Option<Handshake>,
    pub frame: Option<BytesMut>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    InFrame,
    // oversized frame, bytes are dropped until its ETX/ETB
    Discarding,
}

/// Reassembles ASTM frames from a byte stream and decides the handshake
/// replies.
///
/// `ETB` is handled exactly like `ETX`: each intermediate frame is completed and
/// parsed on its own, there is no reassembly across continuation frames.
///
/// A frame that outgrows `max_len` is dropped and answered with a single `NAK`
/// at its `ETX`/`ETB` instead of the usual `ACK`.
#[derive(Debug)]
pub struct AstmFramer {
    state: State,
    buffer: BytesMut,
    // set by ENQ, cleared by EOT
    transmitting: bool,
    max_len: usize,
}

impl Default for AstmFramer {
    fn default() -> Self {
        AstmFramer::new()
    }
}

impl AstmFramer {
    pub const DEFAULT_MAX_LEN: usize = 1024 * 1024;

    pub fn new() -> Self {
        AstmFramer::with_max_len(AstmFramer::DEFAULT_MAX_LEN)
    }

    pub fn with_max_len(max_len: usize) -> Self {
        AstmFramer {
            state: State::Idle,
            buffer: BytesMut::new(),
            transmitting: false,
            max_len,
        }
    }

    /// True between `STX` and the end of the frame, including while an
    /// oversized frame is being discarded.
    pub fn in_frame(&self) -> bool {
        self.state != State::Idle
    }

    /// True after an `ENQ` until the following `EOT`.
    pub fn in_transmission(&self) -> bool {
        self.transmitting
    }

    pub fn feed(&mut self, byte: u8) -> AstmOutput {
        let mut output = AstmOutput::default();

        match byte {
            ENQ => {
                trace!("ASTM: ENQ");
                self.transmitting = true;
                output.handshake = Some(Handshake::Ack);
            }
            STX => {
                if self.in_frame() {
                    debug!(
                        "ASTM: STX inside a frame, discarding {} buffered bytes",
                        self.buffer.len()
                    );
                }
                if !self.transmitting {
                    debug!("ASTM: frame started without ENQ");
                }
                self.buffer.clear();
                self.state = State::InFrame;
            }
            ETX | ETB => {
                match self.state {
                    State::InFrame => {
                        trace!("ASTM: frame end after {} bytes", self.buffer.len());
                        output.handshake = Some(Handshake::Ack);
                        output.frame = Some(self.buffer.split());
                    }
                    State::Discarding => {
                        warn!("ASTM: frame exceeded {} bytes, rejecting it", self.max_len);
                        output.handshake = Some(Handshake::Nak);
                    }
                    State::Idle => {
                        debug!("ASTM: frame end with no open frame");
                        output.handshake = Some(Handshake::Ack);
                    }
                }
                self.state = State::Idle;
            }
            EOT => {
                trace!("ASTM: EOT");
                if self.in_frame() {
                    debug!(
                        "ASTM: EOT inside a frame, discarding {} buffered bytes",
                        self.buffer.len()
                    );
                }
                self.buffer.clear();
                self.transmitting = false;
                self.state = State::Idle;
            }
            b if self.state == State::InFrame => {
                if self.buffer.len() >= self.max_len {
                    debug!("ASTM: frame exceeds {} bytes, discarding until its end", self.max_len);
                    self.buffer.clear();
                    self.state = State::Discarding;
                } else {
                    self.buffer.put_u8(b);
                }
            }
            _ => {} // checksum, CR LF, anything between frames and the rest of an oversized frame
        }

        output
    }

    /// Feeds a whole chunk, collecting every output that carried something.
    pub fn feed_slice(&mut self, bytes: &[u8]) -> Vec<AstmOutput> {
        bytes
            .iter()
            .map(|b| self.feed(*b))
            .filter(|out| out.handshake.is_some() || out.frame.is_some())
            .collect()
    }
}

/// Parses a completed frame, stamping every result with the current time.
pub fn parse_frame(frame: &str) -> Vec<AstmResult> {
    parse_frame_at(frame, Utc::now().trunc_subsecs(0))
}

/// Parses a completed frame into one [`AstmResult`] per `R` record.
///
/// Patient and sample IDs carry over from the most recent `P` and `O` records in
/// the same frame. Records of any other type are skipped.
pub fn parse_frame_at(frame: &str, captured_at: DateTime<Utc>) -> Vec<AstmResult> {
    let mut patient_id = "";
    let mut sample_id = "";
    let mut results = Vec::new();

    for record in frame.split('\r').map(str::trim).filter(|r| !r.is_empty()) {
        let fields: Vec<&str> = record.split('|').collect();

        match record_type(&fields) {
            "P" => patient_id = field_or_next(&fields, 2),
            "O" => sample_id = field(&fields, 2),
            "R" => results.push(AstmResult {
                protocol: Protocol::Astm,
                patient_id: patient_id.to_string(),
                sample_id: sample_id.to_string(),
                test_code: field(&fields, 2).to_string(),
                value: field(&fields, 3).to_string(),
                units: field(&fields, 4).to_string(),
                flags: field(&fields, 6).to_string(),
                timestamp: captured_at,
            }),
            other => trace!("ASTM: skipping {:?} record", other),
        }
    }

    results
}

// The first record of a frame carries the frame number digit, e.g. "1H" or "2P".
fn record_type<'a>(fields: &[&'a str]) -> &'a str {
    field(fields, 0).trim_start_matches(|c: char| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn captured() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 13, 9, 30, 0).unwrap()
    }

    fn frames(outputs: &[AstmOutput]) -> Vec<&[u8]> {
        outputs
            .iter()
            .filter_map(|o| o.frame.as_ref().map(|f| &f[..]))
            .collect()
    }

    #[test]
    fn enq_is_always_acked() {
        let mut framer = AstmFramer::new();
        assert_eq!(framer.feed(ENQ).handshake, Some(Handshake::Ack));
        assert!(framer.in_transmission());

        framer.feed(STX);
        framer.feed(b'x');
        // instruments may re-send ENQ, even mid frame
        assert_eq!(framer.feed(ENQ).handshake, Some(Handshake::Ack));
        assert!(framer.in_frame());
    }

    #[test]
    fn frame_is_acked_then_emitted() {
        let mut framer = AstmFramer::new();
        framer.feed(ENQ);
        framer.feed_slice(b"\x021H|\\^&\rP|1||P100");

        let output = framer.feed(ETX);
        assert_eq!(output.handshake, Some(Handshake::Ack));
        assert_eq!(&output.frame.unwrap()[..], b"1H|\\^&\rP|1||P100");
        assert!(!framer.in_frame());
    }

    #[test]
    fn bytes_outside_frames_are_discarded() {
        let mut framer = AstmFramer::new();
        let outputs = framer.feed_slice(b"garbage\x02R|1\x03A7\r\n\x02R|2\x03B8\r\n");

        assert_eq!(frames(&outputs), vec![&b"R|1"[..], &b"R|2"[..]]);
    }

    #[test]
    fn etb_completes_frame_like_etx() {
        let outputs = AstmFramer::new().feed_slice(b"\x05\x021R|1|GLU\x17C1\r\n\x022R|2|NA\x0355\r\n\x04");

        assert_eq!(frames(&outputs), vec![&b"1R|1|GLU"[..], &b"2R|2|NA"[..]]);
        let acks = outputs
            .iter()
            .filter(|o| o.handshake == Some(Handshake::Ack))
            .count();
        assert_eq!(acks, 3);
    }

    #[test]
    fn eot_ends_transmission() {
        let mut framer = AstmFramer::new();
        framer.feed_slice(b"\x05\x02partial");

        assert_eq!(framer.feed(EOT), AstmOutput::default());
        assert!(!framer.in_frame());
        assert!(!framer.in_transmission());
    }

    #[test]
    fn stx_restarts_frame() {
        let outputs = AstmFramer::new().feed_slice(b"\x02lost\x02kept\x03");
        assert_eq!(frames(&outputs), vec![&b"kept"[..]]);
    }

    #[test]
    fn stray_frame_end_is_acked_without_frame() {
        let output = AstmFramer::new().feed(ETX);
        assert_eq!(output.handshake, Some(Handshake::Ack));
        assert!(output.frame.is_none());
    }

    #[test]
    fn oversized_frame_gets_a_single_nak() {
        let mut framer = AstmFramer::with_max_len(3);
        let outputs = framer.feed_slice(b"\x02toolong\x03AB\r\n");

        let replies: Vec<_> = outputs.iter().map(|o| o.handshake).collect();
        assert_eq!(replies, vec![Some(Handshake::Nak)]);
        assert!(frames(&outputs).is_empty());
        assert!(!framer.in_frame());
    }

    #[test]
    fn oversized_frame_stays_open_until_its_end() {
        let mut framer = AstmFramer::with_max_len(3);
        assert!(framer.feed_slice(b"\x02toolong").is_empty());
        assert!(framer.in_frame());

        // the retransmission fits and is accepted
        let outputs = framer.feed_slice(b"\x17AB\r\n\x02ok\x03");
        let replies: Vec<_> = outputs.iter().map(|o| o.handshake).collect();
        assert_eq!(replies, vec![Some(Handshake::Nak), Some(Handshake::Ack)]);
        assert_eq!(frames(&outputs), vec![&b"ok"[..]]);
    }

    #[test]
    fn output_is_independent_of_chunk_size() {
        let stream = b"\x05\x021H|\\^&\rP|1||P100\rO|1|S200\x17AB\r\n\x02\x022R|1|GLU|5.6\x03CD\r\n\x04\x05\x02R|2\x03".to_vec();
        let expected = AstmFramer::new().feed_slice(&stream);

        for chunk_size in 1..=stream.len() {
            let mut framer = AstmFramer::new();
            let got: Vec<AstmOutput> = stream
                .chunks(chunk_size)
                .flat_map(|chunk| framer.feed_slice(chunk))
                .collect();
            assert_eq!(got, expected, "chunk size {}", chunk_size);
        }
    }

    #[test]
    fn result_carries_patient_and_sample_context() {
        let results = parse_frame_at("P|1||P100\rO|1|S200\rR|1|GLU|5.6|mmol/L||N\r", captured());

        assert_eq!(results.len(), 1);
        let result = &results[0];
        assert_eq!(result.protocol, Protocol::Astm);
        assert_eq!(result.patient_id, "P100");
        assert_eq!(result.sample_id, "S200");
        assert_eq!(result.test_code, "GLU");
        assert_eq!(result.value, "5.6");
        assert_eq!(result.units, "mmol/L");
        assert_eq!(result.flags, "N");
        assert_eq!(result.timestamp, captured());
    }

    #[test]
    fn context_persists_across_results() {
        let results = parse_frame_at(
            "1H|\\^&\rP|1|PRAC1\rO|1|S1\rR|1|GLU|5.6\rR|2|NA|140\rO|2|S2\rR|3|K|4.1\rL|1",
            captured(),
        );

        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.patient_id == "PRAC1"));
        assert_eq!(results[1].sample_id, "S1");
        assert_eq!(results[2].sample_id, "S2");
    }

    #[test]
    fn frame_number_prefix_is_ignored() {
        let results = parse_frame_at("2P|1|P9\r3R|1|HGB|13.2|g/dL", captured());
        assert_eq!(results[0].patient_id, "P9");
        assert_eq!(results[0].test_code, "HGB");
    }

    #[test]
    fn result_without_context_has_empty_ids() {
        let results = parse_frame_at("R|1", captured());

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].patient_id, "");
        assert_eq!(results[0].sample_id, "");
        assert_eq!(results[0].value, "");
    }

    #[test]
    fn frame_without_results_is_empty() {
        assert!(parse_frame_at("H|\\^&\rL|1|N", captured()).is_empty());
        assert!(parse_frame_at("", captured()).is_empty());
    }
}
