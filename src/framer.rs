//! Framer selection and the tokio codec a [`Session`](crate::session::Session)
//! drives its transport through.
//!
//! A connection is framed as MLLP only, ASTM only, or both at once. In the
//! combined case a start block (`0x0B`) seen while neither side is mid-message
//! selects MLLP and any other byte goes to ASTM.

use std::collections::VecDeque;

use bytes::buf::BufMut;
use bytes::BytesMut;
use log::trace;
use tokio_util::codec::*;

use crate::astm::{AstmFramer, AstmOutput, Handshake};
use crate::mllp::{self, MllpFramer};

/// Which framing disciplines a connection accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramerKind {
    Mllp,
    Astm,
    Combined,
}

impl FramerKind {
    /// Maps the per-protocol enable flags to a framer, `None` if both are off.
    pub fn from_flags(hl7: bool, astm: bool) -> Option<Self> {
        match (hl7, astm) {
            (true, false) => Some(FramerKind::Mllp),
            (false, true) => Some(FramerKind::Astm),
            (true, true) => Some(FramerKind::Combined),
            (false, false) => None,
        }
    }
}

/// Everything a framer can ask of its session, in stream order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramerEvent {
    /// A complete HL7 message, MLLP envelope removed.
    Hl7Message(BytesMut),
    /// A complete ASTM frame, STX and ETX/ETB removed.
    AstmFrame(BytesMut),
    SendAck,
    SendNak,
}

/// The per-connection framing state. Owned by exactly one session.
#[derive(Debug)]
pub enum Framer {
    Mllp(MllpFramer),
    Astm(AstmFramer),
    Combined { mllp: MllpFramer, astm: AstmFramer },
}

impl Framer {
    pub fn new(kind: FramerKind, max_len: usize) -> Self {
        match kind {
            FramerKind::Mllp => Framer::Mllp(MllpFramer::with_max_len(max_len)),
            FramerKind::Astm => Framer::Astm(AstmFramer::with_max_len(max_len)),
            FramerKind::Combined => Framer::Combined {
                mllp: MllpFramer::with_max_len(max_len),
                astm: AstmFramer::with_max_len(max_len),
            },
        }
    }

    pub fn kind(&self) -> FramerKind {
        match self {
            Framer::Mllp(_) => FramerKind::Mllp,
            Framer::Astm(_) => FramerKind::Astm,
            Framer::Combined { .. } => FramerKind::Combined,
        }
    }

    /// Advances the framer by one byte, appending anything it produced to
    /// `events`.
    pub fn feed<E: Extend<FramerEvent>>(&mut self, byte: u8, events: &mut E) {
        match self {
            Framer::Mllp(mllp) => feed_mllp(mllp, byte, events),
            Framer::Astm(astm) => feed_astm(astm, byte, events),
            Framer::Combined { mllp, astm } => {
                if mllp.in_message() {
                    feed_mllp(mllp, byte, events)
                } else if astm.in_frame() {
                    feed_astm(astm, byte, events)
                } else if byte == mllp::BLOCK_HEADER {
                    trace!("framer: start block, routing to MLLP");
                    feed_mllp(mllp, byte, events)
                } else {
                    feed_astm(astm, byte, events)
                }
            }
        }
    }

    pub fn feed_slice(&mut self, bytes: &[u8]) -> Vec<FramerEvent> {
        let mut events = Vec::new();
        for b in bytes {
            self.feed(*b, &mut events);
        }
        events
    }
}

fn feed_mllp<E: Extend<FramerEvent>>(mllp: &mut MllpFramer, byte: u8, events: &mut E) {
    if let Some(message) = mllp.feed(byte) {
        events.extend(Some(FramerEvent::Hl7Message(message)));
    }
}

fn feed_astm<E: Extend<FramerEvent>>(astm: &mut AstmFramer, byte: u8, events: &mut E) {
    let AstmOutput { handshake, frame } = astm.feed(byte);
    match handshake {
        Some(Handshake::Ack) => events.extend(Some(FramerEvent::SendAck)),
        Some(Handshake::Nak) => events.extend(Some(FramerEvent::SendNak)),
        None => {}
    }
    if let Some(frame) = frame {
        events.extend(Some(FramerEvent::AstmFrame(frame)));
    }
}

/// Bytes a session writes back to the instrument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// HL7 acknowledgement text, sent inside an MLLP envelope.
    Hl7Ack(String),
    /// A bare ASTM handshake byte.
    Handshake(Handshake),
}

/// Adapts a [`Framer`] to `tokio_util`'s codec traits so a transport can be
/// wrapped in a `Framed`.
#[derive(Debug)]
pub struct GatewayCodec {
    framer: Framer,
    // events produced by earlier reads that have not been handed out yet
    pending: VecDeque<FramerEvent>,
}

impl GatewayCodec {
    pub fn new(framer: Framer) -> Self {
        GatewayCodec {
            framer,
            pending: VecDeque::new(),
        }
    }

    pub fn framer(&self) -> &Framer {
        &self.framer
    }
}

impl Decoder for GatewayCodec {
    type Item = FramerEvent;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.pending.is_empty() && !src.is_empty() {
            // The framer keeps its own partial message, so the read buffer is
            // always drained completely.
            let data = src.split();
            trace!("framer: decoding {} bytes", data.len());
            for b in data.iter() {
                self.framer.feed(*b, &mut self.pending);
            }
        }

        Ok(self.pending.pop_front())
    }
}

impl Encoder<Reply> for GatewayCodec {
    type Error = std::io::Error;

    fn encode(&mut self, reply: Reply, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match reply {
            Reply::Hl7Ack(text) => mllp::wrap(text.as_bytes(), dst),
            Reply::Handshake(handshake) => dst.put_u8(handshake.byte()),
        }
        Ok(())
    }
}
