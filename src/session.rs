//! One instrument connection, from first byte to EOF.
//!
//! A session owns the connection's framer, acknowledges every message or frame
//! as the protocol requires and hands extracted records to the shared sink.
//! Messages are handled strictly in arrival order.

use std::io;
use std::sync::Arc;

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use crate::ack;
use crate::astm::{self, Handshake};
use crate::config::GatewayConfig;
use crate::error::{ConfigError, SinkError};
use crate::framer::{Framer, FramerEvent, FramerKind, GatewayCodec, Reply};
use crate::hl7;
use crate::record::Batch;
use crate::sink::ResultSink;

/// Counters for a finished session, mostly for the closing log line.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub hl7_messages: usize,
    pub astm_frames: usize,
    pub replies_sent: usize,
    pub records_forwarded: usize,
    pub forward_failures: usize,
}

pub struct Session {
    kind: FramerKind,
    config: Arc<GatewayConfig>,
    sink: Arc<dyn ResultSink>,
}

impl Session {
    pub fn new(config: Arc<GatewayConfig>, sink: Arc<dyn ResultSink>) -> Result<Self, ConfigError> {
        let kind = config.framer_kind()?;
        Ok(Session { kind, config, sink })
    }

    pub fn kind(&self) -> FramerKind {
        self.kind
    }

    /// Runs the session until the transport reports EOF.
    ///
    /// Only transport failures end a session early; framing, parsing and sink
    /// problems are logged and the session carries on.
    pub async fn run<T>(&self, io: T, peer: &str) -> io::Result<SessionStats>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let framer = Framer::new(self.kind, self.config.max_message_len);
        let mut transport = Framed::new(io, GatewayCodec::new(framer));
        let mut stats = SessionStats::default();

        info!("[{}] session started ({:?} framing)", peer, self.kind);

        while let Some(event) = transport.next().await {
            match event? {
                FramerEvent::SendAck => {
                    transport.send(Reply::Handshake(Handshake::Ack)).await?;
                    stats.replies_sent += 1;
                    debug!("[{}] ASTM: ACK sent", peer);
                }
                FramerEvent::SendNak => {
                    transport.send(Reply::Handshake(Handshake::Nak)).await?;
                    stats.replies_sent += 1;
                    warn!("[{}] ASTM: NAK sent", peer);
                }
                FramerEvent::Hl7Message(message) => {
                    stats.hl7_messages += 1;
                    let batch = self.handle_hl7(&mut transport, message, peer, &mut stats).await?;
                    self.forward(batch, peer, &mut stats).await;
                }
                FramerEvent::AstmFrame(frame) => {
                    stats.astm_frames += 1;
                    let batch = self.handle_astm(frame, peer);
                    self.forward(batch, peer, &mut stats).await;
                }
            }
        }

        info!(
            "[{}] session closed: {} HL7 message(s), {} ASTM frame(s), {} record(s) forwarded, {} failed forward(s)",
            peer, stats.hl7_messages, stats.astm_frames, stats.records_forwarded, stats.forward_failures
        );
        Ok(stats)
    }

    // Parses the message and acknowledges it before anything is forwarded.
    async fn handle_hl7<T>(
        &self,
        transport: &mut Framed<T, GatewayCodec>,
        message: BytesMut,
        peer: &str,
        stats: &mut SessionStats,
    ) -> io::Result<Batch>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let text = String::from_utf8_lossy(&message);
        info!("[{}] HL7: message received ({} bytes)", peer, message.len());
        debug!("[{}] HL7: raw message: {:?}", peer, text);
        debug!("[{}] HL7: raw bytes: {:02X?}", peer, &message[..]);

        let observations = hl7::parse_message(&text);

        match ack::generate_ack(&text) {
            Some(ack) => {
                debug!("[{}] HL7: ACK content: {:?}", peer, ack);
                transport.send(Reply::Hl7Ack(ack)).await?;
                stats.replies_sent += 1;
                info!("[{}] HL7: ACK sent", peer);
            }
            None => warn!("[{}] HL7: could not generate ACK, invalid MSH", peer),
        }

        Ok(Batch::Observations(observations))
    }

    fn handle_astm(&self, frame: BytesMut, peer: &str) -> Batch {
        let text = String::from_utf8_lossy(&frame);
        info!("[{}] ASTM: frame received ({} bytes)", peer, frame.len());
        debug!("[{}] ASTM: raw frame: {:?}", peer, text);
        debug!("[{}] ASTM: raw bytes: {:02X?}", peer, &frame[..]);

        Batch::Results(astm::parse_frame(&text))
    }

    async fn forward(&self, batch: Batch, peer: &str, stats: &mut SessionStats) {
        if batch.is_empty() {
            debug!("[{}] no results in {:?} payload", peer, batch.protocol());
            return;
        }

        info!("[{}] forwarding {} {:?} record(s)", peer, batch.len(), batch.protocol());
        let timeout = self.config.sink_timeout();
        let outcome = match tokio::time::timeout(timeout, self.sink.forward(&batch)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(SinkError::Timeout(timeout)),
        };

        match outcome {
            Ok(()) => stats.records_forwarded += batch.len(),
            Err(e) => {
                stats.forward_failures += 1;
                error!("[{}] dropping {} record(s): {}", peer, batch.len(), e);
            }
        }
    }
}
