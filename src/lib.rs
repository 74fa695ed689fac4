/*!
# A protocol gateway for laboratory instruments.

 Diagnostic analysers report results over one of two protocols: HL7 v2 wrapped in MLLP, or ASTM E1381/E1394.
 This crate terminates either byte stream (TCP or serial), rebuilds the messages, acknowledges them the way the
 instrument expects and republishes the extracted results to a downstream sink (usually an HTTP endpoint on the LIS side).

 The framers are byte-at-a-time state machines, so a message split over any number of reads is reassembled exactly as
 if it had arrived in one piece. They are exposed both directly ([`mllp::MllpFramer`], [`astm::AstmFramer`]) and as a
 [Codec](https://docs.rs/tokio-util/latest/tokio_util/codec/index.html) ([`framer::GatewayCodec`]) so that a transport can be
 driven through a `Framed`.

 ## Example
 Extracting results and building the acknowledgement for a single HL7 message:
 ```
use lab_gateway::{ack, hl7, mllp::MllpFramer};

let mut framer = MllpFramer::new();
let wire = b"\x0BMSH|^~\\&|ANALYSER|LAB|LIS|HOSPITAL|202602130930||ORU^R01|123456|P|2.3\rPID|1||12345||DOE^JOHN\rOBX|1|NM|GLU^Glucose||5.6|mmol/L|3.9-6.1|N\r\x1C\x0D";

for message in framer.feed_slice(wire) {
    let text = String::from_utf8_lossy(&message);

    let observations = hl7::parse_message(&text);
    assert_eq!(observations[0].patient_id, "12345");
    assert_eq!(observations[0].test_name, "Glucose");

    let ack = ack::generate_ack(&text).unwrap();
    assert!(ack.ends_with("MSA|AA|123456"));
}
```

 ### Running a gateway
 ```no_run
use std::sync::Arc;
use lab_gateway::{config::GatewayConfig, sink::LogSink, transport};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = GatewayConfig {
        astm: true, // accept both HL7 and ASTM on the same port
        ..GatewayConfig::default()
    };

    transport::run(Arc::new(config), Arc::new(LogSink)).await?;
    Ok(())
}
```

 # Protocol quirks
 Instruments in the field are rarely strict, and the framers follow what they actually send:
 - MLLP: the end block byte alone completes a message, the trailing CR is optional. A start block inside a message
   restarts it, silently discarding the partial content.
 - ASTM: `ETB` is treated exactly like `ETX`, every intermediate frame is parsed on its own rather than reassembled.
 */

pub mod ack;
pub mod astm;
pub mod config;
pub mod error;
pub mod framer;
pub mod hl7;
pub mod mllp;
pub mod record;
pub mod session;
pub mod sink;
pub mod transport;

pub use config::GatewayConfig;
pub use error::{GatewayError, GatewayResult};
pub use framer::{Framer, FramerEvent, FramerKind, GatewayCodec};
pub use record::{AstmResult, Batch, Observation};
pub use session::Session;
pub use sink::{HttpSink, LogSink, ResultSink};
