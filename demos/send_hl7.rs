//! Sends a single HL7 result message to a gateway and prints the ACK.
//!
//! `cargo run --example send_hl7 -- 127.0.0.1:7007`

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use lab_gateway::mllp;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let addr = std::env::args().nth(1).unwrap_or_else(|| "127.0.0.1:7007".to_string());
	let mut stream = TcpStream::connect(&addr).await?;
	println!("Connected to {}", addr);

	let sample_hl7 = "MSH|^~\\&|HRJ-BIO|LAB|LIS|HOSPITAL|202602130930||ORU^R01|123456|P|2.3\r\
PID|1||12345||DOE^JOHN\r\
OBR|1||54321|TEST^Blood Test\r\
OBX|1|NM|GLU^Glucose||5.6|mmol/L|3.9-6.1|N\r";

	let mut packet = BytesMut::new();
	mllp::wrap(sample_hl7.as_bytes(), &mut packet); // MLLP header/footer
	stream.write_all(&packet).await?;
	println!("  HL7 packet sent, awaiting ack...");

	let mut response = Vec::new();
	let mut buf = [0u8; 1024];
	while !response.ends_with(&mllp::BLOCK_FOOTER) {
		let n = stream.read(&mut buf).await?;
		if n == 0 {
			println!("  Connection closed without an ACK");
			return Ok(());
		}
		response.extend_from_slice(&buf[..n]);
	}

	println!("  Received response: {:?}", String::from_utf8_lossy(&response));
	Ok(())
}
