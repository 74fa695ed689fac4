//! Plays the instrument side of one ASTM E1381 transmission against a gateway.
//!
//! `cargo run --example send_astm -- 127.0.0.1:7007`

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use lab_gateway::astm::{ACK, ENQ, EOT, ETX, STX};

const RECORDS: &[&str] = &["H|\\^&|||ANALYSER", "P|1||P100", "O|1|S200", "R|1|GLU|5.6|mmol/L||N", "L|1|N"];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let addr = std::env::args().nth(1).unwrap_or_else(|| "127.0.0.1:7007".to_string());
	let mut stream = TcpStream::connect(&addr).await?;
	println!("Connected to {}", addr);

	stream.write_all(&[ENQ]).await?;
	expect_ack(&mut stream, "ENQ").await?;

	// everything in one frame, numbered 1
	let mut body = b"1".to_vec();
	for record in RECORDS {
		body.extend_from_slice(record.as_bytes());
		body.push(b'\r');
	}
	body.push(ETX);
	let checksum = body.iter().fold(0u8, |sum, b| sum.wrapping_add(*b));

	let mut frame = vec![STX];
	frame.extend_from_slice(&body);
	frame.extend_from_slice(format!("{:02X}\r\n", checksum).as_bytes());
	stream.write_all(&frame).await?;
	expect_ack(&mut stream, "frame").await?;

	stream.write_all(&[EOT]).await?;
	println!("  Transmission complete");
	Ok(())
}

async fn expect_ack(stream: &mut TcpStream, what: &str) -> std::io::Result<()> {
	let mut reply = [0u8; 1];
	stream.read_exact(&mut reply).await?;
	if reply[0] == ACK {
		println!("  {} acknowledged", what);
	} else {
		println!("  {} answered with 0x{:02X}", what, reply[0]);
	}
	Ok(())
}
