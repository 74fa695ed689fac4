//! The byte sources sessions run on: an accepting TCP server, a reconnecting
//! TCP client and a serial port.

use std::sync::Arc;

use log::{error, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;
use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, StopBits};

use crate::config::{GatewayConfig, Mode};
use crate::error::{ConfigError, GatewayError, GatewayResult};
use crate::session::Session;
use crate::sink::ResultSink;

/// Runs the gateway in the configured [`Mode`]. Only returns on a fatal error,
/// such as failing to bind the listening address.
pub async fn run(config: Arc<GatewayConfig>, sink: Arc<dyn ResultSink>) -> GatewayResult<()> {
    config.validate()?;
    match config.mode {
        Mode::Server => serve(config, sink).await,
        Mode::Client => connect(config, sink).await,
        Mode::Serial => serial(config, sink).await,
    }
}

/// Binds `listen_address` and serves every connection on its own task.
pub async fn serve(config: Arc<GatewayConfig>, sink: Arc<dyn ResultSink>) -> GatewayResult<()> {
    let listener = TcpListener::bind(&config.listen_address).await?;
    info!("listening on {}", listener.local_addr()?);
    accept_loop(listener, config, sink).await
}

/// Accepts connections from an already bound listener. Accept errors are
/// logged and skipped.
pub async fn accept_loop(
    listener: TcpListener,
    config: Arc<GatewayConfig>,
    sink: Arc<dyn ResultSink>,
) -> GatewayResult<()> {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("accept failed: {}", e);
                continue;
            }
        };

        info!("new connection from {}", peer);
        let session = Session::new(config.clone(), sink.clone())?;

        tokio::spawn(async move {
            let peer = peer.to_string();
            match session.run(stream, &peer).await {
                Ok(_) => info!("[{}] connection closed by remote", peer),
                Err(e) => error!("[{}] connection failed: {}", peer, e),
            }
        });
    }
}

/// Dials `listen_address`, runs a session on the connection and dials again
/// once it ends.
pub async fn connect(config: Arc<GatewayConfig>, sink: Arc<dyn ResultSink>) -> GatewayResult<()> {
    let session = Session::new(config.clone(), sink)?;

    loop {
        info!("connecting to {}", config.listen_address);
        let stream = match TcpStream::connect(&config.listen_address).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(
                    "connection to {} failed: {}, retrying in {:?}",
                    config.listen_address,
                    e,
                    config.reconnect_delay()
                );
                sleep(config.reconnect_delay()).await;
                continue;
            }
        };

        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| config.listen_address.clone());
        info!("connected to {}", peer);

        if let Err(e) = session.run(stream, &peer).await {
            error!("[{}] connection failed: {}", peer, e);
        }

        warn!("[{}] connection closed, reconnecting", peer);
        sleep(config.reconnect_pause()).await;
    }
}

/// Opens the configured serial port (8N1) and runs a session on it, reopening
/// the port whenever the session ends.
pub async fn serial(config: Arc<GatewayConfig>, sink: Arc<dyn ResultSink>) -> GatewayResult<()> {
    let path = config
        .serial_port
        .clone()
        .ok_or(ConfigError::MissingSerialPort)?;
    let session = Session::new(config.clone(), sink)?;

    loop {
        let port = match open_serial(&path, config.baud_rate) {
            Ok(port) => port,
            Err(e) => {
                warn!("{}, retrying in {:?}", e, config.reconnect_delay());
                sleep(config.reconnect_delay()).await;
                continue;
            }
        };

        info!("serial port {} open at {} baud", path, config.baud_rate);
        if let Err(e) = session.run(port, &path).await {
            error!("[{}] serial port failed: {}", path, e);
        }

        warn!("[{}] serial session ended, reopening", path);
        sleep(config.reconnect_pause()).await;
    }
}

fn open_serial(path: &str, baud_rate: u32) -> GatewayResult<tokio_serial::SerialStream> {
    tokio_serial::new(path, baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .open_native_async()
        .map_err(GatewayError::from)
}
