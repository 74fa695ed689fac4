//! Error types for the gateway.
//!
//! Framing and parsing never fail: anomalies there are resolved locally and
//! logged. The types here cover the edges of the system, namely configuration,
//! the result sink and the transports.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Problems loading or validating a [`GatewayConfig`](crate::config::GatewayConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("no protocol enabled, enable hl7, astm or both")]
    NoProtocol,

    #[error("serial mode requires a serial port")]
    MissingSerialPort,

    /// A numeric setting that has to be positive was zero.
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// A batch could not be handed to the downstream sink.
///
/// The session logs these and drops the batch; they never end a connection.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("endpoint answered with status {0}")]
    Status(u16),

    #[error("sink did not answer within {0:?}")]
    Timeout(Duration),
}

/// Top level error for the binary and the transport loops.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("serial port: {0}")]
    Serial(#[from] tokio_serial::Error),

    #[error("{0}")]
    Sink(#[from] SinkError),
}

pub type GatewayResult<T, E = GatewayError> = Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_errors_surface_at_top_level() {
        let err: GatewayError = SinkError::Status(502).into();
        assert!(matches!(err, GatewayError::Sink(SinkError::Status(502))));
        assert_eq!(err.to_string(), "endpoint answered with status 502");
    }

    #[test]
    fn config_errors_keep_their_message() {
        let err: GatewayError = ConfigError::Zero("baud_rate").into();
        assert_eq!(err.to_string(), "baud_rate must be greater than zero");
    }
}
