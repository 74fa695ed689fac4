use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::{info, warn};
use tracing_subscriber::filter::LevelFilter;

use lab_gateway::config::{GatewayConfig, Mode};
use lab_gateway::error::GatewayResult;
use lab_gateway::sink::{HttpSink, LogSink, ResultSink};
use lab_gateway::transport;

/// Laboratory instrument gateway for HL7 (MLLP) and ASTM E1381.
#[derive(Parser, Debug)]
#[command(name = "lab-gateway", version, about)]
struct Cli {
    /// TOML settings file; command line flags override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on (server) or dial (client)
    #[arg(long)]
    listen: Option<String>,

    /// URL results are POSTed to
    #[arg(long)]
    endpoint: Option<String>,

    #[arg(long, value_enum)]
    mode: Option<Mode>,

    #[arg(long)]
    serial_port: Option<String>,

    #[arg(long)]
    baud_rate: Option<u32>,

    /// Accept ASTM E1381 framing
    #[arg(long)]
    astm: bool,

    /// Do not accept HL7/MLLP framing
    #[arg(long)]
    no_hl7: bool,

    /// Log every message and reply
    #[arg(long)]
    debug: bool,
}

impl Cli {
    fn apply(self, config: &mut GatewayConfig) {
        if let Some(listen) = self.listen {
            config.listen_address = listen;
        }
        if let Some(endpoint) = self.endpoint {
            config.endpoint = Some(endpoint);
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(port) = self.serial_port {
            config.serial_port = Some(port);
        }
        if let Some(baud_rate) = self.baud_rate {
            config.baud_rate = baud_rate;
        }
        config.astm |= self.astm;
        config.hl7 &= !self.no_hl7;
        config.debug |= self.debug;
    }
}

#[tokio::main]
async fn main() -> GatewayResult<()> {
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => GatewayConfig::load(path)?,
        None => GatewayConfig::default(),
    };
    cli.apply(&mut config);
    config.validate()?;

    tracing_subscriber::fmt()
        .with_max_level(if config.debug {
            LevelFilter::DEBUG
        } else {
            LevelFilter::INFO
        })
        .init();

    info!(
        "starting gateway: {:?} mode on {}, hl7={} astm={}",
        config.mode, config.listen_address, config.hl7, config.astm
    );

    let sink: Arc<dyn ResultSink> = match &config.endpoint {
        Some(endpoint) => {
            info!("forwarding results to {}", endpoint);
            Arc::new(HttpSink::new(endpoint.clone(), config.sink_timeout())?)
        }
        None => {
            warn!("no endpoint configured, results are only logged");
            Arc::new(LogSink)
        }
    };

    transport::run(Arc::new(config), sink).await
}
