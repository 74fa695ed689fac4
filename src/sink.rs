//! Downstream delivery of extracted records.
//!
//! Delivery is best effort. A sink reports failure and the session logs it and
//! drops the batch; nothing is queued or retried.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};

use crate::error::SinkError;
use crate::record::Batch;

/// Receives every non-empty batch a session extracts.
///
/// One sink is shared by all sessions, so implementations must tolerate
/// concurrent calls.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn forward(&self, batch: &Batch) -> Result<(), SinkError>;
}

/// POSTs each batch as a JSON array to an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSink {
    /// `timeout` bounds the whole request, connect included.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("lab-gateway/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(HttpSink {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl ResultSink for HttpSink {
    async fn forward(&self, batch: &Batch) -> Result<(), SinkError> {
        debug!("sink: POST {} record(s) to {}", batch.len(), self.endpoint);

        let response = self.client.post(&self.endpoint).json(batch).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Status(status.as_u16()));
        }

        info!("sink: results forwarded ({})", status);
        Ok(())
    }
}

/// Writes every record to the log. Used when no endpoint is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl ResultSink for LogSink {
    async fn forward(&self, batch: &Batch) -> Result<(), SinkError> {
        match batch {
            Batch::Observations(observations) => {
                for o in observations {
                    info!(
                        "HL7 result: patient={} accession={} test={} ({}) value={} {} flags={} at {}",
                        o.patient_id,
                        o.accession_number,
                        o.test_code,
                        o.test_name,
                        o.value,
                        o.units,
                        o.abnormal_flags,
                        o.timestamp
                    );
                }
            }
            Batch::Results(results) => {
                for r in results {
                    info!(
                        "ASTM result: patient={} sample={} test={} value={} {} flags={} at {}",
                        r.patient_id, r.sample_id, r.test_code, r.value, r.units, r.flags, r.timestamp
                    );
                }
            }
        }
        Ok(())
    }
}
