//! The records extracted from instrument traffic, and the batches handed to a
//! [`ResultSink`](crate::sink::ResultSink).

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Which wire protocol a record came in on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Protocol {
    #[serde(rename = "HL7")]
    Hl7,
    #[serde(rename = "ASTM")]
    Astm,
}

/// One HL7 `OBX` segment, together with the patient/order/message context seen
/// before it in the same message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Observation {
    pub patient_id: String,
    pub patient_name: String,
    pub accession_number: String,
    #[serde(rename = "message_id")]
    pub message_control_id: String,
    pub observation_id: String,
    pub value_type: String,
    pub test_code: String,
    pub test_name: String,
    pub value: String,
    pub units: String,
    pub reference_range: String,
    pub abnormal_flags: String,
    pub result_status: String,
    pub timestamp: DateTime<Utc>,
}

/// One ASTM `R` record.
///
/// ASTM frames carry no reliable per-result time, so `timestamp` is the moment
/// the frame was captured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AstmResult {
    pub protocol: Protocol,
    pub patient_id: String,
    pub sample_id: String,
    pub test_code: String,
    pub value: String,
    pub units: String,
    pub flags: String,
    pub timestamp: DateTime<Utc>,
}

/// The records extracted from a single message or frame, in wire order.
///
/// Serialises as a bare JSON array of records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Batch {
    Observations(Vec<Observation>),
    Results(Vec<AstmResult>),
}

impl Batch {
    pub fn protocol(&self) -> Protocol {
        match self {
            Batch::Observations(_) => Protocol::Hl7,
            Batch::Results(_) => Protocol::Astm,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Batch::Observations(records) => records.len(),
            Batch::Results(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Positional field access for pipe-delimited segments and records.
///
/// Out of range indices yield an empty string rather than an error, and values
/// are trimmed of surrounding whitespace.
pub fn field<'a>(fields: &[&'a str], index: usize) -> &'a str {
    fields.get(index).copied().map(str::trim).unwrap_or("")
}

/// Like [`field`], but falls back to `index + 1` when the field at `index` is
/// empty. Used where instruments populate either of two adjacent ID fields.
pub fn field_or_next<'a>(fields: &[&'a str], index: usize) -> &'a str {
    match field(fields, index) {
        "" => field(fields, index + 1),
        value => value,
    }
}
