//! Extraction of observations from HL7 v2 result messages.
//!
//! Only the segments carrying result context are interpreted: `MSH` (control ID),
//! `PID` (patient), `OBR` (accession) and `OBX` (the observations themselves).
//! Everything else passes through untouched.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SubsecRound, Utc};
use log::trace;

use crate::record::{field, field_or_next, Observation};

/// Parses a message, using the current time for any unparseable timestamps.
pub fn parse_message(message: &str) -> Vec<Observation> {
    parse_message_at(message, Utc::now().trunc_subsecs(0))
}

/// Parses a message into one [`Observation`] per `OBX` segment, in message order.
///
/// Context from `MSH`, `PID` and `OBR` persists until the next segment of the
/// same type, so an `OBX` carries whatever was seen last (or empty strings if
/// nothing was). `received_at` stands in for missing or malformed `OBX-14`
/// timestamps, which keeps the result a pure function of its inputs.
pub fn parse_message_at(message: &str, received_at: DateTime<Utc>) -> Vec<Observation> {
    let message = message.replace("\r\n", "\r");

    let mut message_control_id = "";
    let mut patient_id = "";
    let mut patient_name = "";
    let mut accession_number = "";
    let mut observations = Vec::new();

    for segment in message.split('\r').map(str::trim).filter(|s| !s.is_empty()) {
        let fields: Vec<&str> = segment.split('|').collect();

        match field(&fields, 0) {
            "MSH" => message_control_id = field(&fields, 9),
            "PID" => {
                patient_id = field(&fields, 3);
                patient_name = field(&fields, 5);
            }
            "OBR" => accession_number = field_or_next(&fields, 2),
            "OBX" => {
                let identifier = field(&fields, 3);
                observations.push(Observation {
                    patient_id: patient_id.to_string(),
                    patient_name: patient_name.to_string(),
                    accession_number: accession_number.to_string(),
                    message_control_id: message_control_id.to_string(),
                    observation_id: field(&fields, 1).to_string(),
                    value_type: field(&fields, 2).to_string(),
                    test_code: component(identifier, 0).to_string(),
                    test_name: component(identifier, 1).to_string(),
                    value: field(&fields, 5).to_string(),
                    units: field(&fields, 6).to_string(),
                    reference_range: field(&fields, 7).to_string(),
                    abnormal_flags: field(&fields, 8).to_string(),
                    result_status: field(&fields, 11).to_string(),
                    timestamp: parse_timestamp(field(&fields, 14), received_at),
                });
            }
            other => trace!("HL7: skipping {} segment", other),
        }
    }

    observations
}

/// The `index`th `^` separated component of a field, or `""`.
pub fn component(field: &str, index: usize) -> &str {
    field.split('^').nth(index).map(str::trim).unwrap_or("")
}

/// Normalises an HL7 `TS` value.
///
/// `YYYYMMDDHHMMSS` is tried on the first 14 characters, then `YYYYMMDD` on the
/// first 8. Fractional seconds and zone offsets beyond that are ignored and the
/// value is read as UTC. Anything shorter than 8 characters, or that fails both
/// formats, yields `fallback`.
pub fn parse_timestamp(raw: &str, fallback: DateTime<Utc>) -> DateTime<Utc> {
    let raw = raw.trim();
    if raw.len() < 8 {
        return fallback;
    }

    if let Some(full) = raw.get(..14) {
        if let Ok(ts) = NaiveDateTime::parse_from_str(full, "%Y%m%d%H%M%S") {
            return ts.and_utc();
        }
    }

    raw.get(..8)
        .and_then(|date| NaiveDate::parse_from_str(date, "%Y%m%d").ok())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|ts| ts.and_utc())
        .unwrap_or(fallback)
}
