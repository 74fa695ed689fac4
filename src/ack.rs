//! HL7 application acknowledgements.
//!
//! Every message the gateway manages to extract a control ID from is accepted
//! with `MSA|AA`. The caller wraps the text with [`mllp::wrap`](crate::mllp::wrap).

use chrono::{Local, NaiveDateTime};
use log::debug;

use crate::record::field;

/// Builds an ACK for `original`, timestamped with the local wall-clock time.
pub fn generate_ack(original: &str) -> Option<String> {
    generate_ack_at(original, Local::now().naive_local())
}

/// Builds an ACK for `original`, or `None` if it has no `MSH` segment with at
/// least 10 fields (the control ID lives in the tenth).
///
/// Sending and receiving application/facility are swapped relative to the
/// original, and the version is echoed when the original carries one.
pub fn generate_ack_at(original: &str, now: NaiveDateTime) -> Option<String> {
    let original = original.replace("\r\n", "\r");
    let msh = original
        .split('\r')
        .map(str::trim)
        .find(|segment| segment.starts_with("MSH"))?;

    let fields: Vec<&str> = msh.split('|').collect();
    if fields.len() < 10 {
        debug!("HL7: cannot acknowledge, MSH has only {} fields", fields.len());
        return None;
    }

    let encoding_chars = fields[1];
    let sending_app = field(&fields, 2);
    let sending_facility = field(&fields, 3);
    let receiving_app = field(&fields, 4);
    let receiving_facility = field(&fields, 5);
    let control_id = field(&fields, 9);
    let version = field(&fields, 11);

    let mut ack = format!(
        "MSH|{}|{}|{}|{}|{}|{}||ACK|{}|AL",
        encoding_chars,
        receiving_app,
        receiving_facility,
        sending_app,
        sending_facility,
        now.format("%Y%m%d%H%M%S"),
        control_id,
    );
    if !version.is_empty() {
        ack.push('|');
        ack.push_str(version);
    }
    ack.push('\r');
    ack.push_str("MSA|AA|");
    ack.push_str(control_id);

    Some(ack)
}
