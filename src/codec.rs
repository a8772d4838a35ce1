//! Wire record codec.
//!
//! Each detection travels as one compact JSON object terminated by a single `\n`:
//!
//! ```text
//! {"xyxy":[10.0,20.0,110.0,220.0],"conf":0.87,"cls_id":3,"cls_n":"queen_of_hearts"}
//! ```
//!
//! `WireRecord` is the only contract the remote consumer sees. It is independent of
//! any detector's internal representation, and its field order is fixed.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::detect::{Detection, DetectionSet, InvalidDetection};

/// Line delimiter for the wire protocol.
pub const LINE_DELIMITER: u8 = b'\n';

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to serialize wire record: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("malformed wire record: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("wire record is not newline terminated")]
    MissingDelimiter,
    #[error("wire record contains an embedded newline")]
    EmbeddedDelimiter,
    #[error("wire record out of range: {0}")]
    OutOfRange(#[from] InvalidDetection),
}

/// Canonical, detector-independent record for one detection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WireRecord {
    pub xyxy: [f64; 4],
    pub conf: f64,
    pub cls_id: i64,
    pub cls_n: String,
}

/// Map a detection onto its wire record. Pure and total.
pub fn encode(detection: &Detection) -> WireRecord {
    WireRecord {
        xyxy: detection.bounding_box(),
        conf: detection.confidence(),
        cls_id: i64::from(detection.class_id()),
        cls_n: detection.class_name().to_string(),
    }
}

/// Serialize a record as compact JSON followed by exactly one newline.
pub fn serialize(record: &WireRecord) -> Result<Vec<u8>, CodecError> {
    let mut line = serde_json::to_vec(record).map_err(CodecError::Serialize)?;
    line.push(LINE_DELIMITER);
    Ok(line)
}

/// Encode and serialize every detection of a set, preserving order.
pub fn encode_set(set: &DetectionSet) -> Result<Vec<Vec<u8>>, CodecError> {
    set.iter().map(|d| serialize(&encode(d))).collect()
}

/// Parse one newline-terminated line back into a wire record.
pub fn parse_line(line: &[u8]) -> Result<WireRecord, CodecError> {
    let body = line
        .strip_suffix(&[LINE_DELIMITER])
        .ok_or(CodecError::MissingDelimiter)?;
    if body.contains(&LINE_DELIMITER) {
        return Err(CodecError::EmbeddedDelimiter);
    }
    serde_json::from_slice(body).map_err(CodecError::Malformed)
}

/// Inverse of `serialize(encode(d))`.
pub fn decode(line: &[u8]) -> Result<Detection, CodecError> {
    let record = parse_line(line)?;
    Detection::try_from(record).map_err(CodecError::from)
}

impl TryFrom<WireRecord> for Detection {
    type Error = InvalidDetection;

    fn try_from(record: WireRecord) -> Result<Self, Self::Error> {
        let class_id = u32::try_from(record.cls_id)
            .map_err(|_| InvalidDetection::ClassIdOutOfRange(record.cls_id))?;
        Detection::new(record.xyxy, record.conf, class_id, record.cls_n)
    }
}
