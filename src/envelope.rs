//! CDC records and the on-the-wire envelope (spec §3, §6).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecordMetadata {
    pub table_schema: String,
    pub table_name: String,
}

/// A single row-change event, in the shape the CDC producer emits it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CdcRecord {
    pub action: Action,
    pub record: Value,
    #[serde(default)]
    pub changes: Option<Value>,
    pub metadata: RecordMetadata,
}

/// The canonical wire frame delivered to clients: always one record, always
/// wrapped in `{ "data": [...] }` regardless of the input shape (spec §4.5).
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub data: Vec<CdcRecord>,
}

impl Envelope {
    pub fn wrap(record: CdcRecord) -> Self {
        Self { data: vec![record] }
    }

    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Parse a CDC webhook body, accepting either the batch shape
/// `{ "data": [record, ...] }` or a bare single record. If batch parsing
/// yields zero items, retries as a single record; if both fail, rejects as
/// a bad payload (spec §4.5).
pub fn parse_payload(body: &[u8]) -> Result<Vec<CdcRecord>, AppError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|_| AppError::BadRequest("invalid JSON body".into()))?;

    if let Some(data) = value.get("data") {
        if let Ok(records) = serde_json::from_value::<Vec<CdcRecord>>(data.clone()) {
            if !records.is_empty() {
                return Ok(records);
            }
        }
    }

    if let Ok(record) = serde_json::from_value::<CdcRecord>(value) {
        return Ok(vec![record]);
    }

    Err(AppError::BadRequest(
        "unparseable CDC payload: expected a batch or single record with a table name".into(),
    ))
}
