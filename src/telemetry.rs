//! # Telemetry Parsing
//!
//! Decodes heart rate telemetry arriving from outside the process:
//! - JSON documents (one packet object, or an array of them)
//! - comma separated BLE text payloads from bridge firmware
//! - the standard Heart Rate Measurement characteristic (0x2A37)
//!
//! Malformed input is an error here and nowhere else; downstream components
//! only ever see well-formed `RawSample`s.

use crate::error::TelemetryError;
use crate::samples::{RawSample, Timestamp};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Heart Rate Measurement characteristic, Bluetooth SIG assigned number
pub const HEART_RATE_MEASUREMENT_UUID16: u16 = 0x2A37;

/// Heart Rate service, Bluetooth SIG assigned number
pub const HEART_RATE_SERVICE_UUID16: u16 = 0x180D;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPacket {
    pub device_id: Uuid,
    pub timestamp: Timestamp,
    pub heart_rate: f64,
    pub is_stale: bool,
    pub metadata: BTreeMap<String, String>,
}

impl TelemetryPacket {
    pub fn to_raw_sample(&self) -> RawSample {
        RawSample {
            timestamp: self.timestamp,
            bpm: self.heart_rate.round() as i32,
            is_stale: self.is_stale,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TelemetryParser;

impl TelemetryParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse_json(&self, data: &[u8]) -> Result<Vec<TelemetryPacket>, TelemetryError> {
        let document: Value =
            serde_json::from_slice(data).map_err(|e| TelemetryError::InvalidJson(e.to_string()))?;

        match document {
            Value::Object(object) => Ok(vec![parse_object(&object)?]),
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::Object(object) => parse_object(object),
                    other => Err(TelemetryError::InvalidJson(format!(
                        "expected packet object, found {}",
                        json_kind(other)
                    ))),
                })
                .collect(),
            other => Err(TelemetryError::InvalidJson(format!(
                "expected object or array, found {}",
                json_kind(&other)
            ))),
        }
    }

    /// Parses `deviceId,epochSeconds,heartRate,stale[,key=value...]`
    pub fn parse_ble_text(&self, payload: &[u8]) -> Result<TelemetryPacket, TelemetryError> {
        let text = std::str::from_utf8(payload).map_err(|_| TelemetryError::InvalidPayload)?;
        let fields: Vec<&str> = text.trim_end_matches(['\r', '\n']).split(',').collect();
        if fields.len() < 4 {
            return Err(TelemetryError::InvalidPayload);
        }

        let device_id = Uuid::parse_str(fields[0]).map_err(|_| TelemetryError::InvalidPayload)?;
        let epoch_secs: f64 = fields[1].parse().map_err(|_| TelemetryError::InvalidPayload)?;
        let timestamp = timestamp_from_epoch(epoch_secs).ok_or(TelemetryError::InvalidPayload)?;
        let heart_rate: f64 = fields[2].parse().map_err(|_| TelemetryError::InvalidPayload)?;
        let stale = fields[3].to_lowercase();
        let is_stale = stale == "1" || stale == "true";

        let metadata = fields[4..]
            .iter()
            .filter_map(|pair| pair.split_once('='))
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();

        Ok(TelemetryPacket {
            device_id,
            timestamp,
            heart_rate,
            is_stale,
            metadata,
        })
    }
}

/// Decodes bpm from a Heart Rate Measurement notification.
///
/// Bit 0 of the flags byte selects a u8 or little-endian u16 value.
pub fn parse_heart_rate_measurement(payload: &[u8]) -> Option<u16> {
    let flags = *payload.first()?;
    if flags & 0x01 == 0 {
        payload.get(1).map(|&bpm| u16::from(bpm))
    } else {
        let bytes = payload.get(1..3)?;
        Some(u16::from_le_bytes([bytes[0], bytes[1]]))
    }
}

fn parse_object(object: &Map<String, Value>) -> Result<TelemetryPacket, TelemetryError> {
    let device_id = object
        .get("deviceId")
        .and_then(Value::as_str)
        .and_then(|raw| Uuid::parse_str(raw).ok())
        .ok_or(TelemetryError::MissingField("deviceId"))?;

    let timestamp = object
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|parsed| parsed.with_timezone(&Utc))
        .ok_or(TelemetryError::MissingField("timestamp"))?;

    let heart_rate = object
        .get("heartRate")
        .and_then(Value::as_f64)
        .ok_or(TelemetryError::MissingField("heartRate"))?;

    let is_stale = object.get("isStale").and_then(Value::as_bool).unwrap_or(false);

    let metadata = object
        .get("metadata")
        .and_then(Value::as_object)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|(key, value)| value.as_str().map(|value| (key.clone(), value.to_string())))
                .collect()
        })
        .unwrap_or_default();

    Ok(TelemetryPacket {
        device_id,
        timestamp,
        heart_rate,
        is_stale,
        metadata,
    })
}

fn timestamp_from_epoch(epoch_secs: f64) -> Option<Timestamp> {
    if !epoch_secs.is_finite() {
        return None;
    }
    Utc.timestamp_millis_opt((epoch_secs * 1000.0).round() as i64).single()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
