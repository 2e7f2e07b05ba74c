use super::devices::{null_as_default, Device};
use serde::Deserialize;
use serde_json::Value as JsonValue;

pub const REALTIME_UPDATE: &str = "realtime_update";

/// One `realtime_update` payload: whole-home readings at `epoch` plus the
/// devices the monitor currently sees.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RealtimeSample {
    #[serde(rename = "epoch", default, deserialize_with = "null_as_default")]
    pub epoch: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub voltage: Vec<f64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub channels: Vec<f64>,
    #[serde(rename = "w", default, deserialize_with = "null_as_default")]
    pub total_watts: f64,
    #[serde(rename = "d_w", default, deserialize_with = "null_as_default")]
    pub device_watts: f64,
    #[serde(rename = "grid_w", default, deserialize_with = "null_as_default")]
    pub grid_watts: f64,
    #[serde(rename = "hz", default, deserialize_with = "null_as_default")]
    pub frequency_hz: f64,
    #[serde(rename = "frame", default)]
    pub frame: Option<i64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub devices: Vec<Device>,
}

impl RealtimeSample {
    pub fn has_devices(&self) -> bool {
        !self.devices.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    payload: JsonValue,
}

#[derive(Debug)]
pub enum Frame {
    Realtime(RealtimeSample),
    Other(String),
}

pub fn decode_frame(raw: &str) -> Result<Frame, serde_json::Error> {
    let envelope: Envelope = serde_json::from_str(raw)?;
    if envelope.kind != REALTIME_UPDATE {
        return Ok(Frame::Other(envelope.kind));
    }
    let sample = serde_json::from_value(envelope.payload)?;
    Ok(Frame::Realtime(sample))
}
