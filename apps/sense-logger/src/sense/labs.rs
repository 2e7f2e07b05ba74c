use super::devices::null_as_default;
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};

/// The account's "labs" report. Only the fault-detection block is picked out;
/// the raw CSV and SVG attachments stay in `details`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct LabsReport {
    #[serde(default, deserialize_with = "null_as_default")]
    pub fault_detection_json: Map<String, JsonValue>,
    #[serde(flatten)]
    pub details: Map<String, JsonValue>,
}

impl LabsReport {
    /// Fault-detection sections that carry data, in key order.
    pub fn fault_sections(&self) -> Vec<&str> {
        self.fault_detection_json
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Start and end date of the power-quality data window.
    pub fn power_quality_window(&self) -> Option<(&str, &str)> {
        let data = self.fault_detection_json.get("powerQuality")?.get("data")?;
        Some((
            data.get("start_date")?.as_str()?,
            data.get("end_date")?.as_str()?,
        ))
    }

    pub fn has_attachment(&self, key: &str) -> bool {
        self.details
            .get(key)
            .and_then(JsonValue::as_str)
            .is_some_and(|body| !body.is_empty())
    }
}
