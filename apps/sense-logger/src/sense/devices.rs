use super::SenseError;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Reads an explicit JSON `null` the same as a missing key.
pub(super) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq)]
pub struct StatusDetails {
    #[serde(rename = "w", default, deserialize_with = "null_as_default")]
    pub watts: f64,
    #[serde(rename = "i", default, deserialize_with = "null_as_default")]
    pub current: f64,
    #[serde(rename = "v", default, deserialize_with = "null_as_default")]
    pub voltage: f64,
    #[serde(rename = "e", default, deserialize_with = "null_as_default")]
    pub energy_used: f64,
}

/// The part of a device record that the realtime feed rewrites on every frame.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct VolatileReading {
    #[serde(rename = "w", default)]
    pub watts: Option<f64>,
    #[serde(rename = "sd", default)]
    pub status: Option<StatusDetails>,
    #[serde(rename = "ao_st", default)]
    pub always_on: Option<bool>,
    #[serde(rename = "ao_w", default)]
    pub always_on_watts: Option<f64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub attrs: Vec<String>,
}

/// A device as reported by the overview endpoint or a realtime frame. Only the
/// identity and the volatile readings are typed; everything else the vendor
/// sends (tags, icon, make/model, ...) rides along untouched in `details`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Device {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(flatten)]
    pub volatile: VolatileReading,
    #[serde(flatten)]
    pub details: Map<String, JsonValue>,
}

/// Detail record for one device. The device itself is typed; usage history,
/// alert and timeline settings stay schema-less.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct DeviceDetails {
    #[serde(default, deserialize_with = "null_as_default")]
    pub device: Device,
    #[serde(flatten)]
    pub details: Map<String, JsonValue>,
}

impl DeviceDetails {
    /// A numeric figure from the `usage` block, e.g. `yearly_KWH`.
    pub fn usage(&self, key: &str) -> Option<f64> {
        self.details.get("usage")?.get(key)?.as_f64()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceOverview {
    #[serde(default, deserialize_with = "null_as_default")]
    pub devices: Vec<Device>,
    #[serde(default)]
    pub device_data_checksum: Option<String>,
}

#[derive(Debug, Default)]
struct RegistryState {
    devices: Vec<Device>,
    by_id: HashMap<String, usize>,
    checksum: Option<String>,
}

/// Session-scoped table of the monitor's devices. Reads and stream merges are
/// serialized by one lock.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    state: Mutex<RegistryState>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("Recovering device registry from poisoned lock");
                poisoned.into_inner()
            }
        }
    }

    /// Swaps in a fresh overview. Duplicate ids keep the first record.
    pub fn replace_snapshot(&self, overview: DeviceOverview) -> usize {
        let mut devices = Vec::with_capacity(overview.devices.len());
        let mut by_id = HashMap::with_capacity(overview.devices.len());
        for device in overview.devices {
            if device.id.is_empty() {
                tracing::debug!(name=%device.name, "skipping device without id in overview");
                continue;
            }
            if by_id.contains_key(&device.id) {
                tracing::warn!(device_id=%device.id, "duplicate device id in overview; keeping first");
                continue;
            }
            by_id.insert(device.id.clone(), devices.len());
            devices.push(device);
        }

        let count = devices.len();
        let mut state = self.state();
        state.devices = devices;
        state.by_id = by_id;
        state.checksum = overview.device_data_checksum;
        count
    }

    pub fn lookup_by_id(&self, id: &str) -> Result<Device, SenseError> {
        let state = self.state();
        state
            .by_id
            .get(id)
            .and_then(|idx| state.devices.get(*idx))
            .cloned()
            .ok_or_else(|| SenseError::DeviceNotFound(id.to_string()))
    }

    /// Overwrites the volatile readings of a known device. Empty or unknown
    /// ids leave the registry untouched and report `false`.
    pub fn merge_volatile(&self, id: &str, reading: &VolatileReading) -> bool {
        if id.is_empty() {
            return false;
        }
        let mut state = self.state();
        let Some(idx) = state.by_id.get(id).copied() else {
            return false;
        };
        match state.devices.get_mut(idx) {
            Some(device) => {
                device.volatile = reading.clone();
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self) -> Vec<Device> {
        self.state().devices.clone()
    }

    pub fn checksum(&self) -> Option<String> {
        self.state().checksum.clone()
    }

    pub fn device_count(&self) -> usize {
        self.state().devices.len()
    }
}
