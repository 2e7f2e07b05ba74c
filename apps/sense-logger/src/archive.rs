//! Round-robin archive of realtime samples: one whole-home store plus one
//! store per device, all under a single output directory.

mod engine;
mod names;
mod schema;

pub use engine::{RrdEngine, RrdTool};
pub use schema::StoreDefinition;

use crate::sense::{Device, RealtimeSample};
use names::{load_name_table, persist_name_table, NAME_TABLE_FILE};
use schema::{DEVICE_STORE, MAIN_STORE};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

pub const MAIN_STORE_FILE: &str = "monitor.rrd";
const MIN_SAMPLE_SPACING_SECS: i64 = 1;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("output directory {path} is not usable: {reason}")]
    InvalidDirectory { path: PathBuf, reason: String },
    #[error("failed to create store {path}: {reason}")]
    CreateFailed { path: PathBuf, reason: String },
    #[error("failed to update store {path}: {reason}")]
    UpdateFailed { path: PathBuf, reason: String },
    #[error("failed to access device name table {path}: {source}")]
    NameTableIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("device name table {path} is not a JSON object of names: {source}")]
    NameTableDecode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode device name table {path}: {source}")]
    NameTableEncode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Closer than one second to the last accepted sample; nothing written.
    Throttled,
    Written { device_stores: usize },
}

#[derive(Debug, Default)]
struct WriterState {
    last_accepted: Option<i64>,
}

pub struct Archive {
    directory: PathBuf,
    engine: Arc<dyn RrdEngine>,
    state: Mutex<WriterState>,
}

impl Archive {
    pub fn open(directory: impl Into<PathBuf>, engine: Arc<dyn RrdEngine>) -> Result<Self, ArchiveError> {
        let directory = directory.into();
        let metadata = std::fs::metadata(&directory).map_err(|err| ArchiveError::InvalidDirectory {
            path: directory.clone(),
            reason: err.to_string(),
        })?;
        if !metadata.is_dir() {
            return Err(ArchiveError::InvalidDirectory {
                path: directory,
                reason: "not a directory".to_string(),
            });
        }
        Ok(Self {
            directory,
            engine,
            state: Mutex::new(WriterState::default()),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn state(&self) -> MutexGuard<'_, WriterState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("Recovering archive writer from poisoned lock");
                poisoned.into_inner()
            }
        }
    }

    /// Upserts the id -> name mapping for `devices` into `device.json`,
    /// keeping entries for devices that are no longer reported.
    pub fn update_device_names(&self, devices: &[Device]) -> Result<usize, ArchiveError> {
        let path = self.directory.join(NAME_TABLE_FILE);
        let _guard = self.state();
        let mut names = load_name_table(&path)?;
        for device in devices.iter().filter(|device| !device.id.is_empty()) {
            names.insert(device.id.clone(), device.name.clone());
        }
        persist_name_table(&path, &names)?;
        Ok(names.len())
    }

    /// Writes one sample. Samples less than a second after the last accepted
    /// one are dropped. The mark only advances once every store took the
    /// sample; any store failure is returned to the caller, which treats it as
    /// fatal.
    pub fn write(&self, sample: &RealtimeSample) -> Result<WriteOutcome, ArchiveError> {
        let mut state = self.state();
        if let Some(last) = state.last_accepted {
            if sample.epoch.saturating_sub(last) < MIN_SAMPLE_SPACING_SECS {
                return Ok(WriteOutcome::Throttled);
            }
        }

        let main_path = self.directory.join(MAIN_STORE_FILE);
        self.ensure_store(&main_path, &MAIN_STORE, sample.epoch)?;
        self.engine
            .update(&main_path, sample.epoch, &main_values(sample))?;

        let mut device_stores = 0;
        for device in &sample.devices {
            let Some(path) = self.device_store_path(&device.id) else {
                tracing::debug!(name=%device.name, "skipping device record without id");
                continue;
            };
            self.ensure_store(&path, &DEVICE_STORE, sample.epoch)?;
            self.engine
                .update(&path, sample.epoch, &device_values(device))?;
            device_stores += 1;
        }

        state.last_accepted = Some(sample.epoch);
        Ok(WriteOutcome::Written { device_stores })
    }

    fn ensure_store(
        &self,
        path: &Path,
        definition: &StoreDefinition,
        epoch: i64,
    ) -> Result<(), ArchiveError> {
        let exists = path.try_exists().map_err(|err| ArchiveError::CreateFailed {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        if exists {
            return Ok(());
        }
        tracing::info!(path=%path.display(), "creating round-robin store");
        self.engine.create(path, definition, epoch.saturating_sub(1))
    }

    fn device_store_path(&self, id: &str) -> Option<PathBuf> {
        if id.is_empty() {
            return None;
        }
        let file_stem: String = id
            .chars()
            .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
            .collect();
        Some(self.directory.join(format!("{file_stem}.rrd")))
    }
}

fn main_values(sample: &RealtimeSample) -> [Option<f64>; 8] {
    [
        sample.voltage.first().copied(),
        sample.voltage.get(1).copied(),
        sample.channels.first().copied(),
        sample.channels.get(1).copied(),
        Some(sample.total_watts),
        Some(sample.device_watts),
        Some(sample.grid_watts),
        Some(sample.frequency_hz),
    ]
}

fn device_values(device: &Device) -> [Option<f64>; 5] {
    let reading = &device.volatile;
    let status = reading.status.unwrap_or_default();
    [
        Some(reading.watts.unwrap_or(0.0)),
        Some(status.current),
        Some(status.voltage),
        Some(status.energy_used),
        Some(reading.always_on_watts.unwrap_or(0.0)),
    ]
}
