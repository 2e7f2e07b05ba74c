//! Fixed layout of the round-robin stores: which data sources each file
//! carries and how long each resolution is retained.

/// Seconds between primary data points.
pub const STEP_SECS: u32 = 1;
/// Seconds a source may go without an update before it reads as unknown.
pub const HEARTBEAT_SECS: u32 = 2;

const VOLTS_MAX: f64 = 250.0;
const AMPS_MAX: f64 = 200.0;
const WATTS_MAX: f64 = VOLTS_MAX * AMPS_MAX;
const HZ_MAX: f64 = 120.0;
const ENERGY_MAX: f64 = 1e9;

/// A GAUGE data source with its accepted range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataSource {
    pub name: &'static str,
    pub min: f64,
    pub max: f64,
}

impl DataSource {
    const fn gauge(name: &'static str, min: f64, max: f64) -> Self {
        Self { name, min, max }
    }

    pub fn to_arg(&self) -> String {
        format!(
            "DS:{}:GAUGE:{}:{}:{}",
            self.name, HEARTBEAT_SECS, self.min, self.max
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consolidation {
    Average,
    Min,
    Max,
}

impl Consolidation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Average => "AVERAGE",
            Self::Min => "MIN",
            Self::Max => "MAX",
        }
    }
}

/// One round-robin archive: `rows` consolidated points of `steps` primary
/// points each.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetentionTier {
    pub consolidation: Consolidation,
    pub xff: f64,
    pub steps: u32,
    pub rows: u32,
}

impl RetentionTier {
    pub fn to_arg(&self) -> String {
        format!(
            "RRA:{}:{}:{}:{}",
            self.consolidation.as_str(),
            self.xff,
            self.steps,
            self.rows
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoreDefinition {
    pub sources: &'static [DataSource],
    pub tiers: &'static [RetentionTier],
}

/// 1s for a week, 1m for a year, 1h averages and extremes for 30 years.
pub const RETENTION_TIERS: [RetentionTier; 5] = [
    RetentionTier {
        consolidation: Consolidation::Average,
        xff: 0.9,
        steps: 1,
        rows: 604_800,
    },
    RetentionTier {
        consolidation: Consolidation::Average,
        xff: 0.5,
        steps: 60,
        rows: 525_600,
    },
    RetentionTier {
        consolidation: Consolidation::Average,
        xff: 0.5,
        steps: 3_600,
        rows: 262_800,
    },
    RetentionTier {
        consolidation: Consolidation::Min,
        xff: 0.5,
        steps: 3_600,
        rows: 262_800,
    },
    RetentionTier {
        consolidation: Consolidation::Max,
        xff: 0.5,
        steps: 3_600,
        rows: 262_800,
    },
];

/// Whole-home store, `monitor.rrd`. Value order matches the update order.
pub const MAIN_SOURCES: [DataSource; 8] = [
    DataSource::gauge("v1", -VOLTS_MAX, VOLTS_MAX),
    DataSource::gauge("v2", -VOLTS_MAX, VOLTS_MAX),
    DataSource::gauge("w1", -WATTS_MAX, WATTS_MAX),
    DataSource::gauge("w2", -WATTS_MAX, WATTS_MAX),
    DataSource::gauge("wt", -WATTS_MAX, WATTS_MAX),
    DataSource::gauge("wd", -WATTS_MAX, WATTS_MAX),
    DataSource::gauge("wg", -WATTS_MAX, WATTS_MAX),
    DataSource::gauge("hz", 0.0, HZ_MAX),
];

/// Per-device store, `<id>.rrd`.
pub const DEVICE_SOURCES: [DataSource; 5] = [
    DataSource::gauge("w", -WATTS_MAX, WATTS_MAX),
    DataSource::gauge("i", 0.0, AMPS_MAX),
    DataSource::gauge("v", -VOLTS_MAX, VOLTS_MAX),
    DataSource::gauge("e", 0.0, ENERGY_MAX),
    DataSource::gauge("ao_w", -WATTS_MAX, WATTS_MAX),
];

pub const MAIN_STORE: StoreDefinition = StoreDefinition {
    sources: &MAIN_SOURCES,
    tiers: &RETENTION_TIERS,
};

pub const DEVICE_STORE: StoreDefinition = StoreDefinition {
    sources: &DEVICE_SOURCES,
    tiers: &RETENTION_TIERS,
};
