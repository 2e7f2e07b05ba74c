use super::schema::{StoreDefinition, STEP_SECS};
use super::ArchiveError;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Storage backend for the round-robin files. Calls are blocking.
pub trait RrdEngine: Send + Sync {
    /// Creates a store at `path` whose first accepted timestamp is after `start`.
    fn create(&self, path: &Path, definition: &StoreDefinition, start: i64)
        -> Result<(), ArchiveError>;

    /// Appends one data point; `None` is stored as unknown.
    fn update(&self, path: &Path, epoch: i64, values: &[Option<f64>]) -> Result<(), ArchiveError>;
}

/// Drives the `rrdtool` command-line binary.
#[derive(Debug, Clone)]
pub struct RrdTool {
    binary: PathBuf,
}

struct CommandFailure {
    command: String,
    detail: String,
}

impl RrdTool {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn run(&self, args: Vec<OsString>) -> Result<(), CommandFailure> {
        let mut command = Command::new(&self.binary);
        command.args(&args);
        let mut display = self.binary.to_string_lossy().to_string();
        for arg in &args {
            display.push(' ');
            display.push_str(&arg.to_string_lossy());
        }

        let output = command.output().map_err(|err| CommandFailure {
            command: display.clone(),
            detail: err.to_string(),
        })?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let code = output
            .status
            .code()
            .map(|code| code.to_string())
            .unwrap_or_else(|| "signal".to_string());
        Err(CommandFailure {
            command: display,
            detail: format!("exit {code}: {stderr}"),
        })
    }
}

impl RrdEngine for RrdTool {
    fn create(
        &self,
        path: &Path,
        definition: &StoreDefinition,
        start: i64,
    ) -> Result<(), ArchiveError> {
        self.run(create_args(path, definition, start))
            .map_err(|failure| {
                tracing::debug!(command=%failure.command, "rrdtool create failed");
                ArchiveError::CreateFailed {
                    path: path.to_path_buf(),
                    reason: failure.detail,
                }
            })
    }

    fn update(&self, path: &Path, epoch: i64, values: &[Option<f64>]) -> Result<(), ArchiveError> {
        let args = vec![
            OsString::from("update"),
            path.as_os_str().to_os_string(),
            OsString::from(update_arg(epoch, values)),
        ];
        self.run(args).map_err(|failure| {
            tracing::debug!(command=%failure.command, "rrdtool update failed");
            ArchiveError::UpdateFailed {
                path: path.to_path_buf(),
                reason: failure.detail,
            }
        })
    }
}

fn create_args(path: &Path, definition: &StoreDefinition, start: i64) -> Vec<OsString> {
    let mut args = vec![
        OsString::from("create"),
        path.as_os_str().to_os_string(),
        OsString::from("--start"),
        OsString::from(start.to_string()),
        OsString::from("--step"),
        OsString::from(STEP_SECS.to_string()),
    ];
    args.extend(definition.sources.iter().map(|ds| OsString::from(ds.to_arg())));
    args.extend(definition.tiers.iter().map(|rra| OsString::from(rra.to_arg())));
    args
}

fn update_arg(epoch: i64, values: &[Option<f64>]) -> String {
    let mut arg = epoch.to_string();
    for value in values {
        arg.push(':');
        match value {
            Some(value) if value.is_finite() => arg.push_str(&value.to_string()),
            _ => arg.push('U'),
        }
    }
    arg
}
