use super::ArchiveError;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

pub const NAME_TABLE_FILE: &str = "device.json";

/// Device id to display name, as persisted next to the stores.
pub type NameTable = BTreeMap<String, String>;

/// A missing file is an empty table; anything unreadable is an error.
pub fn load_name_table(path: &Path) -> Result<NameTable, ArchiveError> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(NameTable::new()),
        Err(source) => {
            return Err(ArchiveError::NameTableIo {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_slice(&raw).map_err(|source| ArchiveError::NameTableDecode {
        path: path.to_path_buf(),
        source,
    })
}

pub fn persist_name_table(path: &Path, names: &NameTable) -> Result<(), ArchiveError> {
    let io_error = |source| ArchiveError::NameTableIo {
        path: path.to_path_buf(),
        source,
    };
    let mut contents = serde_json::to_vec_pretty(names).map_err(|source| {
        ArchiveError::NameTableEncode {
            path: path.to_path_buf(),
            source,
        }
    })?;
    contents.push(b'\n');

    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents).map_err(io_error)?;
    fs::rename(&tmp_path, path).map_err(io_error)?;
    Ok(())
}
