//! Optional TOML input file.
//!
//! Keys mirror the step inputs (`server_url`, `app_key`, ...). Flags and
//! `INPUT_*` env vars are layered on top by the caller.

use std::path::{Path, PathBuf};

use tracing::info;
use vaultpull_core::RawInputs;

#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },
}

/// Load inputs from the TOML file at `path`.
///
/// An explicitly named file that is missing or malformed is an error; the
/// step never silently runs with partial inputs.
pub fn load_file(path: &Path) -> Result<RawInputs, ConfigFileError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigFileError::Read {
        path: path.to_owned(),
        source,
    })?;

    let inputs = toml_edit::de::from_str::<RawInputs>(&contents).map_err(|e| {
        ConfigFileError::Parse {
            path: path.to_owned(),
            message: e.message().to_owned(),
        }
    })?;
    info!("loaded inputs from {}", path.display());
    Ok(inputs)
}
