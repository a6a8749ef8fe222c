//! Path resolution for nasfan data files.
//!
//! Resolved once at startup from: CLI `--data-dir` > `NASFAN_DATA_DIR` env > `~/.nasfan`.
//! (clap already folds the env var into the flag; the env lookup here covers
//! callers that bypass the CLI.)

use std::io;
use std::path::{Path, PathBuf};

use anyhow::Context;

pub fn resolve_data_dir(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(p) = explicit {
        return Ok(p.to_path_buf());
    }
    if let Ok(env_val) = std::env::var("NASFAN_DATA_DIR") {
        if !env_val.trim().is_empty() {
            return Ok(PathBuf::from(env_val));
        }
    }
    let home = dirs::home_dir().context("HOME directory not found; pass --data-dir")?;
    Ok(home.join(".nasfan"))
}

pub fn log_dir(base: &Path) -> PathBuf {
    base.join("logs")
}

/// Create all required subdirectories under the data dir.
pub fn ensure_dirs(base: &Path) -> io::Result<()> {
    std::fs::create_dir_all(base)?;
    std::fs::create_dir_all(log_dir(base))?;
    Ok(())
}
