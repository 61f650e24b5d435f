use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;

/// File name of the local database inside the data directory.
pub const DB_FILE: &str = "yousum.db";

/// Platform-specific app data dir (`~/.local/share/yousum/`, etc.).
pub fn platform_data_dir() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("", "", "yousum")
        .context("could not determine platform data directory")?;

    let path = dirs.data_dir().to_owned();
    std::fs::create_dir_all(&path).context("create platform data dir")?;
    Ok(path)
}

/// Resolve the data directory for yousum files (`yousum.db`).
///
/// Priority:
/// 1. Explicit override (CLI flag or `YOUSUM_DATA_DIR` via [`crate::Config`])
/// 2. Platform data dir
pub fn resolve_data_dir(data_dir: Option<&Path>) -> Result<PathBuf> {
    match data_dir {
        Some(d) => {
            std::fs::create_dir_all(d)
                .with_context(|| format!("create data dir: {}", d.display()))?;
            Ok(d.to_owned())
        }
        None => platform_data_dir(),
    }
}
