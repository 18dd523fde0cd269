use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

use crate::cli::Cli;

pub fn resolve_db_path(cli: &Cli) -> Result<PathBuf> {
    if let Some(p) = cli.db.clone() {
        return Ok(p);
    }

    Ok(index_home()?.join("index.lmdb"))
}

pub fn resolve_download_dir(cli: &Cli) -> Result<PathBuf> {
    if let Some(p) = cli.downloads.clone() {
        return Ok(p);
    }

    Ok(index_home()?.join("downloads"))
}

/// `--java-home`, then `JAVA_HOME`. `None` leaves the standard library's
/// download URL as given.
pub fn resolve_runtime_home(cli: &Cli) -> Option<PathBuf> {
    if let Some(p) = cli.java_home.clone() {
        return Some(p);
    }

    env::var_os("JAVA_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

pub fn clear_db(db_path: &Path) -> Result<()> {
    remove_file_if_exists(db_path, "index")?;
    remove_file_if_exists(&lmdb_lock_path(db_path), "index lock")?;
    Ok(())
}

fn index_home() -> Result<PathBuf> {
    let base = dirs::data_local_dir()
        .or_else(dirs::cache_dir)
        .or_else(dirs::home_dir)
        .ok_or_else(|| anyhow::anyhow!("Failed to resolve data directory"))?;
    Ok(base.join("javadoc-index"))
}

fn lmdb_lock_path(db_path: &Path) -> PathBuf {
    let mut os = db_path.as_os_str().to_os_string();
    os.push("-lock");
    PathBuf::from(os)
}

fn remove_file_if_exists(path: &Path, kind: &str) -> Result<()> {
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to remove {kind} file: {}", path.display()))?;
    }
    Ok(())
}
