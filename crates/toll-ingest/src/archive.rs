//! Archive unpacking
//!
//! Pulls the three raw extracts out of the gzip-compressed tarball into the
//! run's `raw/` directory. Entries are matched on their file name only, so a
//! bundle that nests the files in a folder still unpacks flat.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::read::GzDecoder;
use tracing::{debug, info, warn};

use crate::config::Transport;
use crate::error::{EtlError, Result};
use crate::process::{CommandRunner, ExternalCommand};
use crate::staging::{self, StagedFile};

/// Unpack `wanted` from the tar.gz at `archive` into `dest_dir`, in-process
pub fn extract_tar_gz(archive: &Path, dest_dir: &Path, wanted: &[&str]) -> Result<Vec<PathBuf>> {
    let decoder = GzDecoder::new(staging::open(archive)?);
    let mut tar = tar::Archive::new(decoder);

    let wanted_set: HashSet<&str> = wanted.iter().copied().collect();
    let mut found: HashSet<String> = HashSet::new();

    let entries = tar
        .entries()
        .map_err(|e| EtlError::transport(format!("Failed to read tar entries: {}", e)))?;

    for entry in entries {
        let mut entry =
            entry.map_err(|e| EtlError::transport(format!("Failed to read tar entry: {}", e)))?;

        if !entry.header().entry_type().is_file() {
            continue;
        }

        let path = entry
            .path()
            .map_err(|e| EtlError::transport(format!("Invalid tar entry path: {}", e)))?
            .into_owned();
        let Some(filename) = path.file_name().and_then(|n| n.to_str()).map(str::to_owned) else {
            continue;
        };

        if !wanted_set.contains(filename.as_str()) {
            debug!(entry = %path.display(), "Ignoring archive entry");
            continue;
        }
        if found.contains(&filename) {
            warn!(entry = %path.display(), "Duplicate archive entry, keeping the first");
            continue;
        }

        let mut staged = StagedFile::create(dest_dir.join(&filename))?;
        let bytes = std::io::copy(&mut entry, &mut staged).map_err(|e| {
            EtlError::transport(format!("Failed to unpack {}: {}", path.display(), e))
        })?;
        staged.commit()?;

        debug!(file = %filename, bytes, "Unpacked");
        found.insert(filename);
    }

    ensure_present(wanted, |name| found.contains(name))?;
    Ok(wanted.iter().map(|name| dest_dir.join(name)).collect())
}

fn ensure_present(wanted: &[&str], present: impl Fn(&str) -> bool) -> Result<()> {
    let missing: Vec<&str> = wanted.iter().copied().filter(|name| !present(name)).collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(EtlError::transport(format!(
            "Missing files in archive: {}",
            missing.join(", ")
        )))
    }
}

/// Unpacks the archive with the configured transport
pub struct Unpacker {
    runner: Arc<dyn CommandRunner>,
    transport: Transport,
}

impl Unpacker {
    pub fn new(runner: Arc<dyn CommandRunner>, transport: Transport) -> Self {
        Self { runner, transport }
    }

    pub async fn unpack(&self, archive: &Path, dest_dir: &Path, wanted: &[&str]) -> Result<Vec<PathBuf>> {
        info!(archive = %archive.display(), dest = %dest_dir.display(), "Unpacking archive");
        tokio::fs::create_dir_all(dest_dir).await?;

        let files = match self.transport {
            Transport::Native => {
                let archive = archive.to_path_buf();
                let dest_dir = dest_dir.to_path_buf();
                let wanted: Vec<String> = wanted.iter().map(|s| s.to_string()).collect();
                tokio::task::spawn_blocking(move || {
                    let names: Vec<&str> = wanted.iter().map(String::as_str).collect();
                    extract_tar_gz(&archive, &dest_dir, &names)
                })
                .await??
            },
            Transport::External => self.untar(archive, dest_dir, wanted).await?,
        };

        info!(files = files.len(), "Archive unpacked");
        Ok(files)
    }

    async fn untar(&self, archive: &Path, dest_dir: &Path, wanted: &[&str]) -> Result<Vec<PathBuf>> {
        let command = ExternalCommand::new("tar")
            .arg("-xzf")
            .arg(archive.to_string_lossy())
            .arg("-C")
            .arg(dest_dir.to_string_lossy());
        self.runner.run(&command).await?.check(&command)?;

        ensure_present(wanted, |name| dest_dir.join(name).is_file())?;
        Ok(wanted.iter().map(|name| dest_dir.join(name)).collect())
    }
}
