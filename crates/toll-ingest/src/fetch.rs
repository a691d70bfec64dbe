//! Archive retrieval
//!
//! The archive lands in the run directory under [`ARCHIVE_FILE`]. Three
//! sources are supported:
//!
//! - `http(s)://` with the native transport: streamed through reqwest
//! - `http(s)://` with the external transport: `curl`
//! - `file://`: copied from the local filesystem
//!
//! [`ARCHIVE_FILE`]: crate::staging::ARCHIVE_FILE

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use toll_common::checksum::file_metadata;
use toll_common::{ChecksumAlgorithm, FileMetadata};
use tracing::{debug, info};

use crate::config::{SourceConfig, Transport};
use crate::error::{EtlError, Result};
use crate::process::{CommandRunner, ExternalCommand};
use crate::staging::StagedFile;

const USER_AGENT: &str = concat!("toll-ingest/", env!("CARGO_PKG_VERSION"));

/// Build the HTTP client shared by the fetcher and the webhook notifier
pub fn http_client(source: &SourceConfig) -> Result<Client> {
    Ok(Client::builder()
        .timeout(source.http_timeout())
        .user_agent(USER_AGENT)
        .build()?)
}

/// Downloads the archive into staging
pub struct Fetcher {
    client: Client,
    runner: Arc<dyn CommandRunner>,
    transport: Transport,
    progress: bool,
}

impl Fetcher {
    pub fn new(client: Client, runner: Arc<dyn CommandRunner>, transport: Transport) -> Self {
        Self {
            client,
            runner,
            transport,
            progress: std::io::stderr().is_terminal(),
        }
    }

    /// Disable the progress bar regardless of the terminal
    pub fn without_progress(mut self) -> Self {
        self.progress = false;
        self
    }

    /// Fetch `url` to `dest` and return its size and SHA-256
    pub async fn fetch(&self, url: &str, dest: &Path) -> Result<FileMetadata> {
        info!(%url, dest = %dest.display(), "Fetching archive");

        if let Some(local) = url.strip_prefix("file://") {
            copy_local(PathBuf::from(local), dest.to_path_buf()).await?;
        } else {
            match self.transport {
                Transport::Native => self.download(url, dest).await?,
                Transport::External => self.curl(url, dest).await?,
            }
        }

        let path = dest.to_path_buf();
        let metadata =
            tokio::task::spawn_blocking(move || file_metadata(&path, ChecksumAlgorithm::Sha256))
                .await??;

        info!(
            size = metadata.size,
            sha256 = %metadata.checksum,
            "Archive fetched"
        );
        Ok(metadata)
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<()> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(EtlError::transport(format!(
                "Failed to download {}: {}",
                url,
                response.status()
            )));
        }

        let total_size = response.content_length().unwrap_or(0);
        let pb = self.progress_bar(total_size, dest);

        let mut staged = StagedFile::create(dest)?;
        let mut downloaded = 0u64;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            std::io::Write::write_all(&mut staged, &chunk)?;
            downloaded += chunk.len() as u64;
            pb.set_position(downloaded);
        }

        if total_size > 0 && downloaded != total_size {
            pb.abandon();
            return Err(EtlError::transport(format!(
                "Truncated download from {}: got {} of {} bytes",
                url, downloaded, total_size
            )));
        }

        staged.commit()?;
        pb.finish_and_clear();
        debug!(bytes = downloaded, "Download complete");
        Ok(())
    }

    async fn curl(&self, url: &str, dest: &Path) -> Result<()> {
        let partial = dest.with_extension("part");
        let command = ExternalCommand::new("curl")
            .args(["--fail", "--silent", "--show-error", "--location", "--output"])
            .arg(partial.to_string_lossy())
            .arg(url);

        let result = self.runner.run(&command).await.and_then(|out| out.check(&command));
        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }

        tokio::fs::rename(&partial, dest).await?;
        Ok(())
    }

    fn progress_bar(&self, total_size: u64, dest: &Path) -> ProgressBar {
        if !self.progress {
            return ProgressBar::hidden();
        }

        let pb = ProgressBar::new(total_size);
        let style = ProgressStyle::default_bar()
            .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            .map(|s| s.progress_chars("#>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style);
        pb.set_message(format!(
            "Downloading {}",
            dest.file_name().unwrap_or_default().to_string_lossy()
        ));
        pb
    }
}

async fn copy_local(source: PathBuf, dest: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || {
        let mut input = std::fs::File::open(&source).map_err(|e| {
            EtlError::transport(format!("Cannot read local archive {}: {}", source.display(), e))
        })?;
        let mut staged = StagedFile::create(&dest)?;
        std::io::copy(&mut input, &mut staged)?;
        staged.commit()?;
        Ok(())
    })
    .await?
}
