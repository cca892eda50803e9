//! Read-only view of a log directory owned by another process
//!
//! Never opens a file for writing and never takes the directory lock. The
//! list of logs is rebuilt from the directory whenever a reader runs out
//! of known files, so rotations made by the writer show up.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::config::EventLogConfig;
use crate::error::{EventLogError, EventLogResult};
use crate::storage::file::{LogFileInfo, LogReader, open_reader, scan_directory};
use crate::storage::named::NamedLogFile;
use crate::storage::LogSource;

/// Rescanning log directory reader
pub struct LogDirectory {
    dir: PathBuf,
    max_retained_files: usize,
    /// Addressable window, oldest first; the last entry is the current log
    files: Mutex<Vec<NamedLogFile>>,
}

impl LogDirectory {
    /// Scan `config.directory`, which must already hold at least one log
    #[instrument(skip(config), fields(dir = %config.directory.display()))]
    pub async fn open(config: &EventLogConfig) -> EventLogResult<Self> {
        let view = Self {
            dir: config.directory.clone(),
            max_retained_files: config.max_retained_files,
            files: Mutex::new(Vec::new()),
        };
        view.refresh().await?;
        Ok(view)
    }

    /// Directory this view reads from
    pub fn directory(&self) -> &Path {
        &self.dir
    }

    /// Re-read the directory listing
    pub async fn refresh(&self) -> EventLogResult<()> {
        let mut files = scan_directory(&self.dir).await?;
        if files.is_empty() {
            return Err(EventLogError::invalid_layout(format!(
                "no log files in {}",
                self.dir.display()
            )));
        }

        // Same window the writer keeps addressable
        let keep = self.max_retained_files.saturating_add(1);
        if files.len() > keep {
            files.drain(..files.len() - keep);
        }

        let mut known = self.files.lock().await;
        if known.last() != files.last() {
            debug!(
                current = files.last().map(|f| f.seq),
                count = files.len(),
                "log directory changed"
            );
        }
        *known = files;
        Ok(())
    }

    /// Known files, oldest first, as of the last scan
    pub async fn log_files(&self) -> Vec<LogFileInfo> {
        let files = self.files.lock().await;
        let last = files.len().saturating_sub(1);
        files
            .iter()
            .enumerate()
            .map(|(i, f)| LogFileInfo {
                file: f.clone(),
                path: self.dir.join(f.to_string()),
                current: i == last,
            })
            .collect()
    }

    async fn find(&self, log_id: &str) -> Option<NamedLogFile> {
        self.files
            .lock()
            .await
            .iter()
            .find(|f| f.uuid == log_id)
            .cloned()
    }

    /// Look `log_id` up, rescanning once if it is not known yet
    async fn locate(&self, log_id: &str) -> EventLogResult<Option<NamedLogFile>> {
        if let Some(file) = self.find(log_id).await {
            return Ok(Some(file));
        }
        self.refresh().await?;
        Ok(self.find(log_id).await)
    }

    /// Position of `log_id` in the window and whether it is the newest file
    async fn place(&self, log_id: &str) -> Option<(usize, bool)> {
        let files = self.files.lock().await;
        files
            .iter()
            .position(|f| f.uuid == log_id)
            .map(|i| (i, i + 1 == files.len()))
    }
}

#[async_trait]
impl LogSource for LogDirectory {
    async fn open_for_read(&self, log_id: &str, offset: i64) -> EventLogResult<LogReader> {
        let file = self
            .locate(log_id)
            .await?
            .ok_or_else(|| EventLogError::UnknownLog(log_id.to_string()))?;
        open_reader(&self.dir.join(file.to_string()), log_id, offset).await
    }

    async fn has_log(&self, log_id: &str) -> EventLogResult<bool> {
        Ok(self.locate(log_id).await?.is_some())
    }

    async fn first_log(&self) -> EventLogResult<String> {
        self.refresh().await?;
        let files = self.files.lock().await;
        files
            .first()
            .map(|f| f.uuid.clone())
            .ok_or_else(|| EventLogError::invalid_layout("no log files"))
    }

    async fn current_log(&self) -> EventLogResult<String> {
        self.refresh().await?;
        let files = self.files.lock().await;
        files
            .last()
            .map(|f| f.uuid.clone())
            .ok_or_else(|| EventLogError::invalid_layout("no log files"))
    }

    async fn next_log(&self, current: &str) -> EventLogResult<String> {
        match self.place(current).await {
            Some((_, false)) => {}
            // Newest known file, or unknown: the writer may have moved on
            _ => self.refresh().await?,
        }

        let files = self.files.lock().await;
        match files.iter().position(|f| f.uuid == current) {
            Some(i) if i + 1 < files.len() => Ok(files[i + 1].uuid.clone()),
            Some(_) => Ok(current.to_string()),
            None => Err(EventLogError::TooOld(format!(
                "unable to find next log after {}",
                current
            ))),
        }
    }
}
