//! Rotating file storage
//!
//! Owns the one file open for append plus the bounded list of rotated files
//! that readers may still address by log id.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
#[cfg(test)]
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::config::EventLogConfig;
use crate::error::{EventLogError, EventLogResult};
use crate::event::Event;
use crate::record;
use crate::storage::lock::{DirectoryLock, is_log_entry};
use crate::storage::named::{NamedLogFile, RetainedFiles, validate_sequence};

/// Rotation thresholds taken from the config
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    /// Zero disables size-based rotation
    pub max_size: u64,
    /// Zero disables time-based rotation
    pub max_period: Duration,
}

impl RotationPolicy {
    pub fn from_config(config: &EventLogConfig) -> Self {
        Self {
            max_size: config.rotation_size,
            max_period: config.rotation_period,
        }
    }

    /// Whether a file with `written` bytes created at `created_at` is due
    pub fn must_rotate(&self, written: u64, created_at: SystemTime, now: SystemTime) -> bool {
        if self.max_size > 0 && written >= self.max_size {
            info!(
                current_write = written,
                max_size = self.max_size,
                "must rotate current log (size)"
            );
            return true;
        }

        if !self.max_period.is_zero() {
            let lifetime = now.duration_since(created_at).unwrap_or_default();
            if lifetime > self.max_period {
                info!(lifetime = ?lifetime, "must rotate current log (ttl)");
                return true;
            }
        }

        false
    }
}

/// Mutable storage state, guarded by one lock
struct StorageState {
    current: NamedLogFile,
    /// Write-only handle; `None` once the storage is closed
    writer: Option<File>,
    written: u64,
    created_at: SystemTime,
    rotated: RetainedFiles,
    /// Released by `close` so the directory can be reopened
    dir_lock: Option<DirectoryLock>,
}

/// Independent read handle onto one log file
pub struct LogReader {
    log_id: String,
    reader: BufReader<File>,
}

impl LogReader {
    /// Log id this handle reads from
    pub fn log_id(&self) -> &str {
        &self.log_id
    }

    /// Decode the record at `offset`, which must be the handle's position
    pub async fn next_record(&mut self, offset: i64) -> EventLogResult<Option<(Event, i64)>> {
        record::read_record(&mut self.reader, offset, &self.log_id).await
    }

    /// Move the handle back to `offset`, dropping anything buffered
    pub async fn rewind(&mut self, offset: i64) -> EventLogResult<()> {
        self.reader.seek(SeekFrom::Start(offset as u64)).await?;
        Ok(())
    }
}

/// Summary of one retained file, for inspection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFileInfo {
    pub file: NamedLogFile,
    pub path: PathBuf,
    pub current: bool,
}

/// File-backed log storage with size/time rotation
pub struct FileStorage {
    dir: PathBuf,
    policy: RotationPolicy,
    state: Mutex<StorageState>,
    /// Number of upcoming rotations that fail to open the next file
    #[cfg(test)]
    fail_rotations: AtomicUsize,
}

impl FileStorage {
    /// Restore storage from `config.directory`, creating it if needed
    ///
    /// Every entry must be named `seq_timestamp_uuid` and the sequence
    /// numbers must be contiguous. The highest one becomes the current file.
    /// Fails with `DirectoryLocked` while another storage has it open.
    #[instrument(skip(config), fields(dir = %config.directory.display()))]
    pub async fn open(config: &EventLogConfig) -> EventLogResult<Self> {
        let dir = config.directory.clone();
        tokio::fs::create_dir_all(&dir).await?;
        let dir_lock = DirectoryLock::acquire(&dir)?;

        let mut files = scan_directory(&dir).await?;
        if files.is_empty() {
            files.push(NamedLogFile::new(1));
        }

        // The list is non-empty here
        let current = files.pop().ok_or_else(|| EventLogError::invalid_layout("empty"))?;
        let (writer, written) = open_write_only(&dir.join(current.to_string())).await?;
        let created_at = UNIX_EPOCH + Duration::from_secs(current.timestamp.max(0) as u64);
        let rotated = RetainedFiles::new(files, config.max_retained_files);

        info!(
            log_id = %current.uuid,
            seq = current.seq,
            written = written,
            rotated = rotated.files().count(),
            "Event log storage opened"
        );

        Ok(Self {
            dir,
            policy: RotationPolicy::from_config(config),
            state: Mutex::new(StorageState {
                current,
                writer: Some(writer),
                written,
                created_at,
                rotated,
                dir_lock: Some(dir_lock),
            }),
            #[cfg(test)]
            fail_rotations: AtomicUsize::new(0),
        })
    }

    /// Directory this storage lives in
    pub fn directory(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, file: &NamedLogFile) -> PathBuf {
        self.dir.join(file.to_string())
    }

    /// Append `buf` to the current file, then rotate if a limit is reached
    ///
    /// Meant for one caller at a time (the event writer). Concurrent callers
    /// stay consistent: appends are serialized and a rotation is dropped if
    /// another one already replaced the file it started from.
    pub async fn write(&self, buf: &[u8]) -> EventLogResult<()> {
        let rotate = {
            let mut state = self.state.lock().await;
            let written = state.written;
            let current = state.current.clone();
            let writer = state.writer.as_mut().ok_or(EventLogError::NotRunning)?;

            let result = async {
                writer.write_all(buf).await?;
                writer.flush().await
            }
            .await;
            if let Err(e) = result {
                return Err(EventLogError::io(format!(
                    "failed to write to {} at offset {}: {}",
                    current, written, e
                )));
            }

            state.written += buf.len() as u64;
            self.policy
                .must_rotate(state.written, state.created_at, SystemTime::now())
        };

        if rotate {
            self.rotate().await;
        }
        Ok(())
    }

    /// Swap in a fresh current file
    ///
    /// The next file is opened first; if that fails we keep writing to the
    /// old one and the next write tries again.
    async fn rotate(&self) {
        let (from_seq, next) = {
            let state = self.state.lock().await;
            (state.current.seq, state.current.next())
        };
        let next_path = self.path_for(&next);

        let (fd, _) = match self.open_next(&next_path).await {
            Ok(opened) => opened,
            Err(e) => {
                error!(error = %e, path = %next_path.display(), "failed to open next log");
                return;
            }
        };

        let mut state = self.state.lock().await;
        if state.current.seq != from_seq || state.writer.is_none() {
            drop(state);
            debug!(path = %next_path.display(), "rotation superseded, discarding next log");
            drop(fd);
            if let Err(e) = tokio::fs::remove_file(&next_path).await {
                warn!(error = %e, path = %next_path.display(), "failed to remove unused log");
            }
            return;
        }

        if let Some(old) = state.writer.take() {
            if let Err(e) = old.sync_all().await {
                warn!(error = %e, log_id = %state.current.uuid, "failed to sync rotated log");
            }
        }

        let previous = std::mem::replace(&mut state.current, next);
        if let Some(evicted) = state.rotated.push(previous) {
            debug!(log_id = %evicted.uuid, seq = evicted.seq, "log fell out of retention");
        }
        state.writer = Some(fd);
        state.written = 0;
        state.created_at = SystemTime::now();

        debug!(log_id = %state.current.uuid, seq = state.current.seq, "next log allocated");
    }

    async fn open_next(&self, path: &Path) -> EventLogResult<(File, u64)> {
        #[cfg(test)]
        {
            let pending = self.fail_rotations.load(Ordering::SeqCst);
            if pending > 0 {
                self.fail_rotations.store(pending - 1, Ordering::SeqCst);
                return Err(EventLogError::io("next log unavailable"));
            }
        }
        open_write_only(path).await
    }

    /// Open an independent read handle at `offset` of `log_id`
    pub async fn open_for_read(&self, log_id: &str, offset: i64) -> EventLogResult<LogReader> {
        let path = {
            let state = self.state.lock().await;
            let file = lookup(&state, log_id)
                .ok_or_else(|| EventLogError::UnknownLog(log_id.to_string()))?;
            self.path_for(file)
        };
        open_reader(&path, log_id, offset).await
    }

    /// Whether `log_id` is the current file or a retained one
    pub async fn has_log(&self, log_id: &str) -> bool {
        let state = self.state.lock().await;
        lookup(&state, log_id).is_some()
    }

    /// Earliest retained log, or the current one if nothing has rotated
    pub async fn first_log(&self) -> String {
        let state = self.state.lock().await;
        state
            .rotated
            .files()
            .next()
            .unwrap_or(&state.current)
            .uuid
            .clone()
    }

    /// Log currently open for writing
    pub async fn current_log(&self) -> String {
        self.state.lock().await.current.uuid.clone()
    }

    /// Log to read after `current` is exhausted
    ///
    /// Returns `current` itself while it is still the file being written.
    /// Fails with `TooOld` if `current` has fallen out of retention.
    pub async fn next_log(&self, current: &str) -> EventLogResult<String> {
        let state = self.state.lock().await;
        if state.current.uuid == current {
            return Ok(current.to_string());
        }

        match state.rotated.after(current) {
            Ok(Some(next)) => Ok(next.uuid.clone()),
            Ok(None) => Ok(state.current.uuid.clone()),
            Err(()) => Err(EventLogError::TooOld(format!(
                "unable to find next log after {}",
                current
            ))),
        }
    }

    /// Retained and current files, oldest first
    pub async fn log_files(&self) -> Vec<LogFileInfo> {
        let state = self.state.lock().await;
        state
            .rotated
            .files()
            .map(|f| LogFileInfo {
                file: f.clone(),
                path: self.path_for(f),
                current: false,
            })
            .chain(std::iter::once(LogFileInfo {
                file: state.current.clone(),
                path: self.path_for(&state.current),
                current: true,
            }))
            .collect()
    }

    /// Bytes written to the current file
    pub async fn current_written(&self) -> u64 {
        self.state.lock().await.written
    }

    /// Sync and close the current file and release the directory lock;
    /// later writes fail with `NotRunning`
    pub async fn close(&self) -> EventLogResult<()> {
        let mut state = self.state.lock().await;
        let synced = match state.writer.take() {
            Some(writer) => writer.sync_all().await,
            None => Ok(()),
        };
        if state.dir_lock.take().is_some() {
            info!(log_id = %state.current.uuid, written = state.written, "Event log storage closed");
        }
        synced?;
        Ok(())
    }
}

fn lookup<'a>(state: &'a StorageState, log_id: &str) -> Option<&'a NamedLogFile> {
    if state.current.uuid == log_id {
        return Some(&state.current);
    }
    state.rotated.find(log_id)
}

/// Parse and validate every file name in `dir`, sorted by sequence
pub async fn scan_directory(dir: &Path) -> EventLogResult<Vec<NamedLogFile>> {
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_str().ok_or_else(|| {
            EventLogError::invalid_layout(format!("non UTF-8 log name {:?}", entry.file_name()))
        })?;
        if !is_log_entry(name) {
            continue;
        }
        files.push(name.parse::<NamedLogFile>()?);
    }

    // read_dir gives no ordering guarantee
    files.sort_by_key(|f| f.seq);
    validate_sequence(&files)?;
    Ok(files)
}

/// Open a read handle on `path`, positioned at `offset`
pub(super) async fn open_reader(path: &Path, log_id: &str, offset: i64) -> EventLogResult<LogReader> {
    debug!(log_id = %log_id, offset = offset, "open log for reading");

    let mut file = OpenOptions::new().read(true).open(path).await?;
    let len = file.metadata().await?.len();
    if offset < 0 || offset as u64 > len {
        return Err(EventLogError::SeekFailed {
            log_id: log_id.to_string(),
            offset,
            len,
        });
    }
    if offset > 0 {
        file.seek(SeekFrom::Start(offset as u64)).await?;
    }

    Ok(LogReader {
        log_id: log_id.to_string(),
        reader: BufReader::new(file),
    })
}

/// Open `path` for appending, returning the handle and the current size
async fn open_write_only(path: &Path) -> EventLogResult<(File, u64)> {
    debug!(path = %path.display(), "open log for writing");

    let fd = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| {
            EventLogError::io(format!(
                "failed to open log {} for writing: {}",
                path.display(),
                e
            ))
        })?;
    let size = fd.metadata().await?.len();
    Ok((fd, size))
}
