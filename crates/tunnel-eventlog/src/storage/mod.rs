//! On-disk layout of the event log
//!
//! A directory of files named `seq_timestamp_uuid`, each a run of
//! back-to-back records with no file header or footer.

mod file;
mod lock;
mod named;
mod view;

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use async_trait::async_trait;

pub use file::{FileStorage, LogFileInfo, LogReader, RotationPolicy, scan_directory};
pub use lock::{DirectoryLock, LOCK_FILE_NAME};
pub use named::{NamedLogFile, RetainedFiles, validate_sequence};
pub use view::LogDirectory;

use crate::error::{EventLogError, EventLogResult};
use crate::event::Event;
use crate::record;

/// Where tailing tasks read logs from
///
/// Implemented by the writer's own [`FileStorage`] and by the read-only
/// [`LogDirectory`] used by processes that do not own the directory.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Open a read handle at `offset` of `log_id`
    async fn open_for_read(&self, log_id: &str, offset: i64) -> EventLogResult<LogReader>;

    /// Whether `log_id` can currently be opened
    async fn has_log(&self, log_id: &str) -> EventLogResult<bool>;

    /// Earliest addressable log
    async fn first_log(&self) -> EventLogResult<String>;

    /// Log being written
    async fn current_log(&self) -> EventLogResult<String>;

    /// Log after `current`, or `current` itself while it is the newest
    async fn next_log(&self, current: &str) -> EventLogResult<String>;
}

#[async_trait]
impl LogSource for FileStorage {
    async fn open_for_read(&self, log_id: &str, offset: i64) -> EventLogResult<LogReader> {
        FileStorage::open_for_read(self, log_id, offset).await
    }

    async fn has_log(&self, log_id: &str) -> EventLogResult<bool> {
        Ok(FileStorage::has_log(self, log_id).await)
    }

    async fn first_log(&self) -> EventLogResult<String> {
        Ok(FileStorage::first_log(self).await)
    }

    async fn current_log(&self) -> EventLogResult<String> {
        Ok(FileStorage::current_log(self).await)
    }

    async fn next_log(&self, current: &str) -> EventLogResult<String> {
        FileStorage::next_log(self, current).await
    }
}

/// Everything decodable from one log file
#[derive(Debug, Default)]
pub struct LogFileContents {
    pub events: Vec<Event>,
    /// Offset just past the last complete record
    pub end_offset: i64,
    /// Set when the file ends in a partial or corrupt record
    pub trailing_error: Option<EventLogError>,
}

/// Decode a whole log file without going through a manager
///
/// Stops at the first framing error and reports it alongside the events
/// read so far.
pub fn read_log_file(path: &Path, log_id: &str) -> EventLogResult<LogFileContents> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut contents = LogFileContents::default();

    loop {
        match record::decode(&mut reader, contents.end_offset, log_id) {
            Ok(Some((event, next))) => {
                contents.events.push(event);
                contents.end_offset = next;
            }
            Ok(None) => break,
            Err(e @ EventLogError::MalformedRecord { .. }) => {
                contents.trailing_error = Some(e);
                break;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(contents)
}
