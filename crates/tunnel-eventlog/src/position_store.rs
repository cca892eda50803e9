//! Persisted reader positions
//!
//! Lets a consumer remember the last event it handled and resume after it
//! on the next run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{EventLogError, EventLogResult};
use crate::event::EventLogPosition;

/// Default time a stored position stays valid
pub const DEFAULT_KEEP_PERIOD: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Storage for per-subscriber positions
#[async_trait]
pub trait PositionStore: Send + Sync {
    /// Last stored position, if any and not expired
    async fn get(&self, subscriber_id: &str) -> EventLogResult<Option<EventLogPosition>>;

    /// Store the position of the last handled event
    async fn put(&self, subscriber_id: &str, position: &EventLogPosition) -> EventLogResult<()>;
}

/// On-disk form of a stored position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPosition {
    pub subscriber_id: String,
    pub log_id: String,
    pub offset: i64,
    pub updated: DateTime<Utc>,
}

/// One JSON file per subscriber in a directory
#[derive(Debug, Clone)]
pub struct FilePositionStore {
    directory: PathBuf,
    keep_period: Duration,
}

impl FilePositionStore {
    /// Open (and create) the store directory
    pub async fn open(directory: impl Into<PathBuf>) -> EventLogResult<Self> {
        let directory = directory.into();
        tokio::fs::create_dir_all(&directory).await.map_err(|e| {
            EventLogError::io(format!(
                "failed to ensure the directory {}: {}",
                directory.display(),
                e
            ))
        })?;
        Ok(Self {
            directory,
            keep_period: DEFAULT_KEEP_PERIOD,
        })
    }

    /// Positions older than `period` are discarded on read (zero keeps forever)
    pub fn with_keep_period(mut self, period: Duration) -> Self {
        self.keep_period = period;
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn file_name(subscriber_id: &str) -> String {
        format!(
            "eventlogs.offset.{}",
            URL_SAFE_NO_PAD.encode(subscriber_id.as_bytes())
        )
    }

    fn path_for(&self, subscriber_id: &str) -> PathBuf {
        self.directory.join(Self::file_name(subscriber_id))
    }

    fn is_expired(&self, stored: &StoredPosition) -> bool {
        if self.keep_period.is_zero() {
            return false;
        }
        let age = Utc::now().signed_duration_since(stored.updated);
        age.to_std().map(|age| age > self.keep_period).unwrap_or(false)
    }
}

#[async_trait]
impl PositionStore for FilePositionStore {
    async fn get(&self, subscriber_id: &str) -> EventLogResult<Option<EventLogPosition>> {
        let path = self.path_for(subscriber_id);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let stored: StoredPosition = serde_json::from_slice(&data)?;
        if self.is_expired(&stored) {
            debug!(subscriber_id = %subscriber_id, updated = %stored.updated, "Discarding expired position");
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(error = %e, path = %path.display(), "Failed to remove expired position");
            }
            return Ok(None);
        }

        Ok(Some(EventLogPosition::new(stored.log_id, stored.offset)))
    }

    async fn put(&self, subscriber_id: &str, position: &EventLogPosition) -> EventLogResult<()> {
        let stored = StoredPosition {
            subscriber_id: subscriber_id.to_string(),
            log_id: position.log_id.clone(),
            offset: position.offset,
            updated: Utc::now(),
        };
        let data = serde_json::to_vec(&stored)?;

        // Write then rename so a reader never sees a partial file
        let path = self.path_for(subscriber_id);
        let tmp = self
            .directory
            .join(format!("{}.tmp", Self::file_name(subscriber_id)));
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}
