//! Configuration for the event log

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EventLogError, EventLogResult};

/// Default capacity of the producer queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Default depth of each subscription's delivery queue
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 16;

/// How long a caught-up tailer sleeps before polling the file again
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Configuration for an event log directory and its manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventLogConfig {
    /// Directory holding the `seq_timestamp_uuid` log files
    pub directory: PathBuf,
    /// Number of rotated files kept addressable for readers
    pub max_retained_files: usize,
    /// Maximum lifetime of a single log file (zero disables)
    #[serde(with = "duration_secs")]
    pub rotation_period: Duration,
    /// Maximum size of a single log file in bytes (zero disables)
    pub rotation_size: u64,
    /// Capacity of the producer queue between push and the writer
    pub queue_capacity: usize,
    /// Depth of each subscription's delivery queue
    pub subscriber_buffer: usize,
    /// Sleep between polls once a tailer has caught up with the writer
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./data/eventlog"),
            max_retained_files: 5,
            rotation_period: Duration::ZERO,
            rotation_size: 10 * 1024 * 1024, // 10MB
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl EventLogConfig {
    /// Create a configuration rooted at the given directory
    pub fn with_directory(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Default::default()
        }
    }

    /// Set the number of retained rotated files
    pub fn with_max_retained_files(mut self, count: usize) -> Self {
        self.max_retained_files = count;
        self
    }

    /// Set the time-based rotation period
    pub fn with_rotation_period(mut self, period: Duration) -> Self {
        self.rotation_period = period;
        self
    }

    /// Set the size-based rotation threshold
    pub fn with_rotation_size(mut self, size: u64) -> Self {
        self.rotation_size = size;
        self
    }

    /// Set the producer queue capacity
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the per-subscription delivery queue depth
    pub fn with_subscriber_buffer(mut self, depth: usize) -> Self {
        self.subscriber_buffer = depth;
        self
    }

    /// Set the tailer poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Check the values a manager cannot start with
    pub fn validate(&self) -> EventLogResult<()> {
        if self.directory.as_os_str().is_empty() {
            return Err(EventLogError::invalid_argument("directory is required"));
        }
        if self.queue_capacity == 0 {
            return Err(EventLogError::invalid_argument(
                "queue_capacity must be greater than zero",
            ));
        }
        if self.subscriber_buffer == 0 {
            return Err(EventLogError::invalid_argument(
                "subscriber_buffer must be greater than zero",
            ));
        }
        Ok(())
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
