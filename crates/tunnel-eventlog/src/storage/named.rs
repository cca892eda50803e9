//! Log file naming and directory layout rules

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::error::{EventLogError, EventLogResult};

/// One physical log file, identified by `seq_timestamp_uuid`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamedLogFile {
    /// Position in the whole history of the directory, strictly +1 per file
    pub seq: u64,
    /// Creation time, unix seconds
    pub timestamp: i64,
    /// Externally visible log id
    pub uuid: String,
}

impl NamedLogFile {
    /// Allocate a fresh file with the given sequence number
    pub fn new(seq: u64) -> Self {
        Self {
            seq,
            timestamp: chrono::Utc::now().timestamp(),
            uuid: Uuid::new_v4().to_string(),
        }
    }

    /// The file that follows this one after a rotation
    pub fn next(&self) -> Self {
        Self::new(self.seq + 1)
    }

    /// Log id as handed to readers
    pub fn log_id(&self) -> &str {
        &self.uuid
    }
}

impl fmt::Display for NamedLogFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.seq, self.timestamp, self.uuid)
    }
}

impl FromStr for NamedLogFile {
    type Err = EventLogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            EventLogError::invalid_layout(format!(
                "invalid log name `{}`: expected name template is `$num_$timestamp_$uuid`",
                s
            ))
        };

        let mut parts = s.splitn(3, '_');
        let (Some(seq), Some(timestamp), Some(uuid)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };

        let seq: u64 = seq.parse().map_err(|_| invalid())?;
        if seq == 0 {
            return Err(invalid());
        }
        let timestamp: i64 = timestamp.parse().map_err(|_| invalid())?;
        Uuid::parse_str(uuid).map_err(|_| {
            EventLogError::invalid_layout(format!(
                "invalid log name: failed to parse UUID from `{}`",
                s
            ))
        })?;

        Ok(Self {
            seq,
            timestamp,
            uuid: uuid.to_string(),
        })
    }
}

/// Check that sorted files form one contiguous run without duplicates
pub fn validate_sequence(files: &[NamedLogFile]) -> EventLogResult<()> {
    let Some(first) = files.first() else {
        return Ok(());
    };

    let mut expected = first.seq;
    for file in files {
        if file.seq != expected {
            return Err(EventLogError::invalid_layout(format!(
                "invalid sequence at `{}`, expecting {}",
                file, expected
            )));
        }
        expected += 1;
    }
    Ok(())
}

/// Fixed-size list of rotated files, oldest first
///
/// Slots are left-padded with `None` when fewer files exist than the
/// configured capacity. A capacity of zero keeps nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetainedFiles {
    slots: VecDeque<Option<NamedLogFile>>,
}

impl RetainedFiles {
    /// Trim or pad `given` (oldest first) to exactly `capacity` slots
    pub fn new(given: Vec<NamedLogFile>, capacity: usize) -> Self {
        let skip = given.len().saturating_sub(capacity);
        let mut slots: VecDeque<Option<NamedLogFile>> =
            std::iter::repeat_n(None, capacity.saturating_sub(given.len())).collect();
        slots.extend(given.into_iter().skip(skip).map(Some));
        Self { slots }
    }

    /// Number of slots, populated or not
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Push the newest file, evicting the oldest slot
    ///
    /// Returns the evicted file, if the slot was populated.
    pub fn push(&mut self, file: NamedLogFile) -> Option<NamedLogFile> {
        if self.slots.is_empty() {
            return None;
        }
        let evicted = self.slots.pop_front().flatten();
        self.slots.push_back(Some(file));
        evicted
    }

    /// Populated files, oldest first
    pub fn files(&self) -> impl Iterator<Item = &NamedLogFile> {
        self.slots.iter().flatten()
    }

    /// Look up a file by log id
    pub fn find(&self, log_id: &str) -> Option<&NamedLogFile> {
        self.files().find(|f| f.uuid == log_id)
    }

    /// The file rotated right after `log_id`, or `None` if `log_id` is the
    /// newest retained file. `Err(())` when `log_id` is not retained.
    pub(crate) fn after(&self, log_id: &str) -> Result<Option<&NamedLogFile>, ()> {
        let mut files = self.files();
        for file in files.by_ref() {
            if file.uuid == log_id {
                return Ok(files.next());
            }
        }
        Err(())
    }

    /// Raw slots, including placeholders
    pub fn slots(&self) -> &VecDeque<Option<NamedLogFile>> {
        &self.slots
    }
}
