//! Event and position types

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EventLogError, EventLogResult};

/// Kind tag stored in every record header
///
/// Values outside the named constants are carried through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventType(pub u32);

impl EventType {
    pub const UNSPECIFIED: EventType = EventType(0);
    pub const PEER_ADD: EventType = EventType(1);
    pub const PEER_REMOVE: EventType = EventType(2);
    pub const PEER_UPDATE: EventType = EventType(3);
    pub const PEER_TRAFFIC: EventType = EventType(4);
    pub const PEER_FIRST_CONNECT: EventType = EventType(5);

    /// Raw wire value
    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// Human name for the known kinds
    pub fn name(self) -> Option<&'static str> {
        match self {
            EventType::UNSPECIFIED => Some("unspecified"),
            EventType::PEER_ADD => Some("peer_add"),
            EventType::PEER_REMOVE => Some("peer_remove"),
            EventType::PEER_UPDATE => Some("peer_update"),
            EventType::PEER_TRAFFIC => Some("peer_traffic"),
            EventType::PEER_FIRST_CONNECT => Some("peer_first_connect"),
            _ => None,
        }
    }

    /// Parse either a known name or a decimal value
    pub fn parse(s: &str) -> Option<EventType> {
        match s {
            "unspecified" => Some(EventType::UNSPECIFIED),
            "peer_add" => Some(EventType::PEER_ADD),
            "peer_remove" => Some(EventType::PEER_REMOVE),
            "peer_update" => Some(EventType::PEER_UPDATE),
            "peer_traffic" => Some(EventType::PEER_TRAFFIC),
            "peer_first_connect" => Some(EventType::PEER_FIRST_CONNECT),
            other => other.parse::<u32>().ok().map(EventType),
        }
    }
}

impl From<u32> for EventType {
    fn from(value: u32) -> Self {
        EventType(value)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "type_{}", self.0),
        }
    }
}

/// A decoded journal record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Kind tag from the record header
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Unix seconds from the record header
    #[serde(rename = "ts")]
    pub timestamp: i64,
    /// Log file the record was read from (not stored in the record)
    pub log_id: String,
    /// Byte offset of the record within its file
    pub offset: i64,
    /// Record body with the terminator stripped
    pub data: Bytes,
}

impl Event {
    /// Position of this record, for resuming after it has been handled
    pub fn position(&self) -> EventLogPosition {
        EventLogPosition::new(self.log_id.clone(), self.offset)
    }

    /// Deserialize the JSON body
    pub fn decode_data<T: serde::de::DeserializeOwned>(&self) -> EventLogResult<T> {
        Ok(serde_json::from_slice(&self.data)?)
    }
}

/// Where a reader starts in the journal
///
/// Zero offset means the beginning of the file. An empty log id means the
/// beginning of the whole journal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventLogPosition {
    pub log_id: String,
    pub offset: i64,
}

impl EventLogPosition {
    pub fn new(log_id: impl Into<String>, offset: i64) -> Self {
        Self {
            log_id: log_id.into(),
            offset,
        }
    }

    /// Start of the given log
    pub fn start_of(log_id: impl Into<String>) -> Self {
        Self::new(log_id, 0)
    }

    /// Check the subscribe-time rules for a position
    pub fn validate(&self) -> EventLogResult<()> {
        if self.offset < 0 {
            return Err(EventLogError::invalid_argument(
                "negative offset is not supported",
            ));
        }
        if self.log_id.is_empty() && self.offset > 0 {
            return Err(EventLogError::invalid_argument(
                "log id is required for a non-zero offset",
            ));
        }
        if !self.log_id.is_empty() {
            Uuid::parse_str(&self.log_id).map_err(|e| {
                EventLogError::invalid_argument(format!(
                    "failed to parse log id `{}`: {}",
                    self.log_id, e
                ))
            })?;
        }
        Ok(())
    }
}

impl fmt::Display for EventLogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.log_id.is_empty() {
            write!(f, "<first>@{}", self.offset)
        } else {
            write!(f, "{}@{}", self.log_id, self.offset)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_names() {
        assert_eq!(EventType::PEER_ADD.to_string(), "peer_add");
        assert_eq!(EventType(77).to_string(), "type_77");
        assert_eq!(EventType::parse("peer_traffic"), Some(EventType::PEER_TRAFFIC));
        assert_eq!(EventType::parse("12"), Some(EventType(12)));
        assert_eq!(EventType::parse("nope"), None);
    }

    #[test]
    fn test_position_validation() {
        let id = Uuid::new_v4().to_string();

        assert!(EventLogPosition::default().validate().is_ok());
        assert!(EventLogPosition::new(id.clone(), 0).validate().is_ok());
        assert!(EventLogPosition::new(id, 128).validate().is_ok());

        assert!(EventLogPosition::new("", -1).validate().is_err());
        assert!(EventLogPosition::new("", 10).validate().is_err());
        assert!(EventLogPosition::new("not-a-uuid", 0).validate().is_err());
    }

    #[test]
    fn test_decode_data() {
        let event = Event {
            event_type: EventType::PEER_ADD,
            timestamp: 1,
            log_id: String::new(),
            offset: 0,
            data: Bytes::from_static(br#"{"peer":"wg0"}"#),
        };
        let value: serde_json::Value = event.decode_data().unwrap();
        assert_eq!(value["peer"], "wg0");
    }
}
