//! JSON line rendering and the stdout sink used by `tail`

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tunnel_eventlog::{
    Event, EventLogError, EventLogResult, EventSink, FetchEventsResponse, NamedLogFile,
    PositionStore,
};

/// Render one event; bodies that are not JSON are printed as a string
pub fn event_line(response: &FetchEventsResponse) -> Value {
    let data = serde_json::from_slice::<Value>(&response.data)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&response.data).into_owned()));
    json!({
        "type": response.event_type.to_string(),
        "type_id": response.event_type.as_u32(),
        "timestamp": response.timestamp,
        "log_id": response.position.log_id,
        "offset": response.position.offset,
        "data": data,
    })
}

pub fn dump_line(event: &Event) -> Value {
    event_line(&FetchEventsResponse::from(event.clone()))
}

/// Render one `ls` row
pub fn file_line(file: &NamedLogFile, size: Option<u64>, current: bool) -> Value {
    let created = chrono::DateTime::from_timestamp(file.timestamp, 0).map(|t| t.to_rfc3339());
    json!({
        "seq": file.seq,
        "log_id": file.log_id(),
        "created": created,
        "size": size,
        "current": current,
    })
}

pub fn print_line(value: &Value) -> std::io::Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer(&mut stdout, value)?;
    stdout.write_all(b"\n")?;
    stdout.flush()
}

/// Prints events, records positions and stops after `limit` events
pub struct StdoutSink {
    positions: Option<(Box<dyn PositionStore>, String)>,
    limit: Option<usize>,
    printed: AtomicUsize,
    cancel: CancellationToken,
}

impl StdoutSink {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            positions: None,
            limit: None,
            printed: AtomicUsize::new(0),
            cancel,
        }
    }

    pub fn with_positions(mut self, store: Box<dyn PositionStore>, subscriber_id: String) -> Self {
        self.positions = Some((store, subscriber_id));
        self
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn printed(&self) -> usize {
        self.printed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl EventSink for StdoutSink {
    async fn send(&self, response: FetchEventsResponse) -> EventLogResult<()> {
        if let Err(e) = print_line(&event_line(&response)) {
            // Reader went away (closed pipe)
            self.cancel.cancel();
            return Err(EventLogError::io(format!("failed to write to stdout: {}", e)));
        }

        if let Some((store, subscriber_id)) = &self.positions {
            if let Err(e) = store.put(subscriber_id, &response.position).await {
                warn!(error = %e, subscriber_id = %subscriber_id, "Failed to store position");
            }
        }

        let printed = self.printed.fetch_add(1, Ordering::Relaxed) + 1;
        if self.limit.is_some_and(|limit| printed >= limit) {
            self.cancel.cancel();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tunnel_eventlog::{EventLogPosition, EventType, FilePositionStore};

    fn response(data: &str) -> FetchEventsResponse {
        FetchEventsResponse {
            event_type: EventType::PEER_ADD,
            timestamp: 1_700_000_000,
            position: EventLogPosition::new("7a3c62e1-5f1c-4b55-9a0a-5d7c9c0e4a11", 32),
            data: data.as_bytes().to_vec().into(),
        }
    }

    #[test]
    fn test_event_line_parses_json_body() {
        let line = event_line(&response(r#"{"peer":"wg0"}"#));
        assert_eq!(line["type"], "peer_add");
        assert_eq!(line["type_id"], 1);
        assert_eq!(line["offset"], 32);
        assert_eq!(line["data"]["peer"], "wg0");
    }

    #[test]
    fn test_event_line_keeps_raw_body() {
        let line = event_line(&response("not json"));
        assert_eq!(line["data"], "not json");
    }

    #[test]
    fn test_file_line() {
        let file: NamedLogFile = "3_1700000000_7a3c62e1-5f1c-4b55-9a0a-5d7c9c0e4a11"
            .parse()
            .unwrap();
        let line = file_line(&file, Some(128), true);
        assert_eq!(line["seq"], 3);
        assert_eq!(line["size"], 128);
        assert_eq!(line["current"], true);
        assert!(line["created"].as_str().unwrap().starts_with("2023-11-14"));
    }

    #[tokio::test]
    async fn test_sink_stores_positions_and_stops_at_limit() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = FilePositionStore::open(temp.path()).await.unwrap();
        let cancel = CancellationToken::new();
        let sink = StdoutSink::new(cancel.clone())
            .with_positions(Box::new(store.clone()), "ops".to_string())
            .with_limit(Some(2));

        sink.send(response("1")).await.unwrap();
        assert!(!cancel.is_cancelled());
        sink.send(response("2")).await.unwrap();
        assert!(cancel.is_cancelled());
        assert_eq!(sink.printed(), 2);

        let stored = store.get("ops").await.unwrap().unwrap();
        assert_eq!(stored.offset, 32);
    }
}
