//! # Tunnel Eventlog
//!
//! Durable event journal for the tunnel gateway.
//!
//! Producers append typed JSON events; any number of readers tail the
//! journal from a chosen position, following new writes and file rotations
//! until cancelled.
//!
//! ## Features
//!
//! - **Record codec**: 16-byte little-endian header, JSON body, `\n` terminator
//! - **FileStorage**: `seq_timestamp_uuid` files with size/time rotation and
//!   bounded retention
//! - **EventManager**: bounded producer queue, single writer, one tailing
//!   task per subscription, draining shutdown
//! - **EventReader**: tails a directory owned by another process without
//!   taking its writer lock
//! - **fetch_events**: transport-neutral streaming adapter with type filters
//! - **FilePositionStore**: resumable reader positions
//! - **ServiceRegistry**: ordered shutdown of managed services
//!
//! ## Example
//!
//! ```rust,ignore
//! use tunnel_eventlog::{EventLogConfig, EventManager, EventType, SubscribeOptions};
//!
//! #[tokio::main]
//! async fn main() -> tunnel_eventlog::EventLogResult<()> {
//!     let manager = EventManager::new(EventLogConfig::with_directory("/var/lib/tunnel/events")).await?;
//!
//!     manager.push(EventType::PEER_ADD, 0, &serde_json::json!({"peer": "wg0"})).await?;
//!
//!     let mut sub = manager.subscribe(SubscribeOptions::from_start()).await?;
//!     if let Some(Ok(event)) = sub.next().await {
//!         println!("{} at {}", event.event_type, event.position());
//!     }
//!     sub.close().await;
//!
//!     manager.shutdown().await
//! }
//! ```

pub mod config;
pub mod control;
pub mod error;
pub mod event;
pub mod filter;
pub mod manager;
pub mod noop;
pub mod position_store;
pub mod reader;
pub mod record;
pub mod storage;
pub mod stream;
pub mod subscription;
mod tailer;
pub mod traits;

// Re-exports
pub use config::EventLogConfig;
pub use control::ServiceRegistry;
pub use error::{EventLogError, EventLogResult, RecordErrorKind};
pub use event::{Event, EventLogPosition, EventType};
pub use filter::EventTypeFilter;
pub use manager::EventManager;
pub use noop::NoopEventManager;
pub use position_store::{FilePositionStore, PositionStore, StoredPosition};
pub use reader::EventReader;
pub use storage::{
    FileStorage, LogDirectory, LogFileContents, LogFileInfo, LogSource, NamedLogFile,
    read_log_file,
};
pub use stream::{EventSink, FetchEventsRequest, FetchEventsResponse, fetch_events};
pub use subscription::{SubscribeOptions, Subscription, SubscriptionCloser};
pub use traits::{EventPusher, EventSubscriber, Service};
