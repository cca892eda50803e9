//! Collaborator-facing traits
//!
//! Other services only see the event log through these traits so they can
//! run against [`crate::NoopEventManager`] when the journal is disabled.
//!
//! - [`EventPusher`]: append events
//! - [`EventSubscriber`]: tail the journal
//! - [`Service`]: the lifecycle shared by every managed service

use async_trait::async_trait;

use crate::error::EventLogResult;
use crate::event::EventType;
use crate::subscription::{SubscribeOptions, Subscription};

/// Appends events to the journal
#[async_trait]
pub trait EventPusher: Send + Sync {
    /// Append one event; a zero timestamp means "now"
    async fn push_event(
        &self,
        event_type: EventType,
        timestamp: i64,
        value: serde_json::Value,
    ) -> EventLogResult<()>;
}

/// Opens tailing sessions on the journal
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Start a subscription as described by `options`
    async fn subscribe(&self, options: SubscribeOptions) -> EventLogResult<Subscription>;

    /// Close the subscription with the given id; unknown ids are ignored
    async fn unsubscribe(&self, subscriber_id: &str);
}

/// Lifecycle of a managed service
#[async_trait]
pub trait Service: Send + Sync {
    /// Whether the service still accepts work
    fn running(&self) -> bool;

    /// Stop the service and release its resources
    async fn shutdown(&self) -> EventLogResult<()>;
}
