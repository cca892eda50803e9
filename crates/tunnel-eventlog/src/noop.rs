//! Stand-in used when the event log is disabled

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::trace;

use crate::error::{EventLogError, EventLogResult};
use crate::event::EventType;
use crate::subscription::{SubscribeOptions, Subscription};
use crate::traits::{EventPusher, EventSubscriber, Service};

/// Accepts and discards every event; cannot be subscribed to
#[derive(Debug)]
pub struct NoopEventManager {
    running: AtomicBool,
}

impl Default for NoopEventManager {
    fn default() -> Self {
        Self {
            running: AtomicBool::new(true),
        }
    }
}

impl NoopEventManager {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventPusher for NoopEventManager {
    async fn push_event(
        &self,
        event_type: EventType,
        _timestamp: i64,
        _value: serde_json::Value,
    ) -> EventLogResult<()> {
        trace!(event_type = %event_type, "Event log disabled, dropping event");
        Ok(())
    }
}

#[async_trait]
impl EventSubscriber for NoopEventManager {
    async fn subscribe(&self, _options: SubscribeOptions) -> EventLogResult<Subscription> {
        Err(EventLogError::NotRunning)
    }

    async fn unsubscribe(&self, _subscriber_id: &str) {}
}

#[async_trait]
impl Service for NoopEventManager {
    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) -> EventLogResult<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}
