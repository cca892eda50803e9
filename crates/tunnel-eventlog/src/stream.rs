//! Streaming boundary for remote readers
//!
//! Transport-neutral shape of the "fetch events" streaming call: a request
//! naming a start position and type filter, one response per event, and a
//! sink the transport layer implements.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::error::{EventLogError, EventLogResult};
use crate::event::{Event, EventLogPosition, EventType};
use crate::filter::EventTypeFilter;
use crate::subscription::SubscribeOptions;
use crate::traits::EventSubscriber;

/// Remote request to stream events
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchEventsRequest {
    /// Start position; `None` reads from the earliest retained log
    pub position: Option<EventLogPosition>,
    /// Resume after the event at `position` instead of delivering it again
    pub skip_event_at_position: bool,
    /// Accepted types; empty means all
    pub event_types: Vec<EventType>,
    /// Stable reader id; generated when empty
    pub subscriber_id: String,
    pub labels: HashMap<String, String>,
}

impl FetchEventsRequest {
    fn subscribe_options(&self) -> SubscribeOptions {
        SubscribeOptions {
            subscriber_id: self.subscriber_id.clone(),
            position: self.position.clone().unwrap_or_default(),
            labels: self.labels.clone(),
            skip_event_at_position: self.position.is_some() && self.skip_event_at_position,
            ..Default::default()
        }
    }
}

/// One streamed event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchEventsResponse {
    pub event_type: EventType,
    pub timestamp: i64,
    pub position: EventLogPosition,
    pub data: Bytes,
}

impl From<Event> for FetchEventsResponse {
    fn from(event: Event) -> Self {
        let position = event.position();
        Self {
            event_type: event.event_type,
            timestamp: event.timestamp,
            position,
            data: event.data,
        }
    }
}

/// Destination of a streamed response, implemented by the transport
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn send(&self, response: FetchEventsResponse) -> EventLogResult<()>;
}

/// Stream matching events into `sink` until `cancel` fires or the
/// subscription fails
///
/// Returns `Ok(())` on cancellation. A failed send is logged and the event
/// skipped.
#[instrument(skip_all, fields(position = ?request.position))]
pub async fn fetch_events(
    subscriber: &dyn EventSubscriber,
    request: FetchEventsRequest,
    sink: &dyn EventSink,
    cancel: CancellationToken,
) -> EventLogResult<()> {
    let filter = EventTypeFilter::new(request.event_types.iter().copied());
    let mut subscription = subscriber.subscribe(request.subscribe_options()).await?;
    debug!(subscriber_id = %subscription.id(), "Streaming events");

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                subscription.close().await;
                return Ok(());
            }
            next = subscription.next() => next,
        };

        match next {
            Some(Ok(event)) => {
                if !filter.matches(event.event_type) {
                    continue;
                }
                let position = event.position();
                if let Err(e) = sink.send(event.into()).await {
                    warn!(error = %e, position = %position, "Failed to send event");
                }
            }
            Some(Err(EventLogError::Cancelled)) | None => return Ok(()),
            Some(Err(e)) => return Err(e),
        }
    }
}
