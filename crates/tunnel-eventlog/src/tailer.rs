//! Tailing tasks and the registry that owns them
//!
//! Shared by [`crate::EventManager`], which tails its own storage, and
//! [`crate::EventReader`], which tails a directory another process writes.

use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{EventLogError, EventLogResult};
use crate::event::{Event, EventLogPosition};
use crate::storage::LogSource;
use crate::subscription::{SubscribeOptions, Subscription, SubscriptionCloser};

/// Where a new subscription starts, and whether it skips the first event
pub(crate) async fn resolve_start(
    source: &dyn LogSource,
    options: &SubscribeOptions,
) -> EventLogResult<(EventLogPosition, bool)> {
    let start = if options.active_log {
        EventLogPosition::start_of(source.current_log().await?)
    } else if options.position.log_id.is_empty() {
        EventLogPosition::start_of(source.first_log().await?)
    } else {
        if !source.has_log(&options.position.log_id).await? {
            return Err(EventLogError::UnknownLog(options.position.log_id.clone()));
        }
        options.position.clone()
    };
    let skip_first = options.skip_event_at_position && !options.active_log;
    Ok((start, skip_first))
}

/// Live subscriptions keyed by subscriber id
pub(crate) struct Subscriptions {
    entries: Arc<DashMap<String, SubscriptionCloser>>,
    next_serial: AtomicU64,
}

impl Subscriptions {
    pub(crate) fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            next_serial: AtomicU64::new(0),
        }
    }

    /// Register a subscription and spawn its tailer
    ///
    /// Callers hold their running lock across this call so that nothing
    /// starts after [`Subscriptions::close_all`] collected the entries.
    pub(crate) fn start(
        &self,
        source: Arc<dyn LogSource>,
        options: &SubscribeOptions,
        start: EventLogPosition,
        skip_first: bool,
        poll_interval: Duration,
        buffer: usize,
    ) -> EventLogResult<Subscription> {
        let id = if options.subscriber_id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            options.subscriber_id.clone()
        };

        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        let closer = SubscriptionCloser::new(serial);
        match self.entries.entry(id.clone()) {
            Entry::Occupied(_) => return Err(EventLogError::AlreadySubscribed(id)),
            Entry::Vacant(slot) => {
                slot.insert(closer.clone());
            }
        }

        let (events_tx, events_rx) = mpsc::channel(buffer);
        let (errors_tx, errors_rx) = oneshot::channel();
        let tailer = Tailer {
            id: id.clone(),
            source,
            start: start.clone(),
            skip_first,
            poll_interval,
            cancel: closer.token(),
            events: events_tx,
        };
        let entries = self.entries.clone();
        closer.tracker().spawn(async move {
            let Err(err) = tailer.follow().await;
            tailer.finish(err, errors_tx, &entries, serial);
        });
        closer.tracker().close();

        info!(
            subscriber_id = %id,
            log_id = %start.log_id,
            offset = start.offset,
            labels = ?options.labels,
            "Subscribed to event log"
        );

        Ok(Subscription::new(id, events_rx, errors_rx, closer))
    }

    /// Cancel one subscription and wait for its tailer to exit
    pub(crate) async fn remove(&self, subscriber_id: &str) -> bool {
        match self.entries.remove(subscriber_id) {
            Some((_, closer)) => {
                closer.close().await;
                true
            }
            None => false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Cancel every subscription and wait for all tailers
    pub(crate) async fn close_all(&self) {
        let ids: Vec<String> = self
            .entries
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for id in ids {
            if self.remove(&id).await {
                debug!(subscriber_id = %id, "Subscription stopped");
            }
        }
    }
}

/// One subscription's reading loop
struct Tailer {
    id: String,
    source: Arc<dyn LogSource>,
    start: EventLogPosition,
    skip_first: bool,
    poll_interval: Duration,
    cancel: CancellationToken,
    events: mpsc::Sender<Event>,
}

impl Tailer {
    /// Follow the journal until an error ends the subscription
    async fn follow(&self) -> Result<Infallible, EventLogError> {
        let mut log_id = self.start.log_id.clone();
        let mut offset = self.start.offset;
        let mut reader = self.source.open_for_read(&log_id, offset).await?;
        let mut skip = self.skip_first;
        let mut sealed_checked = false;

        loop {
            if self.cancel.is_cancelled() {
                return Err(EventLogError::Cancelled);
            }

            let truncated = match reader.next_record(offset).await {
                Ok(Some((event, next))) => {
                    offset = next;
                    sealed_checked = false;
                    if std::mem::take(&mut skip) {
                        debug!(subscriber_id = %self.id, offset = event.offset, "Skipping event at start position");
                        continue;
                    }
                    self.deliver(event).await?;
                    continue;
                }
                Ok(None) => None,
                Err(e) if is_truncation(&e) => Some(e),
                Err(e) => return Err(e),
            };

            let next_log = self.source.next_log(&log_id).await?;
            if next_log == log_id {
                // Caught up with the writer, possibly mid-record
                if truncated.is_some() {
                    reader.rewind(offset).await?;
                }
                self.wait().await?;
                continue;
            }

            // The file is sealed now; one more read picks up records that
            // landed between our last read and the rotation
            if !sealed_checked {
                sealed_checked = true;
                if truncated.is_some() {
                    reader.rewind(offset).await?;
                }
                continue;
            }
            if let Some(e) = truncated {
                return Err(e);
            }

            debug!(
                subscriber_id = %self.id,
                from = %log_id,
                to = %next_log,
                "Following log rotation"
            );
            log_id = next_log;
            offset = 0;
            sealed_checked = false;
            reader = self.source.open_for_read(&log_id, offset).await?;
        }
    }

    async fn deliver(&self, event: Event) -> EventLogResult<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(EventLogError::Cancelled),
            sent = self.events.send(event) => sent.map_err(|_| EventLogError::Cancelled),
        }
    }

    async fn wait(&self) -> EventLogResult<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(EventLogError::Cancelled),
            _ = self.events.closed() => Err(EventLogError::Cancelled),
            _ = tokio::time::sleep(self.poll_interval) => Ok(()),
        }
    }

    /// Publish the terminal error, then close the events queue
    fn finish(
        self,
        err: EventLogError,
        errors: oneshot::Sender<EventLogError>,
        entries: &DashMap<String, SubscriptionCloser>,
        serial: u64,
    ) {
        match &err {
            EventLogError::Cancelled => {
                debug!(subscriber_id = %self.id, "Subscription cancelled")
            }
            other => warn!(subscriber_id = %self.id, error = %other, "Subscription failed"),
        }

        let _ = errors.send(err);
        entries.remove_if(&self.id, |_, closer| closer.serial == serial);
        drop(self.events);
    }
}

fn is_truncation(err: &EventLogError) -> bool {
    matches!(err, EventLogError::MalformedRecord { kind, .. } if kind.is_truncation())
}
