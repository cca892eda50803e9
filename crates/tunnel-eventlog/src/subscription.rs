//! Subscription handles
//!
//! A subscription is one consumer's tailing session: a bounded queue of
//! events, a single-shot channel for the error that ended it, and a closer
//! that cancels the tailing task and waits for it to exit.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::{EventLogError, EventLogResult};
use crate::event::{Event, EventLogPosition};

/// Where and how a subscription starts reading
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Stable id for this consumer; generated when empty
    pub subscriber_id: String,
    /// Start position; an empty log id means the earliest retained log
    pub position: EventLogPosition,
    /// Free-form labels, only used for diagnostics
    pub labels: HashMap<String, String>,
    /// Ignore `position` and start at the beginning of the current log
    pub active_log: bool,
    /// Do not deliver the record found at `position`
    pub skip_event_at_position: bool,
}

impl SubscribeOptions {
    /// Read everything from the earliest retained log
    pub fn from_start() -> Self {
        Self::default()
    }

    /// Read from the given position
    pub fn from_position(position: EventLogPosition) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    /// Resume after an already handled event
    pub fn after(position: EventLogPosition) -> Self {
        Self {
            position,
            skip_event_at_position: true,
            ..Default::default()
        }
    }

    /// Only follow what is written from now on (start of the current log)
    pub fn active() -> Self {
        Self {
            active_log: true,
            ..Default::default()
        }
    }

    pub fn with_subscriber_id(mut self, id: impl Into<String>) -> Self {
        self.subscriber_id = id.into();
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Check the position rules; skipped when following the active log
    pub fn validate(&self) -> EventLogResult<()> {
        if self.active_log {
            return Ok(());
        }
        self.position.validate()
    }
}

/// Cancels a subscription and waits for its tailing task
#[derive(Debug, Clone)]
pub struct SubscriptionCloser {
    pub(crate) serial: u64,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl SubscriptionCloser {
    pub(crate) fn new(serial: u64) -> Self {
        Self {
            serial,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    /// Signal cancellation without waiting
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether cancellation has been signalled
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Signal cancellation and wait until the tailing task has exited
    pub async fn close(&self) {
        self.cancel.cancel();
        self.tracker.wait().await;
    }
}

/// A live tailing session
///
/// Events arrive in file order. Once the tailing task stops, the events
/// queue is closed and exactly one terminal error is available.
#[derive(Debug)]
pub struct Subscription {
    id: String,
    events: mpsc::Receiver<Event>,
    errors: Option<oneshot::Receiver<EventLogError>>,
    closer: SubscriptionCloser,
}

impl Subscription {
    pub(crate) fn new(
        id: String,
        events: mpsc::Receiver<Event>,
        errors: oneshot::Receiver<EventLogError>,
        closer: SubscriptionCloser,
    ) -> Self {
        Self {
            id,
            events,
            errors: Some(errors),
            closer,
        }
    }

    /// Subscriber id, as given or generated
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Next event, or the terminal error once the tailer has stopped
    ///
    /// Returns `None` after the terminal error has been handed out.
    /// Cancel safe.
    pub async fn next(&mut self) -> Option<EventLogResult<Event>> {
        if let Some(event) = self.events.recv().await {
            return Some(Ok(event));
        }

        let errors = self.errors.as_mut()?;
        let result = errors.await;
        self.errors = None;
        result.ok().map(Err)
    }

    /// Raw events queue, for callers that select on both channels
    pub fn events(&mut self) -> &mut mpsc::Receiver<Event> {
        &mut self.events
    }

    /// Take the error channel, for callers that select on both channels
    pub fn take_errors(&mut self) -> Option<oneshot::Receiver<EventLogError>> {
        self.errors.take()
    }

    /// Handle that can close this subscription from elsewhere
    pub fn closer(&self) -> SubscriptionCloser {
        self.closer.clone()
    }

    /// Stop tailing and wait for the task to exit
    pub async fn close(&self) {
        self.closer.close().await;
    }
}
