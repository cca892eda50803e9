//! Event manager
//!
//! Owns the producer queue, the single writer task and one tailing task per
//! subscription. Everything accepted by [`EventManager::push`] is persisted
//! in call order, and shutdown drains the queue before closing storage.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::config::EventLogConfig;
use crate::error::{EventLogError, EventLogResult};
use crate::event::EventType;
use crate::record::{self, HEADER_SIZE};
use crate::storage::{FileStorage, LogFileInfo};
use crate::subscription::{SubscribeOptions, Subscription};
use crate::tailer::{Subscriptions, resolve_start};
use crate::traits::{EventPusher, EventSubscriber, Service};

/// Body of a record whose value serialized to JSON `null`
const NULL_BODY: &[u8] = b"null\n";

/// Write failures seen by the writer since the last push reported them
#[derive(Debug, Default)]
struct WriteFailures {
    state: Mutex<Option<(u64, String)>>,
}

impl WriteFailures {
    fn record(&self, reason: String) {
        let mut state = self.state.lock();
        match state.as_mut() {
            Some((dropped, last)) => {
                *dropped += 1;
                *last = reason;
            }
            None => *state = Some((1, reason)),
        }
    }

    fn take(&self) -> Option<EventLogError> {
        self.state
            .lock()
            .take()
            .map(|(dropped, reason)| EventLogError::WriteFailed { dropped, reason })
    }
}

struct ManagerInner {
    config: EventLogConfig,
    storage: Arc<FileStorage>,
    running: RwLock<bool>,
    /// Held for the whole shutdown; true once it has completed
    stopped: tokio::sync::Mutex<bool>,
    queue: mpsc::Sender<Vec<u8>>,
    writer_cancel: CancellationToken,
    writer: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    subscriptions: Subscriptions,
    failures: Arc<WriteFailures>,
}

/// Append-only event journal with live tailing
///
/// Cloning is cheap; all clones share the same journal.
#[derive(Clone)]
pub struct EventManager {
    inner: Arc<ManagerInner>,
}

impl EventManager {
    /// Restore storage from the configured directory and start the writer
    ///
    /// Only one manager may own a directory at a time; a second one fails
    /// with `DirectoryLocked` until the first has shut down.
    #[instrument(skip(config), fields(dir = %config.directory.display()))]
    pub async fn new(config: EventLogConfig) -> EventLogResult<Self> {
        config.validate()?;

        let storage = Arc::new(FileStorage::open(&config).await?);
        let (queue, rx) = mpsc::channel(config.queue_capacity);
        let writer_cancel = CancellationToken::new();
        let failures = Arc::new(WriteFailures::default());

        let writer = Writer {
            storage: storage.clone(),
            rx,
            cancel: writer_cancel.clone(),
            failures: failures.clone(),
        }
        .spawn();

        info!(
            queue_capacity = config.queue_capacity,
            max_retained_files = config.max_retained_files,
            rotation_size = config.rotation_size,
            rotation_period = ?config.rotation_period,
            "Event manager started"
        );

        Ok(Self {
            inner: Arc::new(ManagerInner {
                config,
                storage,
                running: RwLock::new(true),
                stopped: tokio::sync::Mutex::new(false),
                queue,
                writer_cancel,
                writer: tokio::sync::Mutex::new(Some(writer)),
                subscriptions: Subscriptions::new(),
                failures,
            }),
        })
    }

    /// Configuration the manager was started with
    pub fn config(&self) -> &EventLogConfig {
        &self.inner.config
    }

    /// Underlying file storage
    pub fn storage(&self) -> &Arc<FileStorage> {
        &self.inner.storage
    }

    /// Whether push and subscribe are still accepted
    pub fn running(&self) -> bool {
        *self.inner.running.read()
    }

    /// Encode an event and queue it for the writer
    ///
    /// Waits while the producer queue is full. A zero `timestamp` is
    /// replaced with the current time. Fails with `WriteFailed` (without
    /// queueing this event) if earlier events could not be persisted.
    pub async fn push<T: Serialize + ?Sized>(
        &self,
        event_type: EventType,
        timestamp: i64,
        value: &T,
    ) -> EventLogResult<()> {
        if !self.running() {
            return Err(EventLogError::NotRunning);
        }
        if let Some(err) = self.inner.failures.take() {
            return Err(err);
        }

        let timestamp = if timestamp == 0 {
            chrono::Utc::now().timestamp()
        } else {
            timestamp
        };

        let record = record::encode(event_type, timestamp, value)?;
        if &record[HEADER_SIZE..] == NULL_BODY {
            return Err(EventLogError::invalid_argument("event value is required"));
        }

        self.inner
            .queue
            .send(record)
            .await
            .map_err(|_| EventLogError::NotRunning)
    }

    /// Start tailing the journal
    ///
    /// Returns as soon as the tailing task is spawned; storage errors met
    /// while opening the start position arrive on the error channel.
    #[instrument(skip(self, options), fields(subscriber_id = %options.subscriber_id))]
    pub async fn subscribe(&self, options: SubscribeOptions) -> EventLogResult<Subscription> {
        options.validate()?;
        if !self.running() {
            return Err(EventLogError::NotRunning);
        }

        let (start, skip_first) = resolve_start(&*self.inner.storage, &options).await?;

        // Registration and the running check share the lock shutdown takes,
        // so no tailer can start after shutdown collected them
        let running = self.inner.running.read();
        if !*running {
            return Err(EventLogError::NotRunning);
        }
        self.inner.subscriptions.start(
            self.inner.storage.clone(),
            &options,
            start,
            skip_first,
            self.inner.config.poll_interval,
            self.inner.config.subscriber_buffer,
        )
    }

    /// Cancel a subscription by id and wait for its tailer to exit
    pub async fn unsubscribe(&self, subscriber_id: &str) {
        if self.inner.subscriptions.remove(subscriber_id).await {
            info!(subscriber_id = %subscriber_id, "Unsubscribed from event log");
        }
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscriptions.len()
    }

    /// Newest log id
    pub async fn current_log(&self) -> String {
        self.inner.storage.current_log().await
    }

    /// Earliest log id still retained
    pub async fn first_log(&self) -> String {
        self.inner.storage.first_log().await
    }

    /// Retained and current files, oldest first
    pub async fn log_files(&self) -> Vec<LogFileInfo> {
        self.inner.storage.log_files().await
    }

    /// Stop accepting work, persist everything queued, stop all tailers and
    /// close the current file
    ///
    /// Concurrent callers wait for the first one to finish; calling it
    /// again after it has completed is a no-op.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> EventLogResult<()> {
        let mut stopped = self.inner.stopped.lock().await;
        if *stopped {
            return Ok(());
        }
        *stopped = true;
        *self.inner.running.write() = false;

        // The writer drains the queue before it exits
        self.inner.writer_cancel.cancel();
        if let Some(handle) = self.inner.writer.lock().await.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "Event writer task failed");
            }
        }

        self.inner.subscriptions.close_all().await;

        self.inner.storage.close().await?;
        info!("Event manager stopped");
        Ok(())
    }
}

#[async_trait]
impl EventPusher for EventManager {
    async fn push_event(
        &self,
        event_type: EventType,
        timestamp: i64,
        value: serde_json::Value,
    ) -> EventLogResult<()> {
        self.push(event_type, timestamp, &value).await
    }
}

#[async_trait]
impl EventSubscriber for EventManager {
    async fn subscribe(&self, options: SubscribeOptions) -> EventLogResult<Subscription> {
        EventManager::subscribe(self, options).await
    }

    async fn unsubscribe(&self, subscriber_id: &str) {
        EventManager::unsubscribe(self, subscriber_id).await
    }
}

#[async_trait]
impl Service for EventManager {
    fn running(&self) -> bool {
        EventManager::running(self)
    }

    async fn shutdown(&self) -> EventLogResult<()> {
        EventManager::shutdown(self).await
    }
}

/// Single consumer of the producer queue
struct Writer {
    storage: Arc<FileStorage>,
    rx: mpsc::Receiver<Vec<u8>>,
    cancel: CancellationToken,
    failures: Arc<WriteFailures>,
}

impl Writer {
    fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                item = self.rx.recv() => match item {
                    Some(record) => self.write(&record).await,
                    None => break,
                },
            }
        }

        // Refuse new pushes, then persist what was already accepted; recv
        // only yields None once senders holding a permit have finished
        self.rx.close();
        let mut drained = 0usize;
        while let Some(record) = self.rx.recv().await {
            self.write(&record).await;
            drained += 1;
        }

        info!(drained = drained, "Event writer stopped");
    }

    async fn write(&self, record: &[u8]) {
        if let Err(e) = self.storage.write(record).await {
            error!(error = %e, len = record.len(), "Failed to persist event");
            self.failures.record(e.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventLogPosition;
    use crate::storage::read_log_file;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;
    use uuid::Uuid;

    async fn manager(temp: &TempDir) -> EventManager {
        EventManager::new(EventLogConfig::with_directory(temp.path()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_push_rejects_null() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp).await;

        let err = manager
            .push(EventType::PEER_ADD, 0, &serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, EventLogError::InvalidArgument(_)));

        let none: Option<u32> = None;
        assert!(manager.push(EventType::PEER_ADD, 0, &none).await.is_err());

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_push_after_shutdown() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp).await;
        assert!(manager.running());

        manager.shutdown().await.unwrap();
        assert!(!manager.running());

        let err = manager.push(EventType::PEER_ADD, 1, "x").await.unwrap_err();
        assert!(matches!(err, EventLogError::NotRunning));
        let err = manager
            .subscribe(SubscribeOptions::from_start())
            .await
            .unwrap_err();
        assert!(matches!(err, EventLogError::NotRunning));

        // Second shutdown is a no-op
        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_shutdown_waits_for_drain() {
        let temp = TempDir::new().unwrap();
        let manager = EventManager::new(
            EventLogConfig::with_directory(temp.path()).with_queue_capacity(1000),
        )
        .await
        .unwrap();
        let count = 500;
        for i in 0..count {
            manager.push(EventType::PEER_TRAFFIC, 1, &i).await.unwrap();
        }

        let first = tokio::spawn({
            let manager = manager.clone();
            async move { manager.shutdown().await }
        });
        tokio::task::yield_now().await;

        // Returns only once the queue is on disk
        manager.shutdown().await.unwrap();
        let info = manager.log_files().await.pop().unwrap();
        let contents = read_log_file(&info.path, info.file.log_id()).unwrap();
        assert_eq!(contents.events.len(), count);

        first.await.unwrap().unwrap();
        assert!(!manager.running());
    }

    #[tokio::test]
    async fn test_zero_timestamp_defaults_to_now() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp).await;
        let before = chrono::Utc::now().timestamp();

        manager.push(EventType::PEER_UPDATE, 0, &json!({"a": 1})).await.unwrap();
        let mut sub = manager.subscribe(SubscribeOptions::from_start()).await.unwrap();
        let event = sub.next().await.unwrap().unwrap();
        assert!(event.timestamp >= before);
        assert_eq!(event.event_type, EventType::PEER_UPDATE);

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_subscribe_validation() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp).await;

        let cases = [
            EventLogPosition::new("", -1),
            EventLogPosition::new("", 10),
            EventLogPosition::new("not-a-uuid", 0),
        ];
        for position in cases {
            let err = manager
                .subscribe(SubscribeOptions::from_position(position))
                .await
                .unwrap_err();
            assert!(matches!(err, EventLogError::InvalidArgument(_)));
        }

        let err = manager
            .subscribe(SubscribeOptions::from_position(EventLogPosition::start_of(
                Uuid::new_v4().to_string(),
            )))
            .await
            .unwrap_err();
        assert!(matches!(err, EventLogError::UnknownLog(_)));

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_seek_past_end_is_reported_on_error_channel() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp).await;
        let log_id = manager.current_log().await;

        let mut sub = manager
            .subscribe(SubscribeOptions::from_position(EventLogPosition::new(
                log_id, 4096,
            )))
            .await
            .unwrap();
        assert!(matches!(
            sub.next().await,
            Some(Err(EventLogError::SeekFailed { .. }))
        ));

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_subscriber_and_unsubscribe() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp).await;

        let mut sub = manager
            .subscribe(SubscribeOptions::from_start().with_subscriber_id("admin"))
            .await
            .unwrap();
        assert_eq!(sub.id(), "admin");
        assert_eq!(manager.subscriber_count(), 1);

        let err = manager
            .subscribe(SubscribeOptions::from_start().with_subscriber_id("admin"))
            .await
            .unwrap_err();
        assert!(matches!(err, EventLogError::AlreadySubscribed(_)));

        manager.unsubscribe("admin").await;
        assert_eq!(manager.subscriber_count(), 0);
        assert!(matches!(sub.next().await, Some(Err(EventLogError::Cancelled))));

        // The id can be reused once the old subscription is gone
        let sub = manager
            .subscribe(SubscribeOptions::from_start().with_subscriber_id("admin"))
            .await
            .unwrap();
        sub.close().await;

        manager.unsubscribe("nobody").await;
        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_skip_event_at_position() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp).await;

        for i in 0..3 {
            manager.push(EventType::PEER_TRAFFIC, 1, &i).await.unwrap();
        }

        let mut sub = manager.subscribe(SubscribeOptions::from_start()).await.unwrap();
        let first = sub.next().await.unwrap().unwrap();
        let second = sub.next().await.unwrap().unwrap();
        sub.close().await;

        let mut resumed = manager
            .subscribe(SubscribeOptions::after(first.position()))
            .await
            .unwrap();
        let event = resumed.next().await.unwrap().unwrap();
        assert_eq!(event.offset, second.offset);
        assert_eq!(event.decode_data::<i32>().unwrap(), 1);

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_write_failure_surfaces_on_next_push() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp).await;

        // Closing storage underneath the writer makes every write fail
        manager.storage().close().await.unwrap();

        let mut surfaced = None;
        for _ in 0..100 {
            match manager.push(EventType::PEER_ADD, 1, "lost").await {
                Ok(()) => tokio::time::sleep(Duration::from_millis(10)).await,
                Err(e) => {
                    surfaced = Some(e);
                    break;
                }
            }
        }

        match surfaced {
            Some(EventLogError::WriteFailed { dropped, .. }) => assert!(dropped >= 1),
            other => panic!("expected WriteFailed, got {other:?}"),
        }

        manager.shutdown().await.unwrap();
    }
}
