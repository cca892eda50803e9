//! Read-only access to a journal written by another process
//!
//! [`EventReader`] tails a directory through [`LogDirectory`]: it never
//! opens a log for writing and never takes the writer lock, so it can run
//! next to the gateway's [`crate::EventManager`].

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{info, instrument};

use crate::config::EventLogConfig;
use crate::error::{EventLogError, EventLogResult};
use crate::storage::{LogDirectory, LogFileInfo, LogSource};
use crate::subscription::{SubscribeOptions, Subscription};
use crate::tailer::{Subscriptions, resolve_start};
use crate::traits::{EventSubscriber, Service};

struct ReaderInner {
    config: EventLogConfig,
    directory: Arc<LogDirectory>,
    running: RwLock<bool>,
    stopped: tokio::sync::Mutex<bool>,
    subscriptions: Subscriptions,
}

/// Subscriber-only view of an event log directory
#[derive(Clone)]
pub struct EventReader {
    inner: Arc<ReaderInner>,
}

impl EventReader {
    /// Open the configured directory, which must already hold a log
    #[instrument(skip(config), fields(dir = %config.directory.display()))]
    pub async fn open(config: EventLogConfig) -> EventLogResult<Self> {
        config.validate()?;
        let directory = Arc::new(LogDirectory::open(&config).await?);
        let current_log = directory.current_log().await?;
        info!(current_log = %current_log, "Event reader opened");

        Ok(Self {
            inner: Arc::new(ReaderInner {
                config,
                directory,
                running: RwLock::new(true),
                stopped: tokio::sync::Mutex::new(false),
                subscriptions: Subscriptions::new(),
            }),
        })
    }

    pub fn config(&self) -> &EventLogConfig {
        &self.inner.config
    }

    pub fn running(&self) -> bool {
        *self.inner.running.read()
    }

    /// Start tailing; same semantics as [`crate::EventManager::subscribe`]
    #[instrument(skip(self, options), fields(subscriber_id = %options.subscriber_id))]
    pub async fn subscribe(&self, options: SubscribeOptions) -> EventLogResult<Subscription> {
        options.validate()?;
        if !self.running() {
            return Err(EventLogError::NotRunning);
        }

        let (start, skip_first) = resolve_start(&*self.inner.directory, &options).await?;

        let running = self.inner.running.read();
        if !*running {
            return Err(EventLogError::NotRunning);
        }
        self.inner.subscriptions.start(
            self.inner.directory.clone(),
            &options,
            start,
            skip_first,
            self.inner.config.poll_interval,
            self.inner.config.subscriber_buffer,
        )
    }

    pub async fn unsubscribe(&self, subscriber_id: &str) {
        if self.inner.subscriptions.remove(subscriber_id).await {
            info!(subscriber_id = %subscriber_id, "Unsubscribed from event log");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscriptions.len()
    }

    /// Newest log in the directory
    pub async fn current_log(&self) -> EventLogResult<String> {
        self.inner.directory.current_log().await
    }

    /// Earliest log still addressable
    pub async fn first_log(&self) -> EventLogResult<String> {
        self.inner.directory.first_log().await
    }

    /// Addressable files after a fresh scan, oldest first
    pub async fn log_files(&self) -> EventLogResult<Vec<LogFileInfo>> {
        self.inner.directory.refresh().await?;
        Ok(self.inner.directory.log_files().await)
    }

    /// Stop every subscription; later subscribes fail with `NotRunning`
    pub async fn shutdown(&self) -> EventLogResult<()> {
        let mut stopped = self.inner.stopped.lock().await;
        if *stopped {
            return Ok(());
        }
        *stopped = true;
        *self.inner.running.write() = false;

        self.inner.subscriptions.close_all().await;
        info!("Event reader stopped");
        Ok(())
    }
}

#[async_trait]
impl EventSubscriber for EventReader {
    async fn subscribe(&self, options: SubscribeOptions) -> EventLogResult<Subscription> {
        EventReader::subscribe(self, options).await
    }

    async fn unsubscribe(&self, subscriber_id: &str) {
        EventReader::unsubscribe(self, subscriber_id).await
    }
}

#[async_trait]
impl Service for EventReader {
    fn running(&self) -> bool {
        EventReader::running(self)
    }

    async fn shutdown(&self) -> EventLogResult<()> {
        EventReader::shutdown(self).await
    }
}
