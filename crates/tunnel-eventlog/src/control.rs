//! Ordered registry of managed services
//!
//! The process entry point registers services as it builds them and shuts
//! them down in reverse order on exit.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{EventLogError, EventLogResult};
use crate::traits::Service;

/// Named services in registration order
#[derive(Default)]
pub struct ServiceRegistry {
    services: Mutex<Vec<(String, Arc<dyn Service>)>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a service; names must be unique
    pub fn register(&self, name: impl Into<String>, service: Arc<dyn Service>) -> EventLogResult<()> {
        let name = name.into();
        let mut services = self.services.lock();
        if services.iter().any(|(n, _)| *n == name) {
            return Err(EventLogError::service(name, "already registered"));
        }

        info!(name = %name, "Registered service");
        services.push((name, service));
        Ok(())
    }

    /// Shut down the registered service and put `service` in its slot
    pub async fn replace(&self, name: &str, service: Arc<dyn Service>) -> EventLogResult<()> {
        let old = self
            .get(name)
            .ok_or_else(|| EventLogError::service(name, "replace: service is not registered"))?;

        old.shutdown().await.map_err(|e| {
            EventLogError::service(name, format!("replace: failed to shut down: {}", e))
        })?;

        let mut services = self.services.lock();
        if let Some(slot) = services.iter_mut().find(|(n, _)| n == name) {
            slot.1 = service;
        }
        debug!(name = %name, "Service replaced");
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Service>> {
        self.services
            .lock()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| s.clone())
    }

    /// Registered names in registration order
    pub fn names(&self) -> Vec<String> {
        self.services.lock().iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.services.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.lock().is_empty()
    }

    /// Shut everything down, newest first
    ///
    /// Stops at the first service that fails or still reports running;
    /// services not yet reached stay registered.
    pub async fn shutdown(&self) -> EventLogResult<()> {
        loop {
            let Some((name, service)) = self.services.lock().last().cloned() else {
                return Ok(());
            };

            info!(name = %name, "Shutting down service");
            service.shutdown().await.map_err(|e| {
                EventLogError::service(&name, format!("failed to shut down: {}", e))
            })?;
            if service.running() {
                return Err(EventLogError::service(&name, "still running after shutdown"));
            }

            self.services.lock().pop();
        }
    }
}
