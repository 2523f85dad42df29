//! Browser pool management for concurrent Chrome instances
//!
//! A fixed pool of Chrome instances shared across capture workers, so each
//! capture reuses a warm browser instead of paying a full launch. Leases
//! hand the instance back on drop.

use crate::{create_browser_config, Config, RotatorError};
use chromiumoxide::browser::Browser;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tracing::{info, warn};

/// A single Chrome instance and its CDP event-loop task.
pub struct BrowserInstance {
    pub id: usize,
    pub browser: Arc<Mutex<Browser>>,
    handler: tokio::task::JoinHandle<()>,
}

impl BrowserInstance {
    async fn launch(config: &Config, id: usize) -> Result<Self, RotatorError> {
        let (browser, mut handler) = Browser::launch(create_browser_config(config, Some(id)))
            .await
            .map_err(|e| RotatorError::BrowserLaunchFailed(e.to_string()))?;

        // The handler implements Stream and must be polled for the browser
        // to make progress.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            id,
            browser: Arc::new(Mutex::new(browser)),
            handler: handler_task,
        })
    }

    async fn shutdown(&self) {
        let _ = self.browser.lock().await.close().await;
        self.handler.abort();
    }
}

/// Lease on a pooled browser. Returned to the pool on drop.
pub struct BrowserLease {
    pub browser: Arc<Mutex<Browser>>,
    pub instance_id: usize,
    pool: BrowserPool,
}

impl Drop for BrowserLease {
    fn drop(&mut self) {
        let pool = self.pool.clone();
        let instance_id = self.instance_id;
        tokio::spawn(async move {
            pool.return_instance(instance_id).await;
        });
    }
}

#[derive(Clone)]
pub struct BrowserPool {
    instances: Arc<Mutex<Vec<BrowserInstance>>>,
    available: Arc<Mutex<VecDeque<usize>>>,
    semaphore: Arc<Semaphore>,
}

impl BrowserPool {
    /// Launch `size` Chrome instances up front. Any launch failure tears
    /// down the instances already started and surfaces as a setup error.
    pub async fn new(config: &Config, size: usize) -> Result<Self, RotatorError> {
        let size = size.max(1);
        let mut instances = Vec::with_capacity(size);

        for id in 0..size {
            match BrowserInstance::launch(config, id).await {
                Ok(instance) => instances.push(instance),
                Err(e) => {
                    warn!("Browser instance {id} failed to launch: {e}");
                    for instance in &instances {
                        instance.shutdown().await;
                    }
                    return Err(e);
                }
            }
        }

        info!("Browser pool ready with {} instance(s)", instances.len());
        let available = (0..instances.len()).collect();
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(instances.len())),
            instances: Arc::new(Mutex::new(instances)),
            available: Arc::new(Mutex::new(available)),
        })
    }

    pub async fn acquire(&self) -> Result<BrowserLease, RotatorError> {
        let permit = self.semaphore.acquire().await?;
        // The permit guarantees a free slot; forget it and let the lease
        // drop restore it via return_instance.
        permit.forget();

        let instance_id = self
            .available
            .lock()
            .await
            .pop_front()
            .ok_or(RotatorError::BrowserUnavailable)?;

        let browser = {
            let instances = self.instances.lock().await;
            instances
                .get(instance_id)
                .map(|instance| instance.browser.clone())
                .ok_or(RotatorError::BrowserUnavailable)?
        };

        Ok(BrowserLease {
            browser,
            instance_id,
            pool: self.clone(),
        })
    }

    async fn return_instance(&self, instance_id: usize) {
        self.available.lock().await.push_back(instance_id);
        self.semaphore.add_permits(1);
    }

    pub async fn shutdown(&self) {
        info!("Shutting down browser pool");
        let instances = self.instances.lock().await;
        for instance in instances.iter() {
            instance.shutdown().await;
        }
    }
}
