// Hosts a store with its maintenance job and task worker.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::StoreConfig;
use crate::maintenance::MaintenanceJob;
use crate::store::Store;
use crate::tasks::{TaskQueue, TaskWorker};

/// Open the store described by `config`.
pub fn open_store(config: &StoreConfig) -> Result<Store> {
    let store = if config.in_memory {
        Store::open_in_memory_with_snapshot(config.resolved_snapshot_path())
            .context("failed to open in-memory store")?
    } else {
        let path = config
            .resolved_database_path()
            .ok_or_else(|| anyhow!("could not determine database path; set `database_path`"))?;
        Store::open_with_snapshot(&path, config.resolved_snapshot_path())
            .with_context(|| format!("failed to open store at `{}`", path.display()))?
    };
    Ok(store.with_settings(config.to_settings()))
}

/// Running background services. Dropping the handle signals shutdown.
pub struct ServiceHandle {
    store: Arc<Store>,
    queue: TaskQueue,
    shutdown_tx: broadcast::Sender<()>,
    maintenance: Option<JoinHandle<()>>,
    worker: Option<JoinHandle<usize>>,
}

impl ServiceHandle {
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Stop both loops, then run a final compaction so the snapshot holds
    /// everything written up to now.
    pub async fn stop(mut self) -> Result<()> {
        self.shutdown();
        if let Some(task) = self.maintenance.take() {
            let _ = task.await;
        }
        if let Some(task) = self.worker.take() {
            if let Ok(completed) = task.await {
                info!(completed, "task worker finished");
            }
        }

        let store = Arc::clone(&self.store);
        let (purged, dumped) = tokio::task::spawn_blocking(move || store.compact())
            .await
            .context("final compaction panicked")?
            .context("final compaction failed")?;
        info!(?purged, snapshot = ?dumped.map(|d| d.path), "final compaction finished");
        Ok(())
    }
}

impl Drop for ServiceHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Spawn the maintenance job and task worker for `store`.
pub fn start(store: Store, config: &StoreConfig) -> ServiceHandle {
    let store = Arc::new(store);
    let (shutdown_tx, _) = broadcast::channel(4);
    let (queue, worker): (TaskQueue, TaskWorker) = TaskQueue::new(config.tasks.queue_capacity);

    let job = MaintenanceJob::new(Arc::clone(&store), config.maintenance.clone());
    let maintenance = tokio::spawn(job.run(shutdown_tx.subscribe()));
    let worker = tokio::spawn(worker.run(Arc::clone(&store), shutdown_tx.subscribe()));

    ServiceHandle {
        store,
        queue,
        shutdown_tx,
        maintenance: Some(maintenance),
        worker: Some(worker),
    }
}

/// Run until ctrl-c.
pub async fn run_standalone(config: StoreConfig) -> Result<()> {
    let store = tokio::task::spawn_blocking({
        let config = config.clone();
        move || open_store(&config)
    })
    .await
    .context("store open panicked")??;

    let handle = start(store, &config);
    info!(snapshot = ?handle.store().snapshot_path(), "folio store running");

    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(?error, "failed to listen for ctrl-c, shutting down");
    }
    info!("shutdown requested");
    handle.stop().await
}
