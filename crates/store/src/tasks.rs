// Best-effort side effects: view counts, key touches, placeholder pages,
// similarity edges and render cache fills.
//
// Tasks may be dropped under load. `dispatch` never blocks and never fails
// the caller; a full queue drops the task with a warning, and a failing task
// is logged and not retried.

use std::sync::Arc;

use folio_common::PageId;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::error::StoreResult;
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    RecordView(PageId),
    TouchKeys(Vec<String>),
    PrecreatePage { domain: String, slug: String },
    RecomputeSimilar(PageId),
    CacheRender { key: String, payload: Vec<u8> },
}

impl Task {
    pub fn kind(&self) -> &'static str {
        match self {
            Task::RecordView(_) => "record_view",
            Task::TouchKeys(_) => "touch_keys",
            Task::PrecreatePage { .. } => "precreate_page",
            Task::RecomputeSimilar(_) => "recompute_similar",
            Task::CacheRender { .. } => "cache_render",
        }
    }

    /// Run against `store` on the calling thread.
    pub fn run(&self, store: &Store) -> StoreResult<()> {
        match self {
            Task::RecordView(id) => {
                store.try_record_view(id)?;
            }
            Task::TouchKeys(keys) => {
                store.try_touch_session_keys(keys)?;
            }
            Task::PrecreatePage { domain, slug } => {
                store.create_page(domain, slug)?;
            }
            Task::RecomputeSimilar(id) => {
                store.recompute_similar(id)?;
            }
            Task::CacheRender { key, payload } => store.set_cached_render(key, payload)?,
        }
        Ok(())
    }
}

/// Cloneable sending side.
#[derive(Debug, Clone)]
pub struct TaskQueue {
    tx: mpsc::Sender<Task>,
}

impl TaskQueue {
    pub fn new(capacity: usize) -> (Self, TaskWorker) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, TaskWorker { rx })
    }

    /// Enqueue `task`. Returns `false` if it was dropped.
    pub fn dispatch(&self, task: Task) -> bool {
        match self.tx.try_send(task) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(task)) => {
                warn!(kind = task.kind(), "task queue full, dropping task");
                false
            }
            Err(mpsc::error::TrySendError::Closed(task)) => {
                debug!(kind = task.kind(), "task worker stopped, dropping task");
                false
            }
        }
    }
}

pub struct TaskWorker {
    rx: mpsc::Receiver<Task>,
}

impl TaskWorker {
    /// Run queued tasks one at a time on the blocking pool until every
    /// [`TaskQueue`] is dropped or `shutdown` fires. Returns the number of
    /// tasks that ran successfully.
    pub async fn run(mut self, store: Arc<Store>, mut shutdown: broadcast::Receiver<()>) -> usize {
        info!("task worker started");
        let mut completed = 0;

        loop {
            let task = tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    info!("task worker shutting down");
                    break;
                }

                maybe_task = self.rx.recv() => match maybe_task {
                    Some(task) => task,
                    None => {
                        debug!("task queue closed, worker exiting");
                        break;
                    }
                },
            };

            let kind = task.kind();
            let store = Arc::clone(&store);
            match tokio::task::spawn_blocking(move || task.run(&store)).await {
                Ok(Ok(())) => completed += 1,
                Ok(Err(error)) => warn!(kind, ?error, "background task failed"),
                Err(error) => warn!(kind, ?error, "background task panicked"),
            }
        }

        completed
    }
}
