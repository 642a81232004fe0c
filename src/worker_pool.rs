//! Worker Pool
//!
//! A fixed number of tokio workers pull labeling jobs from one shared queue
//! (timeout-poll), run each through [`Orchestrator::process_file`] to
//! completion, and report back through a per-job handle.

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::orchestrator::Orchestrator;

/// Job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

/// Pool errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PoolError {
    #[error("Worker pool is stopped")]
    Stopped,
    #[error("Task {0} was cancelled")]
    Cancelled(String),
    #[error("Task {0} was dropped before completion")]
    Dropped(String),
}

/// Worker pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_workers: usize,
    /// How long a worker waits on the queue before re-checking shutdown
    pub poll_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl PoolConfig {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            max_workers: config.max_workers.max(1),
            ..Default::default()
        }
    }
}

struct Job {
    id: String,
    file_path: PathBuf,
    output_dir: Option<PathBuf>,
    reply: oneshot::Sender<Value>,
}

/// Handle to a submitted job
pub struct TaskHandle {
    pub id: String,
    rx: oneshot::Receiver<Value>,
    statuses: Arc<RwLock<HashMap<String, TaskStatus>>>,
}

impl TaskHandle {
    /// Wait for the job's result
    pub async fn wait(self) -> Result<Value, PoolError> {
        match self.rx.await {
            Ok(result) => Ok(result),
            Err(_) => {
                let status = self.statuses.read().get(&self.id).copied();
                match status {
                    Some(TaskStatus::Cancelled) => Err(PoolError::Cancelled(self.id)),
                    _ => Err(PoolError::Dropped(self.id)),
                }
            }
        }
    }
}

type SharedQueue = Arc<Mutex<mpsc::UnboundedReceiver<Job>>>;

/// Bounded pool of labeling workers
pub struct WorkerPool {
    config: PoolConfig,
    orchestrator: Arc<Orchestrator>,
    sender: mpsc::UnboundedSender<Job>,
    queue: SharedQueue,
    statuses: Arc<RwLock<HashMap<String, TaskStatus>>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    workers: Vec<JoinHandle<()>>,
    stopped: AtomicBool,
}

impl WorkerPool {
    pub fn new(config: PoolConfig, orchestrator: Arc<Orchestrator>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            config,
            orchestrator,
            sender,
            queue: Arc::new(Mutex::new(receiver)),
            statuses: Arc::new(RwLock::new(HashMap::new())),
            shutdown_tx: None,
            workers: Vec::new(),
            stopped: AtomicBool::new(false),
        }
    }

    /// Spawn the workers
    pub fn start(&mut self) {
        if self.shutdown_tx.is_some() {
            return;
        }
        let (tx, rx) = watch::channel(false);
        self.shutdown_tx = Some(tx);

        for n in 0..self.config.max_workers.max(1) {
            let worker = Worker {
                name: format!("worker-{}", n),
                queue: Arc::clone(&self.queue),
                statuses: Arc::clone(&self.statuses),
                orchestrator: Arc::clone(&self.orchestrator),
                poll_interval: self.config.poll_interval,
                shutdown: rx.clone(),
            };
            self.workers.push(tokio::spawn(worker.run()));
        }

        info!("Worker pool started with {} workers", self.workers.len());
    }

    /// Signal shutdown and join the workers. In-flight jobs finish first;
    /// jobs still queued are cancelled and their handles resolve with
    /// [`PoolError::Cancelled`].
    pub async fn stop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        for handle in self.workers.drain(..) {
            if let Err(e) = handle.await {
                warn!("Worker terminated abnormally: {}", e);
            }
        }

        let mut queue = self.queue.lock().await;
        queue.close();
        let mut cancelled = 0usize;
        while let Ok(job) = queue.try_recv() {
            self.statuses.write().insert(job.id.clone(), TaskStatus::Cancelled);
            cancelled += 1;
            // Dropping the job drops its reply sender
            drop(job);
        }
        if cancelled > 0 {
            info!("Cancelled {} queued tasks on shutdown", cancelled);
        }
        info!("Worker pool stopped");
    }

    /// Queue a file for labeling
    pub fn submit(&self, file_path: impl Into<PathBuf>, output_dir: Option<PathBuf>) -> Result<TaskHandle, PoolError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(PoolError::Stopped);
        }

        let id = Uuid::new_v4().to_string();
        let (reply, rx) = oneshot::channel();
        self.statuses.write().insert(id.clone(), TaskStatus::Pending);

        let job = Job {
            id: id.clone(),
            file_path: file_path.into(),
            output_dir,
            reply,
        };
        if self.sender.send(job).is_err() {
            self.statuses.write().remove(&id);
            return Err(PoolError::Stopped);
        }

        debug!("Submitted task {}", id);
        Ok(TaskHandle {
            id,
            rx,
            statuses: Arc::clone(&self.statuses),
        })
    }

    /// Cancel a pending task. Returns false once a worker has picked it up.
    pub fn cancel(&self, task_id: &str) -> bool {
        let mut statuses = self.statuses.write();
        match statuses.get_mut(task_id) {
            Some(status) if *status == TaskStatus::Pending => {
                *status = TaskStatus::Cancelled;
                info!("Cancelled task {}", task_id);
                true
            }
            _ => false,
        }
    }

    pub fn status(&self, task_id: &str) -> Option<TaskStatus> {
        self.statuses.read().get(task_id).copied()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

struct Worker {
    name: String,
    queue: SharedQueue,
    statuses: Arc<RwLock<HashMap<String, TaskStatus>>>,
    orchestrator: Arc<Orchestrator>,
    poll_interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    async fn run(self) {
        debug!("{} started", self.name);
        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let next = {
                let mut queue = self.queue.lock().await;
                tokio::time::timeout(self.poll_interval, queue.recv()).await
            };

            match next {
                Ok(Some(job)) => self.handle(job).await,
                Ok(None) => break,
                Err(_) => continue,
            }
        }
        debug!("{} stopped", self.name);
    }

    async fn handle(&self, job: Job) {
        {
            let mut statuses = self.statuses.write();
            if statuses.get(&job.id) == Some(&TaskStatus::Cancelled) {
                debug!("{} skipping cancelled task {}", self.name, job.id);
                return;
            }
            statuses.insert(job.id.clone(), TaskStatus::Processing);
        }

        info!("{} processing {}", self.name, job.file_path.display());
        let result = self
            .orchestrator
            .process_file(&job.file_path, job.output_dir.as_deref())
            .await;

        let success = result
            .get("success")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let status = if success {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        self.statuses.write().insert(job.id.clone(), status);

        if job.reply.send(result).is_err() {
            debug!("Result for task {} had no receiver", job.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::experience::ExperienceDatabase;

    fn orchestrator(dir: &std::path::Path) -> Arc<Orchestrator> {
        let config = Config {
            output_dir: dir.join("out"),
            ..Config::default()
        };
        Arc::new(
            Orchestrator::builder(config)
                .experience(Arc::new(ExperienceDatabase::in_memory()))
                .build(),
        )
    }

    fn fast() -> PoolConfig {
        PoolConfig {
            max_workers: 2,
            poll_interval: Duration::from_millis(20),
        }
    }

    #[tokio::test]
    async fn test_submit_and_wait() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "hello from the worker pool").unwrap();

        let mut pool = WorkerPool::new(fast(), orchestrator(dir.path()));
        pool.start();
        assert_eq!(pool.worker_count(), 2);

        let handle = pool.submit(&file, None).unwrap();
        let id = handle.id.clone();
        let result = handle.wait().await.unwrap();
        assert_eq!(result["success"], true);
        assert_eq!(pool.status(&id), Some(TaskStatus::Completed));

        pool.stop().await;
        assert!(matches!(pool.submit(&file, None), Err(PoolError::Stopped)));
    }

    #[tokio::test]
    async fn test_failed_task_status() {
        let dir = tempfile::tempdir().unwrap();
        // Output directory below a regular file cannot be created
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, "not a directory").unwrap();
        let file = dir.path().join("b.txt");
        std::fs::write(&file, "text").unwrap();

        let mut pool = WorkerPool::new(fast(), orchestrator(dir.path()));
        pool.start();
        let handle = pool.submit(&file, Some(blocker.join("out"))).unwrap();
        let id = handle.id.clone();
        let result = handle.wait().await.unwrap();

        assert_eq!(result["success"], false);
        assert_eq!(pool.status(&id), Some(TaskStatus::Failed));
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_stop_cancels_queued_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = WorkerPool::new(fast(), orchestrator(dir.path()));

        // Never started, so nothing picks the job up before shutdown
        let handle = pool.submit(dir.path().join("queued.txt"), None).unwrap();
        let id = handle.id.clone();
        pool.stop().await;

        assert_eq!(pool.status(&id), Some(TaskStatus::Cancelled));
        let waited = tokio::time::timeout(Duration::from_secs(2), handle.wait())
            .await
            .expect("wait() hung after stop");
        assert_eq!(waited, Err(PoolError::Cancelled(id)));
    }

    #[tokio::test]
    async fn test_stop_after_start_resolves_every_handle() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("d.txt");
        std::fs::write(&file, "pool shutdown").unwrap();

        let mut pool = WorkerPool::new(fast(), orchestrator(dir.path()));
        pool.start();
        let handles: Vec<TaskHandle> = (0..6).map(|_| pool.submit(&file, None).unwrap()).collect();
        pool.stop().await;

        for handle in handles {
            let id = handle.id.clone();
            let waited = tokio::time::timeout(Duration::from_secs(2), handle.wait())
                .await
                .expect("wait() hung after stop");
            match waited {
                Ok(result) => {
                    assert!(result.get("success").is_some());
                    assert_ne!(pool.status(&id), Some(TaskStatus::Pending));
                }
                Err(e) => assert_eq!(e, PoolError::Cancelled(id)),
            }
        }
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let pool = WorkerPool::new(fast(), orchestrator(dir.path()));

        // Not started: the job stays pending
        let handle = pool.submit(dir.path().join("c.txt"), None).unwrap();
        assert!(pool.cancel(&handle.id));
        assert!(!pool.cancel(&handle.id));
        assert_eq!(pool.status(&handle.id), Some(TaskStatus::Cancelled));

        let mut pool = pool;
        pool.start();
        let err = handle.wait().await.unwrap_err();
        assert!(matches!(err, PoolError::Cancelled(_)));
        pool.stop().await;
    }
}
