//! Worker pool that executes queued tasks.
//!
//! The pool runs `worker_count` serial loops. Each loop asks the concurrency
//! gate for a credential it may service, dequeues one task for it, runs the
//! task to completion, records the terminal status, and polls again. Idle
//! loops sleep until a task is created in-process or the poll interval
//! elapses.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::sync::{broadcast, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use reviewq_core::{
    defaults, event_types, EventBroker, ReviewTargetStatus, Result, Task, TaskType,
};
use reviewq_db::log_pool_metrics;

use crate::config::{env_or, GateConfig};
use crate::gate::{ConcurrencyGate, GatePermit};
use crate::handler::{TaskContext, TaskHandler, TaskResult};
use crate::queue::TaskQueue;
use crate::stores::Stores;

/// Capacity of the worker event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Whether to process tasks at all.
    pub enabled: bool,
    /// Number of serial worker loops.
    pub worker_count: usize,
    /// Polling interval in milliseconds when the queue looks empty.
    pub poll_interval_ms: u64,
    /// Running time after which a task is logged as slow. Tasks are never
    /// interrupted.
    pub slow_task_warn_secs: u64,
    /// Interval between cleanup sweeps.
    pub cleanup_interval_secs: u64,
    /// Fairness limits.
    pub gate: GateConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            worker_count: defaults::WORKER_COUNT,
            poll_interval_ms: defaults::WORKER_POLL_INTERVAL_MS,
            slow_task_warn_secs: defaults::SLOW_TASK_WARN_SECS,
            cleanup_interval_secs: defaults::CLEANUP_INTERVAL_SECS,
            gate: GateConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `WORKER_ENABLED` | `true` | Enable/disable task processing |
    /// | `WORKER_COUNT` | `4` | Serial worker loops |
    /// | `WORKER_POLL_INTERVAL_MS` | `2000` | Polling interval when idle |
    /// | `WORKER_SLOW_TASK_WARN_SECS` | `1800` | Warn when a task runs longer |
    ///
    /// Gate limits are read by [`GateConfig::from_env`].
    pub fn from_env() -> Self {
        let enabled = std::env::var("WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        Self {
            enabled,
            worker_count: env_or("WORKER_COUNT", defaults::WORKER_COUNT).max(1),
            poll_interval_ms: env_or("WORKER_POLL_INTERVAL_MS", defaults::WORKER_POLL_INTERVAL_MS),
            slow_task_warn_secs: env_or("WORKER_SLOW_TASK_WARN_SECS", defaults::SLOW_TASK_WARN_SECS)
                .max(1),
            cleanup_interval_secs: defaults::CLEANUP_INTERVAL_SECS,
            gate: GateConfig::from_env(),
        }
    }

    /// Set the polling interval.
    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Set the number of worker loops.
    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    /// Set the slow-task warning threshold.
    pub fn with_slow_task_warning(mut self, secs: u64) -> Self {
        self.slow_task_warn_secs = secs;
        self
    }

    /// Set the cleanup sweep interval.
    pub fn with_cleanup_interval(mut self, secs: u64) -> Self {
        self.cleanup_interval_secs = secs;
        self
    }

    /// Set the gate limits.
    pub fn with_gate(mut self, gate: GateConfig) -> Self {
        self.gate = gate;
        self
    }

    /// Enable or disable task processing.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Event emitted by the worker pool.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// A task was dequeued and started.
    TaskStarted {
        task_id: Uuid,
        task_type: TaskType,
        worker: usize,
    },
    /// A handler reported progress.
    TaskProgress {
        task_id: Uuid,
        percent: i32,
        message: Option<String>,
    },
    /// A task completed.
    TaskCompleted { task_id: Uuid, task_type: TaskType },
    /// A task failed.
    TaskFailed {
        task_id: Uuid,
        task_type: TaskType,
        error: String,
    },
    /// A task passed the slow-task threshold and is still running.
    TaskSlow { task_id: Uuid, running_secs: u64 },
    /// The cleanup sweeper removed finished tasks.
    CleanupCompleted { removed: usize },
    /// A worker loop started.
    WorkerStarted { worker: usize },
    /// A worker loop stopped.
    WorkerStopped { worker: usize },
}

/// Handle for controlling a running pool.
pub struct WorkerHandle {
    shutdown_tx: watch::Sender<bool>,
    event_rx: broadcast::Receiver<WorkerEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Signal every loop to stop after its current task.
    pub fn shutdown(&self) -> Result<()> {
        // Stored even when every loop has already exited.
        self.shutdown_tx.send_replace(true);
        Ok(())
    }

    /// Signal shutdown and wait for every loop to finish.
    pub async fn shutdown_and_wait(self) -> Result<()> {
        self.shutdown_tx.send_replace(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = ?e, "Worker loop panicked");
            }
        }
        Ok(())
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

type HandlerMap = Arc<RwLock<HashMap<TaskType, Arc<dyn TaskHandler>>>>;

/// Pool of serial worker loops sharing one gate and one handler registry.
pub struct WorkerPool {
    stores: Stores,
    broker: Arc<dyn EventBroker>,
    queue: Arc<TaskQueue>,
    config: WorkerConfig,
    gate: ConcurrencyGate,
    handlers: HandlerMap,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl WorkerPool {
    /// Create a new pool.
    pub fn new(
        stores: Stores,
        broker: Arc<dyn EventBroker>,
        queue: Arc<TaskQueue>,
        config: WorkerConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            gate: ConcurrencyGate::new(config.gate.clone()),
            stores,
            broker,
            queue,
            config,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
        }
    }

    /// Register a handler for a task type.
    pub async fn register_handler<H: TaskHandler + 'static>(&self, handler: H) {
        let task_type = handler.task_type();
        let mut handlers = self.handlers.write().await;
        handlers.insert(task_type, Arc::new(handler));
        debug!(%task_type, "Registered task handler");
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Spawn the worker loops and the cleanup sweeper.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let event_rx = self.event_tx.subscribe();
        let mut tasks = Vec::new();

        if !self.config.enabled {
            info!(subsystem = "jobs", component = "worker", "Worker pool is disabled, not starting");
            return WorkerHandle {
                shutdown_tx,
                event_rx,
                tasks,
            };
        }

        info!(
            subsystem = "jobs",
            component = "worker",
            worker_count = self.config.worker_count,
            poll_interval_ms = self.config.poll_interval_ms,
            max_parallel_credentials = self.config.gate.max_parallel_credentials,
            max_tasks_per_credential = self.config.gate.max_tasks_per_credential,
            "Worker pool started"
        );

        let pool = Arc::new(self);
        for worker in 0..pool.config.worker_count.max(1) {
            let pool = pool.clone();
            let mut shutdown_rx = shutdown_rx.clone();
            tasks.push(tokio::spawn(async move {
                pool.run(worker, &mut shutdown_rx).await;
            }));
        }

        let sweeper = pool.clone();
        let mut sweeper_rx = shutdown_rx;
        tasks.push(tokio::spawn(async move {
            sweeper.sweep(&mut sweeper_rx).await;
        }));

        WorkerHandle {
            shutdown_tx,
            event_rx,
            tasks,
        }
    }

    /// One serial loop: claim, execute, repeat; wait when idle.
    #[instrument(skip(self, shutdown_rx), fields(subsystem = "jobs", component = "worker"))]
    async fn run(&self, worker: usize, shutdown_rx: &mut watch::Receiver<bool>) {
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted { worker });
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let notify = self.stores.task_notify.clone();

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            match self.claim().await {
                Some((task, permit)) => {
                    self.execute(worker, task).await;
                    drop(permit);
                    // No sleep: immediately look for more work.
                }
                None => {
                    tokio::select! {
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                        _ = notify.notified() => {}
                        _ = sleep(poll_interval) => {}
                    }
                }
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped { worker });
        info!(worker, "Worker loop stopped");
    }

    /// Pick the next credential in round-robin order that the gate admits and
    /// dequeue one of its tasks.
    async fn claim(&self) -> Option<(Task, GatePermit)> {
        let candidates = match self.gate.candidates(self.stores.tasks.as_ref()).await {
            Ok(c) => c,
            Err(e) => {
                error!(error = %e, "Failed to list queued credentials");
                return None;
            }
        };

        for hash in candidates {
            let Some(permit) = self.gate.try_acquire(&hash) else {
                continue;
            };
            match self.stores.tasks.dequeue_next(&hash).await {
                Ok(Some(task)) => return Some((task, permit)),
                // Another process took the last row.
                Ok(None) => continue,
                Err(e) => {
                    error!(error = %e, credential_hash = hash.short(), "Failed to dequeue task");
                    continue;
                }
            }
        }
        None
    }

    /// Execute a claimed task and record its terminal status.
    async fn execute(&self, worker: usize, task: Task) {
        let start = Instant::now();
        let task_id = task.id;
        let task_type = task.task_type;
        let user_id = task.user_id.clone();
        let target_id = task.target_id;

        info!(
            %task_id,
            %task_type,
            credential_hash = task.credential_hash.short(),
            worker,
            "Processing task"
        );
        let _ = self.event_tx.send(WorkerEvent::TaskStarted {
            task_id,
            task_type,
            worker,
        });
        self.broker.publish(
            &user_id,
            event_types::TASK_STARTED,
            json!({ "task_id": task_id, "task_type": task_type, "target_id": target_id }),
        );

        let handler = {
            let handlers = self.handlers.read().await;
            handlers.get(&task_type).cloned()
        };

        let result = match handler {
            Some(handler) => self.run_handler(handler, task.clone()).await,
            None => {
                warn!(%task_type, "No handler registered for task type");
                TaskResult::Failed(format!("No handler for task type: {task_type}"))
            }
        };

        match result {
            TaskResult::Success(output) => {
                if let Err(e) = self.stores.tasks.complete(task_id).await {
                    error!(error = %e, %task_id, "Failed to mark task as completed");
                    return;
                }
                info!(
                    %task_id,
                    %task_type,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Task completed"
                );
                let _ = self
                    .event_tx
                    .send(WorkerEvent::TaskCompleted { task_id, task_type });
                self.broker.publish(
                    &user_id,
                    event_types::TASK_COMPLETED,
                    json!({
                        "task_id": task_id,
                        "task_type": task_type,
                        "target_id": target_id,
                        "result": output,
                    }),
                );
            }
            TaskResult::Failed(error) => {
                if let Err(e) = self.stores.tasks.fail(task_id, &error).await {
                    error!(error = %e, %task_id, "Failed to mark task as failed");
                    return;
                }
                warn!(
                    %task_id,
                    %task_type,
                    %error,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Task failed"
                );
                self.broker.publish(
                    &user_id,
                    event_types::TASK_FAILED,
                    json!({
                        "task_id": task_id,
                        "task_type": task_type,
                        "target_id": target_id,
                        "error": error,
                    }),
                );
                let _ = self.event_tx.send(WorkerEvent::TaskFailed {
                    task_id,
                    task_type,
                    error,
                });
            }
        }
    }

    /// Run the handler on its own task so a panic cannot take the loop down.
    /// A slow handler is reported once and then awaited to its end; the owner
    /// is annotated only when the handler panicked.
    async fn run_handler(&self, handler: Arc<dyn TaskHandler>, task: Task) -> TaskResult {
        let task_id = task.id;
        let event_tx = self.event_tx.clone();
        let ctx = TaskContext::new(task.clone()).with_progress_callback(move |percent, message| {
            let _ = event_tx.send(WorkerEvent::TaskProgress {
                task_id,
                percent,
                message: message.map(String::from),
            });
        });

        let warn_after = self.config.slow_task_warn_secs;
        let mut running = tokio::spawn(async move { handler.execute(ctx).await });
        let joined = match tokio::time::timeout(Duration::from_secs(warn_after), &mut running).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(
                    %task_id,
                    task_type = %task.task_type,
                    running_secs = warn_after,
                    "Task still running past slow-task threshold"
                );
                let _ = self.event_tx.send(WorkerEvent::TaskSlow {
                    task_id,
                    running_secs: warn_after,
                });
                running.await
            }
        };

        match joined {
            Ok(result) => result,
            Err(join_error) => {
                error!(error = ?join_error, %task_id, "Task handler panicked");
                let message = "Task handler panicked".to_string();
                self.annotate_owner(&task, &message).await;
                TaskResult::Failed(message)
            }
        }
    }

    async fn annotate_owner(&self, task: &Task, message: &str) {
        let result = match task.task_type {
            TaskType::ChecklistGeneration => {
                self.stores
                    .reviews
                    .set_generation_error(task.target_id, Some(message))
                    .await
            }
            TaskType::Review => {
                self.stores
                    .reviews
                    .set_target_status(task.target_id, ReviewTargetStatus::Error, Some(message))
                    .await
            }
        };
        if let Err(e) = result {
            warn!(error = %e, task_id = %task.id, "Failed to annotate task owner");
        }
    }

    /// Periodically delete finished tasks past retention and report pool usage.
    async fn sweep(&self, shutdown_rx: &mut watch::Receiver<bool>) {
        let interval = Duration::from_secs(self.config.cleanup_interval_secs.max(1));
        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = sleep(interval) => {
                    match self.queue.cleanup().await {
                        Ok(removed) => {
                            let _ = self.event_tx.send(WorkerEvent::CleanupCompleted { removed });
                        }
                        Err(e) => error!(error = %e, "Cleanup sweep failed"),
                    }
                    if let Some(pool) = &self.stores.pool {
                        log_pool_metrics(pool);
                    }
                }
            }
        }
        debug!("Cleanup sweeper stopped");
    }
}

/// Builder for creating a worker pool with handlers.
pub struct WorkerBuilder {
    stores: Stores,
    broker: Arc<dyn EventBroker>,
    queue: Arc<TaskQueue>,
    config: WorkerConfig,
    handlers: Vec<Box<dyn TaskHandler>>,
}

impl WorkerBuilder {
    /// Create a new worker builder.
    pub fn new(stores: Stores, broker: Arc<dyn EventBroker>, queue: Arc<TaskQueue>) -> Self {
        Self {
            stores,
            broker,
            queue,
            config: WorkerConfig::default(),
            handlers: Vec::new(),
        }
    }

    /// Set the worker configuration.
    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a handler.
    pub fn with_handler<H: TaskHandler + 'static>(mut self, handler: H) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Build and return the pool.
    pub async fn build(self) -> WorkerPool {
        let pool = WorkerPool::new(self.stores, self.broker, self.queue, self.config);

        for handler in self.handlers {
            let task_type = handler.task_type();
            let mut handlers = pool.handlers.write().await;
            handlers.insert(task_type, Arc::from(handler));
        }

        pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();
        assert_eq!(config.poll_interval_ms, defaults::WORKER_POLL_INTERVAL_MS);
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.slow_task_warn_secs, 1800);
        assert!(config.enabled);
    }

    #[test]
    fn test_worker_config_builder() {
        let config = WorkerConfig::default()
            .with_poll_interval(1000)
            .with_worker_count(8)
            .with_slow_task_warning(5)
            .with_gate(GateConfig::default().with_max_parallel_credentials(1))
            .with_enabled(false);

        assert_eq!(config.poll_interval_ms, 1000);
        assert_eq!(config.worker_count, 8);
        assert_eq!(config.slow_task_warn_secs, 5);
        assert_eq!(config.gate.max_parallel_credentials, 1);
        assert!(!config.enabled);
    }

    #[test]
    fn test_worker_event_clone() {
        let event = WorkerEvent::TaskFailed {
            task_id: Uuid::new_v4(),
            task_type: TaskType::Review,
            error: "boom".into(),
        };
        let cloned = event.clone();
        assert!(matches!(cloned, WorkerEvent::TaskFailed { ref error, .. } if error == "boom"));
    }
}
