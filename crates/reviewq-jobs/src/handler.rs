//! Task handlers for each task type.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use reviewq_core::{Result, Task, TaskType};

/// Progress callback type for task handlers.
pub type ProgressCallback = Box<dyn Fn(i32, Option<&str>) + Send + Sync>;

/// Context provided to task handlers.
pub struct TaskContext {
    /// The task being processed, already in `processing`.
    pub task: Task,
    /// Progress callback for updating task progress.
    progress_callback: Option<ProgressCallback>,
}

impl TaskContext {
    /// Create a new task context.
    pub fn new(task: Task) -> Self {
        Self {
            task,
            progress_callback: None,
        }
    }

    /// Set the progress callback.
    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(i32, Option<&str>) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
        self
    }

    /// Report progress to the callback.
    pub fn report_progress(&self, percent: i32, message: Option<&str>) {
        if let Some(ref callback) = self.progress_callback {
            callback(percent, message);
        }
    }

    pub fn task_id(&self) -> Uuid {
        self.task.id
    }

    /// Space id or review target id, depending on the task type.
    pub fn target_id(&self) -> Uuid {
        self.task.target_id
    }

    pub fn user_id(&self) -> &str {
        &self.task.user_id
    }

    /// Typed view of the task payload.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        self.task.payload_as()
    }
}

/// Result of task execution.
#[derive(Debug)]
pub enum TaskResult {
    /// Task completed, possibly with partial item failures recorded in its
    /// output rows.
    Success(Option<JsonValue>),
    /// Task failed with an error message.
    Failed(String),
}

/// Trait for task handlers.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// The task type this handler processes.
    fn task_type(&self) -> TaskType;

    /// Execute the task.
    async fn execute(&self, ctx: TaskContext) -> TaskResult;

    /// Check if this handler can process the given task type.
    fn can_handle(&self, task_type: TaskType) -> bool {
        self.task_type() == task_type
    }
}

/// No-op handler for testing.
pub struct NoOpHandler {
    task_type: TaskType,
}

impl NoOpHandler {
    /// Create a new no-op handler for the given task type.
    pub fn new(task_type: TaskType) -> Self {
        Self { task_type }
    }
}

#[async_trait]
impl TaskHandler for NoOpHandler {
    fn task_type(&self) -> TaskType {
        self.task_type
    }

    async fn execute(&self, ctx: TaskContext) -> TaskResult {
        ctx.report_progress(50, Some("Processing..."));
        ctx.report_progress(100, Some("Done"));
        TaskResult::Success(None)
    }
}
