use crate::hooks::types::duration_ms;
use anyhow::Result;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Future produced by async task work.
pub type TaskFuture = BoxFuture<'static, Result<Value>>;

/// The body of a task.
pub enum TaskWork {
    /// Runs on a blocking thread
    Blocking(Box<dyn FnOnce(Value) -> Result<Value> + Send>),
    /// Runs as its own tokio task
    Async(Box<dyn FnOnce(Value) -> TaskFuture + Send>),
}

/// One unit of work submitted to the executor.
pub struct StageTask {
    pub id: u32,
    pub name: String,
    pub work: TaskWork,
    /// Passed to the work when it starts
    pub args: Value,
}

impl StageTask {
    pub fn blocking<F>(id: u32, name: impl Into<String>, args: Value, f: F) -> Self
    where
        F: FnOnce(Value) -> Result<Value> + Send + 'static,
    {
        Self {
            id,
            name: name.into(),
            work: TaskWork::Blocking(Box::new(f)),
            args,
        }
    }

    pub fn from_async<F, Fut>(id: u32, name: impl Into<String>, args: Value, f: F) -> Self
    where
        F: FnOnce(Value) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            id,
            name: name.into(),
            work: TaskWork::Async(Box::new(move |args| Box::pin(f(args)) as TaskFuture)),
            args,
        }
    }
}

impl std::fmt::Debug for StageTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.work {
            TaskWork::Blocking(_) => "blocking",
            TaskWork::Async(_) => "async",
        };
        f.debug_struct("StageTask")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("work", &kind)
            .finish()
    }
}

/// Executor settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorOptions {
    pub max_workers: usize,
    /// Measured from the moment the task holds a worker slot
    pub timeout_per_task: Duration,
    /// Results in submission order; otherwise in completion order
    pub deterministic_order: bool,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            max_workers: 4,
            timeout_per_task: Duration::from_secs(600),
            deterministic_order: true,
        }
    }
}

/// Terminal status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Completed,
    /// The work returned an error or panicked
    Failed,
    /// The watchdog gave up waiting; the work may still be running
    Timeout,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Timeout => "TIMEOUT",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub id: u32,
    pub name: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    /// Time spent holding a worker slot
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    /// Time from batch submission until this result was known
    #[serde(with = "duration_ms")]
    pub finished_after: Duration,
}

impl TaskResult {
    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

/// Aggregate view of one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub timed_out: usize,
    /// `completed / total`; 1.0 for an empty batch
    pub success_rate: f64,
    #[serde(with = "duration_ms")]
    pub wall_time: Duration,
}

impl ExecutorSummary {
    pub fn from_results(results: &[TaskResult]) -> Self {
        let count = |status: TaskStatus| results.iter().filter(|r| r.status == status).count();
        let completed = count(TaskStatus::Completed);
        Self {
            total: results.len(),
            completed,
            failed: count(TaskStatus::Failed),
            timed_out: count(TaskStatus::Timeout),
            success_rate: if results.is_empty() {
                1.0
            } else {
                completed as f64 / results.len() as f64
            },
            wall_time: results
                .iter()
                .map(|r| r.finished_after)
                .max()
                .unwrap_or_default(),
        }
    }

    /// Fold another batch into this summary (wall times add up).
    pub fn merge(&mut self, other: &ExecutorSummary) {
        self.total += other.total;
        self.completed += other.completed;
        self.failed += other.failed;
        self.timed_out += other.timed_out;
        self.wall_time += other.wall_time;
        self.success_rate = if self.total == 0 {
            1.0
        } else {
            self.completed as f64 / self.total as f64
        };
    }

    pub fn all_completed(&self) -> bool {
        self.completed == self.total
    }
}

impl Default for ExecutorSummary {
    fn default() -> Self {
        Self::from_results(&[])
    }
}
