use super::types::{
    ExecutorOptions, ExecutorSummary, StageTask, TaskResult, TaskStatus, TaskWork,
};
use crate::errors::TimeoutError;
use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinError, JoinHandle};

/// Runs a batch of independent tasks with bounded concurrency.
///
/// Each task waits for a worker slot, then runs on its own tokio task (or
/// blocking thread). A watchdog waits on the task's handle for at most
/// `timeout_per_task`; when it expires the result is `TIMEOUT` and the handle
/// is detached, not aborted. The watchdog holds the worker slot and gives it
/// back as soon as it has a result, so queued tasks never wait on abandoned
/// work and every task yields a result within its own timeout.
#[derive(Debug, Clone, Default)]
pub struct ParallelExecutor {
    options: ExecutorOptions,
}

impl ParallelExecutor {
    pub fn new(options: ExecutorOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    /// Run every task and collect one result per task.
    ///
    /// A failing, panicking or timed-out task never affects its siblings.
    pub async fn submit(&self, tasks: Vec<StageTask>) -> Vec<TaskResult> {
        let batch_start = Instant::now();
        let total = tasks.len();
        let semaphore = Arc::new(Semaphore::new(self.options.max_workers.max(1)));
        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<(usize, TaskResult)>();

        tracing::debug!(
            tasks = total,
            max_workers = self.options.max_workers,
            timeout_secs = self.options.timeout_per_task.as_secs_f64(),
            "submitting batch"
        );

        for (index, task) in tasks.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let result_tx = result_tx.clone();
            let limit = self.options.timeout_per_task;
            tokio::spawn(async move {
                let result = supervise(task, semaphore, limit, batch_start).await;
                let _ = result_tx.send((index, result));
            });
        }
        drop(result_tx);

        let mut collected = Vec::with_capacity(total);
        while let Some(item) = result_rx.recv().await {
            collected.push(item);
        }

        if self.options.deterministic_order {
            collected.sort_by_key(|(index, _)| *index);
        }
        collected.into_iter().map(|(_, result)| result).collect()
    }

    pub fn summary(results: &[TaskResult]) -> ExecutorSummary {
        ExecutorSummary::from_results(results)
    }
}

async fn supervise(
    task: StageTask,
    semaphore: Arc<Semaphore>,
    limit: Duration,
    batch_start: Instant,
) -> TaskResult {
    let StageTask {
        id,
        name,
        work,
        args,
    } = task;

    let finish = |status, output, error, duration| TaskResult {
        id,
        name: name.clone(),
        status,
        output,
        error,
        duration,
        finished_after: batch_start.elapsed(),
    };

    let Ok(permit) = semaphore.acquire_owned().await else {
        return finish(
            TaskStatus::Failed,
            None,
            Some("executor shut down before the task started".to_string()),
            Duration::ZERO,
        );
    };
    let started = Instant::now();
    tracing::debug!(task = id, name = %name, "task acquired worker slot");

    let handle: JoinHandle<Result<Value>> = match work {
        TaskWork::Blocking(f) => tokio::task::spawn_blocking(move || f(args)),
        TaskWork::Async(f) => tokio::spawn(f(args)),
    };

    let (status, output, error) = match tokio::time::timeout(limit, handle).await {
        Ok(Ok(Ok(value))) => (TaskStatus::Completed, Some(value), None),
        Ok(Ok(Err(e))) => (TaskStatus::Failed, None, Some(format!("{:#}", e))),
        Ok(Err(join_error)) => (TaskStatus::Failed, None, Some(join_message(join_error))),
        Err(_) => {
            let err = TimeoutError::TaskTimedOut {
                task: name.clone(),
                timeout: limit,
            };
            tracing::warn!(task = id, name = %name, "{}", err);
            (TaskStatus::Timeout, None, Some(err.to_string()))
        }
    };
    drop(permit);

    tracing::debug!(task = id, name = %name, status = %status, "task finished");
    finish(status, output, error, started.elapsed())
}

fn join_message(error: JoinError) -> String {
    if !error.is_panic() {
        return format!("task was cancelled: {}", error);
    }
    let payload = error.into_panic();
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("task panicked: {}", detail)
}
