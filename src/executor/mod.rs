//! Bounded-concurrency executor for the parallel-eligible stage group.
//!
//! Tasks in one batch must not write overlapping files. The executor does
//! not check this; stage authors do.

mod pool;
mod types;

pub use pool::ParallelExecutor;
pub use types::{
    ExecutorOptions, ExecutorSummary, StageTask, TaskFuture, TaskResult, TaskStatus, TaskWork,
};
