use super::state::{StageExecution, StageStatus, WorkflowState, WorkflowStatus};
use crate::checkpoint::{CheckpointStore, RollbackOutcome};
use crate::config::{ledger_path, lock_path};
use crate::errors::{ConcurrencyError, ConfigurationError, ResourceError, WorkflowError};
use crate::lane::{LanePlan, plan_for};
use crate::stage::StageDef;
use crate::util::{format_duration, write_json_atomic};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Progress snapshot for display and automation.
#[derive(Debug, Clone, Serialize)]
pub struct TrackerSummary {
    pub change_id: String,
    pub lane: String,
    pub status: WorkflowStatus,
    pub completed: usize,
    pub total: usize,
    /// `completed / total`, 0.0 when nothing is planned
    pub progress: f64,
    pub elapsed: String,
    pub remaining: Option<String>,
    pub within_sla: bool,
    pub sla_secs: u64,
    pub last_successful_stage: Option<u32>,
}

/// Take the exclusive writer lock for a change root.
///
/// The lock is released when the returned file is dropped.
pub(crate) fn acquire_lock(root: &Path) -> Result<File, WorkflowError> {
    let path = lock_path(root);
    let persist_err = |source| ResourceError::Persist {
        path: path.clone(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(persist_err)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&path)
        .map_err(persist_err)?;

    fs2::FileExt::try_lock_exclusive(&file)
        .map_err(|_| ConcurrencyError::LedgerLocked { path: path.clone() })?;
    Ok(file)
}

/// Delete the ledger of a change, keeping checkpoints. Returns whether a
/// ledger existed.
pub fn remove_ledger(root: &Path) -> Result<bool, WorkflowError> {
    let _lock = acquire_lock(root)?;
    let path = ledger_path(root);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(ResourceError::Persist { path, source }.into()),
    }
}

/// Single writer of a change's workflow ledger.
///
/// Every mutation is persisted immediately by writing a temporary file and
/// renaming it over `workflow.json`, so concurrent readers always see a
/// complete document.
pub struct StatusTracker {
    path: PathBuf,
    state: WorkflowState,
    sla: Duration,
    sla_warned: bool,
    _lock: File,
}

impl StatusTracker {
    /// Start a fresh ledger for a run, replacing any previous one.
    pub fn create(root: &Path, change_id: &str, plan: &LanePlan) -> Result<Self, WorkflowError> {
        let lock = acquire_lock(root)?;
        let state = WorkflowState::new(change_id, plan.lane, plan.stage_numbers());
        let mut tracker = Self {
            path: ledger_path(root),
            state,
            sla: plan.thresholds.sla(),
            sla_warned: false,
            _lock: lock,
        };
        tracker.persist()?;
        tracing::info!(
            change = change_id,
            run_id = %tracker.state.run_id,
            lane = %plan.lane,
            "workflow ledger created"
        );
        Ok(tracker)
    }

    /// Open the existing ledger for writing.
    pub fn open(root: &Path) -> Result<Self, WorkflowError> {
        let lock = acquire_lock(root)?;
        Self::open_locked(root, lock)
    }

    /// Roll the working files back to `checkpoint_id` as the ledger's writer.
    ///
    /// The writer lock is taken before any file is touched and held until the
    /// ledger (when one exists) records the new `last_successful_stage`. While
    /// a run holds the lock this fails with `LedgerLocked` and leaves the
    /// working files alone.
    pub fn rollback_checkpoint(
        root: &Path,
        store: &mut CheckpointStore,
        checkpoint_id: &str,
    ) -> Result<RollbackOutcome, WorkflowError> {
        let lock = acquire_lock(root)?;
        let has_ledger = Self::read(root)?.is_some();
        let outcome = store.rollback(checkpoint_id)?;
        if has_ledger {
            let mut tracker = Self::open_locked(root, lock)?;
            tracker.rollback_to(outcome.last_successful_stage)?;
        }
        Ok(outcome)
    }

    fn open_locked(root: &Path, lock: File) -> Result<Self, WorkflowError> {
        let path = ledger_path(root);
        let state = Self::read(root)?.ok_or_else(|| ConfigurationError::MissingFile {
            path: path.clone(),
        })?;
        let sla = plan_for(state.lane).thresholds.sla();
        Ok(Self {
            path,
            state,
            sla,
            sla_warned: false,
            _lock: lock,
        })
    }

    /// Read the ledger without taking the writer lock.
    pub fn read(root: &Path) -> Result<Option<WorkflowState>, ResourceError> {
        let path = ledger_path(root);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ResourceError::CorruptLedger {
                    path,
                    message: e.to_string(),
                });
            }
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| ResourceError::CorruptLedger {
                path,
                message: e.to_string(),
            })
    }

    /// Replace the SLA target (e.g. a `flow.toml` override).
    pub fn with_sla(mut self, sla: Duration) -> Self {
        self.sla = sla;
        self
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    /// Re-plan the stages of an existing ledger (resume with a new lane plan).
    pub fn set_plan(&mut self, plan: &LanePlan) -> Result<(), ResourceError> {
        self.state.lane = plan.lane;
        self.state.planned_stages = plan.stage_numbers();
        self.sla = plan.thresholds.sla();
        self.state.status = WorkflowStatus::Running;
        self.persist()
    }

    pub fn start_stage(&mut self, stage: &StageDef) -> Result<(), ResourceError> {
        let entry = self.state.stage_entry(stage.number, stage.name);
        entry.status = StageStatus::Running;
        entry.started_at = Some(Utc::now());
        entry.finished_at = None;
        entry.duration_secs = None;
        entry.error = None;
        self.state.status = WorkflowStatus::Running;
        tracing::info!(stage = stage.number, name = stage.name, "stage started");
        self.persist()
    }

    pub fn complete_stage(
        &mut self,
        stage: &StageDef,
        success: bool,
        metrics: BTreeMap<String, serde_json::Value>,
        error: Option<String>,
    ) -> Result<(), ResourceError> {
        let now = Utc::now();
        let entry = self.state.stage_entry(stage.number, stage.name);
        entry.status = if success {
            StageStatus::Completed
        } else {
            StageStatus::Failed
        };
        entry.finished_at = Some(now);
        entry.duration_secs = entry.started_at.map(|start| seconds_between(start, now));
        entry.metrics.extend(metrics);
        entry.error = error;

        if success {
            self.state.last_successful_stage = Some(
                self.state
                    .last_successful_stage
                    .map_or(stage.number, |last| last.max(stage.number)),
            );
            tracing::info!(stage = stage.number, name = stage.name, "stage completed");
        } else {
            tracing::info!(stage = stage.number, name = stage.name, "stage failed");
        }

        if !self.sla_warned && !self.within_sla() {
            self.sla_warned = true;
            tracing::warn!(
                sla_secs = self.sla.as_secs(),
                elapsed = %format_duration(self.elapsed()),
                "workflow exceeded its lane SLA"
            );
        }
        self.persist()
    }

    pub fn skip_stage(&mut self, stage: &StageDef, reason: &str) -> Result<(), ResourceError> {
        let entry = self.state.stage_entry(stage.number, stage.name);
        entry.status = StageStatus::Skipped;
        entry.finished_at = Some(Utc::now());
        entry.error = Some(reason.to_string());
        tracing::info!(stage = stage.number, name = stage.name, reason, "stage skipped");
        self.persist()
    }

    /// Mirror a checkpoint rollback into the ledger.
    pub fn rollback_to(&mut self, last_successful_stage: Option<u32>) -> Result<(), ResourceError> {
        self.state.last_successful_stage = last_successful_stage;
        self.persist()
    }

    pub fn record_metric(
        &mut self,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Result<(), ResourceError> {
        self.state.metrics.insert(key.into(), value);
        self.persist()
    }

    pub fn finish(&mut self, status: WorkflowStatus) -> Result<(), ResourceError> {
        self.state.status = status;
        tracing::info!(status = %status, change = %self.state.change_id, "workflow finished");
        self.persist()
    }

    /// Record an interruption; the run stays resumable.
    pub fn mark_incomplete(&mut self) -> Result<(), ResourceError> {
        for entry in &mut self.state.stages {
            if entry.status == StageStatus::Running {
                entry.status = StageStatus::Pending;
                entry.started_at = None;
            }
        }
        self.state.status = WorkflowStatus::Incomplete;
        tracing::warn!(change = %self.state.change_id, "workflow marked incomplete");
        self.persist()
    }

    /// Apply an arbitrary edit and persist it.
    pub fn update(&mut self, f: impl FnOnce(&mut WorkflowState)) -> Result<(), ResourceError> {
        f(&mut self.state);
        self.persist()
    }

    /// Time since the run started; frozen at the last update once terminal.
    pub fn elapsed(&self) -> Duration {
        let end = if self.state.status.is_terminal() {
            self.state.last_updated
        } else {
            Utc::now()
        };
        Duration::from_secs_f64(seconds_between(self.state.started_at, end))
    }

    /// Average completed-stage duration times the stages still to run.
    pub fn estimated_remaining(&self) -> Option<Duration> {
        estimate_remaining(&self.state)
    }

    /// Advisory only; never stops a run.
    pub fn within_sla(&self) -> bool {
        self.elapsed() <= self.sla
    }

    pub fn summary(&self) -> TrackerSummary {
        summarize(&self.state, self.elapsed(), self.sla)
    }

    fn persist(&mut self) -> Result<(), ResourceError> {
        self.state.last_updated = Utc::now();
        write_json_atomic(&self.path, &self.state)
    }
}

/// Summary for a ledger read without a tracker (e.g. `changeflow status`).
pub fn summarize(state: &WorkflowState, elapsed: Duration, sla: Duration) -> TrackerSummary {
    let completed = state.count(StageStatus::Completed);
    let total = state.planned_stages.len();
    TrackerSummary {
        change_id: state.change_id.clone(),
        lane: state.lane.to_string(),
        status: state.status,
        completed,
        total,
        progress: if total == 0 {
            0.0
        } else {
            completed as f64 / total as f64
        },
        elapsed: format_duration(elapsed),
        remaining: estimate_remaining(state).map(format_duration),
        within_sla: elapsed <= sla,
        sla_secs: sla.as_secs(),
        last_successful_stage: state.last_successful_stage,
    }
}

fn estimate_remaining(state: &WorkflowState) -> Option<Duration> {
    let durations: Vec<f64> = state
        .stages
        .iter()
        .filter(|s| s.status == StageStatus::Completed)
        .filter_map(|s: &StageExecution| s.duration_secs)
        .collect();
    if durations.is_empty() {
        return None;
    }
    let average = durations.iter().sum::<f64>() / durations.len() as f64;
    Some(Duration::from_secs_f64(
        average * state.remaining_stages() as f64,
    ))
}

fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start)
        .to_std()
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lane::{Lane, plan_for};
    use crate::stage::stage_by_number;
    use tempfile::tempdir;

    fn stage(n: u32) -> &'static StageDef {
        stage_by_number(n).unwrap()
    }

    #[test]
    fn test_create_persists_ledger() {
        let dir = tempdir().unwrap();
        let plan = plan_for(Lane::Standard);
        let tracker = StatusTracker::create(dir.path(), "add-widget", &plan).unwrap();

        let on_disk = StatusTracker::read(dir.path()).unwrap().unwrap();
        assert_eq!(on_disk.run_id, tracker.state().run_id);
        assert_eq!(on_disk.planned_stages.len(), 12);
        assert_eq!(on_disk.status, WorkflowStatus::Running);
    }

    #[test]
    fn test_second_writer_is_rejected() {
        let dir = tempdir().unwrap();
        let plan = plan_for(Lane::Docs);
        let _first = StatusTracker::create(dir.path(), "c", &plan).unwrap();

        match StatusTracker::open(dir.path()) {
            Err(WorkflowError::Concurrency(ConcurrencyError::LedgerLocked { .. })) => {}
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("second writer acquired the lock"),
        }
    }

    #[test]
    fn test_rollback_checkpoint_refuses_while_run_holds_lock() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "old").unwrap();
        let mut store = CheckpointStore::open(dir.path()).unwrap();
        let id = store.create_checkpoint(3, "before implementation", None).unwrap();

        let _running = StatusTracker::create(dir.path(), "c", &plan_for(Lane::Standard)).unwrap();
        std::fs::write(&file, "new").unwrap();

        match StatusTracker::rollback_checkpoint(dir.path(), &mut store, &id) {
            Err(WorkflowError::Concurrency(ConcurrencyError::LedgerLocked { .. })) => {}
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("rolled back while another writer held the lock"),
        }
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "new");
        assert_eq!(store.list().len(), 1);
    }

    #[test]
    fn test_rollback_checkpoint_updates_ledger() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "old").unwrap();
        let mut store = CheckpointStore::open(dir.path()).unwrap();
        let id = store.create_checkpoint(3, "before implementation", None).unwrap();
        {
            let mut tracker =
                StatusTracker::create(dir.path(), "c", &plan_for(Lane::Standard)).unwrap();
            for n in 0..=4 {
                tracker.start_stage(stage(n)).unwrap();
                tracker.complete_stage(stage(n), true, BTreeMap::new(), None).unwrap();
            }
        }
        std::fs::write(dir.path().join("a.txt"), "new").unwrap();

        let outcome = StatusTracker::rollback_checkpoint(dir.path(), &mut store, &id).unwrap();

        assert_eq!(outcome.last_successful_stage, Some(2));
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "old");
        let state = StatusTracker::read(dir.path()).unwrap().unwrap();
        assert_eq!(state.last_successful_stage, Some(2));
        assert!(StatusTracker::open(dir.path()).is_ok());
    }

    #[test]
    fn test_rollback_checkpoint_without_ledger() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "old").unwrap();
        let mut store = CheckpointStore::open(dir.path()).unwrap();
        let id = store.create_checkpoint(1, "before version_bump", None).unwrap();
        std::fs::write(dir.path().join("a.txt"), "new").unwrap();

        StatusTracker::rollback_checkpoint(dir.path(), &mut store, &id).unwrap();

        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "old");
        assert!(StatusTracker::read(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_readers_always_see_a_complete_ledger() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicBool, Ordering};

        let dir = tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let mut tracker = StatusTracker::create(&root, "c", &plan_for(Lane::Heavy)).unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let reader = {
            let done = done.clone();
            let root = root.clone();
            std::thread::spawn(move || {
                let mut reads = 0usize;
                loop {
                    match StatusTracker::read(&root) {
                        Ok(Some(state)) => assert_eq!(state.change_id, "c"),
                        other => panic!("reader saw an incomplete ledger: {other:?}"),
                    }
                    reads += 1;
                    if done.load(Ordering::SeqCst) {
                        break reads;
                    }
                }
            })
        };

        for _ in 0..20 {
            for n in 0..=12 {
                tracker.start_stage(stage(n)).unwrap();
                tracker
                    .complete_stage(stage(n), true, BTreeMap::new(), None)
                    .unwrap();
            }
        }
        done.store(true, Ordering::SeqCst);

        let reads = reader.join().unwrap();
        assert!(reads > 0);
        let last = StatusTracker::read(&root).unwrap().unwrap();
        assert_eq!(last.last_successful_stage, Some(12));
    }

    #[test]
    fn test_lock_released_on_drop() {
        let dir = tempdir().unwrap();
        let plan = plan_for(Lane::Docs);
        drop(StatusTracker::create(dir.path(), "c", &plan).unwrap());
        assert!(StatusTracker::open(dir.path()).is_ok());
    }

    #[test]
    fn test_stage_lifecycle() {
        let dir = tempdir().unwrap();
        let plan = plan_for(Lane::Heavy);
        let mut tracker = StatusTracker::create(dir.path(), "c", &plan).unwrap();

        tracker.start_stage(stage(0)).unwrap();
        let running = StatusTracker::read(dir.path()).unwrap().unwrap();
        assert_eq!(running.stage(0).unwrap().status, StageStatus::Running);

        let mut metrics = BTreeMap::new();
        metrics.insert("files".to_string(), serde_json::json!(3));
        tracker.complete_stage(stage(0), true, metrics, None).unwrap();
        tracker.start_stage(stage(1)).unwrap();
        tracker
            .complete_stage(stage(1), false, BTreeMap::new(), Some("boom".into()))
            .unwrap();

        let state = StatusTracker::read(dir.path()).unwrap().unwrap();
        let first = state.stage(0).unwrap();
        assert_eq!(first.status, StageStatus::Completed);
        assert_eq!(first.metrics["files"], serde_json::json!(3));
        assert!(first.duration_secs.is_some());
        assert_eq!(state.stage(1).unwrap().error.as_deref(), Some("boom"));
        assert_eq!(state.last_successful_stage, Some(0));
    }

    #[test]
    fn test_last_successful_stage_never_decreases() {
        let dir = tempdir().unwrap();
        let mut tracker = StatusTracker::create(dir.path(), "c", &plan_for(Lane::Heavy)).unwrap();
        tracker.complete_stage(stage(5), true, BTreeMap::new(), None).unwrap();
        tracker.complete_stage(stage(4), true, BTreeMap::new(), None).unwrap();
        assert_eq!(tracker.state().last_successful_stage, Some(5));

        tracker.rollback_to(Some(2)).unwrap();
        assert_eq!(tracker.state().last_successful_stage, Some(2));
    }

    #[test]
    fn test_mark_incomplete_resets_running_stage() {
        let dir = tempdir().unwrap();
        let mut tracker = StatusTracker::create(dir.path(), "c", &plan_for(Lane::Docs)).unwrap();
        tracker.start_stage(stage(0)).unwrap();
        tracker.mark_incomplete().unwrap();

        let state = StatusTracker::read(dir.path()).unwrap().unwrap();
        assert_eq!(state.status, WorkflowStatus::Incomplete);
        assert_eq!(state.stage(0).unwrap().status, StageStatus::Pending);
    }

    #[test]
    fn test_summary_and_estimate() {
        let dir = tempdir().unwrap();
        let plan = plan_for(Lane::Docs);
        let mut tracker = StatusTracker::create(dir.path(), "c", &plan).unwrap();
        assert!(tracker.estimated_remaining().is_none());

        tracker.update(|state| {
            let entry = state.stage_entry(0, "initialize");
            entry.status = StageStatus::Completed;
            entry.duration_secs = Some(10.0);
        })
        .unwrap();

        // 7 planned docs stages, one done at 10s each
        assert_eq!(
            tracker.estimated_remaining(),
            Some(Duration::from_secs(60))
        );

        let summary = tracker.summary();
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.total, 7);
        assert!(summary.within_sla);
        assert_eq!(summary.sla_secs, 600);
        assert_eq!(summary.remaining.as_deref(), Some("1m 00s"));
    }

    #[test]
    fn test_sla_flag_is_advisory() {
        let dir = tempdir().unwrap();
        let tracker = StatusTracker::create(dir.path(), "c", &plan_for(Lane::Docs))
            .unwrap()
            .with_sla(Duration::ZERO);
        std::thread::sleep(Duration::from_millis(5));
        assert!(!tracker.within_sla());
    }

    #[test]
    fn test_open_missing_ledger() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            StatusTracker::open(dir.path()),
            Err(WorkflowError::Configuration(ConfigurationError::MissingFile { .. }))
        ));
    }

    #[test]
    fn test_remove_ledger() {
        let dir = tempdir().unwrap();
        drop(StatusTracker::create(dir.path(), "c", &plan_for(Lane::Docs)).unwrap());
        assert!(remove_ledger(dir.path()).unwrap());
        assert!(!remove_ledger(dir.path()).unwrap());
        assert!(StatusTracker::read(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_ledger_is_reported() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".changeflow")).unwrap();
        std::fs::write(dir.path().join(".changeflow/workflow.json"), "{").unwrap();
        assert!(matches!(
            StatusTracker::read(dir.path()),
            Err(ResourceError::CorruptLedger { .. })
        ));
    }
}
