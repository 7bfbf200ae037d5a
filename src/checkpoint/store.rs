use super::{Checkpoint, CheckpointLedger, RollbackOutcome, head_revision};
use crate::config::{STATE_DIR, checkpoint_dir};
use crate::errors::ResourceError;
use crate::util::write_json_atomic;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Directories never captured or touched by snapshots.
const EXCLUDED_DIRS: &[&str] = &[STATE_DIR, ".git"];

/// Snapshot and restore the working files of one change.
pub struct CheckpointStore {
    root: PathBuf,
    dir: PathBuf,
    ledger_path: PathBuf,
    ledger: CheckpointLedger,
}

impl CheckpointStore {
    /// Open the store for a change root, reading the existing ledger if any.
    pub fn open(root: &Path) -> Result<Self, ResourceError> {
        let dir = checkpoint_dir(root);
        let ledger_path = dir.join("checkpoints.json");

        let ledger = if ledger_path.exists() {
            let content =
                fs::read_to_string(&ledger_path).map_err(|e| ResourceError::CorruptLedger {
                    path: ledger_path.clone(),
                    message: e.to_string(),
                })?;
            serde_json::from_str(&content).map_err(|e| ResourceError::CorruptLedger {
                path: ledger_path.clone(),
                message: e.to_string(),
            })?
        } else {
            CheckpointLedger::default()
        };

        Ok(Self {
            root: root.to_path_buf(),
            dir,
            ledger_path,
            ledger,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All checkpoints in creation order.
    pub fn list(&self) -> &[Checkpoint] {
        &self.ledger.checkpoints
    }

    pub fn get(&self, id: &str) -> Option<&Checkpoint> {
        self.ledger.checkpoints.iter().find(|c| c.id == id)
    }

    /// Newest regular (non-safety) checkpoint taken before `stage`.
    pub fn latest_for_stage(&self, stage: u32) -> Option<&Checkpoint> {
        self.ledger
            .checkpoints
            .iter()
            .filter(|c| c.stage == stage && !c.safety)
            .max_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)))
    }

    pub fn last_successful_stage(&self) -> Option<u32> {
        self.ledger.last_successful_stage
    }

    pub fn set_last_successful_stage(&mut self, stage: Option<u32>) -> Result<(), ResourceError> {
        self.ledger.last_successful_stage = stage;
        self.persist()
    }

    /// Snapshot the current working files before `stage` runs.
    pub fn create_checkpoint(
        &mut self,
        stage: u32,
        name: &str,
        notes: Option<&str>,
    ) -> Result<String, ResourceError> {
        self.snapshot(stage, name, notes, false).map(|c| c.id)
    }

    /// Restore the working files to exactly those held by `checkpoint_id`.
    ///
    /// A safety checkpoint of the current state is taken first; nothing is
    /// deleted unless it succeeds. Afterwards `last_successful_stage` is the
    /// stage before the checkpoint's stage.
    pub fn rollback(&mut self, checkpoint_id: &str) -> Result<RollbackOutcome, ResourceError> {
        let not_found = || ResourceError::CheckpointNotFound {
            id: checkpoint_id.to_string(),
        };
        let target = self.get(checkpoint_id).cloned().ok_or_else(not_found)?;
        let source_dir = self.dir.join(&target.id);
        if !source_dir.is_dir() {
            return Err(not_found());
        }
        for file in &target.files {
            let path = source_dir.join(file);
            if !path.is_file() {
                return Err(ResourceError::Restore {
                    path,
                    source: io::Error::new(io::ErrorKind::NotFound, "missing from checkpoint"),
                });
            }
        }

        let safety = self.snapshot(
            target.stage,
            &format!("before rollback to {}", target.id),
            Some("automatic safety checkpoint"),
            true,
        )?;

        let mut removed = Vec::new();
        for (rel, path) in working_files(&self.root)? {
            fs::remove_file(&path).map_err(|source| ResourceError::Restore {
                path: path.clone(),
                source,
            })?;
            if !target.files.contains(&rel) {
                removed.push(rel);
            }
        }
        prune_empty_dirs(&self.root);

        for rel in &target.files {
            let dest = self.root.join(rel);
            let restore_err = |source| ResourceError::Restore {
                path: dest.clone(),
                source,
            };
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).map_err(restore_err)?;
            }
            fs::copy(source_dir.join(rel), &dest).map_err(restore_err)?;

            if let Some(expected) = target.digests.get(rel) {
                let bytes = fs::read(&dest).map_err(restore_err)?;
                if &sha256_hex(&bytes) != expected {
                    return Err(ResourceError::DigestMismatch { path: dest });
                }
            }
        }

        let last_successful_stage = target.stage.checked_sub(1);
        self.set_last_successful_stage(last_successful_stage)?;

        tracing::info!(
            checkpoint = %target.id,
            safety = %safety.id,
            restored = target.files.len(),
            removed = removed.len(),
            "rolled back to checkpoint"
        );

        Ok(RollbackOutcome {
            checkpoint_id: target.id,
            safety_checkpoint: safety.id,
            restored: target.files,
            removed,
            last_successful_stage,
        })
    }

    /// Keep the `keep` newest checkpoints and delete the rest.
    pub fn cleanup(&mut self, keep: usize) -> Result<Vec<String>, ResourceError> {
        let mut ordered: Vec<&Checkpoint> = self.ledger.checkpoints.iter().collect();
        if ordered.len() <= keep {
            return Ok(Vec::new());
        }
        ordered.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        let doomed: Vec<String> = ordered[..ordered.len() - keep]
            .iter()
            .map(|c| c.id.clone())
            .collect();

        for id in &doomed {
            let path = self.dir.join(id);
            if path.exists() {
                fs::remove_dir_all(&path)
                    .map_err(|source| ResourceError::Persist { path, source })?;
            }
        }
        self.ledger.checkpoints.retain(|c| !doomed.contains(&c.id));
        self.persist()?;

        tracing::debug!(removed = doomed.len(), keep, "checkpoint cleanup");
        Ok(doomed)
    }

    fn snapshot(
        &mut self,
        stage: u32,
        name: &str,
        notes: Option<&str>,
        safety: bool,
    ) -> Result<Checkpoint, ResourceError> {
        let id = self.next_id(stage);
        let target_dir = self.dir.join(&id);

        let captured = copy_working_files(&self.root, &target_dir);
        let digests = match captured {
            Ok(digests) => digests,
            Err(e) => {
                let _ = fs::remove_dir_all(&target_dir);
                return Err(e);
            }
        };

        let checkpoint = Checkpoint {
            id,
            stage,
            name: name.to_string(),
            timestamp: Utc::now(),
            files: digests.keys().cloned().collect(),
            digests,
            revision: head_revision(&self.root),
            notes: notes.map(str::to_string),
            safety,
        };

        self.ledger.checkpoints.push(checkpoint.clone());
        if let Err(e) = self.persist() {
            self.ledger.checkpoints.pop();
            let _ = fs::remove_dir_all(&target_dir);
            return Err(e);
        }

        tracing::debug!(
            checkpoint = %checkpoint.id,
            stage,
            files = checkpoint.files.len(),
            "checkpoint created"
        );
        Ok(checkpoint)
    }

    fn next_id(&self, stage: u32) -> String {
        let base = format!(
            "cp-{}-s{}",
            Utc::now().format("%Y%m%dT%H%M%S%.6fZ"),
            stage
        );
        let taken = |id: &str| self.get(id).is_some() || self.dir.join(id).exists();
        let mut id = base.clone();
        let mut n = 1;
        while taken(&id) {
            id = format!("{}-{}", base, n);
            n += 1;
        }
        id
    }

    fn persist(&self) -> Result<(), ResourceError> {
        write_json_atomic(&self.ledger_path, &self.ledger)
    }
}

fn is_excluded(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| EXCLUDED_DIRS.contains(&name))
}

fn relative_name(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

/// Regular files under `root`, sorted, as `(relative name, absolute path)`.
fn working_files(root: &Path) -> Result<Vec<(String, PathBuf)>, ResourceError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_excluded(e))
    {
        let entry = entry.map_err(|e| ResourceError::Snapshot {
            path: e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf()),
            source: e.into(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(rel) = relative_name(root, entry.path()) {
            files.push((rel, entry.into_path()));
        }
    }
    Ok(files)
}

fn copy_working_files(
    root: &Path,
    target_dir: &Path,
) -> Result<BTreeMap<String, String>, ResourceError> {
    fs::create_dir_all(target_dir).map_err(|source| ResourceError::Snapshot {
        path: target_dir.to_path_buf(),
        source,
    })?;

    let mut digests = BTreeMap::new();
    for (rel, path) in working_files(root)? {
        let bytes = fs::read(&path).map_err(|source| ResourceError::Snapshot {
            path: path.clone(),
            source,
        })?;
        let dest = target_dir.join(&rel);
        let write_err = |source| ResourceError::Snapshot {
            path: dest.clone(),
            source,
        };
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        fs::write(&dest, &bytes).map_err(write_err)?;
        digests.insert(rel, sha256_hex(&bytes));
    }
    Ok(digests)
}

/// Remove directories left empty after the working files were deleted.
fn prune_empty_dirs(root: &Path) {
    let dirs: Vec<PathBuf> = WalkDir::new(root)
        .contents_first(true)
        .into_iter()
        .filter_entry(|e| !is_excluded(e))
        .filter_map(|e| e.ok())
        .filter(|e| e.depth() > 0 && e.file_type().is_dir())
        .map(walkdir::DirEntry::into_path)
        .collect();
    for dir in dirs {
        // Fails for non-empty directories, which are kept.
        let _ = fs::remove_dir(dir);
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_create_checkpoint_captures_files() {
        let dir = tempdir().unwrap();
        write(dir.path(), "README.md", "hello");
        write(dir.path(), "src/lib.rs", "pub fn a() {}");
        write(dir.path(), ".git/HEAD", "ref: refs/heads/main");

        let mut store = CheckpointStore::open(dir.path()).unwrap();
        let id = store.create_checkpoint(3, "before implementation", None).unwrap();

        assert!(id.starts_with("cp-"));
        assert!(id.ends_with("-s3"));
        let cp = store.get(&id).unwrap();
        assert_eq!(cp.files, vec!["README.md", "src/lib.rs"]);
        assert_eq!(cp.digests.len(), 2);
        let copied = dir.path().join(".changeflow/checkpoints").join(&id);
        assert!(copied.join("src/lib.rs").is_file());
        assert!(dir.path().join(".changeflow/checkpoints/checkpoints.json").is_file());
    }

    #[test]
    fn test_second_checkpoint_does_not_capture_first() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.txt", "a");
        let mut store = CheckpointStore::open(dir.path()).unwrap();
        store.create_checkpoint(0, "first", None).unwrap();
        let second = store.create_checkpoint(1, "second", None).unwrap();
        assert_eq!(store.get(&second).unwrap().files, vec!["a.txt"]);
    }

    #[test]
    fn test_rollback_restores_exact_files() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.txt", "original a");
        write(dir.path(), "docs/b.md", "original b");

        let mut store = CheckpointStore::open(dir.path()).unwrap();
        let id = store.create_checkpoint(3, "before implementation", None).unwrap();

        write(dir.path(), "a.txt", "changed a");
        fs::remove_file(dir.path().join("docs/b.md")).unwrap();
        write(dir.path(), "new/c.txt", "new file");

        let outcome = store.rollback(&id).unwrap();

        assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "original a");
        assert_eq!(
            fs::read_to_string(dir.path().join("docs/b.md")).unwrap(),
            "original b"
        );
        assert!(!dir.path().join("new/c.txt").exists());
        assert!(!dir.path().join("new").exists());
        assert_eq!(outcome.removed, vec!["new/c.txt"]);
        assert_eq!(outcome.last_successful_stage, Some(2));
        assert_eq!(store.last_successful_stage(), Some(2));

        let safety = store.get(&outcome.safety_checkpoint).unwrap();
        assert!(safety.safety);
        assert!(safety.files.contains(&"new/c.txt".to_string()));
    }

    #[test]
    fn test_rollback_to_stage_zero_clears_progress() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.txt", "a");
        let mut store = CheckpointStore::open(dir.path()).unwrap();
        let id = store.create_checkpoint(0, "start", None).unwrap();
        store.set_last_successful_stage(Some(4)).unwrap();

        let outcome = store.rollback(&id).unwrap();
        assert_eq!(outcome.last_successful_stage, None);
    }

    #[test]
    fn test_rollback_unknown_id_touches_nothing() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.txt", "keep me");
        let mut store = CheckpointStore::open(dir.path()).unwrap();

        let err = store.rollback("cp-missing").unwrap_err();
        assert!(matches!(err, ResourceError::CheckpointNotFound { .. }));
        assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "keep me");
        assert!(store.list().is_empty());
    }

    #[test]
    fn test_rollback_with_missing_directory_is_not_found() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.txt", "a");
        let mut store = CheckpointStore::open(dir.path()).unwrap();
        let id = store.create_checkpoint(2, "x", None).unwrap();
        fs::remove_dir_all(dir.path().join(".changeflow/checkpoints").join(&id)).unwrap();

        let err = store.rollback(&id).unwrap_err();
        assert!(matches!(err, ResourceError::CheckpointNotFound { .. }));
        assert_eq!(store.list().len(), 1);
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.txt", "a");
        let mut store = CheckpointStore::open(dir.path()).unwrap();
        let mut ids = Vec::new();
        for stage in 0..7 {
            ids.push(store.create_checkpoint(stage, "cp", None).unwrap());
        }

        let removed = store.cleanup(5).unwrap();
        assert_eq!(removed, ids[..2].to_vec());
        assert_eq!(store.list().len(), 5);
        assert!(!dir.path().join(".changeflow/checkpoints").join(&ids[0]).exists());

        assert!(store.cleanup(5).unwrap().is_empty());
        assert_eq!(store.list().len(), 5);
    }

    #[test]
    fn test_ids_are_unique_and_sorted() {
        let dir = tempdir().unwrap();
        let mut store = CheckpointStore::open(dir.path()).unwrap();
        let ids: Vec<String> = (0..5)
            .map(|_| store.create_checkpoint(4, "burst", None).unwrap())
            .collect();
        let mut sorted = ids.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted, ids);
    }

    #[test]
    fn test_latest_for_stage_ignores_safety_checkpoints() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.txt", "a");
        let mut store = CheckpointStore::open(dir.path()).unwrap();
        let first = store.create_checkpoint(5, "one", None).unwrap();
        let second = store.create_checkpoint(5, "two", None).unwrap();
        assert_eq!(store.latest_for_stage(5).unwrap().id, second);

        store.rollback(&first).unwrap();
        assert_eq!(store.latest_for_stage(5).unwrap().id, second);
        assert!(store.latest_for_stage(6).is_none());
    }

    #[test]
    fn test_reopen_reads_ledger() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.txt", "a");
        let id = {
            let mut store = CheckpointStore::open(dir.path()).unwrap();
            store.create_checkpoint(1, "x", Some("note")).unwrap()
        };
        let store = CheckpointStore::open(dir.path()).unwrap();
        assert_eq!(store.get(&id).unwrap().notes.as_deref(), Some("note"));
    }

    #[test]
    fn test_corrupt_ledger() {
        let dir = tempdir().unwrap();
        write(dir.path(), ".changeflow/checkpoints/checkpoints.json", "{ nope");
        assert!(matches!(
            CheckpointStore::open(dir.path()),
            Err(ResourceError::CorruptLedger { .. })
        ));
    }
}
