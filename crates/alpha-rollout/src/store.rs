//! Execution persistence
//!
//! The store owns the one-active-execution-per-target rule: `insert_exclusive`
//! checks and inserts under a single lock. `update` is the read-modify-write
//! used by callers other than the driver, so they never overwrite a newer
//! state with a stale copy.

use crate::error::StoreError;
use crate::execution::RolloutExecution;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

pub trait ExecutionStore: Send + Sync {
    /// Insert a new execution unless its target already has a non-terminal one
    fn insert_exclusive(&self, execution: &RolloutExecution) -> Result<(), StoreError>;

    /// Overwrite an existing execution
    fn save(&self, execution: &RolloutExecution) -> Result<(), StoreError>;

    /// Load `id` and hand it to `apply` under the store's lock, writing it
    /// back when `apply` returns true. Returns the execution as stored
    /// afterwards, or `None` when `id` is unknown.
    fn update(
        &self,
        id: &str,
        apply: &mut dyn FnMut(&mut RolloutExecution) -> bool,
    ) -> Result<Option<RolloutExecution>, StoreError>;

    fn get(&self, id: &str) -> Result<Option<RolloutExecution>, StoreError>;

    /// Executions for `target`, oldest first
    fn list_for_target(&self, target: &str) -> Result<Vec<RolloutExecution>, StoreError>;

    /// Every execution, oldest first
    fn list(&self) -> Result<Vec<RolloutExecution>, StoreError>;

    fn active_for_target(&self, target: &str) -> Result<Option<RolloutExecution>, StoreError> {
        Ok(self
            .list_for_target(target)?
            .into_iter()
            .find(|e| !e.is_terminal()))
    }
}

fn busy(existing: &RolloutExecution) -> StoreError {
    StoreError::TargetBusy {
        target: existing.target_resource_id.clone(),
        execution_id: existing.id.clone(),
    }
}

fn sorted(mut executions: Vec<RolloutExecution>) -> Vec<RolloutExecution> {
    executions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    executions
}

// =============================================================================
// In-memory
// =============================================================================

#[derive(Debug, Default)]
pub struct InMemoryStore {
    data: Mutex<HashMap<String, RolloutExecution>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_data(&self) -> Result<MutexGuard<'_, HashMap<String, RolloutExecution>>, StoreError> {
        self.data
            .lock()
            .map_err(|e| StoreError::Lock(format!("failed to acquire lock: {}", e)))
    }
}

impl ExecutionStore for InMemoryStore {
    fn insert_exclusive(&self, execution: &RolloutExecution) -> Result<(), StoreError> {
        let mut data = self.lock_data()?;
        if let Some(existing) = data
            .values()
            .find(|e| e.target_resource_id == execution.target_resource_id && !e.is_terminal())
        {
            return Err(busy(existing));
        }
        data.insert(execution.id.clone(), execution.clone());
        Ok(())
    }

    fn save(&self, execution: &RolloutExecution) -> Result<(), StoreError> {
        self.lock_data()?
            .insert(execution.id.clone(), execution.clone());
        Ok(())
    }

    fn update(
        &self,
        id: &str,
        apply: &mut dyn FnMut(&mut RolloutExecution) -> bool,
    ) -> Result<Option<RolloutExecution>, StoreError> {
        let mut data = self.lock_data()?;
        let Some(stored) = data.get_mut(id) else {
            return Ok(None);
        };
        let mut execution = stored.clone();
        if apply(&mut execution) {
            *stored = execution.clone();
        }
        Ok(Some(stored.clone()))
    }

    fn get(&self, id: &str) -> Result<Option<RolloutExecution>, StoreError> {
        Ok(self.lock_data()?.get(id).cloned())
    }

    fn list_for_target(&self, target: &str) -> Result<Vec<RolloutExecution>, StoreError> {
        let data = self.lock_data()?;
        Ok(sorted(
            data.values()
                .filter(|e| e.target_resource_id == target)
                .cloned()
                .collect(),
        ))
    }

    fn list(&self) -> Result<Vec<RolloutExecution>, StoreError> {
        Ok(sorted(self.lock_data()?.values().cloned().collect()))
    }
}

// =============================================================================
// File-backed
// =============================================================================

/// One JSON file per execution under a directory.
///
/// Writes go to a temporary file that is renamed into place, so a crash never
/// leaves a half-written execution behind. File names are execution ids, which
/// must be UUIDs; anything else is never joined onto the directory.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> Option<PathBuf> {
        Uuid::parse_str(id)
            .ok()
            .map(|uuid| self.dir.join(format!("{}.json", uuid.hyphenated())))
    }

    fn guard(&self) -> Result<MutexGuard<'_, ()>, StoreError> {
        self.write_lock
            .lock()
            .map_err(|e| StoreError::Lock(format!("failed to acquire lock: {}", e)))
    }

    fn write(&self, execution: &RolloutExecution) -> Result<(), StoreError> {
        let path = self
            .path_for(&execution.id)
            .ok_or_else(|| StoreError::InvalidId(execution.id.clone()))?;
        let json = serde_json::to_vec_pretty(execution)?;
        let tmp = self.dir.join(format!(".{}.json.tmp", execution.id));
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn read(&self, id: &str) -> Result<Option<RolloutExecution>, StoreError> {
        let Some(path) = self.path_for(id) else {
            return Ok(None);
        };
        match fs::read(path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn read_all(&self) -> Result<Vec<RolloutExecution>, StoreError> {
        let mut executions = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_json = path.extension().is_some_and(|ext| ext == "json");
            let is_tmp = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.'));
            if !is_json || is_tmp {
                continue;
            }
            let bytes = fs::read(&path)?;
            executions.push(serde_json::from_slice(&bytes)?);
        }
        Ok(sorted(executions))
    }
}

impl ExecutionStore for FileStore {
    fn insert_exclusive(&self, execution: &RolloutExecution) -> Result<(), StoreError> {
        let _guard = self.guard()?;
        if let Some(existing) = self
            .read_all()?
            .into_iter()
            .find(|e| e.target_resource_id == execution.target_resource_id && !e.is_terminal())
        {
            return Err(busy(&existing));
        }
        self.write(execution)
    }

    fn save(&self, execution: &RolloutExecution) -> Result<(), StoreError> {
        let _guard = self.guard()?;
        self.write(execution)
    }

    fn update(
        &self,
        id: &str,
        apply: &mut dyn FnMut(&mut RolloutExecution) -> bool,
    ) -> Result<Option<RolloutExecution>, StoreError> {
        let _guard = self.guard()?;
        let Some(mut execution) = self.read(id)? else {
            return Ok(None);
        };
        let before = execution.clone();
        if apply(&mut execution) {
            self.write(&execution)?;
            return Ok(Some(execution));
        }
        Ok(Some(before))
    }

    fn get(&self, id: &str) -> Result<Option<RolloutExecution>, StoreError> {
        self.read(id)
    }

    fn list_for_target(&self, target: &str) -> Result<Vec<RolloutExecution>, StoreError> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|e| e.target_resource_id == target)
            .collect())
    }

    fn list(&self) -> Result<Vec<RolloutExecution>, StoreError> {
        self.read_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RolloutConfig;
    use crate::execution::RolloutRequest;
    use crate::transition::RolloutEvent;
    use alpha_core::{PolicyDocument, PolicyStatement};

    fn execution(target: &str) -> RolloutExecution {
        let request = RolloutRequest::new(
            target,
            PolicyDocument::new(vec![PolicyStatement::allow(["s3:GetObject"]).unwrap()]),
        );
        RolloutExecution::new(&request, None, &RolloutConfig::default())
    }

    fn check_exclusive(store: &dyn ExecutionStore) {
        let first = execution("role/app");
        store.insert_exclusive(&first).unwrap();

        let err = store.insert_exclusive(&execution("role/app")).unwrap_err();
        assert_eq!(
            err,
            StoreError::TargetBusy {
                target: "role/app".into(),
                execution_id: first.id.clone(),
            }
        );

        store.insert_exclusive(&execution("role/other")).unwrap();

        let mut done = first.clone();
        done.apply(&RolloutEvent::Cancelled);
        assert!(done.is_terminal());
        store.save(&done).unwrap();

        store.insert_exclusive(&execution("role/app")).unwrap();
        assert_eq!(store.list_for_target("role/app").unwrap().len(), 2);
        assert!(store.active_for_target("role/app").unwrap().is_some());
        assert_eq!(store.list().unwrap().len(), 3);
    }

    #[test]
    fn test_in_memory_one_active_per_target() {
        check_exclusive(&InMemoryStore::new());
    }

    #[test]
    fn test_file_store_one_active_per_target() {
        let dir = tempfile::tempdir().unwrap();
        check_exclusive(&FileStore::open(dir.path()).unwrap());
    }

    fn check_update(store: &dyn ExecutionStore) {
        let exec = execution("role/app");
        store.insert_exclusive(&exec).unwrap();

        let unchanged = store
            .update(&exec.id, &mut |e| {
                e.notes.push("discarded".into());
                false
            })
            .unwrap()
            .unwrap();
        assert!(unchanged.notes.is_empty());

        let changed = store
            .update(&exec.id, &mut |e| {
                e.notes.push("kept".into());
                true
            })
            .unwrap()
            .unwrap();
        assert_eq!(changed.notes, vec!["kept".to_string()]);
        assert_eq!(store.get(&exec.id).unwrap(), Some(changed));

        let missing = uuid::Uuid::new_v4().to_string();
        assert!(store.update(&missing, &mut |_| true).unwrap().is_none());
    }

    #[test]
    fn test_in_memory_update() {
        check_update(&InMemoryStore::new());
    }

    #[test]
    fn test_file_store_update() {
        let dir = tempfile::tempdir().unwrap();
        check_update(&FileStore::open(dir.path()).unwrap());
    }

    #[test]
    fn test_file_store_ignores_ids_that_are_not_uuids() {
        let root = tempfile::tempdir().unwrap();
        let state = root.path().join("state");
        let store = FileStore::open(&state).unwrap();

        // A valid execution file sitting next to the state dir
        let outside = execution("role/app");
        fs::write(
            root.path().join("outside.json"),
            serde_json::to_vec(&outside).unwrap(),
        )
        .unwrap();

        assert!(store.get("../outside").unwrap().is_none());
        assert!(store.get("..%2Foutside").unwrap().is_none());
        assert!(store.update("../outside", &mut |_| true).unwrap().is_none());

        let mut renamed = outside.clone();
        renamed.id = "../escaped".into();
        assert_eq!(
            store.save(&renamed).unwrap_err(),
            StoreError::InvalidId("../escaped".into())
        );
        assert!(!root.path().join("escaped.json").exists());
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let exec = execution("role/app");
        FileStore::open(dir.path()).unwrap().insert_exclusive(&exec).unwrap();

        let reopened = FileStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get(&exec.id).unwrap(), Some(exec));
        assert!(reopened.get("missing").unwrap().is_none());
        assert!(reopened.get(&uuid::Uuid::new_v4().to_string()).unwrap().is_none());
    }
}
