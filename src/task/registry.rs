//! Task registry — shared map of task id to lifecycle record.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::TaskError;
use crate::task::record::TaskRecord;

/// In-memory registry of task records.
///
/// Workers mutate records through [`update`](Self::update), which holds the
/// write lock for the duration of the closure so a read-modify-write on one
/// record never interleaves with another. The registry is memory-resident;
/// durable history is an external collaborator's concern.
pub struct TaskRegistry {
    records: RwLock<HashMap<Uuid, TaskRecord>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Insert the `Pending` record for a newly submitted task.
    pub async fn insert(&self, record: TaskRecord) {
        self.records.write().await.insert(record.task_id, record);
    }

    /// Snapshot of one record.
    pub async fn get(&self, task_id: Uuid) -> Result<TaskRecord, TaskError> {
        self.records
            .read()
            .await
            .get(&task_id)
            .cloned()
            .ok_or(TaskError::NotFound { id: task_id })
    }

    /// Apply a mutation to one record under the write lock.
    pub async fn update<F, T>(&self, task_id: Uuid, f: F) -> Result<T, TaskError>
    where
        F: FnOnce(&mut TaskRecord) -> T,
    {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&task_id)
            .ok_or(TaskError::NotFound { id: task_id })?;
        Ok(f(record))
    }

    /// Remove a record outright. Only used to roll back a submission that
    /// raced with shutdown.
    pub async fn remove(&self, task_id: Uuid) -> Option<TaskRecord> {
        self.records.write().await.remove(&task_id)
    }

    /// Number of tracked records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Drop terminal records that finished before `cutoff`. Retention policy
    /// lives outside the core; this is the hook it drives. Returns the
    /// number of records removed.
    pub async fn purge_finished_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, rec| {
            !(rec.is_terminal() && rec.finished_at.is_some_and(|t| t < cutoff))
        });
        before - records.len()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn get_unknown_task_is_not_found() {
        let reg = TaskRegistry::new();
        let err = reg.get(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, TaskError::NotFound { .. }));
    }

    #[tokio::test]
    async fn insert_then_update() {
        let reg = TaskRegistry::new();
        let id = Uuid::new_v4();
        reg.insert(TaskRecord::new(id)).await;

        reg.update(id, |rec| rec.mark_processing("acc1"))
            .await
            .unwrap()
            .unwrap();

        let rec = reg.get(id).await.unwrap();
        assert_eq!(rec.credential.as_deref(), Some("acc1"));
    }

    #[tokio::test]
    async fn purge_removes_only_old_terminal_records() {
        let reg = TaskRegistry::new();

        let done = Uuid::new_v4();
        let mut rec = TaskRecord::new(done);
        rec.mark_processing("acc1").unwrap();
        rec.mark_completed(serde_json::Value::Null).unwrap();
        reg.insert(rec).await;

        let pending = Uuid::new_v4();
        reg.insert(TaskRecord::new(pending)).await;

        let removed = reg.purge_finished_before(Utc::now() + Duration::seconds(1)).await;
        assert_eq!(removed, 1);
        assert!(reg.get(done).await.is_err());
        assert!(reg.get(pending).await.is_ok());
    }
}
