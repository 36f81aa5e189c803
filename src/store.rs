//! Persistence collaborators used by the sync pipeline.
//!
//! The task collection, the per-account sync state and the blocklist are
//! reached only through these traits. [`crate::db::Database`] implements all
//! three on a single SQLite pool.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::models::{BlockedSender, NewTask, SyncState, Task, TaskId, TaskUpdate};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("failed to encode stored document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("task {0} not found")]
    NotFound(TaskId),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    Created(Task),
    Updated(Task),
    Deleted(TaskId),
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create(&self, task: NewTask) -> Result<TaskId>;

    /// Inserts an imported task unless one with the same external id exists.
    /// Returns `None` when the insert was suppressed.
    async fn create_if_absent(&self, task: NewTask) -> Result<Option<TaskId>>;

    async fn get(&self, id: TaskId) -> Result<Task>;

    async fn update(&self, id: TaskId, update: TaskUpdate) -> Result<Task>;

    async fn delete(&self, id: TaskId) -> Result<()>;

    /// All tasks, newest first.
    async fn list_all(&self) -> Result<Vec<Task>>;

    /// External ids of every imported task.
    async fn imported_ids(&self) -> Result<HashSet<String>>;

    /// Push feed of changes. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> broadcast::Receiver<TaskEvent>;
}

#[async_trait]
pub trait SyncStateStore: Send + Sync {
    /// Stored state, or the never-synced default. Reading never creates a record.
    async fn get(&self, account: &str) -> Result<SyncState>;

    /// Overwrites the whole record.
    async fn save(&self, account: &str, state: &SyncState) -> Result<()>;

    async fn reset(&self, account: &str) -> Result<()>;

    async fn accounts(&self) -> Result<Vec<String>>;

    /// Forces the next sync to start from `date`.
    async fn set_custom_watermark(&self, account: &str, date: DateTime<Utc>) -> Result<SyncState> {
        let mut state = self.get(account).await?;
        state.last_email_time = Some(date);
        state.last_sync_time = None;
        self.save(account, &state).await?;
        Ok(state)
    }
}

#[async_trait]
pub trait BlocklistStore: Send + Sync {
    /// Inserts or replaces the entry keyed by its address.
    async fn upsert(&self, entry: &BlockedSender) -> Result<()>;

    async fn remove(&self, address: &str) -> Result<()>;

    async fn find(&self, address: &str) -> Result<Option<BlockedSender>>;

    /// Newest block first.
    async fn list(&self) -> Result<Vec<BlockedSender>>;
}
