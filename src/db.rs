use std::collections::HashSet;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tokio::sync::broadcast;
use tracing::debug;

use crate::models::{
    BlockedSender, ImportedFrom, NewTask, SyncState, Task, TaskId, TaskOrigin, TaskUpdate,
};
use crate::store::{
    BlocklistStore, Result, StoreError, SyncStateStore, TaskEvent, TaskStore,
};

const TASK_COLUMNS: &str = "id, title, description, priority, label, category, notes, completed, \
     created_at, updated_at, last_status_change, snooze_until, source, external_id, from_email, \
     account_email, email_subject, email_snippet";

const EVENT_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    events: broadcast::Sender<TaskEvent>,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        let pool = SqlitePool::connect_with(options).await?;
        Ok(Self::with_pool(pool))
    }

    /// Private database living as long as the returned handle.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let db = Self::with_pool(pool);
        db.run_migrations().await?;
        Ok(db)
    }

    fn with_pool(pool: SqlitePool) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { pool, events }
    }

    pub async fn run_migrations(&self) -> Result<()> {
        let schema = include_str!("../schema.sql");
        sqlx::query(schema).execute(&self.pool).await?;
        Ok(())
    }

    fn notify(&self, event: TaskEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    async fn insert(&self, task: NewTask, if_absent: bool) -> Result<Option<TaskId>> {
        let now = now();
        let imported = task.origin.imported();
        let source = match task.origin {
            TaskOrigin::Manual => "manual",
            TaskOrigin::Imported(_) => "gmail",
        };

        let sql = format!(
            "INSERT INTO tasks (title, description, priority, label, category, notes, completed, \
             created_at, updated_at, last_status_change, snooze_until, source, external_id, \
             from_email, account_email, email_subject, email_snippet) \
             VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?, ?, NULL, ?, ?, ?, ?, ?, ?){}",
            if if_absent {
                " ON CONFLICT(external_id) DO NOTHING"
            } else {
                ""
            }
        );

        let result = sqlx::query(&sql)
            .bind(&task.title)
            .bind(&task.description)
            .bind(task.priority.as_str())
            .bind(&task.label)
            .bind(task.category.as_str())
            .bind(&task.notes)
            .bind(now.timestamp_millis())
            .bind(now.timestamp_millis())
            .bind(now.timestamp_millis())
            .bind(source)
            .bind(imported.map(|from| from.external_id.as_str()))
            .bind(imported.map(|from| from.sender.as_str()))
            .bind(imported.and_then(|from| from.account.as_deref()))
            .bind(imported.map(|from| from.subject.as_str()))
            .bind(imported.map(|from| from.snippet.as_str()))
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            debug!(
                "insert suppressed, external id {:?} already stored",
                task.origin.external_id()
            );
            return Ok(None);
        }

        let id = result.last_insert_rowid();
        self.notify(TaskEvent::Created(task.into_task(id, now)));
        Ok(Some(id))
    }

    async fn write(&self, task: &Task) -> Result<()> {
        sqlx::query(
            "UPDATE tasks SET title = ?, description = ?, priority = ?, label = ?, category = ?, \
             notes = ?, completed = ?, created_at = ?, updated_at = ?, last_status_change = ?, \
             snooze_until = ? WHERE id = ?",
        )
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.priority.as_str())
        .bind(&task.label)
        .bind(task.category.as_str())
        .bind(&task.notes)
        .bind(task.completed)
        .bind(task.created_at.timestamp_millis())
        .bind(task.updated_at.timestamp_millis())
        .bind(task.last_status_change.timestamp_millis())
        .bind(task.snooze_until.map(|at| at.timestamp_millis()))
        .bind(task.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Tasks whose sender or subject contains `term`, newest first.
    pub async fn search_tasks(&self, term: &str) -> Result<Vec<Task>> {
        let pattern = format!("%{}%", term);
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE from_email LIKE ? OR email_subject LIKE ? OR title LIKE ? \
             ORDER BY created_at DESC"
        ))
        .bind(&pattern)
        .bind(&pattern)
        .bind(&pattern)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(task_from_row).collect()
    }
}

/// Current time at storage precision.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

fn timestamp(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {millis}")))
}

fn task_from_row(row: &SqliteRow) -> Result<Task> {
    let priority: String = row.try_get(3)?;
    let category: String = row.try_get(5)?;
    let source: String = row.try_get(12)?;
    let external_id: Option<String> = row.try_get(13)?;

    let origin = match (source.as_str(), external_id) {
        ("gmail", Some(external_id)) => TaskOrigin::Imported(ImportedFrom {
            external_id,
            sender: row.try_get::<Option<String>, _>(14)?.unwrap_or_default(),
            account: row.try_get(15)?,
            subject: row.try_get::<Option<String>, _>(16)?.unwrap_or_default(),
            snippet: row.try_get::<Option<String>, _>(17)?.unwrap_or_default(),
        }),
        _ => TaskOrigin::Manual,
    };

    Ok(Task {
        id: row.try_get(0)?,
        title: row.try_get(1)?,
        description: row.try_get(2)?,
        priority: priority
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("{e}")))?,
        label: row.try_get(4)?,
        category: category
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("{e}")))?,
        notes: row.try_get(6)?,
        completed: row.try_get(7)?,
        created_at: timestamp(row.try_get(8)?)?,
        updated_at: timestamp(row.try_get(9)?)?,
        last_status_change: timestamp(row.try_get(10)?)?,
        snooze_until: row
            .try_get::<Option<i64>, _>(11)?
            .map(timestamp)
            .transpose()?,
        origin,
    })
}

#[async_trait]
impl TaskStore for Database {
    async fn create(&self, task: NewTask) -> Result<TaskId> {
        let id = self.insert(task, false).await?;
        id.ok_or_else(|| StoreError::Corrupt("insert reported no row".to_string()))
    }

    async fn create_if_absent(&self, task: NewTask) -> Result<Option<TaskId>> {
        self.insert(task, true).await
    }

    async fn get(&self, id: TaskId) -> Result<Task> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => task_from_row(&row),
            None => Err(StoreError::NotFound(id)),
        }
    }

    async fn update(&self, id: TaskId, update: TaskUpdate) -> Result<Task> {
        let mut task = TaskStore::get(self, id).await?;
        update.apply(&mut task, now());
        self.write(&task).await?;
        self.notify(TaskEvent::Updated(task.clone()));
        Ok(task)
    }

    async fn delete(&self, id: TaskId) -> Result<()> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        self.notify(TaskEvent::Deleted(id));
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks ORDER BY created_at DESC, id DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(task_from_row).collect()
    }

    async fn imported_ids(&self) -> Result<HashSet<String>> {
        let rows = sqlx::query("SELECT external_id FROM tasks WHERE external_id IS NOT NULL")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>(0).map_err(StoreError::from))
            .collect()
    }

    fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }
}

#[async_trait]
impl SyncStateStore for Database {
    async fn get(&self, account: &str) -> Result<SyncState> {
        let row = sqlx::query("SELECT state FROM sync_state WHERE account = ?")
            .bind(account)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(serde_json::from_str(&row.try_get::<String, _>(0)?)?),
            None => Ok(SyncState::default()),
        }
    }

    async fn save(&self, account: &str, state: &SyncState) -> Result<()> {
        let document = serde_json::to_string(state)?;
        sqlx::query(
            "INSERT INTO sync_state (account, state) VALUES (?, ?) \
             ON CONFLICT(account) DO UPDATE SET state = excluded.state",
        )
        .bind(account)
        .bind(document)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reset(&self, account: &str) -> Result<()> {
        sqlx::query("DELETE FROM sync_state WHERE account = ?")
            .bind(account)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn accounts(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT account FROM sync_state ORDER BY account ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>(0).map_err(StoreError::from))
            .collect()
    }
}

fn blocked_from_row(row: &SqliteRow) -> Result<BlockedSender> {
    Ok(BlockedSender {
        address: row.try_get(0)?,
        reason: row.try_get(1)?,
        blocked_at: timestamp(row.try_get(2)?)?,
        blocked_by: row.try_get(3)?,
    })
}

#[async_trait]
impl BlocklistStore for Database {
    async fn upsert(&self, entry: &BlockedSender) -> Result<()> {
        sqlx::query(
            "INSERT INTO blocked_senders (address, reason, blocked_at, blocked_by) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT(address) DO UPDATE SET reason = excluded.reason, \
             blocked_at = excluded.blocked_at, blocked_by = excluded.blocked_by",
        )
        .bind(&entry.address)
        .bind(&entry.reason)
        .bind(entry.blocked_at.timestamp_millis())
        .bind(&entry.blocked_by)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, address: &str) -> Result<()> {
        sqlx::query("DELETE FROM blocked_senders WHERE address = ?")
            .bind(address)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find(&self, address: &str) -> Result<Option<BlockedSender>> {
        let row = sqlx::query(
            "SELECT address, reason, blocked_at, blocked_by FROM blocked_senders WHERE address = ?",
        )
        .bind(address)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(blocked_from_row).transpose()
    }

    async fn list(&self) -> Result<Vec<BlockedSender>> {
        let rows = sqlx::query(
            "SELECT address, reason, blocked_at, blocked_by FROM blocked_senders \
             ORDER BY blocked_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(blocked_from_row).collect()
    }
}
