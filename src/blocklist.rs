use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info};

use crate::models::{BlockedSender, TaskId};
use crate::store::{BlocklistStore, StoreError, TaskStore};

pub const DEFAULT_REASON: &str = "Marked as spam";
pub const SPAM_REASON: &str = "Marked as spam by user";
pub const UNKNOWN_ACTOR: &str = "unknown";

#[derive(Debug, Error)]
pub enum BlocklistError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("cannot block an empty address")]
    EmptyAddress,
    #[error("task {0} was not imported from mail, there is no sender to block")]
    NotImported(TaskId),
}

/// Lower-cased, trimmed address. A `Name <addr>` header is reduced to `addr`.
pub fn normalize(address: &str) -> String {
    let address = address.trim();
    let bare = match (address.rfind('<'), address.rfind('>')) {
        (Some(start), Some(end)) if start < end => &address[start + 1..end],
        _ => address,
    };
    bare.trim().to_lowercase()
}

/// Set of blocked senders, loaded from the store and kept in step with it.
pub struct Blocklist {
    store: Arc<dyn BlocklistStore>,
    entries: HashMap<String, BlockedSender>,
}

impl Blocklist {
    pub async fn load(store: Arc<dyn BlocklistStore>) -> Result<Self, BlocklistError> {
        let entries = store
            .list()
            .await?
            .into_iter()
            .map(|entry| (entry.address.clone(), entry))
            .collect();
        Ok(Self { store, entries })
    }

    pub fn is_blocked(&self, address: &str) -> bool {
        self.entries.contains_key(&normalize(address))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Newest block first.
    pub fn entries(&self) -> Vec<&BlockedSender> {
        let mut entries: Vec<&BlockedSender> = self.entries.values().collect();
        entries.sort_by(|a, b| {
            b.blocked_at
                .cmp(&a.blocked_at)
                .then_with(|| a.address.cmp(&b.address))
        });
        entries
    }

    /// Inserts or replaces the entry for `address`.
    pub async fn block(
        &mut self,
        address: &str,
        reason: Option<&str>,
        actor: Option<&str>,
    ) -> Result<BlockedSender, BlocklistError> {
        let key = normalize(address);
        if key.is_empty() {
            return Err(BlocklistError::EmptyAddress);
        }

        let entry = BlockedSender {
            address: key.clone(),
            reason: reason.unwrap_or(DEFAULT_REASON).to_string(),
            blocked_at: Utc::now(),
            blocked_by: actor.unwrap_or(UNKNOWN_ACTOR).to_string(),
        };
        self.store.upsert(&entry).await?;
        self.entries.insert(key, entry.clone());
        info!("blocked sender {}", entry.address);
        Ok(entry)
    }

    pub async fn unblock(&mut self, address: &str) -> Result<(), BlocklistError> {
        let key = normalize(address);
        // The store may hold entries added after this list was loaded.
        self.store.remove(&key).await?;
        if self.entries.remove(&key).is_some() {
            info!("unblocked sender {key}");
        } else {
            debug!("unblock of {key}: not in loaded list");
        }
        Ok(())
    }

    /// Blocks the sender of an imported task and deletes the task.
    pub async fn mark_as_spam(
        &mut self,
        tasks: &dyn TaskStore,
        task_id: TaskId,
        actor: Option<&str>,
    ) -> Result<BlockedSender, BlocklistError> {
        let task = tasks.get(task_id).await?;
        let sender = task
            .sender()
            .filter(|sender| !sender.trim().is_empty())
            .ok_or(BlocklistError::NotImported(task_id))?
            .to_string();

        let entry = self.block(&sender, Some(SPAM_REASON), actor).await?;
        tasks.delete(task_id).await?;
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{ImportedFrom, NewTask, TaskOrigin};

    async fn blocklist() -> (Arc<Database>, Blocklist) {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let blocklist = Blocklist::load(db.clone()).await.unwrap();
        (db, blocklist)
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  Spam@X.com "), "spam@x.com");
        assert_eq!(normalize("Spammer <SPAM@x.com>"), "spam@x.com");
        assert_eq!(normalize("\"Doe, Jane\" <jane@corp.io> "), "jane@corp.io");
        assert_eq!(normalize("   "), "");
    }

    #[tokio::test]
    async fn test_block_is_idempotent_and_normalized() {
        let (db, mut blocklist) = blocklist().await;

        blocklist.block(" Spam@X.com", None, Some("alice")).await.unwrap();
        blocklist.block("spam@x.com", Some("again"), None).await.unwrap();

        assert_eq!(blocklist.len(), 1);
        assert!(blocklist.is_blocked("SPAM@x.com"));
        assert!(blocklist.is_blocked("Some Spammer <spam@x.com>"));
        assert!(!blocklist.is_blocked("friend@x.com"));

        let stored = db.list().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].reason, "again");
        assert_eq!(stored[0].blocked_by, UNKNOWN_ACTOR);
    }

    #[tokio::test]
    async fn test_unblock_missing_is_noop() {
        let (db, mut blocklist) = blocklist().await;
        blocklist.block("spam@x.com", None, None).await.unwrap();

        blocklist.unblock("nobody@x.com").await.unwrap();
        assert_eq!(blocklist.len(), 1);

        blocklist.unblock("  SPAM@x.com").await.unwrap();
        assert!(blocklist.is_empty());
        assert!(db.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unblock_removes_entry_added_elsewhere() {
        let (db, mut stale) = blocklist().await;
        let mut other = Blocklist::load(db.clone()).await.unwrap();
        other.block("spam@x.com", None, None).await.unwrap();

        stale.unblock("Spam@X.com").await.unwrap();

        assert!(db.list().await.unwrap().is_empty());
        assert!(!Blocklist::load(db).await.unwrap().is_blocked("spam@x.com"));
    }

    #[tokio::test]
    async fn test_reload_sees_persisted_entries() {
        let (db, mut blocklist) = blocklist().await;
        blocklist.block("spam@x.com", None, None).await.unwrap();

        let reloaded = Blocklist::load(db).await.unwrap();
        assert!(reloaded.is_blocked("spam@x.com"));
        assert_eq!(reloaded.entries()[0].reason, DEFAULT_REASON);
    }

    #[tokio::test]
    async fn test_block_empty_address_rejected() {
        let (_, mut blocklist) = blocklist().await;
        assert!(matches!(
            blocklist.block("  ", None, None).await,
            Err(BlocklistError::EmptyAddress)
        ));
    }

    #[tokio::test]
    async fn test_mark_as_spam_blocks_sender_and_deletes_task() {
        let (db, mut blocklist) = blocklist().await;
        let id = db
            .create(NewTask {
                origin: TaskOrigin::Imported(ImportedFrom {
                    external_id: "m1".to_string(),
                    sender: "Deals <Deals@shop.example>".to_string(),
                    account: None,
                    subject: "50% off".to_string(),
                    snippet: String::new(),
                }),
                ..NewTask::manual("50% off", "INBOX")
            })
            .await
            .unwrap();

        let entry = blocklist
            .mark_as_spam(db.as_ref(), id, Some("alice"))
            .await
            .unwrap();

        assert_eq!(entry.address, "deals@shop.example");
        assert_eq!(entry.reason, SPAM_REASON);
        assert!(blocklist.is_blocked("deals@shop.example"));
        assert!(db.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mark_manual_task_as_spam_fails() {
        let (db, mut blocklist) = blocklist().await;
        let id = db.create(NewTask::manual("Call", "INBOX")).await.unwrap();

        assert!(matches!(
            blocklist.mark_as_spam(db.as_ref(), id, None).await,
            Err(BlocklistError::NotImported(_))
        ));
        assert_eq!(db.list_all().await.unwrap().len(), 1);
    }
}
