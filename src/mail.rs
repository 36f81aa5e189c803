use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{Label, Message};

#[derive(Debug, Error)]
pub enum MailError {
    /// The provider call failed (network, quota, expired token).
    #[error("{context}: {detail}")]
    Transport { context: String, detail: String },
    /// The provider answered but the payload could not be trusted.
    #[error("malformed message {id}: {reason}")]
    Malformed { id: String, reason: String },
}

impl MailError {
    pub fn transport(context: impl Into<String>, detail: impl ToString) -> Self {
        MailError::Transport {
            context: context.into(),
            detail: detail.to_string(),
        }
    }
}

/// Read access to one signed-in mail account.
#[async_trait]
pub trait MailProvider: Send + Sync {
    /// Address of the account the credential belongs to.
    async fn account_address(&self) -> Result<String, MailError>;

    async fn list_labels(&self) -> Result<Vec<Label>, MailError>;

    /// Ids of the newest messages under `label_id`, at most `max_results`.
    /// With `not_older_than` set the provider may return a wider window; callers
    /// re-filter on the exact instant.
    async fn list_messages(
        &self,
        label_id: &str,
        max_results: u32,
        not_older_than: Option<DateTime<Utc>>,
    ) -> Result<Vec<String>, MailError>;

    async fn get_message(&self, id: &str) -> Result<Message, MailError>;
}

#[cfg(test)]
pub mod testing {
    //! In-memory mailbox for exercising the sync pipeline.

    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    use chrono::Duration;

    use super::*;

    #[derive(Default)]
    pub struct FakeMailbox {
        pub account: String,
        pub messages: Mutex<Vec<Message>>,
        pub failing_labels: HashSet<String>,
        pub failing_messages: HashSet<String>,
        /// Account and label lookups fail.
        pub offline: bool,
        /// Every `get_message` call, in order.
        pub fetched: Mutex<Vec<String>>,
        pub list_calls: Mutex<Vec<(String, u32, Option<DateTime<Utc>>)>>,
    }

    impl FakeMailbox {
        pub fn new(account: &str) -> Self {
            Self {
                account: account.to_string(),
                ..Self::default()
            }
        }

        pub fn push(&self, message: Message) {
            self.messages.lock().unwrap().push(message);
        }

        pub fn fail_label(mut self, label_id: &str) -> Self {
            self.failing_labels.insert(label_id.to_string());
            self
        }

        pub fn fail_message(mut self, id: &str) -> Self {
            self.failing_messages.insert(id.to_string());
            self
        }

        pub fn go_offline(mut self) -> Self {
            self.offline = true;
            self
        }
    }

    pub fn message(id: &str, labels: &[&str], from: &str, subject: &str, at: DateTime<Utc>) -> Message {
        Message {
            id: id.to_string(),
            thread_id: id.to_string(),
            label_ids: labels.iter().map(|l| l.to_string()).collect(),
            snippet: format!("snippet of {id}"),
            from_address: Some(from.to_string()),
            to_address: Some("Me <me@example.com>".to_string()),
            subject: Some(subject.to_string()),
            internal_date: at,
            body_plain: Some(format!("body of {id}")),
            body_other: None,
        }
    }

    #[async_trait]
    impl MailProvider for FakeMailbox {
        async fn account_address(&self) -> Result<String, MailError> {
            if self.offline {
                return Err(MailError::transport("Failed to get profile", "dns error: no route to host"));
            }
            Ok(self.account.clone())
        }

        async fn list_labels(&self) -> Result<Vec<Label>, MailError> {
            if self.offline {
                return Err(MailError::transport("Failed to list labels", "dns error: no route to host"));
            }
            let mut seen = HashMap::new();
            for message in self.messages.lock().unwrap().iter() {
                for id in &message.label_ids {
                    seen.entry(id.clone())
                        .or_insert_with(|| Label::named(id.clone(), id.clone()));
                }
            }
            let mut labels: Vec<Label> = seen.into_values().collect();
            labels.sort_by(|a, b| a.id.cmp(&b.id));
            Ok(labels)
        }

        async fn list_messages(
            &self,
            label_id: &str,
            max_results: u32,
            not_older_than: Option<DateTime<Utc>>,
        ) -> Result<Vec<String>, MailError> {
            self.list_calls
                .lock()
                .unwrap()
                .push((label_id.to_string(), max_results, not_older_than));

            if self.failing_labels.contains(label_id) {
                return Err(MailError::transport("Failed to list messages", "401 Unauthorized"));
            }

            // Day-granular like a real provider query.
            let floor = not_older_than.map(|since| since - Duration::days(1));
            let mut matching: Vec<Message> = self
                .messages
                .lock()
                .unwrap()
                .iter()
                .filter(|m| m.label_ids.iter().any(|l| l == label_id))
                .filter(|m| floor.is_none_or(|floor| m.internal_date >= floor))
                .cloned()
                .collect();
            matching.sort_by(|a, b| b.internal_date.cmp(&a.internal_date));

            Ok(matching
                .into_iter()
                .take(max_results as usize)
                .map(|m| m.id)
                .collect())
        }

        async fn get_message(&self, id: &str) -> Result<Message, MailError> {
            self.fetched.lock().unwrap().push(id.to_string());
            if self.failing_messages.contains(id) {
                return Err(MailError::Malformed {
                    id: id.to_string(),
                    reason: "missing internal date".to_string(),
                });
            }
            self.messages
                .lock()
                .unwrap()
                .iter()
                .find(|m| m.id == id)
                .cloned()
                .ok_or_else(|| MailError::transport(format!("Failed to get message {id}"), "404"))
        }
    }
}
