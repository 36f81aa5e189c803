use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type TaskId = i64;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown {kind} '{value}'")]
pub struct ParseError {
    kind: &'static str,
    value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }

    /// Sort weight on the dashboard, urgent first.
    pub fn rank(self) -> u8 {
        match self {
            Priority::Urgent => 4,
            Priority::High => 3,
            Priority::Medium => 2,
            Priority::Low => 1,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            _ => Err(ParseError {
                kind: "priority",
                value: s.to_string(),
            }),
        }
    }
}

/// Informational grouping shown on a card, independent of the workflow label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    Windsor,
    Customer,
    Vendor,
    Shipper,
    #[default]
    Unassigned,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Windsor => "WINDSOR",
            Category::Customer => "CUSTOMER",
            Category::Vendor => "VENDOR",
            Category::Shipper => "SHIPPER",
            Category::Unassigned => "UNASSIGNED",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "WINDSOR" => Ok(Category::Windsor),
            "CUSTOMER" => Ok(Category::Customer),
            "VENDOR" => Ok(Category::Vendor),
            "SHIPPER" => Ok(Category::Shipper),
            "UNASSIGNED" => Ok(Category::Unassigned),
            _ => Err(ParseError {
                kind: "category",
                value: s.to_string(),
            }),
        }
    }
}

/// Provenance of an email-derived task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedFrom {
    /// Provider message id, unique among imported tasks.
    pub external_id: String,
    /// Raw "From" header, display name included.
    pub sender: String,
    pub account: Option<String>,
    pub subject: String,
    pub snippet: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum TaskOrigin {
    Manual,
    #[serde(rename = "gmail")]
    Imported(ImportedFrom),
}

impl TaskOrigin {
    pub fn imported(&self) -> Option<&ImportedFrom> {
        match self {
            TaskOrigin::Manual => None,
            TaskOrigin::Imported(from) => Some(from),
        }
    }

    pub fn external_id(&self) -> Option<&str> {
        self.imported().map(|from| from.external_id.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub label: String,
    pub category: Category,
    pub notes: Option<String>,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Last time the label changed. Defaults to `created_at`.
    pub last_status_change: DateTime<Utc>,
    pub snooze_until: Option<DateTime<Utc>>,
    pub origin: TaskOrigin,
}

impl Task {
    pub fn sender(&self) -> Option<&str> {
        self.origin.imported().map(|from| from.sender.as_str())
    }
}

/// Payload for a task that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub label: String,
    pub category: Category,
    pub notes: Option<String>,
    pub origin: TaskOrigin,
}

impl NewTask {
    pub fn manual(title: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            priority: Priority::default(),
            label: label.into(),
            category: Category::default(),
            notes: None,
            origin: TaskOrigin::Manual,
        }
    }

    pub fn into_task(self, id: TaskId, now: DateTime<Utc>) -> Task {
        Task {
            id,
            title: self.title,
            description: self.description,
            priority: self.priority,
            label: self.label,
            category: self.category,
            notes: self.notes,
            completed: false,
            created_at: now,
            updated_at: now,
            last_status_change: now,
            snooze_until: None,
            origin: self.origin,
        }
    }
}

/// Partial update. `None` leaves a field untouched; the nested options of
/// `notes` and `snooze_until` allow clearing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    pub label: Option<String>,
    pub category: Option<Category>,
    pub notes: Option<Option<String>>,
    pub completed: Option<bool>,
    pub snooze_until: Option<Option<DateTime<Utc>>>,
    pub created_at: Option<DateTime<Utc>>,
}

impl TaskUpdate {
    pub fn label(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Self::default()
        }
    }

    pub fn completed(completed: bool) -> Self {
        Self {
            completed: Some(completed),
            ..Self::default()
        }
    }

    pub fn priority(priority: Priority) -> Self {
        Self {
            priority: Some(priority),
            ..Self::default()
        }
    }

    pub fn snooze_for(days: i64, now: DateTime<Utc>) -> Self {
        Self {
            snooze_until: Some(Some(now + Duration::days(days))),
            ..Self::default()
        }
    }

    pub fn clear_snooze() -> Self {
        Self {
            snooze_until: Some(None),
            ..Self::default()
        }
    }

    pub fn reset_created_at(now: DateTime<Utc>) -> Self {
        Self {
            created_at: Some(now),
            ..Self::default()
        }
    }

    /// Applies the update in place. Moving a task to a different label
    /// restarts its status clock.
    pub fn apply(self, task: &mut Task, now: DateTime<Utc>) {
        if let Some(title) = self.title {
            task.title = title;
        }
        if let Some(description) = self.description {
            task.description = description;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(label) = self.label {
            if label != task.label {
                task.label = label;
                task.last_status_change = now;
            }
        }
        if let Some(category) = self.category {
            task.category = category;
        }
        if let Some(notes) = self.notes {
            task.notes = notes;
        }
        if let Some(completed) = self.completed {
            task.completed = completed;
        }
        if let Some(snooze_until) = self.snooze_until {
            task.snooze_until = snooze_until;
        }
        if let Some(created_at) = self.created_at {
            // Resetting the creation date restarts the age clock too.
            task.created_at = created_at;
            task.last_status_change = created_at;
        }
        task.updated_at = now;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Label {
    pub id: String,
    pub name: String,
    pub label_type: String, // 'system' or 'user'
    pub messages_total: Option<u32>,
    pub messages_unread: Option<u32>,
}

impl Label {
    pub fn named(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            label_type: "user".to_string(),
            messages_total: None,
            messages_unread: None,
        }
    }
}

/// A provider message that passed validation at the ingestion boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub thread_id: String,
    pub label_ids: Vec<String>,
    pub snippet: String,
    pub from_address: Option<String>,
    pub to_address: Option<String>,
    pub subject: Option<String>,
    pub internal_date: DateTime<Utc>,
    pub body_plain: Option<String>,
    /// First non-plain body part, used when no plain text exists.
    pub body_other: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockedSender {
    /// Normalized address, unique key.
    pub address: String,
    pub reason: String,
    pub blocked_at: DateTime<Utc>,
    pub blocked_by: String,
}

/// Per-account sync bookkeeping, persisted as a JSON document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Watermark: timestamp of the newest imported message.
    pub last_email_time: Option<DateTime<Utc>>,
    pub sync_in_progress: bool,
    pub total_tasks_imported: u64,
    #[serde(default)]
    pub selected_labels: Vec<String>,
}

impl SyncState {
    const SUGGEST_AFTER_HOURS: i64 = 4;

    pub fn should_suggest_sync(&self, now: DateTime<Utc>) -> bool {
        match self.last_sync_time {
            None => true,
            Some(last) => now - last > Duration::hours(Self::SUGGEST_AFTER_HOURS),
        }
    }

    pub fn time_since_last_sync(&self, now: DateTime<Utc>) -> String {
        let Some(last) = self.last_sync_time else {
            return "Never".to_string();
        };

        let elapsed = now - last;
        let plural = |n: i64, unit: &str| format!("{n} {unit}{} ago", if n > 1 { "s" } else { "" });

        if elapsed.num_days() > 0 {
            plural(elapsed.num_days(), "day")
        } else if elapsed.num_hours() > 0 {
            plural(elapsed.num_hours(), "hour")
        } else if elapsed.num_minutes() > 0 {
            plural(elapsed.num_minutes(), "minute")
        } else {
            "Just now".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, hour, 0, 0).unwrap()
    }

    fn task() -> Task {
        NewTask::manual("Call supplier", "INBOX").into_task(1, at(8))
    }

    #[test]
    fn test_label_change_restarts_status_clock() {
        let mut task = task();
        TaskUpdate::label("ORDER").apply(&mut task, at(12));
        assert_eq!(task.label, "ORDER");
        assert_eq!(task.last_status_change, at(12));
        assert_eq!(task.updated_at, at(12));
    }

    #[test]
    fn test_same_label_keeps_status_clock() {
        let mut task = task();
        TaskUpdate::label("INBOX").apply(&mut task, at(12));
        assert_eq!(task.last_status_change, at(8));
        assert_eq!(task.updated_at, at(12));
    }

    #[test]
    fn test_reset_created_at_restarts_status_clock() {
        let mut task = task();
        TaskUpdate::label("ORDER").apply(&mut task, at(10));
        TaskUpdate::reset_created_at(at(15)).apply(&mut task, at(15));
        assert_eq!(task.created_at, at(15));
        assert_eq!(task.last_status_change, at(15));
        assert_eq!(task.label, "ORDER");
    }

    #[test]
    fn test_snooze_and_clear() {
        let mut task = task();
        TaskUpdate::snooze_for(3, at(9)).apply(&mut task, at(9));
        assert_eq!(task.snooze_until, Some(at(9) + Duration::days(3)));
        TaskUpdate::clear_snooze().apply(&mut task, at(10));
        assert_eq!(task.snooze_until, None);
    }

    #[test]
    fn test_priority_parse() {
        assert_eq!("URGENT".parse::<Priority>(), Ok(Priority::Urgent));
        assert!("soon".parse::<Priority>().is_err());
        assert!(Priority::Urgent > Priority::High);
    }

    #[test]
    fn test_time_since_last_sync() {
        let mut state = SyncState::default();
        assert_eq!(state.time_since_last_sync(at(12)), "Never");
        assert!(state.should_suggest_sync(at(12)));

        state.last_sync_time = Some(at(10));
        assert_eq!(state.time_since_last_sync(at(12)), "2 hours ago");
        assert!(!state.should_suggest_sync(at(12)));

        state.last_sync_time = Some(at(12));
        assert_eq!(state.time_since_last_sync(at(12)), "Just now");

        state.last_sync_time = Some(at(12) - Duration::days(1));
        assert_eq!(state.time_since_last_sync(at(12)), "1 day ago");
        assert!(state.should_suggest_sync(at(12)));
    }

    #[test]
    fn test_sync_state_json_shape() {
        let state = SyncState {
            last_email_time: Some(at(7)),
            total_tasks_imported: 3,
            ..SyncState::default()
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["totalTasksImported"], 3);
        assert!(json["lastSyncTime"].is_null());
        let back: SyncState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }
}
