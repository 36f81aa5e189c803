//! Groups tasks into the dashboard's workflow sections.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::models::Task;

pub const DONE: &str = "DONE";

/// Sections that always exist, in display order.
pub const SECTION_ORDER: [&str; 11] = [
    "FOLLOW UP",
    "SCHEDULE CALL",
    "INBOX",
    "ORDER",
    "SHIPPING",
    "AR",
    "AP",
    "PROD INFO",
    "BIDDING",
    "ONE OFF",
    DONE,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub label: String,
    pub tasks: Vec<Task>,
}

impl Section {
    /// Stable identifier, spaces replaced by dashes.
    pub fn id(&self) -> String {
        self.label.split_whitespace().collect::<Vec<_>>().join("-")
    }
}

/// Open tasks grouped by label. Fixed sections come first in their set
/// order, any other label follows alphabetically.
pub fn organize(tasks: &[Task]) -> Vec<Section> {
    let mut groups: BTreeMap<&str, Vec<Task>> = SECTION_ORDER
        .iter()
        .map(|label| (*label, Vec::new()))
        .collect();

    for task in tasks.iter().filter(|t| !t.completed && t.label != DONE) {
        groups.entry(task.label.as_str()).or_default().push(task.clone());
    }

    let mut sections: Vec<Section> = groups
        .into_iter()
        .map(|(label, mut tasks)| {
            tasks.sort_by(by_priority_then_newest);
            Section {
                label: label.to_string(),
                tasks,
            }
        })
        .collect();

    sections.sort_by_key(|section| {
        let fixed = SECTION_ORDER.iter().position(|label| *label == section.label);
        (fixed.unwrap_or(SECTION_ORDER.len()), section.label.clone())
    });
    sections
}

fn by_priority_then_newest(a: &Task, b: &Task) -> Ordering {
    b.priority
        .rank()
        .cmp(&a.priority.rank())
        .then_with(|| b.created_at.cmp(&a.created_at))
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::*;
    use crate::models::{NewTask, Priority};

    fn task(id: i64, label: &str, priority: Priority, age_hours: i64) -> Task {
        let created = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap() - Duration::hours(age_hours);
        let mut task = NewTask::manual(format!("task {id}"), label).into_task(id, created);
        task.priority = priority;
        task
    }

    #[test]
    fn test_fixed_sections_always_present_in_order() {
        let sections = organize(&[]);
        let labels: Vec<&str> = sections.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, SECTION_ORDER.to_vec());
        assert_eq!(sections[0].id(), "FOLLOW-UP");
    }

    #[test]
    fn test_custom_labels_follow_alphabetically() {
        let sections = organize(&[
            task(1, "ZETA", Priority::Low, 0),
            task(2, "ALPHA", Priority::Low, 0),
        ]);
        let tail: Vec<&str> = sections[SECTION_ORDER.len()..]
            .iter()
            .map(|s| s.label.as_str())
            .collect();
        assert_eq!(tail, vec!["ALPHA", "ZETA"]);
    }

    #[test]
    fn test_tasks_sorted_by_priority_then_newest() {
        let sections = organize(&[
            task(1, "ORDER", Priority::Medium, 1),
            task(2, "ORDER", Priority::Urgent, 5),
            task(3, "ORDER", Priority::Medium, 0),
            task(4, "ORDER", Priority::Low, 0),
        ]);
        let order = sections.iter().find(|s| s.label == "ORDER").unwrap();
        let ids: Vec<i64> = order.tasks.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![2, 3, 1, 4]);
    }

    #[test]
    fn test_completed_and_done_hidden() {
        let mut finished = task(1, "INBOX", Priority::High, 0);
        finished.completed = true;
        let sections = organize(&[finished, task(2, DONE, Priority::High, 0)]);
        assert!(sections.iter().all(|s| s.tasks.is_empty()));
    }
}
