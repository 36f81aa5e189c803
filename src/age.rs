//! How long a task has sat in its current section, and how loudly to say so.

use chrono::{DateTime, Local, Utc};

use crate::models::Task;

pub const WARNING_AFTER_DAYS: i64 = 1;
pub const URGENT_AFTER_DAYS: i64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgeStyle {
    Normal,
    Warning,
    Urgent,
    Snoozed,
}

impl AgeStyle {
    pub fn background(self) -> &'static str {
        match self {
            AgeStyle::Normal => "#fff",
            AgeStyle::Warning => "#fff3e0",
            AgeStyle::Urgent => "#ffebee",
            AgeStyle::Snoozed => "#f8f9fa",
        }
    }

    pub fn border(self) -> &'static str {
        match self {
            AgeStyle::Normal => "#e0e0e0",
            AgeStyle::Warning => "#ff9800",
            AgeStyle::Urgent => "#f44336",
            AgeStyle::Snoozed => "#bdbdbd",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgeInfo {
    pub days_in_status: i64,
    pub warning: bool,
    pub urgent: bool,
    pub snoozed: bool,
    pub style: AgeStyle,
    /// When the task entered its current status.
    pub anchor: DateTime<Utc>,
    pub snooze_until: Option<DateTime<Utc>>,
}

/// Classifies `task` at `now`. A snooze in effect silences warnings no matter
/// how old the task is.
pub fn classify(task: &Task, now: DateTime<Utc>) -> AgeInfo {
    let snoozed = task.snooze_until.is_some_and(|until| now < until);

    // Stored rows always carry last_status_change, seeded from created_at.
    let anchor = task.last_status_change;

    // Whole days, truncated. A clock that ran backwards reads as today.
    let days_in_status = (now - anchor).num_days().max(0);

    let warning = !snoozed && days_in_status >= WARNING_AFTER_DAYS;
    let urgent = !snoozed && days_in_status >= URGENT_AFTER_DAYS;

    let style = if snoozed {
        AgeStyle::Snoozed
    } else if urgent {
        AgeStyle::Urgent
    } else if warning {
        AgeStyle::Warning
    } else {
        AgeStyle::Normal
    };

    AgeInfo {
        days_in_status,
        warning,
        urgent,
        snoozed,
        style,
        anchor,
        snooze_until: task.snooze_until.filter(|_| snoozed),
    }
}

impl AgeInfo {
    pub fn display_text(&self) -> String {
        if self.snoozed {
            return "Snoozed".to_string();
        }
        match self.days_in_status {
            0 => "Today".to_string(),
            1 => "1 day".to_string(),
            n => format!("{n} days"),
        }
    }

    pub fn tooltip(&self) -> String {
        let since = format_date(self.anchor);
        let mut text = format!(
            "In current status since {since} ({} {} ago)",
            self.days_in_status,
            if self.days_in_status == 1 { "day" } else { "days" }
        );
        if let Some(until) = self.snooze_until {
            text.push_str(&format!(", snoozed until {}", format_date(until)));
        }
        text
    }
}

fn format_date(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewTask, TaskUpdate};
    use chrono::{Duration, TimeZone};

    fn created(at: DateTime<Utc>) -> Task {
        NewTask::manual("Follow up", "FOLLOW UP").into_task(1, at)
    }

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_partial_days_round_down() {
        let task = created(base());
        let info = classify(&task, base() + Duration::hours(23));
        assert_eq!(info.days_in_status, 0);
        assert!(!info.warning);
        assert_eq!(info.style, AgeStyle::Normal);
        assert_eq!(info.display_text(), "Today");
    }

    #[test]
    fn test_days_follow_anchor() {
        for hours in [0, 1, 24, 47, 48, 71, 72, 240] {
            let task = created(base());
            let info = classify(&task, base() + Duration::hours(hours));
            assert_eq!(info.days_in_status, hours / 24, "after {hours} hours");
        }
    }

    #[test]
    fn test_warning_then_urgent() {
        let task = created(base());

        let one = classify(&task, base() + Duration::days(1));
        assert!(one.warning && !one.urgent);
        assert_eq!(one.style, AgeStyle::Warning);
        assert_eq!(one.display_text(), "1 day");

        let three = classify(&task, base() + Duration::days(3) + Duration::hours(2));
        assert!(three.warning && three.urgent);
        assert_eq!(three.style, AgeStyle::Urgent);
        assert_eq!(three.display_text(), "3 days");
        assert_eq!(three.style.border(), "#f44336");
    }

    #[test]
    fn test_label_change_resets_anchor() {
        let mut task = created(base());
        task.last_status_change = base() + Duration::days(4);
        let info = classify(&task, base() + Duration::days(5));
        assert_eq!(info.days_in_status, 1);
        assert!(!info.urgent);
    }

    #[test]
    fn test_reset_age_clears_urgency() {
        let mut task = created(base());
        let later = base() + Duration::days(5);
        assert!(classify(&task, later).urgent);

        TaskUpdate::reset_created_at(later).apply(&mut task, later);
        let info = classify(&task, later);
        assert_eq!(info.days_in_status, 0);
        assert!(!info.warning && !info.urgent);
    }

    #[test]
    fn test_snooze_silences_old_task() {
        let mut task = created(base());
        let now = base() + Duration::days(10);
        task.snooze_until = Some(now + Duration::hours(1));

        let info = classify(&task, now);
        assert!(info.snoozed);
        assert!(!info.warning);
        assert!(!info.urgent);
        assert_eq!(info.days_in_status, 10);
        assert_eq!(info.style, AgeStyle::Snoozed);
        assert_eq!(info.display_text(), "Snoozed");
        assert!(info.tooltip().contains("snoozed until"));
        assert!(info.tooltip().contains("(10 days ago)"));
    }

    #[test]
    fn test_expired_snooze_is_ignored() {
        let mut task = created(base());
        let now = base() + Duration::days(4);
        task.snooze_until = Some(now);

        let info = classify(&task, now);
        assert!(!info.snoozed);
        assert!(info.urgent);
        assert!(!info.tooltip().contains("snoozed"));
    }

    #[test]
    fn test_future_anchor_reads_as_today() {
        let task = created(base() + Duration::hours(3));
        assert_eq!(classify(&task, base()).days_in_status, 0);
    }
}
