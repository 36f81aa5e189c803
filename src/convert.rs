use tracing::debug;

use crate::blocklist::Blocklist;
use crate::models::{Category, ImportedFrom, Message, NewTask, Priority, TaskOrigin};

pub const DESCRIPTION_LIMIT: usize = 500;
pub const NO_SUBJECT: &str = "No Subject";

const ELLIPSIS: &str = "...";

/// Builds the task payload for `message`, or `None` when its sender is blocked.
pub fn convert(
    message: &Message,
    label: &str,
    account: Option<&str>,
    blocklist: &Blocklist,
) -> Option<NewTask> {
    let sender = message.from_address.clone().unwrap_or_default();
    if !sender.is_empty() && blocklist.is_blocked(&sender) {
        debug!("message {} from blocked sender, dropped", message.id);
        return None;
    }

    let subject = message.subject.clone().unwrap_or_default();
    let title = if subject.trim().is_empty() {
        NO_SUBJECT.to_string()
    } else {
        subject.clone()
    };

    let account = account
        .map(str::to_string)
        .or_else(|| message.to_address.as_deref().and_then(guess_account));

    Some(NewTask {
        title,
        description: describe(message),
        priority: infer_priority(&subject),
        label: label.to_string(),
        category: Category::Unassigned,
        notes: None,
        origin: TaskOrigin::Imported(ImportedFrom {
            external_id: message.id.clone(),
            sender,
            account,
            subject,
            snippet: message.snippet.clone(),
        }),
    })
}

/// First rule that matches wins, checked most severe first.
pub fn infer_priority(subject: &str) -> Priority {
    let subject = subject.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| subject.contains(w));

    if has(&["urgent", "asap"]) {
        Priority::Urgent
    } else if has(&["important", "priority"]) {
        Priority::High
    } else if has(&["fyi", "reminder"]) {
        Priority::Low
    } else {
        Priority::Medium
    }
}

/// First token of a "To" header that looks like an address.
pub fn guess_account(to: &str) -> Option<String> {
    to.split(|c: char| c.is_whitespace() || matches!(c, ',' | '<' | '>'))
        .find(|token| token.contains('@'))
        .map(str::to_string)
}

fn describe(message: &Message) -> String {
    let body = [message.body_plain.as_deref(), message.body_other.as_deref()]
        .into_iter()
        .flatten()
        .map(clean_body)
        .find(|body| !body.is_empty())
        .unwrap_or_else(|| message.snippet.clone());

    truncate(&body, DESCRIPTION_LIMIT)
}

fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}{ELLIPSIS}", &text[..cut]),
        None => text.to_string(),
    }
}

fn clean_body(body: &str) -> String {
    let normalized = body.replace("\r\n", "\n").replace('\r', "\n");
    let mut result = String::with_capacity(normalized.len());

    let mut consecutive_empty_lines = 0;
    let mut first_content = true;

    for line in normalized.split('\n') {
        let trimmed = line.trim_end();

        if trimmed.is_empty() {
            consecutive_empty_lines += 1;
            continue;
        }

        if !first_content {
            // At most one blank line between paragraphs.
            let newlines_to_add = std::cmp::min(consecutive_empty_lines + 1, 2);
            for _ in 0..newlines_to_add {
                result.push('\n');
            }
        }

        result.push_str(trimmed);
        consecutive_empty_lines = 0;
        first_content = false;
    }

    result
}
