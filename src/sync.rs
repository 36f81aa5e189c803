//! Incremental import of mail messages as tasks.
//!
//! A run reads the account's watermark, lists candidates per label, drops
//! messages that were already imported or come from blocked senders, stores
//! the rest as tasks and finally moves the watermark to the newest imported
//! message. The in-progress flag is always cleared at the end of a run, even
//! when the provider failed halfway.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::blocklist::{Blocklist, BlocklistError};
use crate::convert::convert;
use crate::mail::{MailError, MailProvider};
use crate::models::{Label, Message, SyncState};
use crate::store::{BlocklistStore, StoreError, SyncStateStore, TaskStore};

/// Per-label fetch on an account's first sync.
pub const BOOTSTRAP_PER_LABEL: u32 = 20;
/// Total candidates kept on an account's first sync, newest first.
pub const BOOTSTRAP_LIMIT: usize = 50;
pub const INCREMENTAL_PER_LABEL: u32 = 500;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Blocklist(#[from] BlocklistError),
    #[error(transparent)]
    Mail(#[from] MailError),
}

/// Where a run stopped talking to the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interruption {
    pub label: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Candidates inside the fetch window after merging labels.
    pub found: usize,
    pub imported: usize,
    pub skipped_duplicate: usize,
    pub skipped_blocked: usize,
    /// Messages that could not be fetched, converted or stored.
    pub failed: usize,
    /// Newest internal date among the messages imported by this run.
    pub latest_imported: Option<DateTime<Utc>>,
    /// Account watermark after the run.
    pub watermark: Option<DateTime<Utc>>,
    pub interrupted: Option<Interruption>,
}

/// The message shown to the user after a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncNotice {
    Imported(usize),
    AlreadyImported(usize),
    UpToDate,
    Failed,
}

impl SyncReport {
    pub fn notice(&self) -> SyncNotice {
        if self.interrupted.is_some() {
            SyncNotice::Failed
        } else if self.imported > 0 {
            SyncNotice::Imported(self.imported)
        } else if self.skipped_duplicate > 0 {
            SyncNotice::AlreadyImported(self.skipped_duplicate)
        } else {
            SyncNotice::UpToDate
        }
    }
}

impl SyncNotice {
    pub fn for_result(result: &Result<SyncReport, SyncError>) -> Self {
        match result {
            Ok(report) => report.notice(),
            Err(_) => SyncNotice::Failed,
        }
    }
}

impl fmt::Display for SyncNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let plural = |n: usize| if n == 1 { "" } else { "s" };
        match *self {
            SyncNotice::Imported(n) => write!(f, "Imported {n} new task{} from Gmail", plural(n)),
            SyncNotice::AlreadyImported(n) => write!(
                f,
                "Found {n} email{} but they were already imported",
                plural(n)
            ),
            SyncNotice::UpToDate => f.write_str("No new emails to import - you're up to date!"),
            SyncNotice::Failed => f.write_str("Error syncing Gmail - please try again"),
        }
    }
}

/// Whether another run for this account looks alive. A flag older than
/// `stale_after` is assumed to be left over from a run that never finished.
pub fn sync_running(state: &SyncState, now: DateTime<Utc>, stale_after: Duration) -> bool {
    state.sync_in_progress
        && state
            .last_sync_time
            .is_some_and(|started| now - started < stale_after)
}

/// Resolves label names (case-insensitive) or ids against the account's
/// labels, keeping the order given.
pub async fn select_labels(mail: &dyn MailProvider, wanted: &[String]) -> Result<Vec<Label>, SyncError> {
    let available = mail.list_labels().await?;
    wanted
        .iter()
        .map(|name| {
            available
                .iter()
                .find(|label| label.id == *name || label.name.eq_ignore_ascii_case(name))
                .cloned()
                .ok_or_else(|| SyncError::Configuration(format!("no label named '{name}'")))
        })
        .collect()
}

struct Candidate {
    message: Message,
    /// Index of the selected label the message was first listed under.
    listed_under: usize,
}

/// The label a message is filed under: the first selected label it carries,
/// else the one it was listed under.
fn originating_label<'a>(message: &Message, labels: &'a [Label], listed_under: usize) -> &'a Label {
    labels
        .iter()
        .find(|label| message.label_ids.contains(&label.id))
        .unwrap_or(&labels[listed_under])
}

/// Everything one account's sync needs, wired together explicitly.
pub struct SyncSession {
    mail: Arc<dyn MailProvider>,
    tasks: Arc<dyn TaskStore>,
    states: Arc<dyn SyncStateStore>,
    blocked: Arc<dyn BlocklistStore>,
}

impl SyncSession {
    pub fn new(
        mail: Arc<dyn MailProvider>,
        tasks: Arc<dyn TaskStore>,
        states: Arc<dyn SyncStateStore>,
        blocked: Arc<dyn BlocklistStore>,
    ) -> Self {
        Self {
            mail,
            tasks,
            states,
            blocked,
        }
    }

    /// Imports new messages from `labels` for `account`.
    ///
    /// `override_watermark` replaces the stored watermark as the start of the
    /// fetch window for this run only. Callers are expected to check the
    /// in-progress flag first; two concurrent runs for one account are not
    /// serialized here.
    pub async fn sync(
        &self,
        account: &str,
        labels: &[Label],
        override_watermark: Option<DateTime<Utc>>,
    ) -> Result<SyncReport, SyncError> {
        if account.trim().is_empty() {
            return Err(SyncError::Configuration("no mail account".to_string()));
        }
        if labels.is_empty() {
            return Err(SyncError::Configuration("no labels selected".to_string()));
        }

        let mut state = self.states.get(account).await?;
        state.sync_in_progress = true;
        state.last_sync_time = Some(Utc::now());
        self.states.save(account, &state).await?;

        let fetch_since = override_watermark.or(state.last_email_time);
        info!(
            "sync {account}: {} label(s), {}",
            labels.len(),
            match fetch_since {
                Some(since) => format!("since {}", since.to_rfc3339()),
                None => "first sync".to_string(),
            }
        );

        let outcome = self.run(account, labels, fetch_since).await;
        let state = self.finish(account, outcome.as_ref().ok()).await?;

        let mut report = outcome?;
        report.watermark = state.last_email_time;
        info!(
            "sync {account}: {} found, {} imported, {} duplicate, {} blocked, {} failed",
            report.found,
            report.imported,
            report.skipped_duplicate,
            report.skipped_blocked,
            report.failed
        );
        Ok(report)
    }

    async fn run(
        &self,
        account: &str,
        labels: &[Label],
        fetch_since: Option<DateTime<Utc>>,
    ) -> Result<SyncReport, SyncError> {
        let blocklist = Blocklist::load(self.blocked.clone()).await?;
        let mut known = self.tasks.imported_ids().await?;

        let mut report = SyncReport::default();
        let candidates = self.collect(labels, fetch_since, &mut report).await;
        report.found = candidates.len();

        for Candidate {
            message,
            listed_under,
        } in candidates
        {
            if known.contains(&message.id) {
                debug!("message {} already imported", message.id);
                report.skipped_duplicate += 1;
                continue;
            }

            let label = originating_label(&message, labels, listed_under);
            let Some(task) = convert(&message, &label.name, Some(account), &blocklist) else {
                report.skipped_blocked += 1;
                continue;
            };

            match self.tasks.create_if_absent(task).await {
                Ok(Some(id)) => {
                    debug!("message {} imported as task {id} in {}", message.id, label.name);
                    report.imported += 1;
                    report.latest_imported = report.latest_imported.max(Some(message.internal_date));
                    known.insert(message.id);
                }
                Ok(None) => {
                    report.skipped_duplicate += 1;
                    known.insert(message.id);
                }
                Err(e) => {
                    warn!("failed to store task for message {}: {e}", message.id);
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Candidates for this run, newest first. A provider failure while listing
    /// a label stops further listing but keeps what was gathered so far.
    async fn collect(
        &self,
        labels: &[Label],
        fetch_since: Option<DateTime<Utc>>,
        report: &mut SyncReport,
    ) -> Vec<Candidate> {
        let per_label = match fetch_since {
            Some(_) => INCREMENTAL_PER_LABEL,
            None => BOOTSTRAP_PER_LABEL,
        };

        let mut candidates = Vec::new();
        let mut seen = HashSet::new();

        for (index, label) in labels.iter().enumerate() {
            let ids = match self.mail.list_messages(&label.id, per_label, fetch_since).await {
                Ok(ids) => ids,
                Err(e) => {
                    warn!("listing {} failed, stopping: {e}", label.name);
                    report.interrupted = Some(Interruption {
                        label: label.name.clone(),
                        reason: e.to_string(),
                    });
                    break;
                }
            };
            debug!("{}: {} message id(s) listed", label.name, ids.len());

            // Details are fetched one at a time.
            for id in ids {
                if !seen.insert(id.clone()) {
                    continue;
                }
                match self.mail.get_message(&id).await {
                    Ok(message) => {
                        if fetch_since.is_none_or(|since| message.internal_date >= since) {
                            candidates.push(Candidate {
                                message,
                                listed_under: index,
                            });
                        }
                    }
                    Err(e) => {
                        warn!("skipping message {id}: {e}");
                        report.failed += 1;
                    }
                }
            }
        }

        candidates.sort_by(|a, b| b.message.internal_date.cmp(&a.message.internal_date));
        if fetch_since.is_none() {
            candidates.truncate(BOOTSTRAP_LIMIT);
        }
        candidates
    }

    async fn finish(
        &self,
        account: &str,
        report: Option<&SyncReport>,
    ) -> Result<SyncState, StoreError> {
        let mut state = self.states.get(account).await?;

        if let Some(latest) = report.and_then(|r| r.latest_imported) {
            state.last_email_time = state.last_email_time.max(Some(latest));
            state.total_tasks_imported += report.map_or(0, |r| r.imported as u64);
        }
        state.sync_in_progress = false;
        state.last_sync_time = Some(Utc::now());

        self.states.save(account, &state).await?;
        Ok(state)
    }
}
