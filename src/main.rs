use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Duration, Local, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use google_gmail1::Gmail;
use inflections::case::to_title_case;
use tracing::{Level, error, warn};
use yup_oauth2::ApplicationSecret;

use taskdeck::age;
use taskdeck::auth::{Authenticator, RingStorage};
use taskdeck::blocklist::Blocklist;
use taskdeck::board;
use taskdeck::config::{self, Config};
use taskdeck::db::Database;
use taskdeck::gmail::GmailClient;
use taskdeck::mail::{MailError, MailProvider};
use taskdeck::models::{Category, NewTask, Priority, TaskId, TaskUpdate};
use taskdeck::store::{SyncStateStore, TaskStore};
use taskdeck::sync::{SyncError, SyncNotice, SyncSession, select_labels, sync_running};

#[derive(Parser, Debug)]
#[command(name = "taskdeck", version, about = "Gmail messages as tasks on a workflow board.")]
struct Cli {
    /// Write debug logs to the configured debug log file.
    #[arg(long, global = true)]
    debug: bool,

    #[arg(long, global = true, default_value = config::DEFAULT_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import new messages from Gmail as tasks.
    Sync {
        /// Label name or id to sync. Repeat for several; remembered for next time.
        #[arg(long = "label")]
        labels: Vec<String>,
        /// Fetch from this date instead of the stored watermark, for this run only.
        #[arg(long)]
        since: Option<NaiveDate>,
        /// Start even if another sync looks like it is still running.
        #[arg(long)]
        force: bool,
    },
    /// List the Gmail labels available for syncing.
    Labels,
    /// Show the board.
    Tasks {
        /// Include empty sections.
        #[arg(long)]
        all: bool,
    },
    /// Create a task by hand.
    Add {
        title: String,
        #[arg(long, default_value = "INBOX")]
        label: String,
        #[arg(long, default_value = "medium")]
        priority: Priority,
        #[arg(long, default_value = "UNASSIGNED")]
        category: Category,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Move a task to another section.
    Move { id: TaskId, label: String },
    /// Mark a task completed.
    Done {
        id: TaskId,
        /// Reopen instead.
        #[arg(long)]
        undo: bool,
    },
    /// Change a task's priority.
    Priority { id: TaskId, priority: Priority },
    /// Silence age warnings for a number of days.
    Snooze {
        id: TaskId,
        #[arg(default_value_t = 1)]
        days: i64,
    },
    Unsnooze { id: TaskId },
    /// Restart a task's creation date at now.
    ResetAge { id: TaskId },
    /// Block the sender of an imported task and delete the task.
    Spam { id: TaskId },
    Block {
        address: String,
        #[arg(long)]
        reason: Option<String>,
    },
    Unblock { address: String },
    /// List blocked senders.
    Blocked,
    /// Show sync status for an account.
    Status {
        #[arg(long)]
        account: Option<String>,
    },
    /// Make the next sync start from a date.
    SetWatermark {
        date: NaiveDate,
        #[arg(long)]
        account: Option<String>,
    },
    /// Forget all sync state for an account.
    ResetSync {
        #[arg(long)]
        account: Option<String>,
    },
    /// Remove the stored OAuth token.
    ResetToken,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    init_logging(&config, cli.debug)?;

    let db = Arc::new(Database::new(&config.database_url).await?);
    db.run_migrations().await?;

    let actor = config.actor.clone().or_else(|| config.account.clone());

    match cli.command {
        Command::Sync {
            labels,
            since,
            force,
        } => {
            let since = since.map(local_midnight).transpose()?;
            return run_sync(&config, db, labels, since, force).await;
        }
        Command::Labels => {
            let client = connect(&config).await?;
            for label in client.list_labels().await? {
                let display_name = if label.label_type == "user" {
                    to_title_case(&label.name)
                } else {
                    label.name.clone()
                };
                println!(
                    "{:<24} {:<28} {:<7} {:>6} total {:>6} unread",
                    label.id,
                    display_name,
                    label.label_type,
                    label.messages_total.unwrap_or(0),
                    label.messages_unread.unwrap_or(0)
                );
            }
        }
        Command::Tasks { all } => {
            let tasks = db.list_all().await?;
            let now = Utc::now();
            for section in board::organize(&tasks) {
                if section.tasks.is_empty() && !all {
                    continue;
                }
                println!("== {} ({})", section.label, section.tasks.len());
                for task in &section.tasks {
                    let info = age::classify(task, now);
                    let flag = if info.urgent {
                        "!!"
                    } else if info.warning {
                        "! "
                    } else {
                        "  "
                    };
                    println!(
                        "{flag} #{:<5} [{:<6}] {}  ({})",
                        task.id,
                        task.priority.as_str(),
                        task.title,
                        info.display_text()
                    );
                    if let Some(sender) = task.sender() {
                        println!("           from {sender}");
                    }
                }
            }
        }
        Command::Add {
            title,
            label,
            priority,
            category,
            description,
            notes,
        } => {
            let id = db
                .create(NewTask {
                    description: description.unwrap_or_default(),
                    priority,
                    category,
                    notes,
                    ..NewTask::manual(title, label)
                })
                .await?;
            println!("Created task #{id}");
        }
        Command::Move { id, label } => {
            let task = db.update(id, TaskUpdate::label(label)).await?;
            println!("Moved #{id} to {}", task.label);
        }
        Command::Done { id, undo } => {
            db.update(id, TaskUpdate::completed(!undo)).await?;
            println!("#{id} {}", if undo { "reopened" } else { "completed" });
        }
        Command::Priority { id, priority } => {
            db.update(id, TaskUpdate::priority(priority)).await?;
            println!("#{id} is now {priority}");
        }
        Command::Snooze { id, days } => {
            if days <= 0 {
                bail!("snooze needs a positive number of days");
            }
            let task = db.update(id, TaskUpdate::snooze_for(days, Utc::now())).await?;
            println!("{}", age::classify(&task, Utc::now()).tooltip());
        }
        Command::Unsnooze { id } => {
            db.update(id, TaskUpdate::clear_snooze()).await?;
            println!("Snooze cleared for #{id}");
        }
        Command::ResetAge { id } => {
            db.update(id, TaskUpdate::reset_created_at(Utc::now())).await?;
            println!("Creation date of #{id} reset");
        }
        Command::Spam { id } => {
            let mut blocklist = Blocklist::load(db.clone()).await?;
            let entry = blocklist
                .mark_as_spam(db.as_ref(), id, actor.as_deref())
                .await?;
            println!("Blocked {} and deleted #{id}", entry.address);
        }
        Command::Block { address, reason } => {
            let mut blocklist = Blocklist::load(db.clone()).await?;
            let entry = blocklist
                .block(&address, reason.as_deref(), actor.as_deref())
                .await?;
            println!("Blocked {}", entry.address);
        }
        Command::Unblock { address } => {
            let mut blocklist = Blocklist::load(db.clone()).await?;
            blocklist.unblock(&address).await?;
            println!("Unblocked {}", address.trim());
        }
        Command::Blocked => {
            let blocklist = Blocklist::load(db.clone()).await?;
            for entry in blocklist.entries() {
                println!(
                    "{:<40} {}  by {}  ({})",
                    entry.address,
                    entry.blocked_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
                    entry.blocked_by,
                    entry.reason
                );
            }
        }
        Command::Status { account } => {
            let account = resolve_account(&config, &db, account).await?;
            let state = SyncStateStore::get(db.as_ref(), &account).await?;
            let now = Utc::now();
            println!("Account:        {account}");
            println!("Last sync:      {}", state.time_since_last_sync(now));
            println!(
                "Watermark:      {}",
                state
                    .last_email_time
                    .map(|at| at.with_timezone(&Local).to_rfc2822())
                    .unwrap_or_else(|| "none (next sync is a first sync)".to_string())
            );
            println!("In progress:    {}", state.sync_in_progress);
            println!("Imported total: {}", state.total_tasks_imported);
            println!("Labels:         {}", state.selected_labels.join(", "));
            if state.should_suggest_sync(now) {
                println!("A sync is suggested.");
            }
        }
        Command::SetWatermark { date, account } => {
            let account = resolve_account(&config, &db, account).await?;
            let date = local_midnight(date)?;
            db.set_custom_watermark(&account, date).await?;
            println!("Next sync for {account} starts from {}", date.with_timezone(&Local));
        }
        Command::ResetSync { account } => {
            let account = resolve_account(&config, &db, account).await?;
            db.reset(&account).await?;
            println!("Sync state for {account} cleared");
        }
        Command::ResetToken => {
            RingStorage.clear_token().await?;
            println!("Token cleared. Run any Gmail command to sign in again.");
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn init_logging(config: &Config, debug: bool) -> Result<()> {
    if debug {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.debug_log)
            .with_context(|| format!("Failed to open {}", config.debug_log.display()))?;
        tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(Level::WARN)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

/// Reads the OAuth client secret. A missing or unreadable file is a
/// configuration problem, reported before any network call.
async fn load_credentials(config: &Config) -> Result<ApplicationSecret, SyncError> {
    Authenticator::load_secret(&config.credentials_path)
        .await
        .map_err(|e| {
            SyncError::Configuration(format!("{}: {e:#}", config.credentials_path.display()))
        })
}

async fn open_client(secret: ApplicationSecret) -> Result<GmailClient, MailError> {
    let auth = Authenticator::authenticate(secret)
        .await
        .map_err(|e| MailError::transport("Failed to sign in", format!("{e:#}")))?;

    let connector = hyper_rustls::HttpsConnectorBuilder::new()
        .with_native_roots()
        .map_err(|e| MailError::transport("Failed to load native roots", e))?
        .https_only()
        .enable_http1()
        .build();
    let hub = Gmail::new(hyper::Client::builder().build(connector), auth);
    Ok(GmailClient::new(hub))
}

async fn connect(config: &Config) -> Result<GmailClient> {
    let secret = load_credentials(config).await?;
    Ok(open_client(secret).await?)
}

/// Logs the cause and shows the user only the retry notice.
fn sync_failed(e: SyncError) -> ExitCode {
    error!("sync failed: {e}");
    println!("{}", SyncNotice::Failed);
    ExitCode::FAILURE
}

async fn run_sync(
    config: &Config,
    db: Arc<Database>,
    requested: Vec<String>,
    since: Option<DateTime<Utc>>,
    force: bool,
) -> Result<ExitCode> {
    let secret = load_credentials(config).await?;
    let client = match open_client(secret).await {
        Ok(client) => Arc::new(client),
        Err(e) => return Ok(sync_failed(e.into())),
    };
    let account = match client.account_address().await {
        Ok(account) => account,
        Err(e) => return Ok(sync_failed(e.into())),
    };
    if let Some(expected) = config.account.as_deref().filter(|expected| *expected != account) {
        warn!("signed in as {account}, settings name {expected}");
    }

    let mut state = SyncStateStore::get(db.as_ref(), &account).await?;
    let stale_after = Duration::minutes(config.stale_sync_minutes);
    if !force && sync_running(&state, Utc::now(), stale_after) {
        bail!("a sync for {account} is already running, retry later or pass --force");
    }

    let wanted = if !requested.is_empty() {
        requested.clone()
    } else if !state.selected_labels.is_empty() {
        state.selected_labels.clone()
    } else {
        config.default_labels.clone()
    };
    let selection = match select_labels(client.as_ref(), &wanted).await {
        Ok(selection) => selection,
        Err(SyncError::Configuration(reason)) => bail!(reason),
        Err(e) => return Ok(sync_failed(e)),
    };

    if !requested.is_empty() && state.selected_labels != requested {
        state.selected_labels = requested;
        db.save(&account, &state).await?;
    }

    let session = SyncSession::new(client, db.clone(), db.clone(), db);
    match session.sync(&account, &selection, since).await {
        Ok(report) => {
            println!("{}", report.notice());
            if let Some(interruption) = &report.interrupted {
                error!(
                    "sync stopped at {}: {} ({} imported before stopping)",
                    interruption.label, interruption.reason, report.imported
                );
                return Ok(ExitCode::FAILURE);
            }
            if report.skipped_blocked > 0 {
                println!("{} message(s) from blocked senders skipped", report.skipped_blocked);
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => Ok(sync_failed(e)),
    }
}

async fn resolve_account(config: &Config, db: &Database, explicit: Option<String>) -> Result<String> {
    if let Some(account) = explicit.or_else(|| config.account.clone()) {
        return Ok(account);
    }
    match db.accounts().await?.as_slice() {
        [only] => Ok(only.clone()),
        [] => bail!("no account has synced yet, pass --account"),
        _ => bail!("several accounts are known, pass --account"),
    }
}

fn local_midnight(date: NaiveDate) -> Result<DateTime<Utc>> {
    date.and_hms_opt(0, 0, 0)
        .and_then(|midnight| midnight.and_local_timezone(Local).earliest())
        .map(|local| local.with_timezone(&Utc))
        .with_context(|| format!("{date} has no local midnight"))
}
