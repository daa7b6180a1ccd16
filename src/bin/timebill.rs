use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use timebill::{NewTimeEntry, PullOptions, SyncStatus, TimeBill, TimeEntry};

#[derive(Parser)]
#[command(name = "timebill", about = "Billable time tracking with Jira worklog sync")]
struct Cli {
    /// Database path (default: ~/.timebill/timebill.db)
    #[arg(long)]
    db: Option<String>,

    /// Owner of the time entries (default: the stored owner_id)
    #[arg(long)]
    owner: Option<String>,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Page size for Jira issue searches
    #[arg(long)]
    page_size: Option<u32>,

    /// Issues whose worklogs are fetched at once during a pull
    #[arg(long, default_value = "1")]
    concurrency: usize,

    #[command(subcommand)]
    command: Commands,
}

/// Progress reporter that writes to stderr.
struct StderrProgress;

impl timebill::SyncProgress for StderrProgress {
    fn on_issues_discovered(&self, count: usize) {
        eprintln!("Found {count} issues with worklogs");
    }

    fn on_issue_fetched(&self, issue_key: &str, worklogs: usize) {
        eprintln!("  {issue_key}: {worklogs} worklogs");
    }

    fn on_issue_failed(&self, issue_key: &str, error: &timebill::Error) {
        eprintln!("  {issue_key}: failed ({error})");
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Manage local time entries
    Entries {
        #[command(subcommand)]
        action: EntryAction,
    },
    /// Sync worklogs with Jira
    Sync {
        #[command(subcommand)]
        target: SyncTarget,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show entry counts and the last sync
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum EntryAction {
    /// Record time
    Add {
        description: String,
        /// Hours worked (e.g. 1.5)
        #[arg(long)]
        hours: f64,
        /// Day worked (YYYY-MM-DD, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Jira issue key or URL
        #[arg(long)]
        issue: Option<String>,
        #[arg(long)]
        non_billable: bool,
    },
    /// List entries, newest first
    List {
        #[arg(long)]
        json: bool,
    },
    /// Show one entry
    Show {
        id: String,
        #[arg(long)]
        json: bool,
    },
    /// Change an entry; omitted fields keep their value
    Edit {
        id: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        hours: Option<f64>,
        #[arg(long)]
        date: Option<String>,
        /// Jira issue key or URL ("" clears it)
        #[arg(long)]
        issue: Option<String>,
        #[arg(long)]
        billable: Option<bool>,
    },
    /// Delete an entry (the Jira worklog is kept)
    Delete { id: String },
}

#[derive(Subcommand)]
enum SyncTarget {
    /// Import worklogs started within a date range
    Pull {
        /// First day (YYYY-MM-DD)
        start: String,
        /// Last day, inclusive (YYYY-MM-DD)
        end: String,
        /// Only these issues (key or URL, repeatable); skips the search
        #[arg(long = "issue")]
        issues: Vec<String>,
    },
    /// Import every worklog on one issue
    Issue {
        /// Issue key or URL
        issue: String,
    },
    /// Create a Jira worklog from a local entry
    Push {
        entry_id: String,
        /// Issue key or URL (overrides the entry's own)
        #[arg(long)]
        issue: Option<String>,
    },
    /// Show recent sync runs
    Jobs {
        #[arg(long, default_value = "10")]
        limit: u32,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get { key: String },
    /// Set a config value (owner_id, jira.base_url, jira.email, jira.cooldown_ms)
    Set { key: String, value: String },
    /// Remove a config value
    Unset { key: String },
    /// List all config values
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let db = match &cli.db {
        Some(path) => timebill::Database::open_at(path).await?,
        None => timebill::Database::open().await?,
    };

    let mut options = PullOptions {
        fetch_concurrency: cli.concurrency.max(1),
        ..PullOptions::default()
    };
    if let Some(size) = cli.page_size {
        options.page_size = size.clamp(1, 5000);
    }
    let tb = TimeBill::connect(db).await?.with_pull_options(options);

    match cli.command {
        Commands::Config { action } => handle_config(&tb, action).await?,
        Commands::Status { json } => {
            let owner = resolve_owner(&tb, cli.owner).await?;
            print_status(&tb, &owner, json).await?;
        }
        Commands::Entries { action } => {
            let owner = resolve_owner(&tb, cli.owner).await?;
            handle_entries(&tb, &owner, action).await?;
        }
        Commands::Sync { target } => {
            let owner = resolve_owner(&tb, cli.owner).await?;
            handle_sync(&tb, &owner, target).await?;
        }
    }
    Ok(())
}

async fn resolve_owner(tb: &TimeBill, flag: Option<String>) -> anyhow::Result<String> {
    if let Some(owner) = flag {
        return Ok(owner);
    }
    tb.config_get(timebill::CONFIG_OWNER_ID).await?.ok_or_else(|| {
        anyhow::anyhow!(
            "No owner set. Pass --owner or run: timebill config set {} <ID>",
            timebill::CONFIG_OWNER_ID
        )
    })
}

/// Token cancelled on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling...");
            child.cancel();
        }
    });
    token
}

async fn handle_sync(tb: &TimeBill, owner: &str, target: SyncTarget) -> anyhow::Result<()> {
    let progress = StderrProgress;
    let cancel = cancel_on_ctrl_c();
    match target {
        SyncTarget::Pull { start, end, issues } => {
            let report = tb
                .pull_by_window(owner, &start, &end, &issues, &progress, &cancel)
                .await?;
            print_sync_report(&report)?;
        }
        SyncTarget::Issue { issue } => {
            let report = tb.pull_for_issue(owner, &issue, &progress, &cancel).await?;
            print_sync_report(&report)?;
        }
        SyncTarget::Push { entry_id, issue } => {
            let entry = tb
                .push_entry(owner, &entry_id, issue.as_deref(), &cancel)
                .await?;
            println!(
                "Pushed {} to {} as worklog {}",
                entry.id,
                entry.external_issue_key.as_deref().unwrap_or("?"),
                entry.external_worklog_id.as_deref().unwrap_or("?")
            );
        }
        SyncTarget::Jobs { limit } => {
            let jobs = tb.sync_jobs(owner, limit).await?;
            if jobs.is_empty() {
                println!("No sync runs yet.");
            }
            for job in jobs {
                println!(
                    "#{} {} {} {} created={} dup={} skipped={} failed={}{}",
                    job.id,
                    job.started_at,
                    job.job_kind,
                    job.status,
                    job.created_items,
                    job.duplicate_items,
                    job.skipped_items,
                    job.failed_items,
                    job.error_message
                        .map(|e| format!(" ({e})"))
                        .unwrap_or_default()
                );
            }
        }
    }
    Ok(())
}

fn print_sync_report(report: &timebill::SyncReport) -> anyhow::Result<()> {
    let label = match report.status {
        SyncStatus::Success => "Done",
        SyncStatus::PartialFailure => "Done with failures",
        SyncStatus::Failed => "Failed",
        SyncStatus::Cancelled => "Cancelled",
    };
    println!(
        "{label}: {} created, {} already synced, {} skipped across {} issues",
        report.created, report.duplicates, report.skipped, report.issues_total
    );
    for failure in &report.failures {
        match &failure.worklog_id {
            Some(id) => println!("  {} worklog {id}: {}", failure.issue_key, failure.error),
            None => println!("  {}: {}", failure.issue_key, failure.error),
        }
    }
    if report.status == SyncStatus::Failed {
        anyhow::bail!(
            "sync failed: {}",
            report.error.as_deref().unwrap_or("no entries could be pulled")
        );
    }
    Ok(())
}

async fn handle_entries(tb: &TimeBill, owner: &str, action: EntryAction) -> anyhow::Result<()> {
    match action {
        EntryAction::Add {
            description,
            hours,
            date,
            issue,
            non_billable,
        } => {
            let date = match date {
                Some(d) => timebill::date_util::parse_date(&d)?,
                None => chrono::Local::now().date_naive(),
            };
            let entry = tb
                .create_entry(
                    owner,
                    NewTimeEntry {
                        description,
                        hours,
                        date,
                        billable: !non_billable,
                        issue_key: issue,
                    },
                )
                .await?;
            println!("Created {}", entry.id);
        }
        EntryAction::List { json } => {
            let entries = tb.list_entries(owner).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if entries.is_empty() {
                println!("No time entries.");
            } else {
                for entry in &entries {
                    print_entry_line(entry);
                }
            }
        }
        EntryAction::Show { id, json } => {
            let entry = tb.get_entry(owner, &id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entry)?);
            } else {
                print_entry_line(&entry);
                if let Some(synced) = entry.synced_at {
                    println!("  synced at {}", synced.to_rfc3339());
                }
            }
        }
        EntryAction::Edit {
            id,
            description,
            hours,
            date,
            issue,
            billable,
        } => {
            let current = tb.get_entry(owner, &id).await?;
            let date = match date {
                Some(d) => timebill::date_util::parse_date(&d)?,
                None => current.date,
            };
            let changes = NewTimeEntry {
                description: description.unwrap_or(current.description),
                hours: hours.unwrap_or(current.hours),
                date,
                billable: billable.unwrap_or(current.billable),
                issue_key: match issue {
                    Some(i) if i.trim().is_empty() => None,
                    Some(i) => Some(i),
                    None => current.external_issue_key,
                },
            };
            let entry = tb.update_entry(owner, &id, changes).await?;
            print_entry_line(&entry);
        }
        EntryAction::Delete { id } => {
            tb.delete_entry(owner, &id).await?;
            println!("Deleted {id}");
        }
    }
    Ok(())
}

fn print_entry_line(entry: &TimeEntry) {
    let issue = match (&entry.external_issue_key, &entry.external_worklog_id) {
        (Some(key), Some(worklog)) => format!(" [{key} #{worklog}]"),
        (Some(key), None) => format!(" [{key}]"),
        _ => String::new(),
    };
    println!(
        "{}  {}  {:>6.2}h  {}{}{}",
        entry.id,
        entry.date,
        entry.hours,
        entry.description,
        issue,
        if entry.billable { "" } else { " (non-billable)" }
    );
}

async fn print_status(tb: &TimeBill, owner: &str, json: bool) -> anyhow::Result<()> {
    let status = tb.status(owner).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }
    println!("Time Entries ({owner})");
    println!("  Entries:   {}", status.entries.total_entries);
    println!("  Synced:    {}", status.entries.synced_entries);
    println!("  Hours:     {:.2}", status.entries.total_hours);
    match (&status.jira_base_url, status.jira_configured) {
        (Some(url), true) => println!("  Jira:      {url}"),
        _ => println!("  Jira:      not configured"),
    }
    println!(
        "  Last sync: {}",
        status
            .last_sync
            .map(|job| format!("{} ({})", job.completed_at.unwrap_or(job.started_at), job.status))
            .unwrap_or_else(|| "never".to_string())
    );
    Ok(())
}

async fn handle_config(tb: &TimeBill, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => match tb.config_get(&key).await? {
            Some(v) => println!("{key} = {v}"),
            None => println!("{key} is not set"),
        },
        ConfigAction::Set { key, value } => {
            tb.config_set(&key, &value).await?;
            println!("Config updated.");
        }
        ConfigAction::Unset { key } => {
            if tb.config_unset(&key).await? {
                println!("Removed {key}.");
            } else {
                println!("{key} is not set");
            }
        }
        ConfigAction::List => {
            let items = tb.config_list().await?;
            if items.is_empty() {
                println!("No configuration set.");
            } else {
                for (k, v) in items {
                    println!("{k} = {v}");
                }
            }
        }
    }
    Ok(())
}
