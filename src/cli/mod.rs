//! Command-line interface for callsync.
//!
//! Provides commands for scanning and watching the recordings root,
//! registering accounts, and inspecting stored call records.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use crate::config::{self, ResolvedConfig};
use crate::core::{CallFilter, CallStore, DEFAULT_PAGE_SIZE};
use crate::domain::{CallRecord, Playback};
use crate::ingest::{
    register_account, wait_for_root, ArtifactLocator, LiveWatcher, MissingRootPolicy, Reconciler,
    ScanReport, Scanner, UnregisteredPolicy,
};

/// callsync - Call-recording ingestion and reconciliation
#[derive(Parser, Debug)]
#[command(name = "callsync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Database file (overrides CALLSYNC_DB and the config file)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Reconcile every recording under the root in one pass
    Scan {
        /// Recordings root (defaults to the configured root)
        #[arg(short, long)]
        path: Option<PathBuf>,

        /// Only walk the folders of registered callers
        #[arg(long)]
        registered_only: bool,

        /// How to treat callers without an account
        #[arg(long, value_enum)]
        policy: Option<PolicyArg>,

        /// What to do when the root does not exist
        #[arg(long, value_enum)]
        missing_root: Option<MissingRootArg>,
    },

    /// Watch the root and reconcile recordings as they arrive
    Watch {
        /// Recordings root (defaults to the configured root)
        #[arg(short, long)]
        path: Option<PathBuf>,

        /// Delay after a file appears before reading it, in milliseconds
        #[arg(long)]
        settle_ms: Option<u64>,

        /// How to treat callers without an account
        #[arg(long, value_enum)]
        policy: Option<PolicyArg>,

        /// What to do when the root does not exist
        #[arg(long, value_enum)]
        missing_root: Option<MissingRootArg>,

        /// Start watching without a catch-up scan
        #[arg(long)]
        skip_initial_scan: bool,
    },

    /// Register an account and import its recordings
    Register {
        /// Caller identifier (usually a phone number)
        caller_id: String,

        /// Mark the account as verified
        #[arg(long)]
        verified: bool,

        /// Recordings root (defaults to the configured root)
        #[arg(short, long)]
        path: Option<PathBuf>,
    },

    /// List call records, newest first
    List {
        /// Case-insensitive match on caller or session id
        #[arg(short, long)]
        query: Option<String>,

        /// Only this caller id
        #[arg(short, long)]
        caller: Option<String>,

        /// Only records owned by this account id
        #[arg(long)]
        account: Option<i64>,

        /// Page number (1-based)
        #[arg(long, default_value = "1")]
        page: usize,

        /// Records per page
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        per_page: usize,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show one call record and its playback files
    Show {
        /// Record id
        #[arg(required_unless_present = "session")]
        id: Option<i64>,

        /// Look the record up by session id instead
        #[arg(long, conflicts_with = "id")]
        session: Option<String>,

        /// Recordings root used to resolve playback paths
        #[arg(short, long)]
        path: Option<PathBuf>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Show resolved configuration (debug)
    Config,
}

/// Unregistered-caller policy for CLI (maps to UnregisteredPolicy)
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PolicyArg {
    /// Create an account on first sight
    AutoCreate,

    /// Store the record without an owner
    Ownerless,

    /// Skip the artifact
    Reject,
}

impl From<PolicyArg> for UnregisteredPolicy {
    fn from(p: PolicyArg) -> Self {
        match p {
            PolicyArg::AutoCreate => UnregisteredPolicy::AutoCreate,
            PolicyArg::Ownerless => UnregisteredPolicy::Ownerless,
            PolicyArg::Reject => UnregisteredPolicy::Reject,
        }
    }
}

/// Missing-root policy for CLI (maps to MissingRootPolicy)
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum MissingRootArg {
    /// Exit with an error
    Fail,

    /// Poll until the root appears
    Wait,
}

impl From<MissingRootArg> for MissingRootPolicy {
    fn from(m: MissingRootArg) -> Self {
        match m {
            MissingRootArg::Fail => MissingRootPolicy::Fail,
            MissingRootArg::Wait => MissingRootPolicy::Wait,
        }
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let db = self.db;
        match self.command {
            Commands::Scan {
                path,
                registered_only,
                policy,
                missing_root,
            } => {
                run_scan(db, path, registered_only, policy, missing_root).await
            }
            Commands::Watch {
                path,
                settle_ms,
                policy,
                missing_root,
                skip_initial_scan,
            } => {
                run_watch(db, path, settle_ms, policy, missing_root, skip_initial_scan).await
            }
            Commands::Register {
                caller_id,
                verified,
                path,
            } => {
                register(db, path, caller_id, verified).await
            }
            Commands::List {
                query,
                caller,
                account,
                page,
                per_page,
                json,
            } => {
                let filter = CallFilter {
                    account_id: account,
                    caller_id: caller,
                    query,
                };
                list_records(db, filter, page, per_page, json).await
            }
            Commands::Show {
                id,
                session,
                path,
                json,
            } => {
                show_record(db, path, id, session, json).await
            }
            Commands::Config => {
                show_config(db).await
            }
        }
    }
}

/// Open the store at `--db` or the configured database
fn open_store(cfg: &ResolvedConfig, db: Option<PathBuf>) -> Result<Arc<CallStore>> {
    let path = db.unwrap_or_else(|| cfg.database.clone());
    let store = CallStore::open(&path)
        .with_context(|| format!("Failed to open database: {}", path.display()))?;
    Ok(Arc::new(store))
}

fn artifact_locator(cfg: &ResolvedConfig, path: Option<PathBuf>) -> ArtifactLocator {
    let root = path.unwrap_or_else(|| cfg.recordings_root.clone());
    ArtifactLocator::new(root, cfg.ingest.conversation_layouts.clone())
}

fn build_reconciler(
    cfg: &ResolvedConfig,
    db: Option<PathBuf>,
    path: Option<PathBuf>,
    policy: Option<PolicyArg>,
) -> Result<Arc<Reconciler>> {
    let store = open_store(cfg, db)?;
    let policy = policy
        .map(UnregisteredPolicy::from)
        .unwrap_or(cfg.ingest.unregistered_callers);
    Ok(Arc::new(Reconciler::new(store, artifact_locator(cfg, path), policy)))
}

fn print_report(report: &ScanReport) {
    println!("  Created: {}", report.created);
    println!("  Updated: {}", report.updated);
    println!("  Skipped: {}", report.skipped);
    println!("  Failed:  {}", report.failed);
}

/// Reconcile the whole tree once
async fn run_scan(
    db: Option<PathBuf>,
    path: Option<PathBuf>,
    registered_only: bool,
    policy: Option<PolicyArg>,
    missing_root: Option<MissingRootArg>,
) -> Result<()> {
    let cfg = config::config()?;
    let reconciler = build_reconciler(cfg, db, path, policy)?;
    let root = reconciler.root().to_path_buf();

    if !root.is_dir() {
        let missing = missing_root
            .map(MissingRootPolicy::from)
            .unwrap_or(cfg.ingest.missing_root_scan);
        match missing {
            MissingRootPolicy::Fail => {
                anyhow::bail!("Recordings root does not exist: {}", root.display())
            }
            MissingRootPolicy::Wait => {
                eprintln!("Path {} does not exist. Waiting... (Ctrl+C to abort)", root.display());
                let poll = Duration::from_secs(cfg.ingest.wait_poll_secs.max(1));
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        eprintln!("Aborted before the root appeared");
                        return Ok(());
                    }
                    _ = wait_for_root(&root, poll) => {}
                }
            }
        }
    }

    let registered_only = registered_only || cfg.ingest.scan_registered_only;

    eprintln!("Scanning {}...", root.display());
    let report = tokio::task::spawn_blocking(move || -> Result<ScanReport> {
        let filter = if registered_only {
            Some(reconciler.store().registered_caller_ids()?)
        } else {
            None
        };
        let report = Scanner::new(reconciler).scan(filter.as_deref())?;
        Ok(report)
    })
    .await
    .context("Scan task panicked")??;

    println!("Sync complete.");
    print_report(&report);

    Ok(())
}

/// Watch the root until Ctrl+C
async fn run_watch(
    db: Option<PathBuf>,
    path: Option<PathBuf>,
    settle_ms: Option<u64>,
    policy: Option<PolicyArg>,
    missing_root: Option<MissingRootArg>,
    skip_initial_scan: bool,
) -> Result<()> {
    let cfg = config::config()?;
    let reconciler = build_reconciler(cfg, db, path, policy)?;

    let mut watcher_config = cfg.ingest.watcher_config();
    if let Some(ms) = settle_ms {
        watcher_config.settle_delay = Duration::from_millis(ms);
    }
    if let Some(missing) = missing_root {
        watcher_config.missing_root = missing.into();
    }
    watcher_config.initial_scan = !skip_initial_scan;

    println!("Watching: {}", reconciler.root().display());
    println!("Settle delay: {}ms", watcher_config.settle_delay.as_millis());
    println!("Press Ctrl+C to stop");
    println!();

    let (mut event_rx, handle) = LiveWatcher::new(reconciler, watcher_config).start();

    // Set up Ctrl+C handler
    let (stop_tx, mut stop_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        let _ = stop_tx.send(());
    });

    // Event loop
    loop {
        tokio::select! {
            event = event_rx.recv() => match event {
                Some(event) => {
                    println!(
                        "{} {} for session {} ({})",
                        if event.created { "Created" } else { "Updated" },
                        event.kind,
                        event.session_id,
                        event.path.display()
                    );
                }
                // Watcher ended on its own; stop() reports why
                None => break,
            },
            _ = &mut stop_rx => {
                println!();
                println!("Stopping watcher...");
                break;
            }
        }
    }

    let summary = handle.stop().await.context("Watcher failed")?;

    if let Some(initial) = &summary.initial_scan {
        println!("Initial scan:");
        print_report(initial);
    }
    println!("Live events:");
    print_report(&summary.events);

    Ok(())
}

/// Register an account and import its recordings
async fn register(
    db: Option<PathBuf>,
    path: Option<PathBuf>,
    caller_id: String,
    verified: bool,
) -> Result<()> {
    let cfg = config::config()?;
    let reconciler = build_reconciler(cfg, db, path, None)?;

    let registration = tokio::task::spawn_blocking(move || {
        register_account(&reconciler, &caller_id, verified)
    })
    .await
    .context("Registration task panicked")?
    .context("Failed to register account")?;

    println!("Registered account {} for {}", registration.account.id, registration.account.caller_id);
    println!("  Verified: {}", registration.account.is_verified);
    println!("  Attached: {} existing call(s)", registration.attached);
    println!("Imported from caller folder:");
    print_report(&registration.scan);

    Ok(())
}

/// List call records
async fn list_records(
    db: Option<PathBuf>,
    filter: CallFilter,
    page: usize,
    per_page: usize,
    json: bool,
) -> Result<()> {
    let cfg = config::config()?;
    let store = open_store(cfg, db)?;
    let listing = store.list_call_records(&filter, page, per_page)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    if listing.records.is_empty() {
        println!("No call records found");
        return Ok(());
    }

    println!(
        "{:<6} {:<16} {:<32} {:<20} {:<10} {:<5}",
        "ID", "CALLER", "SESSION", "CREATED", "TRANSFER", "CONV"
    );
    println!("{}", "-".repeat(92));

    for record in &listing.records {
        let created = record
            .created_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<6} {:<16} {:<32} {:<20} {:<10} {:<5}",
            record.id,
            record.caller_id,
            record.session_id,
            created,
            record.transfer_reasons.as_deref().unwrap_or("-"),
            if record.conversation_path.is_some() { "yes" } else { "no" }
        );
    }

    println!(
        "\nPage {} of {} ({} records)",
        listing.page,
        listing.num_pages(),
        listing.total
    );

    Ok(())
}

fn playback_display(locator: &ArtifactLocator, record: &CallRecord, variant: Playback) -> String {
    match locator.playback(record, variant) {
        Some(path) => path.display().to_string(),
        None => "not available".to_string(),
    }
}

/// Show one call record
async fn show_record(
    db: Option<PathBuf>,
    path: Option<PathBuf>,
    id: Option<i64>,
    session: Option<String>,
    json: bool,
) -> Result<()> {
    let cfg = config::config()?;
    let store = open_store(cfg, db)?;
    let locator = artifact_locator(cfg, path);

    let record = match (id, &session) {
        (Some(id), _) => store.get_call_record(id)?,
        (None, Some(session)) => store.find_call_by_session(session)?,
        (None, None) => anyhow::bail!("Provide a record id or --session"),
    };
    let record = record.ok_or_else(|| match (id, session) {
        (Some(id), _) => anyhow::anyhow!("Call record not found: {}", id),
        (None, session) => {
            anyhow::anyhow!("No call record for session: {}", session.unwrap_or_default())
        }
    })?;

    let filtered = locator.playback(&record, Playback::Filtered);
    let conversation = locator.playback(&record, Playback::Conversation);

    if json {
        let value = serde_json::json!({
            "record": record,
            "playback": {
                "filtered": filtered,
                "conversation": conversation,
            },
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Call {}", record.id);
    println!("  Session:      {}", record.session_id);
    println!("  Caller:       {}", record.caller_id);
    match record.account_id {
        Some(account) => println!("  Account:      {}", account),
        None => println!("  Account:      (unassociated)"),
    }
    if let Some(created) = record.created_at {
        println!("  Created:      {}", created);
    }
    println!("  Reconciled:   {}", record.last_reconciled_at);
    println!();
    println!("Artifacts:");
    println!("  Recording:    {}", record.wav_path.as_deref().unwrap_or("-"));
    if let Some(size) = record.wav_size {
        println!("                {} bytes", size);
    }
    println!("  Transcript:   {}", record.txt_path.as_deref().unwrap_or("-"));
    println!("  Conversation: {}", record.conversation_path.as_deref().unwrap_or("-"));
    if record.transfer_reasons.is_some() || record.transfer_reason_descriptions.is_some() {
        println!();
        println!("Transfer:");
        println!("  Reasons:      {}", record.transfer_reasons.as_deref().unwrap_or("-"));
        println!(
            "  Descriptions: {}",
            record.transfer_reason_descriptions.as_deref().unwrap_or("-")
        );
    }
    println!();
    println!("Playback:");
    println!("  Filtered:     {}", playback_display(&locator, &record, Playback::Filtered));
    println!("  Conversation: {}", playback_display(&locator, &record, Playback::Conversation));

    Ok(())
}

/// Show the resolved configuration (for debugging)
async fn show_config(db: Option<PathBuf>) -> Result<()> {
    let cfg = config::config()?;
    let ingest = &cfg.ingest;

    println!("callsync configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home (state):     {}", cfg.home.display());
    println!("  Recordings root:  {}", cfg.recordings_root.display());
    println!(
        "  Database:         {}",
        db.as_ref().unwrap_or(&cfg.database).display()
    );
    println!();
    println!("Ingest:");
    println!("  Unregistered callers: {:?}", ingest.unregistered_callers);
    println!("  Conversation layouts: {:?}", ingest.conversation_layouts);
    println!("  Settle delay:         {}ms", ingest.settle_delay_ms);
    println!("  Registered only:      {}", ingest.scan_registered_only);
    println!("  Missing root (scan):  {:?}", ingest.missing_root_scan);
    println!("  Missing root (watch): {:?}", ingest.missing_root_watch);
    println!("  Root poll interval:   {}s", ingest.wait_poll_secs);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scan_flags() {
        let cli = Cli::parse_from([
            "callsync",
            "--db",
            "/tmp/calls.db",
            "scan",
            "--path",
            "/srv/rec",
            "--policy",
            "auto-create",
            "--missing-root",
            "wait",
        ]);

        assert_eq!(cli.db, Some(PathBuf::from("/tmp/calls.db")));
        match cli.command {
            Commands::Scan {
                path,
                registered_only,
                policy,
                missing_root,
            } => {
                assert_eq!(path, Some(PathBuf::from("/srv/rec")));
                assert!(!registered_only);
                assert_eq!(policy.map(UnregisteredPolicy::from), Some(UnregisteredPolicy::AutoCreate));
                assert_eq!(missing_root.map(MissingRootPolicy::from), Some(MissingRootPolicy::Wait));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_global_db_after_subcommand() {
        let cli = Cli::parse_from(["callsync", "list", "--db", "x.db", "--json"]);
        assert_eq!(cli.db, Some(PathBuf::from("x.db")));
        match cli.command {
            Commands::List { page, per_page, json, .. } => {
                assert_eq!(page, 1);
                assert_eq!(per_page, DEFAULT_PAGE_SIZE);
                assert!(json);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_show_requires_id_or_session() {
        assert!(Cli::try_parse_from(["callsync", "show"]).is_err());
        assert!(Cli::try_parse_from(["callsync", "show", "3", "--session", "s"]).is_err());
        assert!(Cli::try_parse_from(["callsync", "show", "--session", "s"]).is_ok());
    }

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
